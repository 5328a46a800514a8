//! Test doubles and message fixtures shared by the module tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{DeliveryError, Error, Result};
use crate::imap::{Handle, MailboxSession, SessionState};
use crate::jobs::{Job, JobQueue};
use crate::models::{Frequency, MailboxAccount, Priority, ScheduleDefinition};
use crate::notify::NotificationSender;

pub fn account(id: &str) -> MailboxAccount {
    MailboxAccount {
        id: id.into(),
        label: "Work".into(),
        address: "me@company.com".into(),
        username: "me@company.com".into(),
        password: "secret".into(),
        host: "imap.company.com".into(),
        port: 993,
    }
}

/// Two-part message from an important sender with one PDF attachment.
pub fn budget_message() -> Vec<u8> {
    b"From: The Boss <boss@company.com>\r\n\
To: me@company.com\r\n\
Subject: Urgent: budget review\r\n\
Date: Tue, 1 Jul 2025 10:00:00 +0000\r\n\
Message-ID: <budget-1@company.com>\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"sep\"\r\n\
\r\n\
--sep\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Urgent: please review budget\r\n\
--sep\r\n\
Content-Type: application/pdf\r\n\
Content-Disposition: attachment; filename=\"budget.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQK\r\n\
--sep--\r\n"
        .to_vec()
}

pub fn simple_message(message_id: &str, subject: &str) -> Vec<u8> {
    format!(
        "From: Alice <alice@example.com>\r\n\
         To: me@company.com\r\n\
         Subject: {subject}\r\n\
         Date: Tue, 1 Jul 2025 09:00:00 +0000\r\n\
         Message-ID: {message_id}\r\n\
         \r\n\
         Body of {subject}\r\n"
    )
    .into_bytes()
}

#[derive(Debug, Clone, Copy)]
pub enum FetchFailure {
    /// Per-message server error; the session survives.
    Protocol,
    /// The session dies on this fetch.
    Connection,
}

/// Scripted mailbox: message `i` of the list is handle `i + 1`.
#[derive(Debug)]
pub struct FakeMailbox {
    messages: Vec<Vec<u8>>,
    state: SessionState,
    refuse_connect: bool,
    reject_login: bool,
    fetch_failures: HashMap<u32, FetchFailure>,
    pub fetched: Vec<Handle>,
    pub close_calls: usize,
}

impl FakeMailbox {
    pub fn new(messages: Vec<Vec<u8>>) -> Self {
        Self {
            messages,
            state: SessionState::Disconnected,
            refuse_connect: false,
            reject_login: false,
            fetch_failures: HashMap::new(),
            fetched: Vec::new(),
            close_calls: 0,
        }
    }

    pub fn refuse_connect(mut self) -> Self {
        self.refuse_connect = true;
        self
    }

    pub fn reject_login(mut self) -> Self {
        self.reject_login = true;
        self
    }

    pub fn fail_fetch(mut self, handle: u32, failure: FetchFailure) -> Self {
        self.fetch_failures.insert(handle, failure);
        self
    }

    fn require(&self, operation: &'static str, expected: SessionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: self.state,
            })
        }
    }
}

#[async_trait]
impl MailboxSession for FakeMailbox {
    fn state(&self) -> SessionState {
        self.state
    }

    async fn connect(&mut self, _host: &str, _port: u16) -> Result<()> {
        self.require("connect", SessionState::Disconnected)?;
        if self.refuse_connect {
            return Err(Error::Connection("connection refused".into()));
        }
        self.state = SessionState::Connected;
        Ok(())
    }

    async fn authenticate(&mut self, _user: &str, _secret: &str) -> Result<()> {
        self.require("authenticate", SessionState::Connected)?;
        if self.reject_login {
            return Err(Error::Auth("invalid credentials".into()));
        }
        self.state = SessionState::Authenticated;
        Ok(())
    }

    async fn select_mailbox(&mut self, name: &str) -> Result<u32> {
        self.require("select", SessionState::Authenticated)?;
        if !name.eq_ignore_ascii_case("INBOX") {
            return Err(Error::Protocol(format!("no mailbox '{name}'")));
        }
        self.state = SessionState::Selected;
        Ok(self.messages.len() as u32)
    }

    async fn search_all(&mut self) -> Result<Vec<Handle>> {
        self.require("search", SessionState::Selected)?;
        Ok((1..=self.messages.len() as u32).map(Handle).collect())
    }

    async fn fetch(&mut self, handle: Handle) -> Result<Vec<u8>> {
        self.require("fetch", SessionState::Selected)?;
        self.fetched.push(handle);
        match self.fetch_failures.get(&handle.0) {
            Some(FetchFailure::Protocol) => {
                return Err(Error::Protocol(format!("FETCH {} failed", handle.0)))
            }
            Some(FetchFailure::Connection) => {
                self.state = SessionState::Closed;
                return Err(Error::Connection("connection reset".into()));
            }
            None => {}
        }
        self.messages
            .get(handle.0 as usize - 1)
            .cloned()
            .ok_or_else(|| Error::Protocol(format!("no message {}", handle.0)))
    }

    async fn close(&mut self) {
        self.close_calls += 1;
        self.state = SessionState::Closed;
    }
}

// ---------------------------------------------------------------------------
// Schedules, queue and sender doubles
// ---------------------------------------------------------------------------

pub fn schedule_for(
    frequency: Frequency,
    starts_at: DateTime<Utc>,
    ends_at: Option<DateTime<Utc>>,
) -> ScheduleDefinition {
    ScheduleDefinition {
        id: 0,
        tenant_id: "acme".into(),
        title: "Weekly report".into(),
        description: "Summarize the week".into(),
        assignee_name: "Bob".into(),
        assignee_email: "bob@acme.test".into(),
        assigned_by: "Carol".into(),
        category: None,
        priority: Priority::High,
        frequency,
        starts_at,
        ends_at,
        is_active: true,
    }
}

/// Captures `(recipient, subject, body)` per send.
#[derive(Debug, Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(String, String, String)>>,
    failure: Option<String>,
}

impl RecordingSender {
    /// Every send fails with a transport error carrying `reason`.
    pub fn failing(reason: &str) -> Self {
        Self {
            sent: Mutex::default(),
            failure: Some(reason.into()),
        }
    }

    pub fn sent(&self) -> Vec<(String, String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> std::result::Result<(), DeliveryError> {
        if let Some(reason) = &self.failure {
            return Err(DeliveryError::Transport(reason.clone()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((recipient.into(), subject.into(), body.into()));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingQueue {
    scheduled: Mutex<Vec<(Job, DateTime<Utc>)>>,
    dispatched: Mutex<Vec<Job>>,
    fail_dispatch: AtomicBool,
}

impl RecordingQueue {
    /// Schedule runs queued so far, as `(schedule_id, execute_at)`.
    pub fn scheduled_runs(&self) -> Vec<(i64, DateTime<Utc>)> {
        self.scheduled
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(job, at)| match job {
                Job::RunSchedule { schedule_id } => Some((*schedule_id, *at)),
                _ => None,
            })
            .collect()
    }

    pub fn dispatched(&self) -> Vec<Job> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.scheduled.lock().unwrap().clear();
        self.dispatched.lock().unwrap().clear();
    }

    pub fn fail_dispatch(&self) {
        self.fail_dispatch.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn schedule(&self, job: Job, execute_at: DateTime<Utc>) -> Result<()> {
        self.scheduled.lock().unwrap().push((job, execute_at));
        Ok(())
    }

    async fn dispatch(&self, job: Job) -> Result<()> {
        if self.fail_dispatch.load(Ordering::SeqCst) {
            return Err(Error::Store("queue unavailable".into()));
        }
        self.dispatched.lock().unwrap().push(job);
        Ok(())
    }
}
