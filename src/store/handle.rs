use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tokio::sync::{mpsc, oneshot};

use super::commands::{Reply, StoreCmd};
use super::queries;
use super::schema::{run_migrations, SCHEMA};
use crate::error::{Error, Result};
use crate::models::{
    Attachment, InsertOutcome, Message, NewAttachment, NotificationRecord, ParsedMessage,
    QueuedJob, ScheduleDefinition, WorkItem, WorkStatus,
};

// ---------------------------------------------------------------------------
// StoreHandle — Clone + Send + Sync async facade
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::UnboundedSender<StoreCmd>,
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle").finish_non_exhaustive()
    }
}

impl StoreHandle {
    /// Open (or create) the store under the platform data directory.
    pub fn open() -> Result<Self> {
        Self::open_at(&Self::default_dir())
    }

    /// Open (or create) `store.db` inside `dir` and spawn the background thread.
    pub fn open_at(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::Store(format!("Failed to create store dir: {e}")))?;
        let conn = Connection::open(dir.join("store.db"))
            .map_err(|e| Error::Store(format!("Failed to open store db: {e}")))?;
        Self::start(conn)
    }

    /// A private database that lives as long as the handle.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Store(format!("Failed to open in-memory db: {e}")))?;
        Self::start(conn)
    }

    pub fn default_dir() -> PathBuf {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join("inbox-triage")
    }

    fn start(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::Store(format!("Failed to init store schema: {e}")))?;
        run_migrations(&conn);

        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("inbox-triage-store".into())
            .spawn(move || run_loop(conn, rx))
            .map_err(|e| Error::Store(format!("Failed to spawn store thread: {e}")))?;

        Ok(StoreHandle { tx })
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> StoreCmd) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| Error::Store("Store unavailable".into()))?;
        rx.await
            .map_err(|_| Error::Store("Store unavailable".into()))?
            .map_err(Error::Store)
    }

    // -- messages ------------------------------------------------------------

    pub async fn message_exists(&self, message_id: &str) -> Result<bool> {
        let message_id = message_id.to_string();
        self.request(|reply| StoreCmd::MessageExists { message_id, reply })
            .await
    }

    /// Atomically insert a message with its attachment rows. Returns
    /// [`InsertOutcome::Duplicate`] when the `Message-ID` is already stored.
    pub async fn insert_message(
        &self,
        account_id: &str,
        message: ParsedMessage,
        attachments: Vec<NewAttachment>,
    ) -> Result<InsertOutcome> {
        let account_id = account_id.to_string();
        self.request(|reply| StoreCmd::InsertMessage {
            account_id,
            message: Box::new(message),
            attachments,
            reply,
        })
        .await
    }

    /// One page of an account's messages, newest first.
    pub async fn load_messages(
        &self,
        account_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Message>> {
        let account_id = account_id.to_string();
        self.request(|reply| StoreCmd::LoadMessages {
            account_id,
            limit,
            offset,
            reply,
        })
        .await
    }

    pub async fn load_message(&self, id: i64) -> Result<Option<Message>> {
        self.request(|reply| StoreCmd::LoadMessage { id, reply }).await
    }

    pub async fn load_attachments(&self, message_id: i64) -> Result<Vec<Attachment>> {
        self.request(|reply| StoreCmd::LoadAttachments { message_id, reply })
            .await
    }

    /// Returns false when no such message exists.
    pub async fn mark_read(&self, id: i64, read: bool) -> Result<bool> {
        self.request(|reply| StoreCmd::MarkRead { id, read, reply })
            .await
    }

    /// Delete a message and its attachment rows. Returns the blob refs that
    /// are now orphaned.
    pub async fn delete_message(&self, id: i64) -> Result<Vec<String>> {
        self.request(|reply| StoreCmd::DeleteMessage { id, reply })
            .await
    }

    pub async fn search(&self, account_id: &str, query: &str) -> Result<Vec<Message>> {
        let account_id = account_id.to_string();
        let query = query.to_string();
        self.request(|reply| StoreCmd::Search {
            account_id,
            query,
            reply,
        })
        .await
    }

    pub async fn count_messages(&self, account_id: &str) -> Result<u32> {
        let account_id = account_id.to_string();
        self.request(|reply| StoreCmd::CountMessages { account_id, reply })
            .await
    }

    // -- schedules and work items -------------------------------------------

    /// Insert when `schedule.id == 0`, otherwise update. Returns the row id.
    pub async fn save_schedule(&self, schedule: ScheduleDefinition) -> Result<i64> {
        self.request(|reply| StoreCmd::SaveSchedule { schedule, reply })
            .await
    }

    pub async fn load_schedule(&self, id: i64) -> Result<Option<ScheduleDefinition>> {
        self.request(|reply| StoreCmd::LoadSchedule { id, reply })
            .await
    }

    pub async fn set_schedule_active(&self, id: i64, active: bool) -> Result<bool> {
        self.request(|reply| StoreCmd::SetScheduleActive { id, active, reply })
            .await
    }

    /// `item.id` is ignored; the assigned row id is returned.
    pub async fn insert_work_item(&self, item: WorkItem) -> Result<i64> {
        self.request(|reply| StoreCmd::InsertWorkItem { item, reply })
            .await
    }

    pub async fn load_work_item(&self, id: i64) -> Result<Option<WorkItem>> {
        self.request(|reply| StoreCmd::LoadWorkItem { id, reply })
            .await
    }

    pub async fn set_work_item_status(&self, id: i64, status: WorkStatus) -> Result<bool> {
        self.request(|reply| StoreCmd::SetWorkItemStatus { id, status, reply })
            .await
    }

    // -- notification audit log ----------------------------------------------

    /// `record.id` is ignored; the assigned row id is returned.
    pub async fn insert_notification(&self, record: NotificationRecord) -> Result<i64> {
        self.request(|reply| StoreCmd::InsertNotification { record, reply })
            .await
    }

    pub async fn finish_notification(&self, id: i64, error: Option<String>) -> Result<()> {
        self.request(|reply| StoreCmd::FinishNotification { id, error, reply })
            .await
    }

    pub async fn load_notifications(&self, tenant_id: &str) -> Result<Vec<NotificationRecord>> {
        let tenant_id = tenant_id.to_string();
        self.request(|reply| StoreCmd::LoadNotifications { tenant_id, reply })
            .await
    }

    // -- job queue -----------------------------------------------------------

    pub async fn enqueue_job(&self, payload: String, execute_at: DateTime<Utc>) -> Result<i64> {
        self.request(|reply| StoreCmd::EnqueueJob {
            payload,
            execute_at,
            reply,
        })
        .await
    }

    pub async fn take_due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<QueuedJob>> {
        self.request(|reply| StoreCmd::TakeDueJobs { now, reply })
            .await
    }
}

// -- background thread ---------------------------------------------------

fn run_loop(conn: Connection, mut rx: mpsc::UnboundedReceiver<StoreCmd>) {
    while let Some(cmd) = rx.blocking_recv() {
        match cmd {
            StoreCmd::MessageExists { message_id, reply } => {
                let _ = reply.send(queries::do_message_exists(&conn, &message_id));
            }
            StoreCmd::InsertMessage {
                account_id,
                message,
                attachments,
                reply,
            } => {
                let _ = reply.send(queries::do_insert_message(
                    &conn,
                    &account_id,
                    &message,
                    &attachments,
                ));
            }
            StoreCmd::LoadMessages {
                account_id,
                limit,
                offset,
                reply,
            } => {
                let _ = reply.send(queries::do_load_messages(&conn, &account_id, limit, offset));
            }
            StoreCmd::LoadMessage { id, reply } => {
                let _ = reply.send(queries::do_load_message(&conn, id));
            }
            StoreCmd::LoadAttachments { message_id, reply } => {
                let _ = reply.send(queries::do_load_attachments(&conn, message_id));
            }
            StoreCmd::MarkRead { id, read, reply } => {
                let _ = reply.send(queries::do_mark_read(&conn, id, read));
            }
            StoreCmd::DeleteMessage { id, reply } => {
                let _ = reply.send(queries::do_delete_message(&conn, id));
            }
            StoreCmd::Search {
                account_id,
                query,
                reply,
            } => {
                let _ = reply.send(queries::do_search(&conn, &account_id, &query));
            }
            StoreCmd::CountMessages { account_id, reply } => {
                let _ = reply.send(queries::do_count_messages(&conn, &account_id));
            }
            StoreCmd::SaveSchedule { schedule, reply } => {
                let _ = reply.send(queries::do_save_schedule(&conn, &schedule));
            }
            StoreCmd::LoadSchedule { id, reply } => {
                let _ = reply.send(queries::do_load_schedule(&conn, id));
            }
            StoreCmd::SetScheduleActive { id, active, reply } => {
                let _ = reply.send(queries::do_set_schedule_active(&conn, id, active));
            }
            StoreCmd::InsertWorkItem { item, reply } => {
                let _ = reply.send(queries::do_insert_work_item(&conn, &item));
            }
            StoreCmd::LoadWorkItem { id, reply } => {
                let _ = reply.send(queries::do_load_work_item(&conn, id));
            }
            StoreCmd::SetWorkItemStatus { id, status, reply } => {
                let _ = reply.send(queries::do_set_work_item_status(&conn, id, status));
            }
            StoreCmd::InsertNotification { record, reply } => {
                let _ = reply.send(queries::do_insert_notification(&conn, &record));
            }
            StoreCmd::FinishNotification { id, error, reply } => {
                let _ = reply.send(queries::do_finish_notification(&conn, id, error.as_deref()));
            }
            StoreCmd::LoadNotifications { tenant_id, reply } => {
                let _ = reply.send(queries::do_load_notifications(&conn, &tenant_id));
            }
            StoreCmd::EnqueueJob {
                payload,
                execute_at,
                reply,
            } => {
                let _ = reply.send(queries::do_enqueue_job(&conn, &payload, execute_at));
            }
            StoreCmd::TakeDueJobs { now, reply } => {
                let _ = reply.send(queries::do_take_due_jobs(&conn, now));
            }
        }
    }
    log::debug!("Store thread exiting");
}
