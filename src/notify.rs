use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{DeliveryError, Error, Result};
use crate::models::{NotificationRecord, WorkItem};
use crate::store::StoreHandle;

/// Outbound delivery of a plain-text notice.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(
        &self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> std::result::Result<(), DeliveryError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent { record_id: i64 },
    /// Delivery failed; the failure is in the audit log, not propagated.
    Failed { record_id: i64, error: DeliveryError },
    /// Reminder for an item that is already completed or cancelled.
    Skipped,
}

/// Sends work-item notices and keeps the audit log.
///
/// Every attempt gets a [`NotificationRecord`] before the send, updated
/// with the outcome afterwards.
pub struct Notifier {
    store: StoreHandle,
    sender: Arc<dyn NotificationSender>,
}

impl Notifier {
    pub fn new(store: StoreHandle, sender: Arc<dyn NotificationSender>) -> Self {
        Self { store, sender }
    }

    pub async fn send_assignment(&self, work_item_id: i64) -> Result<NotifyOutcome> {
        let item = self.load(work_item_id).await?;
        let (subject, body) = assignment_notice(&item);
        self.deliver(&item, subject, body).await
    }

    pub async fn send_reminder(&self, work_item_id: i64) -> Result<NotifyOutcome> {
        let item = self.load(work_item_id).await?;
        if item.status.is_closed() {
            log::debug!("Work item {work_item_id} is {}, no reminder", item.status.as_str());
            return Ok(NotifyOutcome::Skipped);
        }
        let (subject, body) = reminder_notice(&item);
        self.deliver(&item, subject, body).await
    }

    async fn load(&self, work_item_id: i64) -> Result<WorkItem> {
        self.store
            .load_work_item(work_item_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("work item {work_item_id}")))
    }

    async fn deliver(&self, item: &WorkItem, subject: String, body: String) -> Result<NotifyOutcome> {
        let record_id = self
            .store
            .insert_notification(NotificationRecord {
                id: 0,
                tenant_id: item.tenant_id.clone(),
                recipient: item.assignee_email.clone(),
                subject: subject.clone(),
                body: body.clone(),
                work_item_id: Some(item.id),
                sent: false,
                error: None,
                created_at: Utc::now(),
            })
            .await?;

        match self.sender.send(&item.assignee_email, &subject, &body).await {
            Ok(()) => {
                self.store.finish_notification(record_id, None).await?;
                Ok(NotifyOutcome::Sent { record_id })
            }
            Err(error) => {
                log::warn!(
                    "Notice for work item {} to {} failed: {error}",
                    item.id,
                    item.assignee_email
                );
                self.store
                    .finish_notification(record_id, Some(error.to_string()))
                    .await?;
                Ok(NotifyOutcome::Failed { record_id, error })
            }
        }
    }
}

fn assignment_notice(item: &WorkItem) -> (String, String) {
    let subject = format!("New Task Assigned: {}", item.title);
    let body = format!(
        "Hello {name},\n\
         \n\
         You have been assigned a new task:\n\
         \n\
         Title: {title}\n\
         Description: {description}\n\
         Priority: {priority}\n\
         Due Date: {due}\n\
         Assigned by: {by}\n\
         \n\
         Please log in to the system to view more details.\n",
        name = item.assignee_name,
        title = item.title,
        description = item.description,
        priority = item.priority.label(),
        due = item.due_at.format("%Y-%m-%d %H:%M"),
        by = item.assigned_by,
    );
    (subject, body)
}

fn reminder_notice(item: &WorkItem) -> (String, String) {
    let subject = format!("Task Reminder: {}", item.title);
    let body = format!(
        "Hello {name},\n\
         \n\
         This is a reminder for your pending task:\n\
         \n\
         Title: {title}\n\
         Due Date: {due}\n\
         Priority: {priority}\n\
         \n\
         Please complete this task as soon as possible.\n",
        name = item.assignee_name,
        title = item.title,
        due = item.due_at.format("%Y-%m-%d %H:%M"),
        priority = item.priority.label(),
    );
    (subject, body)
}
