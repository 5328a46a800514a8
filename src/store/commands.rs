use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::models::{
    Attachment, InsertOutcome, Message, NewAttachment, NotificationRecord, ParsedMessage,
    QueuedJob, ScheduleDefinition, WorkItem, WorkStatus,
};

pub(super) type Reply<T> = oneshot::Sender<Result<T, String>>;

pub(super) enum StoreCmd {
    MessageExists {
        message_id: String,
        reply: Reply<bool>,
    },
    InsertMessage {
        account_id: String,
        message: Box<ParsedMessage>,
        attachments: Vec<NewAttachment>,
        reply: Reply<InsertOutcome>,
    },
    LoadMessages {
        account_id: String,
        limit: u32,
        offset: u32,
        reply: Reply<Vec<Message>>,
    },
    LoadMessage {
        id: i64,
        reply: Reply<Option<Message>>,
    },
    LoadAttachments {
        message_id: i64,
        reply: Reply<Vec<Attachment>>,
    },
    MarkRead {
        id: i64,
        read: bool,
        reply: Reply<bool>,
    },
    DeleteMessage {
        id: i64,
        reply: Reply<Vec<String>>,
    },
    Search {
        account_id: String,
        query: String,
        reply: Reply<Vec<Message>>,
    },
    CountMessages {
        account_id: String,
        reply: Reply<u32>,
    },
    SaveSchedule {
        schedule: ScheduleDefinition,
        reply: Reply<i64>,
    },
    LoadSchedule {
        id: i64,
        reply: Reply<Option<ScheduleDefinition>>,
    },
    SetScheduleActive {
        id: i64,
        active: bool,
        reply: Reply<bool>,
    },
    InsertWorkItem {
        item: WorkItem,
        reply: Reply<i64>,
    },
    LoadWorkItem {
        id: i64,
        reply: Reply<Option<WorkItem>>,
    },
    SetWorkItemStatus {
        id: i64,
        status: WorkStatus,
        reply: Reply<bool>,
    },
    InsertNotification {
        record: NotificationRecord,
        reply: Reply<i64>,
    },
    FinishNotification {
        id: i64,
        error: Option<String>,
        reply: Reply<()>,
    },
    LoadNotifications {
        tenant_id: String,
        reply: Reply<Vec<NotificationRecord>>,
    },
    EnqueueJob {
        payload: String,
        execute_at: DateTime<Utc>,
        reply: Reply<i64>,
    },
    TakeDueJobs {
        now: DateTime<Utc>,
        reply: Reply<Vec<QueuedJob>>,
    },
}
