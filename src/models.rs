use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AccountId;

/// Tenant (company) scope for schedules, work items and the audit log.
pub type TenantId = String;

/// A remote mailbox the pipeline reads from. Owned by the surrounding
/// application; the pipeline never mutates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxAccount {
    pub id: AccountId,
    pub label: String,
    pub address: String,
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
}

/// A stored message as read back from the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: i64,
    pub account_id: AccountId,
    /// Protocol-assigned `Message-ID`; the dedup key.
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub sender_name: String,
    pub recipient: String,
    pub received_at: DateTime<Utc>,
    pub body_text: String,
    pub body_html: Option<String>,
    pub is_read: bool,
    pub attachment_count: u32,
}

/// A message freshly parsed from raw bytes, not yet persisted.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub sender_name: String,
    pub recipient: String,
    pub received_at: DateTime<Utc>,
    pub body_text: String,
    pub body_html: Option<String>,
    pub attachments: Vec<ExtractedAttachment>,
}

/// Decoded attachment payload pulled out of a MIME tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedAttachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl ExtractedAttachment {
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Attachment metadata ready to be inserted alongside its message.
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    pub blob_ref: String,
}

/// A stored attachment row. Bytes live in blob storage under `blob_ref`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub id: i64,
    pub message_id: i64,
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    pub blob_ref: String,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.content_type.to_ascii_lowercase().starts_with("image/")
    }

    pub fn is_pdf(&self) -> bool {
        self.content_type.eq_ignore_ascii_case("application/pdf")
    }
}

/// Result of the atomic check-and-insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    /// Another row already holds this `Message-ID`. Expected, not an error.
    Duplicate,
}

// ---------------------------------------------------------------------------
// Schedules and units of work
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Once,
    Daily,
    Weekly,
    Monthly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "once" => Some(Self::Once),
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            _ => None,
        }
    }
}

impl WorkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Completed and cancelled items no longer get reminders.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
            Self::Urgent => "Urgent",
        }
    }
}

/// Template for a recurring unit of work. Written by the application,
/// read-only to the notifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDefinition {
    pub id: i64,
    pub tenant_id: TenantId,
    pub title: String,
    pub description: String,
    pub assignee_name: String,
    pub assignee_email: String,
    pub assigned_by: String,
    pub category: Option<String>,
    pub priority: Priority,
    pub frequency: Frequency,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// One concrete task instance created from a schedule template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: i64,
    pub tenant_id: TenantId,
    pub schedule_id: Option<i64>,
    pub title: String,
    pub description: String,
    pub assignee_name: String,
    pub assignee_email: String,
    pub assigned_by: String,
    pub category: Option<String>,
    pub priority: Priority,
    pub status: WorkStatus,
    pub due_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Audit record for one notification attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: i64,
    pub tenant_id: TenantId,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub work_item_id: Option<i64>,
    pub sent: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A job row claimed from the durable queue. The payload is the
/// JSON-encoded job; the store does not interpret it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub id: i64,
    pub payload: String,
    pub execute_at: DateTime<Utc>,
}
