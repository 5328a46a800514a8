use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension};

use crate::models::{
    Attachment, Frequency, InsertOutcome, Message, NewAttachment, NotificationRecord,
    ParsedMessage, Priority, QueuedJob, ScheduleDefinition, WorkItem, WorkStatus,
};

fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

/// Decode an enum stored as TEXT, surfacing unknown values as a row error.
fn text_enum<T>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    parse: fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown value '{raw}'").into(),
        )
    })
}

// ---------------------------------------------------------------------------
// Messages and attachments
// ---------------------------------------------------------------------------

/// Shared row-to-struct mapping for message loads and searches.
///
/// Expects columns in this order:
///   0: id, 1: account_id, 2: message_id, 3: subject, 4: sender,
///   5: sender_name, 6: recipient, 7: received_at, 8: body_text,
///   9: body_html, 10: is_read, 11: attachment_count
const MESSAGE_COLUMNS: &str = "m.id, m.account_id, m.message_id, m.subject, m.sender,
    m.sender_name, m.recipient, m.received_at, m.body_text, m.body_html, m.is_read,
    (SELECT COUNT(*) FROM attachments a WHERE a.message_id = m.id)";

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        account_id: row.get(1)?,
        message_id: row.get(2)?,
        subject: row.get(3)?,
        sender: row.get(4)?,
        sender_name: row.get(5)?,
        recipient: row.get(6)?,
        received_at: ts(row.get(7)?),
        body_text: row.get(8)?,
        body_html: row.get(9)?,
        is_read: row.get::<_, i32>(10)? != 0,
        attachment_count: row.get(11)?,
    })
}

pub(super) fn do_message_exists(conn: &Connection, message_id: &str) -> Result<bool, String> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM messages WHERE message_id = ?1)",
        [message_id],
        |row| row.get::<_, bool>(0),
    )
    .map_err(|e| format!("Store exists error: {e}"))
}

/// Insert a message and its attachment rows in one transaction.
///
/// The `UNIQUE(message_id)` constraint decides the race: when another row
/// already holds the id nothing is written and `Duplicate` is returned.
pub(super) fn do_insert_message(
    conn: &Connection,
    account_id: &str,
    message: &ParsedMessage,
    attachments: &[NewAttachment],
) -> Result<InsertOutcome, String> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| format!("Store tx error: {e}"))?;

    let inserted = tx
        .execute(
            "INSERT OR IGNORE INTO messages
             (account_id, message_id, subject, sender, sender_name, recipient,
              received_at, body_text, body_html, is_read)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0)",
            rusqlite::params![
                account_id,
                message.message_id,
                message.subject,
                message.sender,
                message.sender_name,
                message.recipient,
                message.received_at.timestamp(),
                message.body_text,
                message.body_html,
            ],
        )
        .map_err(|e| format!("Store insert error: {e}"))?;

    if inserted == 0 {
        // Nothing to roll back; dropping the transaction is enough.
        return Ok(InsertOutcome::Duplicate);
    }
    let row_id = tx.last_insert_rowid();

    let mut stmt = tx
        .prepare(
            "INSERT INTO attachments (message_id, filename, content_type, size, blob_ref)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .map_err(|e| format!("Store prepare error: {e}"))?;
    for att in attachments {
        stmt.execute(rusqlite::params![
            row_id,
            att.filename,
            att.content_type,
            att.size as i64,
            att.blob_ref,
        ])
        .map_err(|e| format!("Store attachment insert error: {e}"))?;
    }
    drop(stmt);

    tx.commit().map_err(|e| format!("Store commit error: {e}"))?;
    Ok(InsertOutcome::Inserted(row_id))
}

pub(super) fn do_load_messages(
    conn: &Connection,
    account_id: &str,
    limit: u32,
    offset: u32,
) -> Result<Vec<Message>, String> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages m
         WHERE m.account_id = ?1
         ORDER BY m.received_at DESC, m.id DESC
         LIMIT ?2 OFFSET ?3"
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| format!("Store prepare error: {e}"))?;
    let rows = stmt
        .query_map(rusqlite::params![account_id, limit, offset], row_to_message)
        .map_err(|e| format!("Store query error: {e}"))?;

    let mut messages = Vec::new();
    for row in rows {
        messages.push(row.map_err(|e| format!("Store row error: {e}"))?);
    }
    Ok(messages)
}

pub(super) fn do_load_message(conn: &Connection, id: i64) -> Result<Option<Message>, String> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages m WHERE m.id = ?1");
    conn.query_row(&sql, [id], row_to_message)
        .optional()
        .map_err(|e| format!("Store load error: {e}"))
}

pub(super) fn do_load_attachments(
    conn: &Connection,
    message_id: i64,
) -> Result<Vec<Attachment>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT id, message_id, filename, content_type, size, blob_ref
             FROM attachments WHERE message_id = ?1 ORDER BY id",
        )
        .map_err(|e| format!("Store prepare error: {e}"))?;
    let rows = stmt
        .query_map([message_id], |row| {
            Ok(Attachment {
                id: row.get(0)?,
                message_id: row.get(1)?,
                filename: row.get(2)?,
                content_type: row.get(3)?,
                size: row.get::<_, i64>(4)? as u64,
                blob_ref: row.get(5)?,
            })
        })
        .map_err(|e| format!("Store query error: {e}"))?;

    let mut attachments = Vec::new();
    for row in rows {
        attachments.push(row.map_err(|e| format!("Store row error: {e}"))?);
    }
    Ok(attachments)
}

pub(super) fn do_mark_read(conn: &Connection, id: i64, read: bool) -> Result<bool, String> {
    let changed = conn
        .execute(
            "UPDATE messages SET is_read = ?1 WHERE id = ?2",
            rusqlite::params![read as i32, id],
        )
        .map_err(|e| format!("Store mark_read error: {e}"))?;
    Ok(changed > 0)
}

/// Delete a message. Attachment rows cascade; their blob refs are returned so
/// the caller can remove the payloads.
pub(super) fn do_delete_message(conn: &Connection, id: i64) -> Result<Vec<String>, String> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| format!("Store tx error: {e}"))?;

    let refs = {
        let mut stmt = tx
            .prepare("SELECT blob_ref FROM attachments WHERE message_id = ?1")
            .map_err(|e| format!("Store prepare error: {e}"))?;
        let rows = stmt
            .query_map([id], |row| row.get::<_, String>(0))
            .map_err(|e| format!("Store query error: {e}"))?;
        let mut refs = Vec::new();
        for row in rows {
            refs.push(row.map_err(|e| format!("Store row error: {e}"))?);
        }
        refs
    };

    tx.execute("DELETE FROM messages WHERE id = ?1", [id])
        .map_err(|e| format!("Store delete error: {e}"))?;

    tx.commit().map_err(|e| format!("Store commit error: {e}"))?;
    Ok(refs)
}

/// Case-insensitive substring search over subject, sender and body.
pub(super) fn do_search(
    conn: &Connection,
    account_id: &str,
    query: &str,
) -> Result<Vec<Message>, String> {
    let query = query.trim();
    if query.is_empty() {
        return Ok(Vec::new());
    }

    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    let pattern = format!("%{escaped}%");

    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages m
         WHERE m.account_id = ?1
           AND (m.subject LIKE ?2 ESCAPE '\\'
                OR m.sender LIKE ?2 ESCAPE '\\'
                OR m.sender_name LIKE ?2 ESCAPE '\\'
                OR m.body_text LIKE ?2 ESCAPE '\\')
         ORDER BY m.received_at DESC, m.id DESC
         LIMIT 200"
    );
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| format!("Search prepare error: {e}"))?;
    let rows = stmt
        .query_map(rusqlite::params![account_id, pattern], row_to_message)
        .map_err(|e| format!("Search query error: {e}"))?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row.map_err(|e| format!("Search row error: {e}"))?);
    }
    Ok(results)
}

pub(super) fn do_count_messages(conn: &Connection, account_id: &str) -> Result<u32, String> {
    conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE account_id = ?1",
        [account_id],
        |row| row.get(0),
    )
    .map_err(|e| format!("Store count error: {e}"))
}

// ---------------------------------------------------------------------------
// Schedules and work items
// ---------------------------------------------------------------------------

/// Insert when `id == 0`, otherwise overwrite the existing row.
pub(super) fn do_save_schedule(
    conn: &Connection,
    schedule: &ScheduleDefinition,
) -> Result<i64, String> {
    let priority = schedule.priority.as_str();
    let frequency = schedule.frequency.as_str();
    let starts_at = schedule.starts_at.timestamp();
    let ends_at = schedule.ends_at.map(|t| t.timestamp());
    let is_active = schedule.is_active as i32;
    let params = rusqlite::params![
        schedule.tenant_id,
        schedule.title,
        schedule.description,
        schedule.assignee_name,
        schedule.assignee_email,
        schedule.assigned_by,
        schedule.category,
        priority,
        frequency,
        starts_at,
        ends_at,
        is_active,
        schedule.id,
    ];

    if schedule.id == 0 {
        conn.execute(
            "INSERT INTO schedules
             (tenant_id, title, description, assignee_name, assignee_email, assigned_by,
              category, priority, frequency, starts_at, ends_at, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            &params[..12],
        )
        .map_err(|e| format!("Store schedule insert error: {e}"))?;
        return Ok(conn.last_insert_rowid());
    }

    let changed = conn
        .execute(
            "UPDATE schedules SET tenant_id = ?1, title = ?2, description = ?3,
             assignee_name = ?4, assignee_email = ?5, assigned_by = ?6, category = ?7,
             priority = ?8, frequency = ?9, starts_at = ?10, ends_at = ?11, is_active = ?12
             WHERE id = ?13",
            params,
        )
        .map_err(|e| format!("Store schedule update error: {e}"))?;
    if changed == 0 {
        return Err(format!("schedule {} does not exist", schedule.id));
    }
    Ok(schedule.id)
}

pub(super) fn do_load_schedule(
    conn: &Connection,
    id: i64,
) -> Result<Option<ScheduleDefinition>, String> {
    conn.query_row(
        "SELECT id, tenant_id, title, description, assignee_name, assignee_email,
                assigned_by, category, priority, frequency, starts_at, ends_at, is_active
         FROM schedules WHERE id = ?1",
        [id],
        |row| {
            Ok(ScheduleDefinition {
                id: row.get(0)?,
                tenant_id: row.get(1)?,
                title: row.get(2)?,
                description: row.get(3)?,
                assignee_name: row.get(4)?,
                assignee_email: row.get(5)?,
                assigned_by: row.get(6)?,
                category: row.get(7)?,
                priority: text_enum(row, 8, Priority::parse)?,
                frequency: text_enum(row, 9, Frequency::parse)?,
                starts_at: ts(row.get(10)?),
                ends_at: row.get::<_, Option<i64>>(11)?.map(ts),
                is_active: row.get::<_, i32>(12)? != 0,
            })
        },
    )
    .optional()
    .map_err(|e| format!("Store schedule load error: {e}"))
}

pub(super) fn do_set_schedule_active(
    conn: &Connection,
    id: i64,
    active: bool,
) -> Result<bool, String> {
    let changed = conn
        .execute(
            "UPDATE schedules SET is_active = ?1 WHERE id = ?2",
            rusqlite::params![active as i32, id],
        )
        .map_err(|e| format!("Store schedule update error: {e}"))?;
    Ok(changed > 0)
}

pub(super) fn do_insert_work_item(conn: &Connection, item: &WorkItem) -> Result<i64, String> {
    conn.execute(
        "INSERT INTO work_items
         (tenant_id, schedule_id, title, description, assignee_name, assignee_email,
          assigned_by, category, priority, status, due_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        rusqlite::params![
            item.tenant_id,
            item.schedule_id,
            item.title,
            item.description,
            item.assignee_name,
            item.assignee_email,
            item.assigned_by,
            item.category,
            item.priority.as_str(),
            item.status.as_str(),
            item.due_at.timestamp(),
            item.created_at.timestamp(),
        ],
    )
    .map_err(|e| format!("Store work item insert error: {e}"))?;
    Ok(conn.last_insert_rowid())
}

pub(super) fn do_load_work_item(conn: &Connection, id: i64) -> Result<Option<WorkItem>, String> {
    conn.query_row(
        "SELECT id, tenant_id, schedule_id, title, description, assignee_name,
                assignee_email, assigned_by, category, priority, status, due_at, created_at
         FROM work_items WHERE id = ?1",
        [id],
        |row| {
            Ok(WorkItem {
                id: row.get(0)?,
                tenant_id: row.get(1)?,
                schedule_id: row.get(2)?,
                title: row.get(3)?,
                description: row.get(4)?,
                assignee_name: row.get(5)?,
                assignee_email: row.get(6)?,
                assigned_by: row.get(7)?,
                category: row.get(8)?,
                priority: text_enum(row, 9, Priority::parse)?,
                status: text_enum(row, 10, WorkStatus::parse)?,
                due_at: ts(row.get(11)?),
                created_at: ts(row.get(12)?),
            })
        },
    )
    .optional()
    .map_err(|e| format!("Store work item load error: {e}"))
}

pub(super) fn do_set_work_item_status(
    conn: &Connection,
    id: i64,
    status: WorkStatus,
) -> Result<bool, String> {
    let changed = conn
        .execute(
            "UPDATE work_items SET status = ?1 WHERE id = ?2",
            rusqlite::params![status.as_str(), id],
        )
        .map_err(|e| format!("Store work item update error: {e}"))?;
    Ok(changed > 0)
}

// ---------------------------------------------------------------------------
// Notification audit log
// ---------------------------------------------------------------------------

pub(super) fn do_insert_notification(
    conn: &Connection,
    record: &NotificationRecord,
) -> Result<i64, String> {
    conn.execute(
        "INSERT INTO notifications
         (tenant_id, recipient, subject, body, work_item_id, sent, error, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            record.tenant_id,
            record.recipient,
            record.subject,
            record.body,
            record.work_item_id,
            record.sent as i32,
            record.error,
            record.created_at.timestamp(),
        ],
    )
    .map_err(|e| format!("Store notification insert error: {e}"))?;
    Ok(conn.last_insert_rowid())
}

/// Record the outcome of a send attempt. `error == None` means delivered.
pub(super) fn do_finish_notification(
    conn: &Connection,
    id: i64,
    error: Option<&str>,
) -> Result<(), String> {
    conn.execute(
        "UPDATE notifications SET sent = ?1, error = ?2 WHERE id = ?3",
        rusqlite::params![error.is_none() as i32, error, id],
    )
    .map_err(|e| format!("Store notification update error: {e}"))?;
    Ok(())
}

pub(super) fn do_load_notifications(
    conn: &Connection,
    tenant_id: &str,
) -> Result<Vec<NotificationRecord>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT id, tenant_id, recipient, subject, body, work_item_id, sent, error, created_at
             FROM notifications WHERE tenant_id = ?1
             ORDER BY created_at DESC, id DESC",
        )
        .map_err(|e| format!("Store prepare error: {e}"))?;
    let rows = stmt
        .query_map([tenant_id], |row| {
            Ok(NotificationRecord {
                id: row.get(0)?,
                tenant_id: row.get(1)?,
                recipient: row.get(2)?,
                subject: row.get(3)?,
                body: row.get(4)?,
                work_item_id: row.get(5)?,
                sent: row.get::<_, i32>(6)? != 0,
                error: row.get(7)?,
                created_at: ts(row.get(8)?),
            })
        })
        .map_err(|e| format!("Store query error: {e}"))?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row.map_err(|e| format!("Store row error: {e}"))?);
    }
    Ok(records)
}

// ---------------------------------------------------------------------------
// Job queue
// ---------------------------------------------------------------------------

pub(super) fn do_enqueue_job(
    conn: &Connection,
    payload: &str,
    execute_at: DateTime<Utc>,
) -> Result<i64, String> {
    conn.execute(
        "INSERT INTO jobs (payload, execute_at) VALUES (?1, ?2)",
        rusqlite::params![payload, execute_at.timestamp()],
    )
    .map_err(|e| format!("Store job insert error: {e}"))?;
    Ok(conn.last_insert_rowid())
}

/// Claim every job due at `now`. Claimed rows are deleted in the same
/// transaction, so each job is handed out once.
pub(super) fn do_take_due_jobs(
    conn: &Connection,
    now: DateTime<Utc>,
) -> Result<Vec<QueuedJob>, String> {
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| format!("Store tx error: {e}"))?;

    let jobs = {
        let mut stmt = tx
            .prepare(
                "SELECT id, payload, execute_at FROM jobs
                 WHERE execute_at <= ?1 ORDER BY execute_at, id",
            )
            .map_err(|e| format!("Store prepare error: {e}"))?;
        let rows = stmt
            .query_map([now.timestamp()], |row| {
                Ok(QueuedJob {
                    id: row.get(0)?,
                    payload: row.get(1)?,
                    execute_at: ts(row.get(2)?),
                })
            })
            .map_err(|e| format!("Store query error: {e}"))?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row.map_err(|e| format!("Store row error: {e}"))?);
        }
        jobs
    };

    tx.execute("DELETE FROM jobs WHERE execute_at <= ?1", [now.timestamp()])
        .map_err(|e| format!("Store job delete error: {e}"))?;

    tx.commit().map_err(|e| format!("Store commit error: {e}"))?;
    Ok(jobs)
}
