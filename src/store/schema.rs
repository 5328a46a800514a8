use rusqlite::Connection;

/// Schema DDL run on open.
pub(super) const SCHEMA: &str = "
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id TEXT NOT NULL,
    message_id TEXT NOT NULL UNIQUE,
    subject TEXT NOT NULL DEFAULT '',
    sender TEXT NOT NULL DEFAULT '',
    sender_name TEXT NOT NULL DEFAULT '',
    recipient TEXT NOT NULL DEFAULT '',
    received_at INTEGER NOT NULL DEFAULT 0,
    body_text TEXT NOT NULL DEFAULT '',
    body_html TEXT,
    is_read INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS attachments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id INTEGER NOT NULL,
    filename TEXT NOT NULL DEFAULT 'unnamed',
    content_type TEXT NOT NULL DEFAULT 'application/octet-stream',
    size INTEGER NOT NULL DEFAULT 0,
    blob_ref TEXT NOT NULL,
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS schedules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    assignee_name TEXT NOT NULL DEFAULT '',
    assignee_email TEXT NOT NULL,
    assigned_by TEXT NOT NULL DEFAULT '',
    category TEXT,
    priority TEXT NOT NULL DEFAULT 'medium',
    frequency TEXT NOT NULL,
    starts_at INTEGER NOT NULL,
    ends_at INTEGER,
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS work_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL,
    schedule_id INTEGER,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    assignee_name TEXT NOT NULL DEFAULT '',
    assignee_email TEXT NOT NULL,
    assigned_by TEXT NOT NULL DEFAULT '',
    category TEXT,
    priority TEXT NOT NULL DEFAULT 'medium',
    status TEXT NOT NULL DEFAULT 'pending',
    due_at INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (schedule_id) REFERENCES schedules(id) ON DELETE SET NULL
);

CREATE TABLE IF NOT EXISTS notifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL,
    recipient TEXT NOT NULL,
    subject TEXT NOT NULL,
    body TEXT NOT NULL,
    work_item_id INTEGER,
    sent INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    created_at INTEGER NOT NULL,
    FOREIGN KEY (work_item_id) REFERENCES work_items(id) ON DELETE SET NULL
);

CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    payload TEXT NOT NULL,
    execute_at INTEGER NOT NULL
);
";

/// Create secondary indexes. Each statement is idempotent; failures are logged.
pub(super) fn run_migrations(conn: &Connection) {
    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_messages_account_received
            ON messages(account_id, received_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_attachments_message ON attachments(message_id)",
        "CREATE INDEX IF NOT EXISTS idx_work_items_schedule ON work_items(schedule_id)",
        "CREATE INDEX IF NOT EXISTS idx_notifications_tenant
            ON notifications(tenant_id, created_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_jobs_due ON jobs(execute_at)",
    ];
    for sql in &indexes {
        if let Err(e) = conn.execute(sql, []) {
            log::warn!("Index creation failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use super::{run_migrations, SCHEMA};

    fn open() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(SCHEMA).expect("apply schema");
        run_migrations(&conn);
        conn
    }

    #[test]
    fn schema_is_reentrant() {
        let conn = open();
        conn.execute_batch(SCHEMA).expect("second apply");
        run_migrations(&conn);
    }

    #[test]
    fn message_id_is_unique() {
        let conn = open();
        let insert = "INSERT OR IGNORE INTO messages (account_id, message_id) VALUES ('a', '<x@y>')";
        assert_eq!(conn.execute(insert, []).expect("first insert"), 1);
        assert_eq!(conn.execute(insert, []).expect("second insert"), 0);
    }

    #[test]
    fn deleting_message_cascades_to_attachments() {
        let conn = open();
        conn.execute_batch(
            "
            INSERT INTO messages (id, account_id, message_id) VALUES (1, 'a', '<m@x>');
            INSERT INTO attachments (message_id, filename, blob_ref) VALUES (1, 'a.pdf', 'r1');
            INSERT INTO attachments (message_id, filename, blob_ref) VALUES (1, 'b.pdf', 'r2');
            ",
        )
        .expect("seed");

        conn.execute("DELETE FROM messages WHERE id = 1", [])
            .expect("delete message");

        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM attachments", [], |row| row.get(0))
            .expect("count attachments");
        assert_eq!(remaining, 0);
    }

    #[test]
    fn attachment_requires_existing_message() {
        let conn = open();
        let result = conn.execute(
            "INSERT INTO attachments (message_id, filename, blob_ref) VALUES (99, 'x', 'r')",
            [],
        );
        assert!(result.is_err());
    }
}
