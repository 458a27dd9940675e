use rusqlite::types::ValueRef;
use rusqlite::{Connection, OptionalExtension, Row};
use std::path::Path;

use crate::tickets::MessageRow;

pub const DB_FILE: &str = "visatrack.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS advisors(
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            phone TEXT,
            target_university TEXT,
            stage TEXT,
            advisor_email TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    ensure_students_updated_at(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_advisor ON students(advisor_email)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages(
            id TEXT PRIMARY KEY,
            sender_email TEXT NOT NULL,
            receiver_email TEXT NOT NULL,
            sender_role TEXT NOT NULL,
            subject TEXT,
            content TEXT NOT NULL,
            reply_to TEXT,
            created_at TEXT NOT NULL,
            is_read INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    ensure_messages_reply_to(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_sender_lower ON messages(lower(sender_email))",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_receiver_lower ON messages(lower(receiver_email))",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    // Older forms saved "" for a student who had not started yet.
    migrate_blank_stages(&conn)?;

    Ok(conn)
}

fn ensure_students_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE students ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn ensure_messages_reply_to(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "messages", "reply_to")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE messages ADD COLUMN reply_to TEXT", [])?;
    Ok(())
}

fn migrate_blank_stages(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE students SET stage = NULL WHERE stage IS NOT NULL AND TRIM(stage) = ''",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(serde_json::from_str(&s).ok()),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

/// Text cell or `None`. Wrong-typed cells from hand-edited or legacy rows
/// read as missing instead of failing the whole query.
pub fn text_cell(r: &Row<'_>, idx: usize) -> rusqlite::Result<Option<String>> {
    Ok(match r.get_ref(idx)? {
        ValueRef::Text(b) => std::str::from_utf8(b).ok().map(str::to_string),
        _ => None,
    })
}

/// Boolean flag stored as 0/1; legacy text spellings are accepted.
pub fn flag_cell(r: &Row<'_>, idx: usize) -> rusqlite::Result<Option<bool>> {
    Ok(match r.get_ref(idx)? {
        ValueRef::Integer(v) => Some(v != 0),
        ValueRef::Text(b) => match std::str::from_utf8(b).map(|t| t.trim().to_ascii_lowercase()) {
            Ok(t) if t == "1" || t == "true" => Some(true),
            Ok(t) if t == "0" || t == "false" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

/// Every message the viewer sent or received, unsorted. Emails are matched
/// case-insensitively; `viewer` is expected lowercase.
pub fn messages_for_viewer(conn: &Connection, viewer: &str) -> anyhow::Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, sender_email, receiver_email, sender_role, content, subject, reply_to,
                created_at, is_read
         FROM messages
         WHERE lower(sender_email) = ?1 OR lower(receiver_email) = ?1",
    )?;
    let rows = stmt
        .query_map([viewer], |r| {
            Ok(MessageRow {
                id: text_cell(r, 0)?,
                sender_email: text_cell(r, 1)?,
                receiver_email: text_cell(r, 2)?,
                sender_role: text_cell(r, 3)?,
                content: text_cell(r, 4)?,
                subject: text_cell(r, 5)?,
                reply_to: text_cell(r, 6)?,
                created_at: text_cell(r, 7)?,
                is_read: flag_cell(r, 8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn mark_messages_read(
    conn: &Connection,
    receiver: &str,
    message_ids: &[String],
) -> anyhow::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut changed = 0;
    for id in message_ids {
        changed += tx.execute(
            "UPDATE messages SET is_read = 1 WHERE id = ? AND lower(receiver_email) = ?",
            (id, receiver),
        )?;
    }
    tx.commit()?;
    Ok(changed)
}
