//! Conversation store
//!
//! Durable, append-only log of conversations and the request/response
//! records dispatched under them. Every write runs in its own transaction.

mod schema;

pub use schema::*;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

const CONVERSATION_COLUMNS: &str = "c.id, c.title, c.created_at,
    (SELECT COUNT(*) FROM records r WHERE r.conversation_id = c.id) AS record_count";

const RECORD_COLUMNS: &str =
    "id, timestamp, conversation_id, request_payload, response_payload";

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> DbResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> DbResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ==================== Conversation Operations ====================

    /// Insert a conversation unless one with this id already exists.
    ///
    /// Returns `true` when this call created the row.
    pub fn register_conversation(&self, id: &str, title: &str) -> DbResult<bool> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let inserted = insert_conversation(&tx, id, title, Utc::now())?;
        tx.commit()?;

        if inserted {
            tracing::debug!(conversation_id = %id, "Registered conversation");
        }
        Ok(inserted)
    }

    /// Get conversation by ID
    pub fn get_conversation(&self, id: &str) -> DbResult<Conversation> {
        let conn = self.lock();
        conn.query_row(
            &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations c WHERE c.id = ?1"),
            params![id],
            parse_conversation_row,
        )
        .optional()?
        .ok_or_else(|| DbError::ConversationNotFound(id.to_string()))
    }

    /// List conversations, most recently created first
    pub fn list_conversations(&self) -> DbResult<Vec<Conversation>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations c
             ORDER BY c.created_at DESC, c.rowid DESC"
        ))?;

        let rows = stmt.query_map([], parse_conversation_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Change the title. Records are untouched.
    pub fn rename_conversation(&self, id: &str, new_title: &str) -> DbResult<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE conversations SET title = ?1 WHERE id = ?2",
            params![new_title, id],
        )?;

        if updated == 0 {
            return Err(DbError::ConversationNotFound(id.to_string()));
        }
        tx.commit()?;
        Ok(())
    }

    // ==================== Record Operations ====================

    /// Append a record, creating the conversation row if it is unseen.
    ///
    /// The timestamp is clamped to the latest one already stored for the
    /// conversation, so per-conversation order never goes backwards.
    pub fn append_record(
        &self,
        conversation_id: &str,
        request_payload: &str,
        response_payload: &str,
    ) -> DbResult<DispatchRecord> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let now = Utc::now().trunc_subsecs(6);

        if insert_conversation(&tx, conversation_id, conversation_id, now)? {
            tracing::debug!(conversation_id = %conversation_id, "Registered implicit conversation");
        }

        let latest: Option<String> = tx.query_row(
            "SELECT MAX(timestamp) FROM records WHERE conversation_id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )?;
        let latest = latest
            .map(|text| parse_datetime(0, &text))
            .transpose()?;
        let timestamp = match latest {
            Some(latest) if latest > now => latest,
            _ => now,
        };

        tx.execute(
            "INSERT INTO records (timestamp, conversation_id, request_payload, response_payload)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                format_datetime(timestamp),
                conversation_id,
                request_payload,
                response_payload
            ],
        )?;
        let sequence_id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(DispatchRecord {
            sequence_id,
            timestamp,
            conversation_id: conversation_id.to_string(),
            request_payload: request_payload.to_string(),
            response_payload: response_payload.to_string(),
        })
    }

    /// Records of one conversation, oldest first
    pub fn list_records(&self, conversation_id: &str) -> DbResult<Vec<DispatchRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records
             WHERE conversation_id = ?1 ORDER BY timestamp ASC, id ASC"
        ))?;

        let rows = stmt.query_map(params![conversation_id], parse_record_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Every record across conversations, newest first
    pub fn list_all_records(&self) -> DbResult<Vec<DispatchRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM records ORDER BY timestamp DESC, id DESC"
        ))?;

        let rows = stmt.query_map([], parse_record_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn record_count(&self, conversation_id: &str) -> DbResult<i64> {
        let conn = self.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM records WHERE conversation_id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )
        .map_err(DbError::from)
    }
}

fn insert_conversation(
    conn: &Connection,
    id: &str,
    title: &str,
    created_at: DateTime<Utc>,
) -> DbResult<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO conversations (id, title, created_at) VALUES (?1, ?2, ?3)",
        params![id, title, format_datetime(created_at)],
    )?;
    Ok(inserted > 0)
}

fn parse_conversation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: parse_datetime(2, &row.get::<_, String>(2)?)?,
        record_count: row.get(3)?,
    })
}

fn parse_record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DispatchRecord> {
    Ok(DispatchRecord {
        sequence_id: row.get(0)?,
        timestamp: parse_datetime(1, &row.get::<_, String>(1)?)?,
        conversation_id: row.get(2)?,
        request_payload: row.get(3)?,
        response_payload: row.get(4)?,
    })
}

/// Fixed-width RFC 3339 so text order matches time order
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp; `column` is reported when the text is corrupt
fn parse_datetime(column: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}
