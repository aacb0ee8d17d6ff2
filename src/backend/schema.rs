use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

pub const DB_SCHEMA_VERSION: &str = "0.1.0";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IndexMode {
    Create,
    Append,
}

impl IndexMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Append => "append",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub identifier: String,
    pub title: String,
    pub content: String,
    pub content_length: u64,
    pub content_sha256: String,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UpsertOutcome {
    Added,
    Updated,
    Unchanged,
}

pub fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

pub fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS metadata (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS documents (
              doc_id INTEGER PRIMARY KEY,
              identifier TEXT NOT NULL UNIQUE,
              title TEXT,
              content TEXT NOT NULL,
              content_length INTEGER,
              content_sha256 TEXT NOT NULL,
              indexed_at TEXT NOT NULL
            );
            ",
        )
        .context("failed to initialize documents schema")?;

    connection
        .execute(
            "
            CREATE VIRTUAL TABLE IF NOT EXISTS documents_fts
            USING fts5(content, title, content='documents', content_rowid='doc_id')
            ",
            [],
        )
        .context("failed to initialize FTS5 table documents_fts")?;

    set_metadata_value(connection, "db_schema_version", DB_SCHEMA_VERSION)?;

    Ok(())
}

pub fn prepare_index(connection: &Connection, mode: IndexMode) -> Result<usize> {
    match mode {
        IndexMode::Create => connection
            .execute("DELETE FROM documents", [])
            .context("failed to clear documents for create mode"),
        IndexMode::Append => Ok(0),
    }
}

pub fn upsert_document(connection: &Connection, record: &DocumentRecord) -> Result<UpsertOutcome> {
    let existing_hash = connection
        .query_row(
            "SELECT content_sha256 FROM documents WHERE identifier = ?1",
            [&record.identifier],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .with_context(|| format!("failed to look up document {}", record.identifier))?;

    if existing_hash.as_deref() == Some(record.content_sha256.as_str()) {
        return Ok(UpsertOutcome::Unchanged);
    }

    connection
        .execute(
            "
            INSERT INTO documents(identifier, title, content, content_length, content_sha256, indexed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(identifier) DO UPDATE SET
              title = excluded.title,
              content = excluded.content,
              content_length = excluded.content_length,
              content_sha256 = excluded.content_sha256,
              indexed_at = excluded.indexed_at
            ",
            params![
                record.identifier,
                record.title,
                record.content,
                record.content_length as i64,
                record.content_sha256,
                Utc::now(),
            ],
        )
        .with_context(|| format!("failed to upsert document {}", record.identifier))?;

    Ok(if existing_hash.is_some() {
        UpsertOutcome::Updated
    } else {
        UpsertOutcome::Added
    })
}

pub fn rebuild_fts_index(connection: &Connection) -> Result<()> {
    connection
        .execute("INSERT INTO documents_fts(documents_fts) VALUES('rebuild')", [])
        .context("failed to rebuild FTS index")?;
    set_metadata_value(connection, "db_updated_at", &Utc::now().to_rfc3339())?;
    Ok(())
}

pub fn count_documents(connection: &Connection) -> Result<i64> {
    let count = connection.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
    Ok(count)
}

pub fn read_metadata_value(connection: &Connection, key: &str) -> Result<Option<String>> {
    let value = connection
        .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()
        .with_context(|| format!("failed to read metadata key {key}"))?;
    Ok(value)
}

fn set_metadata_value(connection: &Connection, key: &str, value: &str) -> Result<()> {
    connection
        .execute(
            "INSERT INTO metadata(key, value) VALUES(?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            [key, value],
        )
        .with_context(|| format!("failed to write metadata key {key}"))?;
    Ok(())
}
