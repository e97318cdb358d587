//! SQLite storage for received images and their tasks

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A saved image, as inserted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewImage {
    pub id: String,
    pub filename: String,
    pub category: String,
    pub original_url: Option<String>,
    pub page_url: Option<String>,
    pub page_title: Option<String>,
    pub file_size: u64,
    pub width: u32,
    pub height: u32,
    /// Image context sent by the client, plus the category
    pub context_info: serde_json::Value,
}

/// Image record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: String,
    pub filename: String,
    pub category: String,
    pub original_url: Option<String>,
    pub page_url: Option<String>,
    pub page_title: Option<String>,
    pub file_size: u64,
    pub width: u32,
    pub height: u32,
    pub context_info: serde_json::Value,
    pub saved_at: String,
}

/// Task record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub task_id: String,
    pub image_id: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

/// SQLite storage manager
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open or create the database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        let storage = Self { conn };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let storage = Self { conn };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS images (
                id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                category TEXT NOT NULL,
                original_url TEXT,
                page_url TEXT,
                page_title TEXT,
                file_size INTEGER NOT NULL,
                image_width INTEGER NOT NULL DEFAULT 0,
                image_height INTEGER NOT NULL DEFAULT 0,
                context_info TEXT NOT NULL DEFAULT '{}',
                saved_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS tasks (
                task_id TEXT PRIMARY KEY,
                image_id TEXT NOT NULL REFERENCES images (id),
                status TEXT NOT NULL DEFAULT 'processing',
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_image_id ON tasks(image_id);
            "#,
        )?;
        Ok(())
    }

    /// Insert an image and its `processing` task in one transaction
    pub fn record_submission(
        &mut self,
        image: &NewImage,
        task_id: &str,
    ) -> Result<(), StorageError> {
        let context_json = serde_json::to_string(&image.context_info)?;
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO images (id, filename, category, original_url, page_url, page_title,
                                 file_size, image_width, image_height, context_info)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                image.id,
                image.filename,
                image.category,
                image.original_url,
                image.page_url,
                image.page_title,
                image.file_size as i64,
                image.width,
                image.height,
                context_json
            ],
        )?;

        tx.execute(
            "INSERT INTO tasks (task_id, image_id, status) VALUES (?1, ?2, ?3)",
            params![task_id, image.id, STATUS_PROCESSING],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Set a task's status. Returns false when the task does not exist.
    pub fn update_task_status(&self, task_id: &str, status: &str) -> Result<bool, StorageError> {
        let changed = self.conn.execute(
            "UPDATE tasks SET status = ?1, updated_at = datetime('now') WHERE task_id = ?2",
            params![status, task_id],
        )?;
        Ok(changed > 0)
    }

    pub fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, StorageError> {
        let task = self
            .conn
            .query_row(
                "SELECT task_id, image_id, status, created_at, updated_at
                 FROM tasks WHERE task_id = ?1",
                params![task_id],
                |row| {
                    Ok(TaskRecord {
                        task_id: row.get(0)?,
                        image_id: row.get(1)?,
                        status: row.get(2)?,
                        created_at: row.get(3)?,
                        updated_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(task)
    }

    pub fn get_image(&self, id: &str) -> Result<Option<ImageRecord>, StorageError> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM images WHERE id = ?1", IMAGE_COLUMNS),
                params![id],
                image_from_row,
            )
            .optional()?;

        row.map(with_context).transpose()
    }

    /// Newest first
    pub fn list_images(&self, limit: u32, offset: u64) -> Result<Vec<ImageRecord>, StorageError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM images ORDER BY saved_at DESC, rowid DESC LIMIT ?1 OFFSET ?2",
            IMAGE_COLUMNS
        ))?;

        let rows = stmt
            .query_map(params![limit, offset as i64], image_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(with_context).collect()
    }

    pub fn image_count(&self) -> Result<u64, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

const IMAGE_COLUMNS: &str = "id, filename, category, original_url, page_url, page_title, \
     file_size, image_width, image_height, context_info, saved_at";

/// Image row with its context still as JSON text
fn image_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(ImageRecord, String)> {
    Ok((
        ImageRecord {
            id: row.get(0)?,
            filename: row.get(1)?,
            category: row.get(2)?,
            original_url: row.get(3)?,
            page_url: row.get(4)?,
            page_title: row.get(5)?,
            file_size: row.get::<_, i64>(6)? as u64,
            width: row.get(7)?,
            height: row.get(8)?,
            context_info: serde_json::Value::Null,
            saved_at: row.get(10)?,
        },
        row.get(9)?,
    ))
}

fn with_context(
    (mut image, context_json): (ImageRecord, String),
) -> Result<ImageRecord, StorageError> {
    image.context_info = serde_json::from_str(&context_json)?;
    Ok(image)
}
