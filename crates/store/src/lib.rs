//! SQLite persistence for documents and chats.
//!
//! One database file with four tables:
//! - `documents` — uploaded files and their AI summaries
//! - `chats` — chat metadata (title, recency)
//! - `chat_documents` — which documents a chat was using as context
//! - `chat_messages` — ordered transcript rows
//!
//! Foreign keys cascade: deleting a chat removes its messages and document
//! associations; deleting a document removes its associations but leaves
//! chats intact.
//!
//! Transcripts are saved whole: `replace_messages` deletes and reinserts the
//! full message list in one transaction, so the stored transcript always
//! matches the in-memory one regardless of how the last turn ended.

use chrono::{DateTime, Utc};
use docuchat_core::document::{Document, DocumentId};
use docuchat_core::error::StoreError;
use docuchat_core::message::{ChatId, ChatSummary, Message, Role};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// SQLite-backed store for documents and chats.
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the database at the given sqlx URL.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database
    /// (useful for tests).
    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite URL: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .pragma("foreign_keys", "ON");

        // Each pooled connection to :memory: would open its own database
        let max_connections = if url.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {url}");
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL,
                name        TEXT NOT NULL,
                media_type  TEXT NOT NULL,
                size_bytes  INTEGER NOT NULL,
                summary     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("documents table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chats (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL,
                title       TEXT NOT NULL,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("chats table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_documents (
                chat_id     TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
                document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                PRIMARY KEY (chat_id, document_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("chat_documents table: {e}")))?;

        // Integer rowid keeps transcript order stable even when timestamps tie
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_messages (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id     TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
                role        TEXT NOT NULL,
                content     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("chat_messages table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_documents_user ON documents(user_id, created_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("documents index: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chats_user ON chats(user_id, updated_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("chats index: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chat_messages_chat ON chat_messages(chat_id, seq)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("chat_messages index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<Document, StoreError> {
        let id: String = row
            .try_get("id")
            .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
        let user_id: String = row
            .try_get("user_id")
            .map_err(|e| StoreError::QueryFailed(format!("user_id column: {e}")))?;
        let name: String = row
            .try_get("name")
            .map_err(|e| StoreError::QueryFailed(format!("name column: {e}")))?;
        let media_type: String = row
            .try_get("media_type")
            .map_err(|e| StoreError::QueryFailed(format!("media_type column: {e}")))?;
        let size_bytes: i64 = row
            .try_get("size_bytes")
            .map_err(|e| StoreError::QueryFailed(format!("size_bytes column: {e}")))?;
        let summary: String = row
            .try_get("summary")
            .map_err(|e| StoreError::QueryFailed(format!("summary column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::QueryFailed(format!("created_at column: {e}")))?;

        Ok(Document {
            id: DocumentId(id),
            user_id,
            name,
            media_type,
            size_bytes: size_bytes.max(0) as u64,
            summary,
            created_at: parse_timestamp(&created_at),
        })
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, StoreError> {
        let role_str: String = row
            .try_get("role")
            .map_err(|e| StoreError::QueryFailed(format!("role column: {e}")))?;
        let content: String = row
            .try_get("content")
            .map_err(|e| StoreError::QueryFailed(format!("content column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| StoreError::QueryFailed(format!("created_at column: {e}")))?;

        let role = Role::from_str(&role_str)
            .map_err(|e| StoreError::QueryFailed(format!("role column: {e}")))?;

        Ok(Message {
            role,
            content,
            created_at: parse_timestamp(&created_at),
        })
    }

    // --- Documents ---

    /// Persist a freshly summarized document.
    pub async fn insert_document(&self, doc: &Document) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, user_id, name, media_type, size_bytes, summary, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&doc.id.0)
        .bind(&doc.user_id)
        .bind(&doc.name)
        .bind(&doc.media_type)
        .bind(doc.size_bytes as i64)
        .bind(&doc.summary)
        .bind(doc.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("document INSERT failed: {e}")))?;

        debug!("Stored document {}", doc.id);
        Ok(())
    }

    /// All of a user's documents, newest first.
    pub async fn list_documents(&self, user_id: &str) -> Result<Vec<Document>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM documents WHERE user_id = ?1 ORDER BY created_at DESC, id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("document list: {e}")))?;

        rows.iter().map(Self::row_to_document).collect()
    }

    pub async fn get_document(&self, id: &DocumentId) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?1")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("document GET: {e}")))?;

        match row {
            Some(ref r) => Ok(Some(Self::row_to_document(r)?)),
            None => Ok(None),
        }
    }

    /// Delete a document. Chat associations cascade; chats themselves stay.
    pub async fn delete_document(&self, id: &DocumentId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?1")
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("document DELETE failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    // --- Chats ---

    /// Create a chat record with its document associations.
    pub async fn create_chat(
        &self,
        id: &ChatId,
        user_id: &str,
        title: &str,
        document_ids: &[DocumentId],
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("begin transaction: {e}")))?;

        sqlx::query(
            "INSERT INTO chats (id, user_id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
        )
        .bind(&id.0)
        .bind(user_id)
        .bind(title)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(format!("chat INSERT failed: {e}")))?;

        for doc_id in document_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO chat_documents (chat_id, document_id) VALUES (?1, ?2)",
            )
            .bind(&id.0)
            .bind(&doc_id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("chat_documents INSERT failed: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("commit: {e}")))?;

        debug!("Created chat {id} with {} document(s)", document_ids.len());
        Ok(())
    }

    /// Bump a chat's recency timestamp.
    pub async fn touch_chat(&self, id: &ChatId) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE chats SET updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now().to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("chat UPDATE failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.0.clone()));
        }
        Ok(())
    }

    /// All of a user's chats, most recently updated first.
    pub async fn list_chats(&self, user_id: &str) -> Result<Vec<ChatSummary>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, user_id, title, updated_at FROM chats WHERE user_id = ?1 ORDER BY updated_at DESC, id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("chat list: {e}")))?;

        rows.iter()
            .map(|row| {
                let id: String = row
                    .try_get("id")
                    .map_err(|e| StoreError::QueryFailed(format!("id column: {e}")))?;
                let user_id: String = row
                    .try_get("user_id")
                    .map_err(|e| StoreError::QueryFailed(format!("user_id column: {e}")))?;
                let title: String = row
                    .try_get("title")
                    .map_err(|e| StoreError::QueryFailed(format!("title column: {e}")))?;
                let updated_at: String = row
                    .try_get("updated_at")
                    .map_err(|e| StoreError::QueryFailed(format!("updated_at column: {e}")))?;

                Ok(ChatSummary {
                    id: ChatId(id),
                    user_id,
                    title,
                    updated_at: parse_timestamp(&updated_at),
                })
            })
            .collect()
    }

    pub async fn chat_exists(&self, id: &ChatId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM chats WHERE id = ?1")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("chat exists: {e}")))?;
        Ok(row.is_some())
    }

    /// The document IDs a chat was created with.
    pub async fn chat_documents(&self, id: &ChatId) -> Result<Vec<DocumentId>, StoreError> {
        let rows = sqlx::query(
            "SELECT document_id FROM chat_documents WHERE chat_id = ?1 ORDER BY document_id",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("chat_documents list: {e}")))?;

        rows.iter()
            .map(|row| {
                let doc_id: String = row
                    .try_get("document_id")
                    .map_err(|e| StoreError::QueryFailed(format!("document_id column: {e}")))?;
                Ok(DocumentId(doc_id))
            })
            .collect()
    }

    /// Delete a chat and, via cascade, its messages and document links.
    pub async fn delete_chat(&self, id: &ChatId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM chats WHERE id = ?1")
            .bind(&id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("chat DELETE failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    // --- Messages ---

    /// A chat's transcript in chronological order.
    pub async fn load_messages(&self, id: &ChatId) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query(
            "SELECT role, content, created_at FROM chat_messages WHERE chat_id = ?1 ORDER BY seq",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("message list: {e}")))?;

        rows.iter().map(Self::row_to_message).collect()
    }

    /// Replace a chat's stored transcript with the given one.
    ///
    /// Delete-then-reinsert in a single transaction keeps the stored
    /// transcript byte-for-byte equal to the in-memory one.
    pub async fn replace_messages(
        &self,
        id: &ChatId,
        messages: &[Message],
    ) -> Result<(), StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("begin transaction: {e}")))?;

        sqlx::query("DELETE FROM chat_messages WHERE chat_id = ?1")
            .bind(&id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("message DELETE failed: {e}")))?;

        for msg in messages {
            sqlx::query(
                "INSERT INTO chat_messages (chat_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&id.0)
            .bind(msg.role.as_str())
            .bind(&msg.content)
            .bind(msg.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Storage(format!("message INSERT failed: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("commit: {e}")))?;

        debug!("Saved {} message(s) for chat {id}", messages.len());
        Ok(())
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
