use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use document_store::{
    merge_document, CollectionPath, Document, MutateOptions, Snapshot, SnapshotHub,
    SnapshotStream, StoreConnection,
};
use serde_json::Value;
use shared::{
    domain::DocumentId,
    error::{StoreError, StoreErrorCode},
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

mod memory;

pub use memory::MemoryStorage;

/// SQLite-backed document store. Every collection lives in one `documents`
/// table as JSON text keyed by `(collection, doc_id)`.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
    hub: Arc<SnapshotHub>,
    // Held across write + reload + publish so snapshots go out in write order.
    write_lock: Arc<Mutex<()>>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Each in-memory connection is its own database.
        let max_connections = if database_url.starts_with("sqlite::memory:") {
            1
        } else {
            5
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open document database '{database_url}'"))?;

        let storage = Self {
            pool,
            hub: Arc::new(SnapshotHub::new()),
            write_lock: Arc::new(Mutex::new(())),
        };
        storage.ensure_documents_table().await?;
        Ok(storage)
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    async fn ensure_documents_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection  TEXT NOT NULL,
                doc_id      TEXT NOT NULL,
                data        TEXT NOT NULL,
                updated_at  TEXT NOT NULL,
                PRIMARY KEY (collection, doc_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create documents table")?;
        Ok(())
    }

    async fn load_collection(&self, path: &CollectionPath) -> Result<Snapshot, StoreError> {
        let rows = sqlx::query(
            "SELECT doc_id, data FROM documents WHERE collection = ? ORDER BY doc_id",
        )
        .bind(path.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            let doc_id: String = row.try_get("doc_id").map_err(db_error)?;
            let raw: String = row.try_get("data").map_err(db_error)?;
            match serde_json::from_str::<Value>(&raw) {
                Ok(data) => documents.push(Document {
                    id: DocumentId::new(doc_id),
                    data,
                }),
                Err(err) => {
                    warn!(
                        "storage: skipping unreadable document collection={path} doc_id={doc_id} error={err}"
                    );
                }
            }
        }

        Ok(Snapshot {
            path: path.clone(),
            documents,
        })
    }

    async fn write_document(
        &self,
        path: &CollectionPath,
        doc_id: &DocumentId,
        data: Value,
        options: MutateOptions,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let mut document = data;
        if options.merge {
            let existing = sqlx::query(
                "SELECT data FROM documents WHERE collection = ? AND doc_id = ?",
            )
            .bind(path.as_str())
            .bind(doc_id.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?;

            if let Some(row) = existing {
                let raw: String = row.try_get("data").map_err(db_error)?;
                let mut current: Value = serde_json::from_str(&raw).map_err(|err| {
                    StoreError::internal(format!("stored document {doc_id} is not JSON: {err}"))
                })?;
                merge_document(&mut current, document);
                document = current;
            }
        }

        let encoded = serde_json::to_string(&document)
            .map_err(|err| StoreError::new(StoreErrorCode::Rejected, err.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO documents (collection, doc_id, data, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(collection, doc_id)
            DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at
            "#,
        )
        .bind(path.as_str())
        .bind(doc_id.as_str())
        .bind(encoded)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn publish_collection(&self, path: &CollectionPath) {
        match self.load_collection(path).await {
            Ok(snapshot) => {
                let delivered = self.hub.publish(snapshot).await;
                debug!("storage: published snapshot collection={path} subscribers={delivered}");
            }
            Err(err) => {
                warn!("storage: snapshot reload failed collection={path} error={err}");
                self.hub.publish_failure(path, err).await;
            }
        }
    }
}

#[async_trait]
impl StoreConnection for Storage {
    async fn subscribe(&self, path: &CollectionPath) -> Result<SnapshotStream, StoreError> {
        let receiver = self.hub.receiver(path).await;
        let initial = self.load_collection(path).await?;
        Ok(SnapshotHub::into_stream(initial, receiver))
    }

    async fn mutate(
        &self,
        path: &CollectionPath,
        doc_id: Option<&DocumentId>,
        data: Value,
        options: MutateOptions,
    ) -> Result<DocumentId, StoreError> {
        let doc_id = doc_id.cloned().unwrap_or_else(new_document_id);
        let _guard = self.write_lock.lock().await;
        self.write_document(path, &doc_id, data, options).await?;
        self.publish_collection(path).await;
        Ok(doc_id)
    }

    async fn delete(&self, path: &CollectionPath, doc_id: &DocumentId) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND doc_id = ?")
            .bind(path.as_str())
            .bind(doc_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        if result.rows_affected() > 0 {
            self.publish_collection(path).await;
        }
        Ok(())
    }

    async fn query_once(&self, path: &CollectionPath) -> Result<Snapshot, StoreError> {
        self.load_collection(path).await
    }
}

pub fn new_document_id() -> DocumentId {
    DocumentId::new(uuid::Uuid::new_v4().simple().to_string())
}

fn db_error(err: sqlx::Error) -> StoreError {
    let code = match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreErrorCode::Unavailable
        }
        sqlx::Error::RowNotFound => StoreErrorCode::NotFound,
        _ => StoreErrorCode::Internal,
    };
    StoreError::new(code, err.to_string())
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
