//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, the concrete implementation of the
//! `DirectoryService`, `ArtifactRepository` and `SnapshotRepository` ports from the
//! `core` crate. It handles all interactions with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use proscientia_core::domain::{
    payload_path, Artifact, ArtifactId, ArtifactType, CatalogStream, Document, DocumentId,
    DocumentSource, NewArtifact, Snapshot, SnapshotFile, SyncAttempt, SyncStatus, User, UserId,
    VersionUpdate,
};
use proscientia_core::ports::{
    ArtifactRepository, DirectoryService, PortError, PortResult, SnapshotRepository,
};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::debug;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements every persistence port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn not_found_or_unexpected(e: sqlx::Error, what: String) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(what),
        _ => PortError::Unexpected(e.to_string()),
    }
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    id: i64,
    email: Option<String>,
}
impl UserRecord {
    fn to_domain(self) -> User {
        User {
            id: self.id,
            email: self.email,
        }
    }
}

#[derive(FromRow)]
struct DocumentRecord {
    id: i64,
    source: String,
    title: String,
    uploaded_by: Option<i64>,
    mock_stream: Option<String>,
    mock_version_date: Option<NaiveDate>,
    mock_filename: Option<String>,
    file_bytes: Option<Vec<u8>>,
}
impl DocumentRecord {
    fn to_domain(self) -> PortResult<Document> {
        Ok(Document {
            id: self.id,
            source: self.source.parse::<DocumentSource>().map_err(PortError::Unexpected)?,
            title: self.title,
            uploaded_by: self.uploaded_by,
            mock_stream: self.mock_stream,
            mock_version_date: self.mock_version_date,
            mock_filename: self.mock_filename,
            content: self.file_bytes,
        })
    }
}

#[derive(FromRow)]
struct ArtifactRecord {
    id: i64,
    artifact_type: String,
    subject_id: Option<i64>,
    owner_id: i64,
    payload_ref: String,
    title: String,
    metadata: Value,
    created_at: DateTime<Utc>,
}
impl ArtifactRecord {
    fn to_domain(self) -> PortResult<Artifact> {
        Ok(Artifact {
            id: self.id,
            artifact_type: self
                .artifact_type
                .parse::<ArtifactType>()
                .map_err(PortError::Unexpected)?,
            subject_id: self.subject_id,
            owner_id: self.owner_id,
            payload_ref: self.payload_ref,
            title: self.title,
            metadata: self.metadata,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct SnapshotRecord {
    id: i64,
    stream: String,
    version_date: NaiveDate,
    is_latest: bool,
    files: Json<Vec<SnapshotFile>>,
    updated_at: DateTime<Utc>,
}
impl SnapshotRecord {
    fn to_domain(self) -> PortResult<Snapshot> {
        Ok(Snapshot {
            id: self.id,
            stream: self.stream.parse::<CatalogStream>().map_err(PortError::Unexpected)?,
            version_date: self.version_date,
            is_latest: self.is_latest,
            files: self.files.0,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct SyncLogRecord {
    id: i64,
    stream: String,
    version_date: NaiveDate,
    snapshot_id: Option<i64>,
    status: String,
    message: Option<String>,
    created_at: DateTime<Utc>,
}
impl SyncLogRecord {
    fn to_domain(self) -> PortResult<SyncAttempt> {
        Ok(SyncAttempt {
            id: self.id,
            stream: self.stream.parse::<CatalogStream>().map_err(PortError::Unexpected)?,
            version_date: self.version_date,
            snapshot_id: self.snapshot_id,
            status: self.status.parse::<SyncStatus>().map_err(PortError::Unexpected)?,
            message: self.message,
            timestamp: self.created_at,
        })
    }
}

const ARTIFACT_COLUMNS: &str =
    "id, artifact_type, subject_id, owner_id, payload_ref, title, metadata, created_at";
const SNAPSHOT_COLUMNS: &str = "id, stream, version_date, is_latest, files, updated_at";

//=========================================================================================
// `DirectoryService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DirectoryService for DbAdapter {
    async fn get_user(&self, user_id: UserId) -> PortResult<User> {
        let record = sqlx::query_as::<_, UserRecord>("SELECT id, email FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| not_found_or_unexpected(e, format!("User {} not found", user_id)))?;
        Ok(record.to_domain())
    }

    async fn get_document(&self, document_id: DocumentId) -> PortResult<Document> {
        let record = sqlx::query_as::<_, DocumentRecord>(
            "SELECT id, source, title, uploaded_by, mock_stream, mock_version_date, mock_filename, file_bytes \
             FROM documents WHERE id = $1",
        )
        .bind(document_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found_or_unexpected(e, format!("Document {} not found", document_id)))?;
        record.to_domain()
    }

    async fn count_documents(&self, owner_id: UserId) -> PortResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM documents WHERE source = 'USER_UPLOAD' AND uploaded_by = $1",
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))
    }
}

//=========================================================================================
// `ArtifactRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl ArtifactRepository for DbAdapter {
    async fn create(&self, new: NewArtifact) -> PortResult<Artifact> {
        // Row, payload reference and payload bytes commit together or not at all.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let staged = sqlx::query_as::<_, ArtifactRecord>(&format!(
            "INSERT INTO ai_artifacts (artifact_type, subject_id, owner_id, payload_ref, title, metadata) \
             VALUES ($1, $2, $3, '', $4, $5) RETURNING {}",
            ARTIFACT_COLUMNS
        ))
        .bind(new.artifact_type.as_str())
        .bind(new.subject_id)
        .bind(new.owner_id)
        .bind(&new.title)
        .bind(&new.metadata)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let payload_ref = payload_path(staged.created_at, staged.id, &new.filename);
        let record = sqlx::query_as::<_, ArtifactRecord>(&format!(
            "UPDATE ai_artifacts SET payload_ref = $1 WHERE id = $2 RETURNING {}",
            ARTIFACT_COLUMNS
        ))
        .bind(&payload_ref)
        .bind(staged.id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        sqlx::query("INSERT INTO artifact_payloads (artifact_id, bytes) VALUES ($1, $2)")
            .bind(record.id)
            .bind(&new.payload)
            .execute(&mut *tx)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        debug!(artifact_id = record.id, %payload_ref, "Artifact stored");
        record.to_domain()
    }

    async fn list(
        &self,
        owner_id: UserId,
        artifact_type: Option<ArtifactType>,
    ) -> PortResult<Vec<Artifact>> {
        let records = sqlx::query_as::<_, ArtifactRecord>(&format!(
            "SELECT {} FROM ai_artifacts \
             WHERE owner_id = $1 AND ($2::TEXT IS NULL OR artifact_type = $2) \
             ORDER BY created_at DESC, id DESC",
            ARTIFACT_COLUMNS
        ))
        .bind(owner_id)
        .bind(artifact_type.map(|t| t.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn get(&self, artifact_id: ArtifactId, owner_id: UserId) -> PortResult<Artifact> {
        let record = sqlx::query_as::<_, ArtifactRecord>(&format!(
            "SELECT {} FROM ai_artifacts WHERE id = $1 AND owner_id = $2",
            ARTIFACT_COLUMNS
        ))
        .bind(artifact_id)
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found_or_unexpected(e, format!("Artifact {} not found", artifact_id)))?;
        record.to_domain()
    }

    async fn read_payload(&self, artifact_id: ArtifactId, owner_id: UserId) -> PortResult<Vec<u8>> {
        sqlx::query_scalar::<_, Vec<u8>>(
            "SELECT p.bytes FROM artifact_payloads p \
             JOIN ai_artifacts a ON a.id = p.artifact_id \
             WHERE a.id = $1 AND a.owner_id = $2",
        )
        .bind(artifact_id)
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found_or_unexpected(e, format!("Artifact {} not found", artifact_id)))
    }

    async fn delete(&self, artifact_id: ArtifactId, owner_id: UserId) -> PortResult<()> {
        let owner = sqlx::query_scalar::<_, i64>("SELECT owner_id FROM ai_artifacts WHERE id = $1")
            .bind(artifact_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        match owner {
            None => Err(PortError::NotFound(format!("Artifact {} not found", artifact_id))),
            Some(owner) if owner != owner_id => Err(PortError::Forbidden(format!(
                "Artifact {} belongs to another user",
                artifact_id
            ))),
            Some(_) => {
                // The payload row goes with it through ON DELETE CASCADE.
                sqlx::query("DELETE FROM ai_artifacts WHERE id = $1 AND owner_id = $2")
                    .bind(artifact_id)
                    .bind(owner_id)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| PortError::Unexpected(e.to_string()))?;
                Ok(())
            }
        }
    }

    async fn count_for(&self, owner_id: UserId, subject_id: DocumentId) -> PortResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM ai_artifacts \
             WHERE owner_id = $1 AND subject_id = $2 AND artifact_type = 'summary'",
        )
        .bind(owner_id)
        .bind(subject_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))
    }
}

//=========================================================================================
// `SnapshotRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl SnapshotRepository for DbAdapter {
    async fn apply_stream_sync(
        &self,
        stream: CatalogStream,
        updates: &[VersionUpdate],
    ) -> PortResult<Vec<SyncAttempt>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        // Serializes concurrent runs for the same stream across processes.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(stream.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        sqlx::query(
            "UPDATE erp_mes_snapshots SET is_latest = FALSE, updated_at = NOW() \
             WHERE stream = $1 AND is_latest",
        )
        .bind(stream.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let mut attempts = Vec::with_capacity(updates.len());
        for update in updates {
            let snapshot_id = sqlx::query_scalar::<_, i64>(
                "INSERT INTO erp_mes_snapshots (stream, version_date, is_latest, files, updated_at) \
                 VALUES ($1, $2, $3, COALESCE($4, '[]'::jsonb), NOW()) \
                 ON CONFLICT (stream, version_date) DO UPDATE SET \
                     is_latest = EXCLUDED.is_latest, \
                     files = COALESCE($4, erp_mes_snapshots.files), \
                     updated_at = NOW() \
                 RETURNING id",
            )
            .bind(stream.as_str())
            .bind(update.version_date)
            .bind(update.is_latest)
            .bind(update.files.as_ref().map(Json))
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

            let record = sqlx::query_as::<_, SyncLogRecord>(
                "INSERT INTO snapshot_sync_logs (stream, version_date, snapshot_id, status, message) \
                 VALUES ($1, $2, $3, $4, $5) \
                 RETURNING id, stream, version_date, snapshot_id, status, message, created_at",
            )
            .bind(stream.as_str())
            .bind(update.version_date)
            .bind(snapshot_id)
            .bind(update.status.as_str())
            .bind(&update.message)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

            attempts.push(record.to_domain()?);
        }

        tx.commit()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(attempts)
    }

    async fn list_snapshots(&self, stream: Option<CatalogStream>) -> PortResult<Vec<Snapshot>> {
        let records = sqlx::query_as::<_, SnapshotRecord>(&format!(
            "SELECT {} FROM erp_mes_snapshots \
             WHERE ($1::TEXT IS NULL OR stream = $1) \
             ORDER BY stream, version_date",
            SNAPSHOT_COLUMNS
        ))
        .bind(stream.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn get_snapshot(
        &self,
        stream: CatalogStream,
        version_date: NaiveDate,
    ) -> PortResult<Snapshot> {
        let record = sqlx::query_as::<_, SnapshotRecord>(&format!(
            "SELECT {} FROM erp_mes_snapshots WHERE stream = $1 AND version_date = $2",
            SNAPSHOT_COLUMNS
        ))
        .bind(stream.as_str())
        .bind(version_date)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            not_found_or_unexpected(e, format!("Snapshot {} {} not found", stream, version_date))
        })?;
        record.to_domain()
    }

    async fn latest_snapshots(&self, streams: &[CatalogStream]) -> PortResult<Vec<Snapshot>> {
        let names: Vec<&str> = streams.iter().map(|s| s.as_str()).collect();
        let records = sqlx::query_as::<_, SnapshotRecord>(&format!(
            "SELECT {} FROM erp_mes_snapshots \
             WHERE is_latest AND stream = ANY($1) \
             ORDER BY stream",
            SNAPSHOT_COLUMNS
        ))
        .bind(names)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn list_sync_attempts(
        &self,
        stream: Option<CatalogStream>,
    ) -> PortResult<Vec<SyncAttempt>> {
        let records = sqlx::query_as::<_, SyncLogRecord>(
            "SELECT id, stream, version_date, snapshot_id, status, message, created_at \
             FROM snapshot_sync_logs \
             WHERE ($1::TEXT IS NULL OR stream = $1) \
             ORDER BY created_at, id",
        )
        .bind(stream.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }
}
