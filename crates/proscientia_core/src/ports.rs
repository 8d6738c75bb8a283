//! crates/proscientia_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the relational store, the catalog provider and the LLM backend.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;

use crate::domain::{
    Artifact, ArtifactId, ArtifactType, CatalogStream, Document, DocumentId, Listing, Manifest,
    NewArtifact, Snapshot, SyncAttempt, User, UserId, VersionUpdate,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// The error taxonomy shared by every port.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),
    #[error("Generation failed: {0}")]
    GenerationFailure(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Read access to users and documents owned by the collaborator layer.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    async fn get_user(&self, user_id: UserId) -> PortResult<User>;

    async fn get_document(&self, document_id: DocumentId) -> PortResult<Document>;

    /// Number of documents uploaded by `owner_id`.
    async fn count_documents(&self, owner_id: UserId) -> PortResult<i64>;
}

/// Persistence of generated artifacts.
///
/// Every read and delete is scoped to the calling owner; implementations must
/// not leak another owner's rows even when called directly.
#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    /// Stores the row and its payload as one unit: either both are durable or neither is.
    async fn create(&self, new: NewArtifact) -> PortResult<Artifact>;

    /// Newest first.
    async fn list(
        &self,
        owner_id: UserId,
        artifact_type: Option<ArtifactType>,
    ) -> PortResult<Vec<Artifact>>;

    async fn get(&self, artifact_id: ArtifactId, owner_id: UserId) -> PortResult<Artifact>;

    async fn read_payload(&self, artifact_id: ArtifactId, owner_id: UserId) -> PortResult<Vec<u8>>;

    /// `Forbidden` when the artifact exists but belongs to someone else.
    async fn delete(&self, artifact_id: ArtifactId, owner_id: UserId) -> PortResult<()>;

    /// Summary artifacts held by `owner_id` for `subject_id`.
    async fn count_for(&self, owner_id: UserId, subject_id: DocumentId) -> PortResult<i64>;
}

/// Persistence of catalog snapshots and the sync audit log.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    /// Applies one sync run for `stream` atomically: clears every latest marker of the
    /// stream, upserts each version, and appends one `SyncAttempt` per update.
    /// Overlapping calls for the same stream are serialized by the store.
    async fn apply_stream_sync(
        &self,
        stream: CatalogStream,
        updates: &[VersionUpdate],
    ) -> PortResult<Vec<SyncAttempt>>;

    /// Ordered by stream, then version date. `None` lists every stream.
    async fn list_snapshots(&self, stream: Option<CatalogStream>) -> PortResult<Vec<Snapshot>>;

    async fn get_snapshot(
        &self,
        stream: CatalogStream,
        version_date: NaiveDate,
    ) -> PortResult<Snapshot>;

    /// The snapshots currently flagged latest among `streams`.
    async fn latest_snapshots(&self, streams: &[CatalogStream]) -> PortResult<Vec<Snapshot>>;

    /// Oldest first.
    async fn list_sync_attempts(
        &self,
        stream: Option<CatalogStream>,
    ) -> PortResult<Vec<SyncAttempt>>;
}

/// The external ERP/MES file provider.
#[async_trait]
pub trait CatalogService: Send + Sync {
    async fn get_manifest(&self) -> PortResult<Manifest>;

    /// `date` is required for `erp`/`mes`; `None` asks the provider for its latest version.
    async fn get_listing(
        &self,
        stream: CatalogStream,
        date: Option<NaiveDate>,
    ) -> PortResult<Listing>;

    async fn get_file_bytes(
        &self,
        stream: CatalogStream,
        name: &str,
        date: Option<NaiveDate>,
    ) -> PortResult<Vec<u8>>;
}

/// Options passed to the summarization backend.
#[derive(Debug, Clone, Default)]
pub struct SummarizeOptions {
    pub system_prompt: Option<String>,
    pub scope: Option<Value>,
}

/// Generated text plus whatever the backend reports about how it was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub text: String,
    pub metadata: Value,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Produces a summary of `text`.
    async fn summarize(&self, text: &str, options: &SummarizeOptions) -> PortResult<Summary>;
}
