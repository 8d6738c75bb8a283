//! crates/proscientia_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database, HTTP client or LLM provider.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type UserId = i64;
pub type DocumentId = i64;
pub type ArtifactId = i64;
pub type JobId = Uuid;

//=========================================================================================
// Users and Documents (owned by the collaborator layer, read by the core)
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub email: Option<String>,
}

/// Where a document came from. Mock sources are globally readable,
/// user uploads belong to their uploader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentSource {
    MockDocs,
    MockErp,
    MockMes,
    UserUpload,
}

impl DocumentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentSource::MockDocs => "MOCK_DOCS",
            DocumentSource::MockErp => "MOCK_ERP",
            DocumentSource::MockMes => "MOCK_MES",
            DocumentSource::UserUpload => "USER_UPLOAD",
        }
    }
}

impl FromStr for DocumentSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MOCK_DOCS" => Ok(DocumentSource::MockDocs),
            "MOCK_ERP" => Ok(DocumentSource::MockErp),
            "MOCK_MES" => Ok(DocumentSource::MockMes),
            "USER_UPLOAD" => Ok(DocumentSource::UserUpload),
            other => Err(format!("unknown document source '{}'", other)),
        }
    }
}

/// A source document that summaries are generated from.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: DocumentId,
    pub source: DocumentSource,
    pub title: String,
    pub uploaded_by: Option<UserId>,
    pub mock_stream: Option<String>,
    pub mock_version_date: Option<NaiveDate>,
    pub mock_filename: Option<String>,
    /// Raw file bytes, `None` while the file has not been fetched or uploaded yet.
    pub content: Option<Vec<u8>>,
}

impl Document {
    /// Whether `user_id` may request derived artifacts from this document.
    pub fn is_accessible_by(&self, user_id: UserId) -> bool {
        match self.source {
            DocumentSource::UserUpload => self.uploaded_by == Some(user_id),
            _ => true,
        }
    }

    pub fn display_title(&self) -> String {
        if !self.title.trim().is_empty() {
            return self.title.clone();
        }
        match &self.mock_filename {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("Document {}", self.id),
        }
    }
}

//=========================================================================================
// Jobs and Lifecycle Events
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Summary of a single document.
    Summary,
    /// Report over the latest ERP and MES snapshots.
    Report,
}

/// Lifecycle state of a job. Serialized with the status strings the live
/// stream exposes (`queued`, `started`, `completed`, `error`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "started")]
    Started,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "error")]
    Failed,
}

impl JobState {
    pub fn as_status(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Started => "started",
            JobState::Completed => "completed",
            JobState::Failed => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// `Queued -> Started -> {Completed | Failed}`. Nothing else is legal.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Started)
                | (JobState::Started, JobState::Completed)
                | (JobState::Started, JobState::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_status())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub owner_id: UserId,
    pub subject_id: Option<DocumentId>,
    pub scope: Option<Value>,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
}

/// An immutable fact emitted once per job state transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleEvent {
    pub job_id: JobId,
    pub owner_id: UserId,
    pub subject_id: Option<DocumentId>,
    #[serde(rename = "status")]
    pub state: JobState,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn for_job(job: &Job, state: JobState, payload: Value) -> Self {
        Self {
            job_id: job.id,
            owner_id: job.owner_id,
            subject_id: job.subject_id,
            state,
            payload,
            timestamp: Utc::now(),
        }
    }
}

//=========================================================================================
// Artifacts
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Summary,
    Quiz,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::Summary => "summary",
            ArtifactType::Quiz => "quiz",
        }
    }
}

impl FromStr for ArtifactType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "summary" => Ok(ArtifactType::Summary),
            "quiz" => Ok(ArtifactType::Quiz),
            other => Err(format!("unknown artifact type '{}'", other)),
        }
    }
}

/// Generated output persisted once per successfully completed job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub artifact_type: ArtifactType,
    pub subject_id: Option<DocumentId>,
    pub owner_id: UserId,
    /// Storage path of the payload bytes. Never empty for a visible artifact.
    pub payload_ref: String,
    pub title: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Everything needed to create an artifact row together with its payload.
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub artifact_type: ArtifactType,
    pub owner_id: UserId,
    pub subject_id: Option<DocumentId>,
    pub title: String,
    pub payload: Vec<u8>,
    pub filename: String,
    pub metadata: Value,
}

/// Builds the storage path an artifact payload is addressed by.
pub fn payload_path(created_at: DateTime<Utc>, artifact_id: ArtifactId, filename: &str) -> String {
    format!(
        "ai_artifacts/{}/{}_{}",
        created_at.format("%Y/%m/%d"),
        artifact_id,
        filename
    )
}

//=========================================================================================
// Catalog Snapshots
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogStream {
    Erp,
    Mes,
    Docs,
}

impl CatalogStream {
    /// The versioned streams the synchronizer mirrors.
    pub const SNAPSHOT_STREAMS: [CatalogStream; 2] = [CatalogStream::Erp, CatalogStream::Mes];

    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogStream::Erp => "erp",
            CatalogStream::Mes => "mes",
            CatalogStream::Docs => "docs",
        }
    }

    /// `erp` and `mes` are addressed by version date, `docs` is not.
    pub fn is_versioned(&self) -> bool {
        matches!(self, CatalogStream::Erp | CatalogStream::Mes)
    }
}

impl fmt::Display for CatalogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CatalogStream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "erp" => Ok(CatalogStream::Erp),
            "mes" => Ok(CatalogStream::Mes),
            "docs" => Ok(CatalogStream::Docs),
            other => Err(format!("invalid stream '{}' (expected erp|mes|docs)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

/// Local mirror of one `(stream, version_date)` listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub id: i64,
    pub stream: CatalogStream,
    pub version_date: NaiveDate,
    pub is_latest: bool,
    pub files: Vec<SnapshotFile>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Success,
    Failure,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "success",
            SyncStatus::Failure => "failure",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(SyncStatus::Success),
            "failure" => Ok(SyncStatus::Failure),
            other => Err(format!("unknown sync status '{}'", other)),
        }
    }
}

/// Append-only audit record of one version touched by a sync run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncAttempt {
    pub id: i64,
    pub stream: CatalogStream,
    pub version_date: NaiveDate,
    pub snapshot_id: Option<i64>,
    pub status: SyncStatus,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// The outcome of processing one manifest version, applied to the store
/// together with every other version of the same stream.
#[derive(Debug, Clone)]
pub struct VersionUpdate {
    pub version_date: NaiveDate,
    pub is_latest: bool,
    /// New file listing. `None` keeps whatever the row already holds.
    pub files: Option<Vec<SnapshotFile>>,
    pub status: SyncStatus,
    pub message: Option<String>,
}

//=========================================================================================
// External Catalog Payloads
//=========================================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamManifest {
    #[serde(default)]
    pub latest: Option<String>,
    #[serde(default)]
    pub versions: Vec<String>,
}

/// `GET /manifest`: stream name to its latest version and version history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    pub streams: BTreeMap<String, StreamManifest>,
}

impl Manifest {
    pub fn stream(&self, stream: CatalogStream) -> Option<&StreamManifest> {
        self.streams.get(stream.as_str())
    }
}

/// `GET /{stream}`: the files of one version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub files: Vec<SnapshotFile>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_state_machine_only_moves_forward() {
        assert!(JobState::Queued.can_transition_to(JobState::Started));
        assert!(JobState::Started.can_transition_to(JobState::Completed));
        assert!(JobState::Started.can_transition_to(JobState::Failed));
        assert!(!JobState::Queued.can_transition_to(JobState::Completed));
        assert!(!JobState::Completed.can_transition_to(JobState::Failed));
        assert!(!JobState::Failed.can_transition_to(JobState::Started));
    }

    #[test]
    fn lifecycle_event_serializes_status_strings() {
        let job = Job {
            id: Uuid::nil(),
            kind: JobKind::Summary,
            owner_id: 3,
            subject_id: Some(7),
            scope: None,
            state: JobState::Started,
            created_at: Utc::now(),
        };
        let event = LifecycleEvent::for_job(&job, JobState::Failed, serde_json::json!({}));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["owner_id"], 3);
        assert_eq!(json["subject_id"], 7);
    }

    #[test]
    fn manifest_parses_provider_shape() {
        let raw = r#"{"erp":{"latest":"2026-03-30","versions":["2025-12-15","2026-03-30"]},"mes":{"latest":null}}"#;
        let manifest: Manifest = serde_json::from_str(raw).unwrap();
        let erp = manifest.stream(CatalogStream::Erp).unwrap();
        assert_eq!(erp.latest.as_deref(), Some("2026-03-30"));
        assert_eq!(erp.versions.len(), 2);
        assert!(manifest.stream(CatalogStream::Mes).unwrap().versions.is_empty());
    }

    #[test]
    fn user_uploads_are_private_mock_documents_are_not() {
        let mut doc = Document {
            id: 1,
            source: DocumentSource::UserUpload,
            title: String::new(),
            uploaded_by: Some(5),
            mock_stream: None,
            mock_version_date: None,
            mock_filename: Some("spec.pdf".into()),
            content: None,
        };
        assert!(doc.is_accessible_by(5));
        assert!(!doc.is_accessible_by(6));
        assert_eq!(doc.display_title(), "spec.pdf");

        doc.source = DocumentSource::MockDocs;
        assert!(doc.is_accessible_by(6));
    }
}
