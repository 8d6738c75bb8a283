//! services/api/src/testing.rs
//!
//! Scripted fakes shared by the unit tests of the job and sync modules.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use proscientia_core::domain::{
    Artifact, ArtifactId, ArtifactType, CatalogStream, Document, DocumentId, DocumentSource,
    Listing, Manifest, NewArtifact, SnapshotFile, User, UserId,
};
use proscientia_core::memory::{MemoryArtifactStore, MemoryDirectory, MemorySnapshotStore};
use proscientia_core::ports::{
    ArtifactRepository, CatalogService, PortError, PortResult, SummarizeOptions, Summarizer,
    Summary,
};
use proscientia_core::StatusBus;
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::jobs::JobContext;

pub fn date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
}

//=========================================================================================
// Summarizer
//=========================================================================================

pub struct FakeSummarizer {
    outcome: Result<String, PortError>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, SummarizeOptions)>>,
}

impl FakeSummarizer {
    pub fn replying(text: &str) -> Self {
        Self {
            outcome: Ok(text.to_string()),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            outcome: Err(PortError::GenerationFailure(message.to_string())),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn stalled(delay: Duration) -> Self {
        Self {
            outcome: Ok("too late".to_string()),
            delay: Some(delay),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, SummarizeOptions)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(&self, text: &str, options: &SummarizeOptions) -> PortResult<Summary> {
        self.calls
            .lock()
            .unwrap()
            .push((text.to_string(), options.clone()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcome.clone().map(|text| Summary {
            text,
            metadata: json!({"model": "fake"}),
        })
    }
}

//=========================================================================================
// Catalog
//=========================================================================================

/// An in-memory catalog provider. Anything not scripted answers `CatalogUnavailable`.
#[derive(Default)]
pub struct FakeCatalog {
    manifest: Mutex<Option<Manifest>>,
    listings: Mutex<HashMap<(CatalogStream, NaiveDate), Vec<SnapshotFile>>>,
    files: Mutex<HashMap<(CatalogStream, String), Vec<u8>>>,
    listing_calls: AtomicUsize,
    file_requests: Mutex<Vec<(CatalogStream, String, Option<NaiveDate>)>>,
}

impl FakeCatalog {
    pub fn set_manifest(&self, manifest: Value) {
        *self.manifest.lock().unwrap() = Some(serde_json::from_value(manifest).unwrap());
    }

    pub fn set_listing(&self, stream: CatalogStream, version: &str, files: &[(&str, u64)]) {
        let files = files
            .iter()
            .map(|(name, size)| SnapshotFile {
                name: name.to_string(),
                size: *size,
            })
            .collect();
        self.listings
            .lock()
            .unwrap()
            .insert((stream, date(version)), files);
    }

    pub fn remove_listing(&self, stream: CatalogStream, version: &str) {
        self.listings.lock().unwrap().remove(&(stream, date(version)));
    }

    pub fn set_file(&self, stream: CatalogStream, name: &str, bytes: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert((stream, name.to_string()), bytes.to_vec());
    }

    pub fn listing_calls(&self) -> usize {
        self.listing_calls.load(Ordering::SeqCst)
    }

    pub fn file_calls(&self) -> usize {
        self.file_requests.lock().unwrap().len()
    }

    pub fn file_requests(&self) -> Vec<(CatalogStream, String, Option<NaiveDate>)> {
        self.file_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CatalogService for FakeCatalog {
    async fn get_manifest(&self) -> PortResult<Manifest> {
        self.manifest
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| PortError::CatalogUnavailable("manifest: connection refused".into()))
    }

    async fn get_listing(
        &self,
        stream: CatalogStream,
        date: Option<NaiveDate>,
    ) -> PortResult<Listing> {
        self.listing_calls.fetch_add(1, Ordering::SeqCst);
        let date = date.ok_or_else(|| PortError::InvalidInput("date is required".into()))?;
        let files = self
            .listings
            .lock()
            .unwrap()
            .get(&(stream, date))
            .cloned()
            .ok_or_else(|| {
                PortError::CatalogUnavailable(format!("/{}?date={} returned 404", stream, date))
            })?;
        Ok(Listing {
            date: Some(date.to_string()),
            files,
        })
    }

    async fn get_file_bytes(
        &self,
        stream: CatalogStream,
        name: &str,
        date: Option<NaiveDate>,
    ) -> PortResult<Vec<u8>> {
        self.file_requests
            .lock()
            .unwrap()
            .push((stream, name.to_string(), date));
        self.files
            .lock()
            .unwrap()
            .get(&(stream, name.to_string()))
            .cloned()
            .ok_or_else(|| PortError::CatalogUnavailable(format!("file {} returned 404", name)))
    }
}

//=========================================================================================
// Artifact store
//=========================================================================================

/// Wraps the memory store so that `create` stores the artifact, signals `stored` and
/// then holds its answer back until `release` is notified.
pub struct GatedArtifacts {
    pub inner: Arc<MemoryArtifactStore>,
    pub stored: Notify,
    pub release: Notify,
}

impl GatedArtifacts {
    pub fn new(inner: Arc<MemoryArtifactStore>) -> Self {
        Self {
            inner,
            stored: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl ArtifactRepository for GatedArtifacts {
    async fn create(&self, new: NewArtifact) -> PortResult<Artifact> {
        let artifact = self.inner.create(new).await?;
        self.stored.notify_one();
        self.release.notified().await;
        Ok(artifact)
    }

    async fn list(
        &self,
        owner_id: UserId,
        artifact_type: Option<ArtifactType>,
    ) -> PortResult<Vec<Artifact>> {
        self.inner.list(owner_id, artifact_type).await
    }

    async fn get(&self, artifact_id: ArtifactId, owner_id: UserId) -> PortResult<Artifact> {
        self.inner.get(artifact_id, owner_id).await
    }

    async fn read_payload(&self, artifact_id: ArtifactId, owner_id: UserId) -> PortResult<Vec<u8>> {
        self.inner.read_payload(artifact_id, owner_id).await
    }

    async fn delete(&self, artifact_id: ArtifactId, owner_id: UserId) -> PortResult<()> {
        self.inner.delete(artifact_id, owner_id).await
    }

    async fn count_for(&self, owner_id: UserId, subject_id: DocumentId) -> PortResult<i64> {
        self.inner.count_for(owner_id, subject_id).await
    }
}

//=========================================================================================
// Wiring
//=========================================================================================

pub struct Fixture {
    pub directory: Arc<MemoryDirectory>,
    pub artifacts: Arc<MemoryArtifactStore>,
    pub snapshots: Arc<MemorySnapshotStore>,
    pub catalog: Arc<FakeCatalog>,
    pub summarizer: Arc<FakeSummarizer>,
    pub bus: Arc<StatusBus>,
}

impl Fixture {
    pub fn new(summarizer: FakeSummarizer) -> Self {
        Self {
            directory: Arc::new(MemoryDirectory::new()),
            artifacts: Arc::new(MemoryArtifactStore::new()),
            snapshots: Arc::new(MemorySnapshotStore::new()),
            catalog: Arc::new(FakeCatalog::default()),
            summarizer: Arc::new(summarizer),
            bus: Arc::new(StatusBus::new(64)),
        }
    }

    pub fn context(&self) -> JobContext {
        JobContext {
            directory: self.directory.clone(),
            artifacts: self.artifacts.clone(),
            snapshots: self.snapshots.clone(),
            catalog: self.catalog.clone(),
            summarizer: self.summarizer.clone(),
            bus: self.bus.clone(),
        }
    }

    pub fn add_user(&self, id: i64) {
        self.directory.insert_user(User {
            id,
            email: Some(format!("user{}@example.com", id)),
        });
    }

    pub fn add_document(
        &self,
        id: i64,
        source: DocumentSource,
        uploaded_by: Option<i64>,
        content: Option<&str>,
    ) {
        self.directory.insert_document(Document {
            id,
            source,
            title: format!("Instrukcja {}", id),
            uploaded_by,
            mock_stream: None,
            mock_version_date: None,
            mock_filename: None,
            content: content.map(|c| c.as_bytes().to_vec()),
        });
    }
}
