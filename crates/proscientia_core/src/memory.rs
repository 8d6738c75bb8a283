//! In-memory implementations of the persistence ports, for tests and local runs.
//!
//! Each store keeps its state behind one `std::sync::Mutex`, so every operation is
//! trivially atomic and serialized.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use crate::domain::{
    payload_path, Artifact, ArtifactId, ArtifactType, CatalogStream, Document, DocumentId,
    DocumentSource, NewArtifact, Snapshot, SyncAttempt, User, UserId, VersionUpdate,
};
use crate::ports::{
    ArtifactRepository, DirectoryService, PortError, PortResult, SnapshotRepository,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

//=========================================================================================
// Users and Documents
//=========================================================================================

#[derive(Default)]
struct DirectoryState {
    users: HashMap<UserId, User>,
    documents: HashMap<DocumentId, Document>,
}

#[derive(Default)]
pub struct MemoryDirectory {
    state: Mutex<DirectoryState>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: User) {
        lock(&self.state).users.insert(user.id, user);
    }

    pub fn insert_document(&self, document: Document) {
        lock(&self.state).documents.insert(document.id, document);
    }
}

#[async_trait]
impl DirectoryService for MemoryDirectory {
    async fn get_user(&self, user_id: UserId) -> PortResult<User> {
        lock(&self.state)
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))
    }

    async fn get_document(&self, document_id: DocumentId) -> PortResult<Document> {
        lock(&self.state)
            .documents
            .get(&document_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Document {} not found", document_id)))
    }

    async fn count_documents(&self, owner_id: UserId) -> PortResult<i64> {
        let state = lock(&self.state);
        let count = state
            .documents
            .values()
            .filter(|d| d.source == DocumentSource::UserUpload && d.uploaded_by == Some(owner_id))
            .count();
        Ok(count as i64)
    }
}

//=========================================================================================
// Artifacts
//=========================================================================================

#[derive(Default)]
struct ArtifactState {
    next_id: ArtifactId,
    rows: Vec<Artifact>,
    payloads: HashMap<String, Vec<u8>>,
}

#[derive(Default)]
pub struct MemoryArtifactStore {
    state: Mutex<ArtifactState>,
    fail_payload_writes: AtomicBool,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent payload write fail after the row has been staged.
    pub fn set_fail_payload_writes(&self, fail: bool) {
        self.fail_payload_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored payload blobs, visible or not.
    pub fn payload_count(&self) -> usize {
        lock(&self.state).payloads.len()
    }
}

#[async_trait]
impl ArtifactRepository for MemoryArtifactStore {
    async fn create(&self, new: NewArtifact) -> PortResult<Artifact> {
        let mut state = lock(&self.state);
        let id = state.next_id + 1;
        let created_at = Utc::now();
        let artifact = Artifact {
            id,
            artifact_type: new.artifact_type,
            subject_id: new.subject_id,
            owner_id: new.owner_id,
            payload_ref: payload_path(created_at, id, &new.filename),
            title: new.title,
            metadata: new.metadata,
            created_at,
        };

        // The row is only staged here; nothing is committed until the payload is in.
        if self.fail_payload_writes.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected(format!(
                "Failed to write payload {}",
                artifact.payload_ref
            )));
        }

        state.next_id = id;
        state
            .payloads
            .insert(artifact.payload_ref.clone(), new.payload);
        state.rows.push(artifact.clone());
        Ok(artifact)
    }

    async fn list(
        &self,
        owner_id: UserId,
        artifact_type: Option<ArtifactType>,
    ) -> PortResult<Vec<Artifact>> {
        let state = lock(&self.state);
        let mut rows: Vec<Artifact> = state
            .rows
            .iter()
            .filter(|a| a.owner_id == owner_id)
            .filter(|a| artifact_type.map_or(true, |t| a.artifact_type == t))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn get(&self, artifact_id: ArtifactId, owner_id: UserId) -> PortResult<Artifact> {
        lock(&self.state)
            .rows
            .iter()
            .find(|a| a.id == artifact_id && a.owner_id == owner_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Artifact {} not found", artifact_id)))
    }

    async fn read_payload(&self, artifact_id: ArtifactId, owner_id: UserId) -> PortResult<Vec<u8>> {
        let artifact = self.get(artifact_id, owner_id).await?;
        lock(&self.state)
            .payloads
            .get(&artifact.payload_ref)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Payload of artifact {} missing", artifact_id)))
    }

    async fn delete(&self, artifact_id: ArtifactId, owner_id: UserId) -> PortResult<()> {
        let mut state = lock(&self.state);
        let index = state
            .rows
            .iter()
            .position(|a| a.id == artifact_id)
            .ok_or_else(|| PortError::NotFound(format!("Artifact {} not found", artifact_id)))?;
        if state.rows[index].owner_id != owner_id {
            return Err(PortError::Forbidden(format!(
                "Artifact {} belongs to another user",
                artifact_id
            )));
        }
        let removed = state.rows.remove(index);
        state.payloads.remove(&removed.payload_ref);
        Ok(())
    }

    async fn count_for(&self, owner_id: UserId, subject_id: DocumentId) -> PortResult<i64> {
        let count = lock(&self.state)
            .rows
            .iter()
            .filter(|a| {
                a.owner_id == owner_id
                    && a.subject_id == Some(subject_id)
                    && a.artifact_type == ArtifactType::Summary
            })
            .count();
        Ok(count as i64)
    }
}

//=========================================================================================
// Snapshots
//=========================================================================================

#[derive(Default)]
struct SnapshotState {
    next_snapshot_id: i64,
    next_attempt_id: i64,
    snapshots: Vec<Snapshot>,
    attempts: Vec<SyncAttempt>,
}

#[derive(Default)]
pub struct MemorySnapshotStore {
    state: Mutex<SnapshotState>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotRepository for MemorySnapshotStore {
    async fn apply_stream_sync(
        &self,
        stream: CatalogStream,
        updates: &[VersionUpdate],
    ) -> PortResult<Vec<SyncAttempt>> {
        let mut state = lock(&self.state);
        let now = Utc::now();

        for snapshot in state.snapshots.iter_mut().filter(|s| s.stream == stream) {
            snapshot.is_latest = false;
        }

        let mut attempts = Vec::with_capacity(updates.len());
        for update in updates {
            let existing = state
                .snapshots
                .iter()
                .position(|s| s.stream == stream && s.version_date == update.version_date);
            let index = match existing {
                Some(index) => index,
                None => {
                    state.next_snapshot_id += 1;
                    let id = state.next_snapshot_id;
                    state.snapshots.push(Snapshot {
                        id,
                        stream,
                        version_date: update.version_date,
                        is_latest: false,
                        files: Vec::new(),
                        updated_at: now,
                    });
                    state.snapshots.len() - 1
                }
            };

            let snapshot = &mut state.snapshots[index];
            snapshot.is_latest = update.is_latest;
            if let Some(files) = &update.files {
                snapshot.files = files.clone();
            }
            snapshot.updated_at = now;
            let snapshot_id = snapshot.id;

            state.next_attempt_id += 1;
            let attempt = SyncAttempt {
                id: state.next_attempt_id,
                stream,
                version_date: update.version_date,
                snapshot_id: Some(snapshot_id),
                status: update.status,
                message: update.message.clone(),
                timestamp: now,
            };
            state.attempts.push(attempt.clone());
            attempts.push(attempt);
        }

        Ok(attempts)
    }

    async fn list_snapshots(&self, stream: Option<CatalogStream>) -> PortResult<Vec<Snapshot>> {
        let state = lock(&self.state);
        let mut rows: Vec<Snapshot> = state
            .snapshots
            .iter()
            .filter(|s| stream.map_or(true, |st| s.stream == st))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.stream
                .as_str()
                .cmp(b.stream.as_str())
                .then(a.version_date.cmp(&b.version_date))
        });
        Ok(rows)
    }

    async fn get_snapshot(
        &self,
        stream: CatalogStream,
        version_date: NaiveDate,
    ) -> PortResult<Snapshot> {
        lock(&self.state)
            .snapshots
            .iter()
            .find(|s| s.stream == stream && s.version_date == version_date)
            .cloned()
            .ok_or_else(|| {
                PortError::NotFound(format!("Snapshot {} {} not found", stream, version_date))
            })
    }

    async fn latest_snapshots(&self, streams: &[CatalogStream]) -> PortResult<Vec<Snapshot>> {
        let rows = self.list_snapshots(None).await?;
        Ok(rows
            .into_iter()
            .filter(|s| s.is_latest && streams.contains(&s.stream))
            .collect())
    }

    async fn list_sync_attempts(
        &self,
        stream: Option<CatalogStream>,
    ) -> PortResult<Vec<SyncAttempt>> {
        Ok(lock(&self.state)
            .attempts
            .iter()
            .filter(|a| stream.map_or(true, |st| a.stream == st))
            .cloned()
            .collect())
    }
}
