//! services/api/src/sync.rs
//!
//! Reconciles the local snapshot table with the external catalog manifest.
//!
//! For each of `erp` and `mes` a run fetches every listed version's file listing first
//! and then hands the whole batch to `SnapshotRepository::apply_stream_sync`, which
//! clears the stream's latest marker, upserts every version and appends the audit
//! records in one atomic step. Runs for the same stream are additionally serialized
//! in process, so two overlapping runs cannot apply their batches interleaved.
//!
//! The sync is additive: versions that disappear from the manifest are left alone.
//! A store that cannot apply clear and upsert atomically may leave a stream without
//! any latest snapshot after a crash mid-run; callers gating on `is_latest` must
//! tolerate that until the next successful sync.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use proscientia_core::domain::{CatalogStream, Manifest, SyncStatus, VersionUpdate};
use proscientia_core::ports::{CatalogService, PortError, PortResult, SnapshotRepository};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use utoipa::ToSchema;

/// Outcome of one `sync_all` run.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SyncReport {
    pub detail: String,
    pub streams: Vec<StreamSyncReport>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StreamSyncReport {
    #[schema(value_type = String)]
    pub stream: CatalogStream,
    /// The version now flagged latest, if the manifest names one.
    pub latest: Option<NaiveDate>,
    pub processed: usize,
    pub failed: usize,
    /// Set when the store refused the whole batch for this stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct SnapshotSynchronizer {
    catalog: Arc<dyn CatalogService>,
    snapshots: Arc<dyn SnapshotRepository>,
    /// Also fetch every listed file and count a version as failed if any is unavailable.
    verify_files: bool,
    stream_locks: HashMap<CatalogStream, Mutex<()>>,
}

impl SnapshotSynchronizer {
    pub fn new(
        catalog: Arc<dyn CatalogService>,
        snapshots: Arc<dyn SnapshotRepository>,
        verify_files: bool,
    ) -> Self {
        Self {
            catalog,
            snapshots,
            verify_files,
            stream_locks: CatalogStream::SNAPSHOT_STREAMS
                .iter()
                .map(|s| (*s, Mutex::new(())))
                .collect(),
        }
    }

    /// Fetches the manifest once and syncs every snapshot stream against it.
    ///
    /// Only a manifest failure aborts the run. A failed listing is recorded as a
    /// `Failure` attempt for its version, and a store error for one stream does not
    /// stop the other.
    pub async fn sync_all(&self) -> PortResult<SyncReport> {
        let manifest = self.catalog.get_manifest().await?;

        let mut streams = Vec::with_capacity(CatalogStream::SNAPSHOT_STREAMS.len());
        for stream in CatalogStream::SNAPSHOT_STREAMS {
            match self.sync_stream(stream, &manifest).await {
                Ok(report) => streams.push(report),
                Err(e) => {
                    error!(%stream, error = %e, "Snapshot store rejected the sync batch");
                    streams.push(StreamSyncReport {
                        stream,
                        latest: None,
                        processed: 0,
                        failed: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        Ok(SyncReport {
            detail: "Sync completed".to_string(),
            streams,
        })
    }

    async fn sync_stream(
        &self,
        stream: CatalogStream,
        manifest: &Manifest,
    ) -> PortResult<StreamSyncReport> {
        let _guard = match self.stream_locks.get(&stream) {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let entry = manifest.stream(stream).cloned().unwrap_or_default();
        let latest = entry
            .latest
            .as_deref()
            .and_then(|raw| parse_version(stream, raw));

        let mut versions: Vec<NaiveDate> = Vec::with_capacity(entry.versions.len() + 1);
        for raw in &entry.versions {
            if let Some(version) = parse_version(stream, raw) {
                if !versions.contains(&version) {
                    versions.push(version);
                }
            }
        }
        // The latest version is synced even when the manifest forgot to list it.
        if let Some(latest) = latest {
            if !versions.contains(&latest) {
                warn!(%stream, version = %latest, "Manifest latest is missing from its versions");
                versions.push(latest);
            }
        }

        let mut updates = Vec::with_capacity(versions.len());
        for version in versions {
            updates.push(self.fetch_version(stream, version, Some(version) == latest).await);
        }

        let attempts = self.snapshots.apply_stream_sync(stream, &updates).await?;
        let failed = attempts
            .iter()
            .filter(|a| a.status == SyncStatus::Failure)
            .count();
        info!(%stream, latest = ?latest, processed = attempts.len(), failed, "Stream synced");

        Ok(StreamSyncReport {
            stream,
            latest,
            processed: attempts.len(),
            failed,
            error: None,
        })
    }

    async fn fetch_version(
        &self,
        stream: CatalogStream,
        version: NaiveDate,
        is_latest: bool,
    ) -> VersionUpdate {
        let listing = match self.catalog.get_listing(stream, Some(version)).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(%stream, %version, error = %e, "Listing unavailable; keeping stored files");
                return VersionUpdate {
                    version_date: version,
                    is_latest,
                    files: None,
                    status: SyncStatus::Failure,
                    message: Some(e.to_string()),
                };
            }
        };

        let mut unavailable = Vec::new();
        if self.verify_files {
            for file in &listing.files {
                if let Err(e) = self
                    .catalog
                    .get_file_bytes(stream, &file.name, Some(version))
                    .await
                {
                    warn!(%stream, %version, file = %file.name, error = %e, "File unavailable");
                    unavailable.push(file.name.clone());
                }
            }
        }

        let (status, message) = if unavailable.is_empty() {
            (SyncStatus::Success, None)
        } else {
            (
                SyncStatus::Failure,
                Some(format!(
                    "{} of {} files unavailable: {}",
                    unavailable.len(),
                    listing.files.len(),
                    unavailable.join(", ")
                )),
            )
        };

        VersionUpdate {
            version_date: version,
            is_latest,
            files: Some(listing.files),
            status,
            message,
        }
    }

    /// Returns one JSON file of an `erp`/`mes` snapshot, parsed.
    pub async fn snapshot_json(
        &self,
        stream: CatalogStream,
        version: NaiveDate,
        name: &str,
    ) -> PortResult<Value> {
        if !stream.is_versioned() {
            return Err(PortError::InvalidInput(format!(
                "Stream {} has no snapshots",
                stream
            )));
        }
        let bytes = self
            .catalog
            .get_file_bytes(stream, name, Some(version))
            .await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            PortError::CatalogUnavailable(format!("{} is not valid JSON: {}", name, e))
        })
    }
}

fn parse_version(stream: CatalogStream, raw: &str) -> Option<NaiveDate> {
    match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(_) => {
            warn!(%stream, version = raw, "Skipping unparsable manifest version");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{date, FakeCatalog};
    use proscientia_core::domain::Snapshot;
    use proscientia_core::memory::MemorySnapshotStore;
    use serde_json::json;

    fn synchronizer(catalog: &Arc<FakeCatalog>, store: &Arc<MemorySnapshotStore>, verify: bool) -> SnapshotSynchronizer {
        SnapshotSynchronizer::new(catalog.clone(), store.clone(), verify)
    }

    fn scripted_catalog() -> Arc<FakeCatalog> {
        let catalog = Arc::new(FakeCatalog::default());
        catalog.set_manifest(json!({
            "erp": {"latest": "2026-03-30", "versions": ["2025-12-15", "2026-03-30"]},
            "mes": {"latest": "2026-03-30", "versions": ["2026-03-30"]},
            "docs": {"latest": null, "versions": []}
        }));
        catalog.set_listing(CatalogStream::Erp, "2025-12-15", &[("orders.json", 120)]);
        catalog.set_listing(CatalogStream::Erp, "2026-03-30", &[("orders.json", 140), ("stock.json", 80)]);
        catalog.set_listing(CatalogStream::Mes, "2026-03-30", &[("line.json", 60)]);
        catalog
    }

    fn latest_of(rows: &[Snapshot], stream: CatalogStream) -> Vec<NaiveDate> {
        rows.iter()
            .filter(|s| s.stream == stream && s.is_latest)
            .map(|s| s.version_date)
            .collect()
    }

    /// Everything but the timestamps, which legitimately move on every run.
    fn comparable(rows: Vec<Snapshot>) -> Vec<(i64, CatalogStream, NaiveDate, bool, usize)> {
        rows.into_iter()
            .map(|s| (s.id, s.stream, s.version_date, s.is_latest, s.files.len()))
            .collect()
    }

    #[tokio::test]
    async fn each_stream_ends_with_the_manifest_latest() {
        let catalog = scripted_catalog();
        let store = Arc::new(MemorySnapshotStore::new());

        let report = synchronizer(&catalog, &store, false).sync_all().await.unwrap();
        assert_eq!(report.detail, "Sync completed");
        assert_eq!(report.streams.len(), 2);
        assert_eq!(report.streams[0].processed, 2);
        assert_eq!(report.streams[0].failed, 0);

        let rows = store.list_snapshots(None).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(latest_of(&rows, CatalogStream::Erp), vec![date("2026-03-30")]);
        assert_eq!(latest_of(&rows, CatalogStream::Mes), vec![date("2026-03-30")]);

        let attempts = store.list_sync_attempts(None).await.unwrap();
        assert_eq!(attempts.len(), 3);
        assert!(attempts.iter().all(|a| a.status == SyncStatus::Success));
    }

    #[tokio::test]
    async fn repeated_sync_converges_without_duplicates() {
        let catalog = scripted_catalog();
        let store = Arc::new(MemorySnapshotStore::new());
        let sync = synchronizer(&catalog, &store, false);

        sync.sync_all().await.unwrap();
        let first = comparable(store.list_snapshots(None).await.unwrap());
        sync.sync_all().await.unwrap();
        let second = comparable(store.list_snapshots(None).await.unwrap());

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn latest_moves_and_old_versions_stay() {
        let catalog = scripted_catalog();
        let store = Arc::new(MemorySnapshotStore::new());
        let sync = synchronizer(&catalog, &store, false);
        sync.sync_all().await.unwrap();

        catalog.set_manifest(json!({
            "erp": {"latest": "2026-04-30", "versions": ["2026-04-30"]},
            "mes": {"latest": "2026-03-30", "versions": ["2026-03-30"]}
        }));
        catalog.set_listing(CatalogStream::Erp, "2026-04-30", &[("orders.json", 150)]);
        sync.sync_all().await.unwrap();

        let rows = store.list_snapshots(Some(CatalogStream::Erp)).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(latest_of(&rows, CatalogStream::Erp), vec![date("2026-04-30")]);
    }

    #[tokio::test]
    async fn listing_failure_is_audited_and_keeps_old_files() {
        let catalog = scripted_catalog();
        let store = Arc::new(MemorySnapshotStore::new());
        let sync = synchronizer(&catalog, &store, false);
        sync.sync_all().await.unwrap();

        catalog.remove_listing(CatalogStream::Erp, "2026-03-30");
        let report = sync.sync_all().await.unwrap();
        assert_eq!(report.streams[0].failed, 1);
        assert_eq!(report.streams[1].failed, 0);

        let snapshot = store
            .get_snapshot(CatalogStream::Erp, date("2026-03-30"))
            .await
            .unwrap();
        assert!(snapshot.is_latest);
        assert_eq!(snapshot.files.len(), 2);

        let failures: Vec<_> = store
            .list_sync_attempts(Some(CatalogStream::Erp))
            .await
            .unwrap()
            .into_iter()
            .filter(|a| a.status == SyncStatus::Failure)
            .collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].version_date, date("2026-03-30"));
        assert!(failures[0].message.as_deref().unwrap().contains("404"));
    }

    #[tokio::test]
    async fn verification_fails_versions_with_missing_files() {
        let catalog = scripted_catalog();
        catalog.set_file(CatalogStream::Erp, "orders.json", b"[]");
        catalog.set_file(CatalogStream::Mes, "line.json", b"[]");
        let store = Arc::new(MemorySnapshotStore::new());

        let report = synchronizer(&catalog, &store, true).sync_all().await.unwrap();
        // stock.json of erp 2026-03-30 is listed but not served.
        assert_eq!(report.streams[0].failed, 1);
        assert_eq!(report.streams[1].failed, 0);
        assert_eq!(catalog.file_calls(), 4);
    }

    #[tokio::test]
    async fn manifest_quirks_are_tolerated() {
        let catalog = Arc::new(FakeCatalog::default());
        catalog.set_manifest(json!({
            "erp": {"latest": "2026-03-30", "versions": ["not-a-date", "2025-12-15"]}
        }));
        catalog.set_listing(CatalogStream::Erp, "2025-12-15", &[]);
        catalog.set_listing(CatalogStream::Erp, "2026-03-30", &[]);
        let store = Arc::new(MemorySnapshotStore::new());

        let report = synchronizer(&catalog, &store, false).sync_all().await.unwrap();
        assert_eq!(report.streams[0].processed, 2);
        assert_eq!(report.streams[1].processed, 0);

        let rows = store.list_snapshots(None).await.unwrap();
        assert_eq!(latest_of(&rows, CatalogStream::Erp), vec![date("2026-03-30")]);
        assert!(latest_of(&rows, CatalogStream::Mes).is_empty());
    }

    #[tokio::test]
    async fn manifest_failure_aborts_before_touching_the_store() {
        let catalog = Arc::new(FakeCatalog::default());
        let store = Arc::new(MemorySnapshotStore::new());

        let err = synchronizer(&catalog, &store, false).sync_all().await.unwrap_err();
        assert!(matches!(err, PortError::CatalogUnavailable(_)));
        assert!(store.list_sync_attempts(None).await.unwrap().is_empty());
        assert_eq!(catalog.listing_calls(), 0);
    }

    #[tokio::test]
    async fn overlapping_runs_keep_one_latest_per_stream() {
        let catalog = scripted_catalog();
        let store = Arc::new(MemorySnapshotStore::new());
        let sync = synchronizer(&catalog, &store, false);

        let (a, b) = tokio::join!(sync.sync_all(), sync.sync_all());
        a.unwrap();
        b.unwrap();

        let rows = store.list_snapshots(None).await.unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(latest_of(&rows, CatalogStream::Erp).len(), 1);
        assert_eq!(latest_of(&rows, CatalogStream::Mes).len(), 1);
    }

    #[tokio::test]
    async fn snapshot_json_is_limited_to_versioned_streams() {
        let catalog = scripted_catalog();
        catalog.set_file(CatalogStream::Erp, "orders.json", br#"{"orders": [1, 2]}"#);
        catalog.set_file(CatalogStream::Erp, "broken.json", b"{");
        let store = Arc::new(MemorySnapshotStore::new());
        let sync = synchronizer(&catalog, &store, false);

        let value = sync
            .snapshot_json(CatalogStream::Erp, date("2026-03-30"), "orders.json")
            .await
            .unwrap();
        assert_eq!(value["orders"], json!([1, 2]));
        assert!(matches!(
            sync.snapshot_json(CatalogStream::Docs, date("2026-03-30"), "orders.json").await,
            Err(PortError::InvalidInput(_))
        ));
        assert!(matches!(
            sync.snapshot_json(CatalogStream::Erp, date("2026-03-30"), "broken.json").await,
            Err(PortError::CatalogUnavailable(_))
        ));
    }
}
