pub mod bus;
pub mod cache;
pub mod domain;
pub mod memory;
pub mod ports;

pub use bus::{StatusBus, Subscription, Topic};
pub use domain::{
    Artifact, ArtifactType, CatalogStream, Document, DocumentSource, Job, JobKind, JobState,
    LifecycleEvent, Listing, Manifest, NewArtifact, Snapshot, SnapshotFile, SyncAttempt,
    SyncStatus, User,
};
pub use ports::{
    ArtifactRepository, CatalogService, DirectoryService, PortError, PortResult,
    SnapshotRepository, SummarizeOptions, Summarizer, Summary,
};
