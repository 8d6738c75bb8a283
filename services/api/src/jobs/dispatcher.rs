//! services/api/src/jobs/dispatcher.rs
//!
//! The job dispatcher: admission, the in-process job table, the worker pool and the
//! lifecycle state machine.
//!
//! Every state change goes through `transition`, which validates the move against
//! `JobState::can_transition_to` and publishes the matching `LifecycleEvent` to the
//! job, owner and global topics of the status bus. The `Queued` event is published
//! before the job id is handed to the queue, so no subscriber can observe `Started`
//! ahead of `Queued`.
//!
//! Units of work only prepare their artifact. The dispatcher stores it and publishes
//! `Completed` while holding the admission lock, so a summary quota check sees each job
//! either in flight or stored, never both.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use proscientia_core::domain::{
    ArtifactId, DocumentId, Job, JobId, JobKind, JobState, LifecycleEvent, NewArtifact, UserId,
};
use proscientia_core::ports::{
    ArtifactRepository, CatalogService, DirectoryService, PortError, PortResult,
    SnapshotRepository, SummarizeOptions, Summarizer, Summary,
};
use proscientia_core::StatusBus;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::JobsConfig;
use crate::jobs::{report_task, summary_task};

/// Characters of generated text carried by the `completed` event.
const PREVIEW_CHARS: usize = 500;
/// Finished jobs older than this are dropped from the job table on the next submission.
const FINISHED_JOB_RETENTION_HOURS: i64 = 1;

//=========================================================================================
// Public Types
//=========================================================================================

/// The ports a unit of work may touch.
#[derive(Clone)]
pub struct JobContext {
    pub directory: Arc<dyn DirectoryService>,
    pub artifacts: Arc<dyn ArtifactRepository>,
    pub snapshots: Arc<dyn SnapshotRepository>,
    pub catalog: Arc<dyn CatalogService>,
    pub summarizer: Arc<dyn Summarizer>,
    pub bus: Arc<StatusBus>,
}

/// How a job ended when it did not raise.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed { artifact_id: ArtifactId },
    /// Inputs could not be resolved; the job was failed without side effects.
    Rejected { message: String },
}

/// What `run` hands back to the worker loop.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Job {0} is not tracked by this dispatcher")]
    UnknownJob(JobId),
    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobState,
        to: JobState,
    },
    #[error("Job {job_id} failed: {source}")]
    Failed { job_id: JobId, source: PortError },
}

/// Result of a unit of work, before the dispatcher stores it and ends the job.
pub(crate) enum WorkOutcome {
    Ready { artifact: NewArtifact, text: String },
    Rejected(String),
}

//=========================================================================================
// The Dispatcher
//=========================================================================================

struct Inner {
    ctx: JobContext,
    config: JobsConfig,
    jobs: RwLock<HashMap<JobId, Job>>,
    /// The terminal event of every finished job still in `jobs`.
    finished: RwLock<HashMap<JobId, LifecycleEvent>>,
    /// Serializes quota checks with the job creation they guard.
    admission: Mutex<()>,
    queue: Option<mpsc::UnboundedSender<JobId>>,
    workers: StdMutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

/// Cheap to clone; all clones share one job table and one worker pool.
#[derive(Clone)]
pub struct JobDispatcher {
    inner: Arc<Inner>,
}

impl JobDispatcher {
    /// Creates the dispatcher and spawns `config.worker_count` workers on the current
    /// tokio runtime. With a worker count of zero nothing is spawned and submitted jobs
    /// stay `Queued` until `run` is called for them.
    pub fn new(ctx: JobContext, config: JobsConfig) -> Self {
        let worker_count = config.worker_count;
        let (queue, receiver) = if worker_count > 0 {
            let (tx, rx) = mpsc::unbounded_channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let dispatcher = Self {
            inner: Arc::new(Inner {
                ctx,
                config,
                jobs: RwLock::new(HashMap::new()),
                finished: RwLock::new(HashMap::new()),
                admission: Mutex::new(()),
                queue,
                workers: StdMutex::new(Vec::new()),
                shutdown: CancellationToken::new(),
            }),
        };

        if let Some(receiver) = receiver {
            let receiver = Arc::new(Mutex::new(receiver));
            let handles: Vec<JoinHandle<()>> = (0..worker_count)
                .map(|worker| tokio::spawn(dispatcher.clone().worker_loop(worker, receiver.clone())))
                .collect();
            dispatcher.workers().extend(handles);
            info!(worker_count, "Job worker pool started");
        }

        dispatcher
    }

    fn read_jobs(&self) -> RwLockReadGuard<'_, HashMap<JobId, Job>> {
        self.inner.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_jobs(&self) -> RwLockWriteGuard<'_, HashMap<JobId, Job>> {
        self.inner.jobs.write().unwrap_or_else(|e| e.into_inner())
    }

    fn write_finished(&self) -> RwLockWriteGuard<'_, HashMap<JobId, LifecycleEvent>> {
        self.inner.finished.write().unwrap_or_else(|e| e.into_inner())
    }

    fn workers(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner.workers.lock().unwrap_or_else(|e| e.into_inner())
    }

    //-------------------------------------------------------------------------------------
    // Admission
    //-------------------------------------------------------------------------------------

    /// Creates a job in `Queued`, publishes its `queued` event and enqueues it.
    ///
    /// Malformed input is rejected here, before a job exists, so no event is emitted
    /// for it.
    pub fn submit(
        &self,
        kind: JobKind,
        owner_id: UserId,
        subject_id: Option<DocumentId>,
        scope: Option<Value>,
    ) -> PortResult<JobId> {
        validate_scope(scope.as_ref())?;
        match (kind, subject_id) {
            (JobKind::Summary, None) => {
                return Err(PortError::InvalidInput(
                    "A summary job needs a document".to_string(),
                ))
            }
            (JobKind::Report, Some(_)) => {
                return Err(PortError::InvalidInput(
                    "A report job has no single document".to_string(),
                ))
            }
            _ => {}
        }

        let job = Job {
            id: Uuid::new_v4(),
            kind,
            owner_id,
            subject_id,
            scope,
            state: JobState::Queued,
            created_at: Utc::now(),
        };
        let event = LifecycleEvent::for_job(&job, JobState::Queued, json!({}));

        {
            let mut jobs = self.write_jobs();
            let cutoff = Utc::now() - chrono::Duration::hours(FINISHED_JOB_RETENTION_HOURS);
            jobs.retain(|_, j| !(j.state.is_terminal() && j.created_at < cutoff));
            jobs.insert(job.id, job.clone());
            self.write_finished().retain(|id, _| jobs.contains_key(id));
        }

        info!(job_id = %job.id, owner_id, kind = ?kind, "Job queued");
        self.inner.ctx.bus.publish_lifecycle(&event);

        if let Some(queue) = &self.inner.queue {
            if queue.send(job.id).is_err() {
                warn!(job_id = %job.id, "Worker pool has stopped; job stays queued");
            }
        }
        Ok(job.id)
    }

    /// Admits a summary of `document_id` for `owner_id`.
    ///
    /// Fails with `NotFound` for an unknown document, `Forbidden` when the owner may
    /// not read it, and `QuotaExceeded` when stored plus in-flight summaries already
    /// reach the configured quota.
    pub async fn submit_summary(
        &self,
        document_id: DocumentId,
        owner_id: UserId,
        scope: Option<Value>,
    ) -> PortResult<JobId> {
        validate_scope(scope.as_ref())?;

        let document = self.inner.ctx.directory.get_document(document_id).await?;
        if !document.is_accessible_by(owner_id) {
            return Err(PortError::Forbidden(format!(
                "Document {} is not accessible to user {}",
                document_id, owner_id
            )));
        }

        let _admission = self.inner.admission.lock().await;
        let in_flight = self.in_flight_summaries(owner_id, document_id);
        let stored = self
            .inner
            .ctx
            .artifacts
            .count_for(owner_id, document_id)
            .await?;
        let quota = self.inner.config.summary_quota;
        if stored + in_flight >= quota {
            warn!(owner_id, document_id, stored, in_flight, quota, "Summary quota reached");
            return Err(PortError::QuotaExceeded(format!(
                "At most {} summaries per document are allowed",
                quota
            )));
        }

        self.submit(JobKind::Summary, owner_id, Some(document_id), scope)
    }

    /// Admits a report over the latest ERP and MES snapshots.
    pub async fn submit_report(&self, owner_id: UserId, scope: Option<Value>) -> PortResult<JobId> {
        self.submit(JobKind::Report, owner_id, None, scope)
    }

    fn in_flight_summaries(&self, owner_id: UserId, document_id: DocumentId) -> i64 {
        self.read_jobs()
            .values()
            .filter(|j| {
                j.kind == JobKind::Summary
                    && j.owner_id == owner_id
                    && j.subject_id == Some(document_id)
                    && !j.state.is_terminal()
            })
            .count() as i64
    }

    /// The current view of a tracked job.
    pub fn job(&self, job_id: JobId) -> Option<Job> {
        self.read_jobs().get(&job_id).cloned()
    }

    /// The `completed` or `error` event of a finished job, for subscribers that arrive
    /// after it was published. Recorded before the event is published.
    pub fn terminal_event(&self, job_id: JobId) -> Option<LifecycleEvent> {
        self.inner
            .finished
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&job_id)
            .cloned()
    }

    //-------------------------------------------------------------------------------------
    // Execution
    //-------------------------------------------------------------------------------------

    /// Executes one queued job end to end.
    ///
    /// Errors from the unit of work fail the job and are returned as
    /// `JobError::Failed`; they are never retried here.
    pub async fn run(&self, job_id: JobId) -> Result<JobOutcome, JobError> {
        let job = self.transition(job_id, JobState::Started, json!({}))?;
        let timeout = self.inner.config.generation_timeout;

        let work = match job.kind {
            JobKind::Summary => summary_task::summary_process(&self.inner.ctx, timeout, &job).await,
            JobKind::Report => report_task::report_process(&self.inner.ctx, timeout, &job).await,
        };

        match work {
            Ok(WorkOutcome::Ready { artifact, text }) => {
                let _admission = self.inner.admission.lock().await;
                let artifact = match self.inner.ctx.artifacts.create(artifact).await {
                    Ok(artifact) => artifact,
                    Err(source) => {
                        self.transition(
                            job_id,
                            JobState::Failed,
                            json!({ "error": source.to_string() }),
                        )?;
                        return Err(JobError::Failed { job_id, source });
                    }
                };
                info!(job_id = %job_id, artifact_id = artifact.id, payload_ref = %artifact.payload_ref, "Artifact stored");

                let payload = json!({
                    "artifact_id": artifact.id,
                    "file_url": artifact.payload_ref,
                    "title": artifact.title,
                    "summary_preview": preview(&text),
                });
                self.transition(job_id, JobState::Completed, payload)?;
                Ok(JobOutcome::Completed {
                    artifact_id: artifact.id,
                })
            }
            Ok(WorkOutcome::Rejected(message)) => {
                self.transition(job_id, JobState::Failed, json!({ "error": message }))?;
                Ok(JobOutcome::Rejected { message })
            }
            Err(source) => {
                self.transition(job_id, JobState::Failed, json!({ "error": source.to_string() }))?;
                Err(JobError::Failed { job_id, source })
            }
        }
    }

    fn transition(&self, job_id: JobId, next: JobState, payload: Value) -> Result<Job, JobError> {
        let (job, event) = {
            let mut jobs = self.write_jobs();
            let job = jobs.get_mut(&job_id).ok_or(JobError::UnknownJob(job_id))?;
            if !job.state.can_transition_to(next) {
                return Err(JobError::InvalidTransition {
                    job_id,
                    from: job.state,
                    to: next,
                });
            }
            job.state = next;
            let event = LifecycleEvent::for_job(job, next, payload);
            (job.clone(), event)
        };
        if next.is_terminal() {
            self.write_finished().insert(job_id, event.clone());
        }

        info!(job_id = %job_id, owner_id = job.owner_id, status = %next, "Job transitioned");
        self.inner.ctx.bus.publish_lifecycle(&event);
        Ok(job)
    }

    async fn worker_loop(self, worker: usize, receiver: Arc<Mutex<mpsc::UnboundedReceiver<JobId>>>) {
        loop {
            let job_id = {
                let mut receiver = receiver.lock().await;
                tokio::select! {
                    _ = self.inner.shutdown.cancelled() => break,
                    next = receiver.recv() => match next {
                        Some(job_id) => job_id,
                        None => break,
                    },
                }
            };

            // Each job runs in its own task so a panic surfaces as a JoinError here.
            let dispatcher = self.clone();
            match tokio::spawn(async move { dispatcher.run(job_id).await }).await {
                Ok(Ok(outcome)) => debug!(worker, job_id = %job_id, ?outcome, "Job finished"),
                Ok(Err(e)) => error!(worker, job_id = %job_id, error = %e, "Job raised"),
                Err(join_error) => {
                    error!(worker, job_id = %job_id, error = %join_error, "Job panicked");
                    let _ = self.transition(
                        job_id,
                        JobState::Failed,
                        json!({ "error": "The worker running this job crashed." }),
                    );
                }
            }
        }
        info!(worker, "Job worker stopped");
    }

    /// Stops the pool from taking further queued jobs and waits for running ones.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = self.workers().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Job worker ended abnormally");
            }
        }
    }
}

//=========================================================================================
// Helpers shared by the units of work
//=========================================================================================

/// Scope is an opaque option bag: absent, `null`, an object or a string.
fn validate_scope(scope: Option<&Value>) -> PortResult<()> {
    match scope {
        None | Some(Value::Null) | Some(Value::Object(_)) | Some(Value::String(_)) => Ok(()),
        Some(other) => Err(PortError::InvalidInput(format!(
            "scope must be an object or a string, got {}",
            other
        ))),
    }
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_CHARS).collect()
}

/// Calls the summarizer with an upper bound on how long it may take.
pub(crate) async fn generate(
    ctx: &JobContext,
    timeout: Duration,
    text: &str,
    options: &SummarizeOptions,
) -> PortResult<Summary> {
    match tokio::time::timeout(timeout, ctx.summarizer.summarize(text, options)).await {
        Ok(result) => result,
        Err(_) => Err(PortError::GenerationFailure(format!(
            "Summarizer gave no answer within {} ms",
            timeout.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeSummarizer, Fixture, GatedArtifacts};
    use proscientia_core::domain::{ArtifactType, DocumentSource};
    use proscientia_core::Topic;

    fn manual(fixture: &Fixture) -> JobDispatcher {
        JobDispatcher::new(
            fixture.context(),
            JobsConfig {
                worker_count: 0,
                ..JobsConfig::default()
            },
        )
    }

    fn summary_fixture(summarizer: FakeSummarizer) -> Fixture {
        let fixture = Fixture::new(summarizer);
        fixture.add_user(3);
        fixture.add_document(7, DocumentSource::MockDocs, None, Some("Zawór V-12 wymaga przeglądu."));
        fixture
    }

    #[tokio::test]
    async fn events_follow_the_state_machine() {
        let fixture = summary_fixture(FakeSummarizer::replying("Krótko: przegląd zaworu."));
        let dispatcher = manual(&fixture);
        let mut owner = fixture.bus.subscribe(Topic::Owner(3));

        let job_id = dispatcher.submit_summary(7, 3, None).await.unwrap();
        let outcome = dispatcher.run(job_id).await.unwrap();

        let statuses: Vec<JobState> = (0..3).map(|_| owner.try_recv().unwrap().state).collect();
        assert_eq!(
            statuses,
            vec![JobState::Queued, JobState::Started, JobState::Completed]
        );
        assert!(owner.try_recv().is_none());

        let JobOutcome::Completed { artifact_id } = outcome.clone() else {
            panic!("expected completion, got {:?}", outcome);
        };
        let artifact = fixture.artifacts.get(artifact_id, 3).await.unwrap();
        assert_eq!(artifact.artifact_type, ArtifactType::Summary);
        assert_eq!(dispatcher.job(job_id).unwrap().state, JobState::Completed);
    }

    #[tokio::test]
    async fn completed_payload_points_at_the_stored_artifact() {
        let long_text = "x".repeat(900);
        let fixture = summary_fixture(FakeSummarizer::replying(&long_text));
        let dispatcher = manual(&fixture);
        let job_id = dispatcher.submit_summary(7, 3, None).await.unwrap();
        let mut job_topic = fixture.bus.subscribe(Topic::Job(job_id));

        dispatcher.run(job_id).await.unwrap();
        job_topic.try_recv().unwrap();
        let completed = job_topic.try_recv().unwrap();

        let artifacts = fixture.artifacts.list(3, None).await.unwrap();
        assert_eq!(completed.payload["artifact_id"], json!(artifacts[0].id));
        assert_eq!(completed.payload["file_url"], json!(artifacts[0].payload_ref));
        assert_eq!(
            completed.payload["summary_preview"].as_str().unwrap().chars().count(),
            PREVIEW_CHARS
        );
    }

    #[tokio::test]
    async fn malformed_scope_is_rejected_without_events() {
        let fixture = summary_fixture(FakeSummarizer::replying("ok"));
        let dispatcher = manual(&fixture);
        let mut global = fixture.bus.subscribe(Topic::Global);

        let err = dispatcher
            .submit_summary(7, 3, Some(json!([1, 2, 3])))
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::InvalidInput(_)));
        assert!(matches!(
            dispatcher.submit(JobKind::Report, 3, Some(7), None),
            Err(PortError::InvalidInput(_))
        ));
        assert!(global.try_recv().is_none());
    }

    #[tokio::test]
    async fn quota_counts_jobs_still_in_flight() {
        let fixture = summary_fixture(FakeSummarizer::replying("ok"));
        let dispatcher = manual(&fixture);

        for _ in 0..3 {
            dispatcher.submit_summary(7, 3, None).await.unwrap();
        }
        let err = dispatcher.submit_summary(7, 3, None).await.unwrap_err();
        assert!(matches!(err, PortError::QuotaExceeded(_)));
    }

    #[tokio::test]
    async fn uploads_are_private_to_their_uploader() {
        let fixture = summary_fixture(FakeSummarizer::replying("ok"));
        fixture.add_document(8, DocumentSource::UserUpload, Some(4), Some("private"));
        let dispatcher = manual(&fixture);

        assert!(matches!(
            dispatcher.submit_summary(8, 3, None).await,
            Err(PortError::Forbidden(_))
        ));
        assert!(matches!(
            dispatcher.submit_summary(99, 3, None).await,
            Err(PortError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn a_job_runs_at_most_once() {
        let fixture = summary_fixture(FakeSummarizer::replying("ok"));
        let dispatcher = manual(&fixture);
        let job_id = dispatcher.submit_summary(7, 3, None).await.unwrap();

        dispatcher.run(job_id).await.unwrap();
        assert!(matches!(
            dispatcher.run(job_id).await,
            Err(JobError::InvalidTransition { from: JobState::Completed, .. })
        ));
        assert!(matches!(
            dispatcher.run(Uuid::new_v4()).await,
            Err(JobError::UnknownJob(_))
        ));
        assert_eq!(fixture.artifacts.list(3, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stalled_summarizer_fails_the_job() {
        let fixture = summary_fixture(FakeSummarizer::stalled(Duration::from_secs(30)));
        let dispatcher = JobDispatcher::new(
            fixture.context(),
            JobsConfig {
                worker_count: 0,
                generation_timeout: Duration::from_millis(20),
                ..JobsConfig::default()
            },
        );
        let job_id = dispatcher.submit_summary(7, 3, None).await.unwrap();

        let err = dispatcher.run(job_id).await.unwrap_err();
        assert!(matches!(
            err,
            JobError::Failed { source: PortError::GenerationFailure(_), .. }
        ));
        assert_eq!(dispatcher.job(job_id).unwrap().state, JobState::Failed);
        assert!(fixture.artifacts.list(3, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn worker_pool_drains_the_queue() {
        let fixture = summary_fixture(FakeSummarizer::replying("ok"));
        let dispatcher = JobDispatcher::new(
            fixture.context(),
            JobsConfig {
                worker_count: 2,
                ..JobsConfig::default()
            },
        );
        let mut owner = fixture.bus.subscribe(Topic::Owner(3));

        let first = dispatcher.submit_summary(7, 3, None).await.unwrap();
        let second = dispatcher.submit_report(3, None).await.unwrap();

        let mut terminal = Vec::new();
        while terminal.len() < 2 {
            let event = owner.recv().await.unwrap();
            if event.state.is_terminal() {
                terminal.push(event.job_id);
            }
        }
        assert!(terminal.contains(&first) && terminal.contains(&second));
        dispatcher.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_submissions_never_exceed_the_quota() {
        let fixture = summary_fixture(FakeSummarizer::replying("ok"));
        let dispatcher = manual(&fixture);

        let attempts: Vec<_> = (0..12)
            .map(|_| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move { dispatcher.submit_summary(7, 3, None).await })
            })
            .collect();

        let (mut accepted, mut refused) = (0i64, 0i64);
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(PortError::QuotaExceeded(_)) => refused += 1,
                Err(other) => panic!("unexpected admission error: {}", other),
            }
        }
        assert_eq!(accepted, JobsConfig::default().summary_quota);
        assert_eq!(refused, 12 - accepted);
    }

    #[tokio::test]
    async fn a_finishing_job_is_not_counted_twice() {
        let fixture = summary_fixture(FakeSummarizer::replying("ok"));
        let gated = Arc::new(GatedArtifacts::new(fixture.artifacts.clone()));
        let mut ctx = fixture.context();
        ctx.artifacts = gated.clone();
        let dispatcher = JobDispatcher::new(
            ctx,
            JobsConfig {
                worker_count: 0,
                ..JobsConfig::default()
            },
        );

        fixture
            .artifacts
            .create(NewArtifact {
                artifact_type: ArtifactType::Summary,
                owner_id: 3,
                subject_id: Some(7),
                title: "Streszczenie: earlier".into(),
                payload: b"earlier".to_vec(),
                filename: "earlier.txt".into(),
                metadata: json!({}),
            })
            .await
            .unwrap();
        let finishing = dispatcher.submit_summary(7, 3, None).await.unwrap();

        let runner = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.run(finishing).await })
        };
        // The second summary is stored but its job has not completed yet.
        gated.stored.notified().await;
        let third = {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.submit_summary(7, 3, None).await })
        };
        tokio::task::yield_now().await;
        gated.release.notify_one();

        runner.await.unwrap().unwrap();
        assert!(third.await.unwrap().is_ok());
        assert!(matches!(
            dispatcher.submit_summary(7, 3, None).await,
            Err(PortError::QuotaExceeded(_))
        ));
    }

    #[tokio::test]
    async fn failed_artifact_write_fails_the_job() {
        let fixture = summary_fixture(FakeSummarizer::replying("text"));
        fixture.artifacts.set_fail_payload_writes(true);
        let dispatcher = manual(&fixture);
        let job_id = dispatcher.submit_summary(7, 3, None).await.unwrap();

        assert!(matches!(
            dispatcher.run(job_id).await,
            Err(JobError::Failed { source: PortError::Unexpected(_), .. })
        ));
        assert_eq!(dispatcher.job(job_id).unwrap().state, JobState::Failed);
        assert_eq!(fixture.artifacts.payload_count(), 0);
    }

    #[tokio::test]
    async fn terminal_event_is_kept_for_late_subscribers() {
        let fixture = summary_fixture(FakeSummarizer::replying("ok"));
        let dispatcher = manual(&fixture);
        let job_id = dispatcher.submit_summary(7, 3, None).await.unwrap();
        assert!(dispatcher.terminal_event(job_id).is_none());

        let Ok(JobOutcome::Completed { artifact_id }) = dispatcher.run(job_id).await else {
            panic!("job should complete");
        };

        let event = dispatcher.terminal_event(job_id).unwrap();
        assert_eq!(event.state, JobState::Completed);
        assert_eq!(event.payload["artifact_id"], json!(artifact_id));
    }
}
