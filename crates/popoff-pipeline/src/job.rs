//! The ingestion job aggregate, its caller-side handle, and the service that
//! admits and spawns jobs.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use popoff_av::{ScratchDir, TranscodeEngine};
use popoff_core::config::Config;
use popoff_core::events::{EventBus, IngestEvent};
use popoff_core::{Error, JobId, PostDraft, PostRef, ProfileKind, SourceAsset};
use tokio::sync::watch;
use tracing::Instrument;

use crate::cancel::CancellationManager;
use crate::manifest::PackageManifest;
use crate::pipeline::{IngestionPipeline, JobContext};
use crate::progress::ProgressAggregator;
use crate::registry::{HttpRegistrationApi, RegistrationApi};
use crate::state::{Outcome, PipelineState};
use crate::store::{HttpObjectStore, ObjectStore};

// ---------------------------------------------------------------------------
// IngestionJob
// ---------------------------------------------------------------------------

/// Upload status of one file of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    Pending,
    Uploaded { bytes: u64 },
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub file_name: String,
    pub status: TransferStatus,
}

/// Aggregate root for one ingestion. Mutated only by the pipeline task.
#[derive(Debug)]
pub struct IngestionJob {
    pub id: JobId,
    pub source: Arc<SourceAsset>,
    pub draft: PostDraft,
    pub scratch: ScratchDir,
    /// Profiles handed to the engine, in order.
    pub profiles_tried: Vec<ProfileKind>,
    /// Profile that produced the uploaded package.
    pub chosen_profile: Option<ProfileKind>,
    pub manifest: Option<PackageManifest>,
    /// One record per package file plus the thumbnail, in upload order.
    pub transfers: Vec<TransferRecord>,
    pub post: Option<PostRef>,
}

impl IngestionJob {
    pub fn new(source: Arc<SourceAsset>, draft: PostDraft, scratch_root: &Path) -> Self {
        let id = JobId::new();
        Self {
            id,
            source,
            draft,
            scratch: ScratchDir::for_job(scratch_root, id),
            profiles_tried: Vec::new(),
            chosen_profile: None,
            manifest: None,
            transfers: Vec::new(),
            post: None,
        }
    }

    /// Number of transfers that completed.
    pub fn uploaded_count(&self) -> usize {
        self.transfers
            .iter()
            .filter(|t| matches!(t.status, TransferStatus::Uploaded { .. }))
            .count()
    }
}

// ---------------------------------------------------------------------------
// JobHandle
// ---------------------------------------------------------------------------

/// Caller-side view of a running job: cancel it, read its progress and
/// state, and wait for the terminal outcome.
#[derive(Clone)]
pub struct JobHandle {
    id: JobId,
    cancel: CancellationManager,
    progress: Arc<ProgressAggregator>,
    state: watch::Receiver<PipelineState>,
    outcome: watch::Receiver<Option<Outcome>>,
}

impl JobHandle {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Request cancellation. Idempotent; a no-op once the job has ended.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Aggregate progress in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        self.progress.current()
    }

    pub fn state(&self) -> PipelineState {
        self.state.borrow().clone()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<PipelineState> {
        self.state.clone()
    }

    /// Wait for the terminal outcome.
    ///
    /// # Errors
    ///
    /// [`Error::Internal`] if the job task ended without reporting one.
    pub async fn wait(&self) -> popoff_core::Result<Outcome> {
        let mut rx = self.outcome.clone();
        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| Error::Internal(format!("job {} ended without an outcome", self.id)))?;
        outcome
            .clone()
            .ok_or_else(|| Error::Internal(format!("job {} has no outcome", self.id)))
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id)
            .field("state", &*self.state.borrow())
            .field("progress", &self.progress.current())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// IngestionService
// ---------------------------------------------------------------------------

/// Admits jobs and runs each one on its own task.
pub struct IngestionService {
    pipeline: Arc<IngestionPipeline>,
    events: Arc<EventBus>,
    max_duration: Duration,
}

impl IngestionService {
    pub fn new(pipeline: IngestionPipeline, events: Arc<EventBus>, max_duration: Duration) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            events,
            max_duration,
        }
    }

    /// Wire a service from configuration and explicit collaborators.
    pub fn from_config(
        config: &Config,
        engine: Arc<dyn TranscodeEngine>,
        registry: Arc<dyn RegistrationApi>,
        store: Arc<dyn ObjectStore>,
        events: Arc<EventBus>,
    ) -> popoff_core::Result<Self> {
        let pipeline = IngestionPipeline::from_config(config, engine, registry, store)?;
        Ok(Self::new(pipeline, events, config.ingest.max_duration()))
    }

    /// Wire a service that talks to the configured HTTP API and object store.
    pub fn with_http(
        config: &Config,
        engine: Arc<dyn TranscodeEngine>,
        events: Arc<EventBus>,
    ) -> popoff_core::Result<Self> {
        let registry = Arc::new(HttpRegistrationApi::new(
            &config.api.base_url,
            config.api.timeout(),
        ));
        let store = Arc::new(HttpObjectStore::new(config.api.upload_timeout()));
        Self::from_config(config, engine, registry, store, events)
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Validate the request and spawn the job. Must be called inside a tokio
    /// runtime.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] when the source is too long or a local file is
    /// missing; no job is created in that case.
    pub fn start(&self, source: SourceAsset, draft: PostDraft) -> popoff_core::Result<JobHandle> {
        if source.duration > self.max_duration {
            return Err(Error::Validation(format!(
                "video is {:.1}s long; videos must be at most {}s",
                source.duration.as_secs_f64(),
                self.max_duration.as_secs()
            )));
        }
        if !source.path.is_file() {
            return Err(Error::Validation(format!(
                "source {} does not exist",
                source.path.display()
            )));
        }
        if !draft.thumbnail.is_file() {
            return Err(Error::Validation(format!(
                "thumbnail {} does not exist",
                draft.thumbnail.display()
            )));
        }

        let job = IngestionJob::new(Arc::new(source), draft, self.pipeline.scratch_root());
        let id = job.id;

        let progress = {
            let events = self.events.clone();
            Arc::new(ProgressAggregator::with_sink(move |value, step| {
                events.broadcast(IngestEvent::Progress {
                    job_id: id,
                    progress: value,
                    step: step.to_string(),
                });
            }))
        };
        let cancel = CancellationManager::new();
        let (state_tx, state_rx) = watch::channel(PipelineState::Idle);
        let (outcome_tx, outcome_rx) = watch::channel(None);

        let ctx = JobContext::new(
            id,
            cancel.clone(),
            progress.clone(),
            state_tx,
            outcome_tx,
            self.events.clone(),
        );

        self.events.broadcast(IngestEvent::JobStarted {
            job_id: id,
            base_name: job.source.base_name(),
        });
        tracing::info!(job_id = %id, source = %job.source.path.display(), "ingestion job started");

        let pipeline = self.pipeline.clone();
        let span = tracing::info_span!("ingest", job_id = %id);
        tokio::spawn(
            async move {
                let mut job = job;
                pipeline.run(&mut job, &ctx).await;
            }
            .instrument(span),
        );

        Ok(JobHandle {
            id,
            cancel,
            progress,
            state: state_rx,
            outcome: outcome_rx,
        })
    }
}
