//! The ingestion state machine.
//!
//! One job runs strictly sequentially: transcode, discover and register the
//! package, upload every file then the thumbnail, commit the post. The
//! cancellation signal is checked at every stage boundary and handed to the
//! component currently running. Nothing is retried and nothing is rolled back.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use popoff_av::{TranscodeDriver, TranscodeEngine, TranscodeError};
use popoff_core::config::Config;
use popoff_core::events::{EventBus, IngestEvent};
use popoff_core::{content_type_for, JobId, PostRef, ProfileKind, PLAYLIST_CONTENT_TYPE};
use tokio::sync::watch;

use crate::cancel::{CancellationManager, Cancelled};
use crate::job::{IngestionJob, TransferRecord, TransferStatus};
use crate::manifest::PackageManifest;
use crate::progress::{ProgressAggregator, Stage};
use crate::registry::{PackageRegistration, PostCommit, RegistrationApi, TransferSlot};
use crate::state::{FailureReason, Outcome, PipelineState};
use crate::store::ObjectStore;
use crate::uploader::{ChunkUploader, TransferError};

/// Settings the state machine needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Root for per-job scratch directories.
    pub scratch_root: PathBuf,
    /// Extensions that make up the package.
    pub package_extensions: Vec<String>,
    /// Keep the scratch directory after a completed job.
    pub keep_scratch: bool,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            scratch_root: config.transcode.scratch_dir.clone(),
            package_extensions: config.ingest.package_extensions.clone(),
            keep_scratch: config.ingest.keep_scratch,
        }
    }
}

/// Why a run stopped before completing.
enum Stop {
    Cancelled,
    Failed(FailureReason),
}

impl From<Cancelled> for Stop {
    fn from(_: Cancelled) -> Self {
        Stop::Cancelled
    }
}

/// One planned transfer.
struct Transfer {
    local: PathBuf,
    slot: TransferSlot,
    content_type: &'static str,
}

// ---------------------------------------------------------------------------
// JobContext
// ---------------------------------------------------------------------------

/// Shared, observable parts of a running job. The pipeline task is the only
/// writer.
pub struct JobContext {
    id: JobId,
    cancel: CancellationManager,
    progress: Arc<ProgressAggregator>,
    state: watch::Sender<PipelineState>,
    outcome: watch::Sender<Option<Outcome>>,
    events: Arc<EventBus>,
}

impl JobContext {
    pub fn new(
        id: JobId,
        cancel: CancellationManager,
        progress: Arc<ProgressAggregator>,
        state: watch::Sender<PipelineState>,
        outcome: watch::Sender<Option<Outcome>>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            id,
            cancel,
            progress,
            state,
            outcome,
            events,
        }
    }

    fn checkpoint(&self) -> Result<(), Stop> {
        Ok(self.cancel.checkpoint()?)
    }

    fn state(&self) -> PipelineState {
        self.state.borrow().clone()
    }

    fn transition(&self, next: PipelineState) {
        let current = self.state();
        if !current.can_transition_to(&next) {
            tracing::error!(job_id = %self.id, from = %current, to = %next, "illegal state transition ignored");
            return;
        }
        tracing::info!(job_id = %self.id, from = %current, to = %next, "state changed");
        self.events.broadcast(IngestEvent::StateChanged {
            job_id: self.id,
            from: current.name().to_string(),
            to: next.name().to_string(),
        });
        self.state.send_replace(next);
    }
}

// ---------------------------------------------------------------------------
// IngestionPipeline
// ---------------------------------------------------------------------------

/// Drives jobs through transcode, upload and commit.
pub struct IngestionPipeline {
    driver: TranscodeDriver,
    registry: Arc<dyn RegistrationApi>,
    uploader: ChunkUploader,
    settings: PipelineSettings,
}

impl IngestionPipeline {
    pub fn new(
        driver: TranscodeDriver,
        registry: Arc<dyn RegistrationApi>,
        store: Arc<dyn ObjectStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            driver,
            registry,
            uploader: ChunkUploader::new(store),
            settings,
        }
    }

    pub fn from_config(
        config: &Config,
        engine: Arc<dyn TranscodeEngine>,
        registry: Arc<dyn RegistrationApi>,
        store: Arc<dyn ObjectStore>,
    ) -> popoff_core::Result<Self> {
        let driver = TranscodeDriver::from_config(engine, &config.transcode)?;
        Ok(Self::new(
            driver,
            registry,
            store,
            PipelineSettings::from_config(config),
        ))
    }

    pub fn scratch_root(&self) -> &Path {
        &self.settings.scratch_root
    }

    /// Run `job` to a terminal state and publish the outcome.
    pub async fn run(&self, job: &mut IngestionJob, ctx: &JobContext) -> Outcome {
        let outcome = match self.drive(job, ctx).await {
            Ok(post) => {
                job.post = Some(post.clone());
                Outcome::Completed(post)
            }
            Err(Stop::Cancelled) => Outcome::Cancelled,
            Err(Stop::Failed(reason)) => Outcome::Failed(reason),
        };

        if matches!(outcome, Outcome::Completed(_)) && !self.settings.keep_scratch {
            if let Err(e) = job.scratch.remove() {
                tracing::warn!(job_id = %job.id, "failed to remove scratch directory: {e}");
            }
        }

        ctx.transition(outcome.state());
        match &outcome {
            Outcome::Completed(post) => {
                tracing::info!(job_id = %job.id, post = %post, "ingestion completed");
                ctx.events.broadcast(IngestEvent::JobCompleted {
                    job_id: job.id,
                    post: post.to_string(),
                });
            }
            Outcome::Failed(reason) => {
                tracing::warn!(job_id = %job.id, reason = %reason, "ingestion failed");
                ctx.events.broadcast(IngestEvent::JobFailed {
                    job_id: job.id,
                    reason: reason.kind().to_string(),
                    message: reason.user_message().to_string(),
                });
            }
            Outcome::Cancelled => {
                tracing::info!(job_id = %job.id, uploaded = job.uploaded_count(), "ingestion cancelled");
                ctx.events.broadcast(IngestEvent::JobCancelled { job_id: job.id });
            }
        }
        ctx.outcome.send_replace(Some(outcome.clone()));
        outcome
    }

    async fn drive(&self, job: &mut IngestionJob, ctx: &JobContext) -> Result<PostRef, Stop> {
        let token = ctx.cancel.token();

        // -- Transcoding ----------------------------------------------------
        ctx.checkpoint()?;
        ctx.transition(PipelineState::Transcoding);
        let progress = ctx.progress.clone();
        let transcoded = self
            .driver
            .transcode(
                &job.source,
                &job.scratch,
                &move |fraction| {
                    progress.report(Stage::Transcoding, fraction);
                },
                token,
            )
            .await;
        let output = match transcoded {
            Ok(output) => output,
            Err(TranscodeError::Cancelled { tried }) => {
                job.profiles_tried = tried;
                return Err(Stop::Cancelled);
            }
            Err(TranscodeError::Unsupported) => {
                job.profiles_tried = vec![ProfileKind::Primary, ProfileKind::Secondary];
                return Err(Stop::Failed(FailureReason::Unsupported));
            }
        };
        job.profiles_tried = output.tried.clone();
        job.chosen_profile = Some(output.profile);
        ctx.progress.report(Stage::Transcoding, 1.0);

        // -- Discovering ----------------------------------------------------
        ctx.checkpoint()?;
        ctx.transition(PipelineState::Discovering);
        let manifest = PackageManifest::discover(&output.dir, &self.settings.package_extensions)
            .map_err(|e| Stop::Failed(FailureReason::Discovery(e.to_string())))?;

        ctx.checkpoint()?;
        let request = PackageRegistration {
            base_name: job.source.base_name(),
            files: manifest.files().to_vec(),
            content_type: PLAYLIST_CONTENT_TYPE.to_string(),
        };
        let registered = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Stop::Cancelled),
            result = self.registry.register_package(&request) => result
                .map_err(|e| Stop::Failed(FailureReason::Registration(e.to_string())))?,
        };

        let mut plan = Vec::with_capacity(manifest.len() + 1);
        for name in manifest.files() {
            let slot = registered
                .slot_for(name)
                .ok_or_else(|| Stop::Failed(FailureReason::MissingSlot(name.clone())))?;
            plan.push(Transfer {
                local: manifest.path_of(name),
                slot,
                content_type: content_type_for(Path::new(name)),
            });
        }
        let thumb_name = job
            .draft
            .thumbnail
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "thumbnail".to_string());
        let thumb_slot = registered
            .thumbnail_slot(&thumb_name)
            .ok_or_else(|| Stop::Failed(FailureReason::MissingSlot(thumb_name.clone())))?;
        plan.push(Transfer {
            local: job.draft.thumbnail.clone(),
            slot: thumb_slot,
            content_type: content_type_for(&job.draft.thumbnail),
        });

        job.transfers = plan
            .iter()
            .map(|t| TransferRecord {
                file_name: t.slot.file_name.clone(),
                status: TransferStatus::Pending,
            })
            .collect();
        job.manifest = Some(manifest);

        // -- Uploading ------------------------------------------------------
        ctx.checkpoint()?;
        ctx.transition(PipelineState::Uploading);
        let total = plan.len();
        for (i, transfer) in plan.iter().enumerate() {
            ctx.checkpoint()?;
            match self
                .uploader
                .upload(&transfer.local, &transfer.slot, transfer.content_type, token)
                .await
            {
                Ok(bytes) => {
                    job.transfers[i].status = TransferStatus::Uploaded { bytes };
                    ctx.progress.files_uploaded(i + 1, total);
                }
                Err(TransferError::Cancelled) => return Err(Stop::Cancelled),
                Err(TransferError::Failed { file, detail }) => {
                    job.transfers[i].status = TransferStatus::Failed;
                    return Err(Stop::Failed(FailureReason::TransferFailed { file, detail }));
                }
            }
        }

        // -- Committing -----------------------------------------------------
        // Last cancellation point. Once sent, the commit runs to completion.
        ctx.checkpoint()?;
        ctx.transition(PipelineState::Committing);
        let commit = PostCommit {
            file_path: registered.video_file_path.clone(),
            thumbnail_path: registered.thumb_file_path.clone(),
            file_size: job.source.file_size,
            length: job.source.duration_ms(),
            width: job.source.width,
            height: job.source.height,
            description: job.draft.description.clone(),
            tags: job.draft.joined_tags(),
        };
        let post = self
            .registry
            .commit_post(&commit)
            .await
            .map_err(|e| Stop::Failed(FailureReason::CommitFailed(e.to_string())))?;
        ctx.progress.complete();

        Ok(post)
    }
}
