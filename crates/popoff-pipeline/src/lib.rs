//! # popoff-pipeline
//!
//! The media ingestion pipeline: transcode a captured clip into an HLS
//! package, upload every file plus the thumbnail into pre-signed slots, and
//! commit the post once all bytes are stored.
//!
//! - [`IngestionService`] admits jobs and returns a [`JobHandle`].
//! - [`IngestionPipeline`] is the per-job state machine.
//! - [`ChunkUploader`], [`ProgressAggregator`] and [`CancellationManager`]
//!   are the building blocks it drives.
//! - [`RegistrationApi`] and [`ObjectStore`] are the remote seams, with HTTP
//!   implementations.

pub mod cancel;
pub mod job;
pub mod manifest;
pub mod pipeline;
pub mod progress;
pub mod registry;
pub mod state;
pub mod store;
pub mod uploader;

pub use cancel::CancellationManager;
pub use job::{IngestionJob, IngestionService, JobHandle, TransferRecord, TransferStatus};
pub use manifest::{DiscoveryError, PackageManifest};
pub use pipeline::{IngestionPipeline, PipelineSettings};
pub use progress::{ProgressAggregator, Stage};
pub use registry::{
    CommitError, HttpRegistrationApi, PackageRegistration, PostCommit, RegisteredPackage,
    RegistrationApi, RegistrationError, TransferSlot,
};
pub use state::{FailureReason, Outcome, PipelineState};
pub use store::{HttpObjectStore, ObjectStore, StoreError};
pub use uploader::{ChunkUploader, TransferError};
