//! Artifact downloads
//!
//! A batch of [`ArtifactDescriptor`](crate::types::ArtifactDescriptor)s is
//! resolved into backend commands by [`SourceResolver`], run one at a time by
//! [`DownloadBatchCoordinator`], and the backend output is rendered by
//! [`ProgressRenderer`].

mod batch;
mod manifest;
mod progress;
mod resolver;

pub use batch::{BatchReport, CompletedArtifact, DownloadBatchCoordinator};
pub use manifest::{MANIFEST_FETCH_TIMEOUT, fetch_manifest, load_manifest_file, parse_manifest};
pub use progress::{COMPLETED_MARKER, LineClass, PROGRESS_MARKER, ProgressRenderer, classify};
pub use resolver::{Backend, DownloadInvocation, Provider, SourceResolver};
