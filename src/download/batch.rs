//! Sequential, all-or-nothing artifact batches

use super::progress::ProgressRenderer;
use super::resolver::{DownloadInvocation, SourceResolver};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::process::{OutputMode, ProcessHandle};
use crate::types::{ArtifactDescriptor, DownloadOutcome, Event};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// One artifact that finished downloading
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletedArtifact {
    /// Artifact display name
    pub name: String,
    /// Directory the backend wrote into
    pub destination: PathBuf,
}

/// Result of a batch in which every artifact succeeded
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Completed artifacts, in batch order
    pub completed: Vec<CompletedArtifact>,
}

impl BatchReport {
    /// Number of artifacts downloaded
    pub fn len(&self) -> usize {
        self.completed.len()
    }

    /// Whether the batch was empty
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }
}

/// Runs artifact downloads strictly one after another
///
/// Status lines and backend progress go to `out`. The first failing artifact
/// aborts the batch; later descriptors are never attempted and files already
/// written are left in place.
pub struct DownloadBatchCoordinator<W: Write> {
    resolver: SourceResolver,
    out: W,
    event_tx: broadcast::Sender<Event>,
}

impl<W: Write> DownloadBatchCoordinator<W> {
    /// Create a coordinator writing console output to `out`
    pub fn new(config: Arc<Config>, out: W) -> Self {
        let (event_tx, _rx) = broadcast::channel(256);
        Self {
            resolver: SourceResolver::new(config),
            out,
            event_tx,
        }
    }

    /// Subscribe to download events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Borrow the console writer
    pub fn get_ref(&self) -> &W {
        &self.out
    }

    /// Consume the coordinator and return the console writer
    pub fn into_inner(self) -> W {
        self.out
    }

    /// Resolve every descriptor without running anything
    ///
    /// Fails on the first descriptor with an unknown kind or an unparsable
    /// URL.
    pub fn validate(&self, descriptors: &[ArtifactDescriptor]) -> Result<Vec<DownloadInvocation>> {
        descriptors
            .iter()
            .map(|descriptor| self.resolver.resolve(descriptor))
            .collect()
    }

    /// Download every descriptor in order
    ///
    /// The whole batch is validated before the first process is spawned. A
    /// backend exiting non-zero fails with [`Error::DownloadProcessFailed`].
    pub async fn run(&mut self, descriptors: &[ArtifactDescriptor]) -> Result<BatchReport> {
        let invocations = self.validate(descriptors)?;
        info!(count = invocations.len(), "starting download batch");

        let mut report = BatchReport::default();
        for (descriptor, invocation) in descriptors.iter().zip(&invocations) {
            let name = descriptor.name.as_str();
            if let Err(e) = self.download(name, invocation).await {
                error!(name, error = %e, "download failed, aborting batch");
                let _ = self.event_tx.send(Event::DownloadFailed {
                    name: name.to_string(),
                    error: e.to_string(),
                });
                return Err(e);
            }
            report.completed.push(CompletedArtifact {
                name: name.to_string(),
                destination: invocation.destination.clone(),
            });
        }

        let _ = self.event_tx.send(Event::BatchComplete {
            count: report.len(),
        });
        info!(count = report.len(), "download batch complete");
        Ok(report)
    }

    async fn download(&mut self, name: &str, invocation: &DownloadInvocation) -> Result<()> {
        writeln!(self.out, "Starting download: {name}")?;
        self.out.flush()?;
        let _ = self.event_tx.send(Event::DownloadStarted {
            name: name.to_string(),
        });

        ensure_program(&invocation.program)?;
        tokio::fs::create_dir_all(&invocation.destination).await?;
        debug!(
            name,
            backend = ?invocation.backend,
            provider = ?invocation.provider,
            destination = %invocation.destination.display(),
            "spawning download backend"
        );

        let mut handle = ProcessHandle::spawn(&invocation.program, &invocation.args, OutputMode::Merged)?;
        if let Some(lines) = handle.take_lines() {
            let drained = ProgressRenderer::new(&mut self.out).drain(lines).await;
            if let Err(e) = drained {
                warn!(name, error = %e, "console output failed, stopping backend");
                handle.terminate()?;
                handle.wait().await?;
                return Err(e.into());
            }
        }

        let outcome = DownloadOutcome::from(handle.wait().await?);
        if !outcome.success {
            return Err(Error::DownloadProcessFailed {
                name: name.to_string(),
                exit_code: outcome.exit_code,
            });
        }

        writeln!(self.out, "Download completed: {name}")?;
        self.out.flush()?;
        let _ = self.event_tx.send(Event::DownloadComplete {
            name: name.to_string(),
        });
        Ok(())
    }
}

/// Resolve a bare program name on `PATH`; paths are left to the spawn itself
fn ensure_program(program: &Path) -> Result<()> {
    if program.components().count() != 1 || program.is_absolute() {
        return Ok(());
    }
    which::which(program).map(|_| ()).map_err(|e| {
        Error::ExternalTool(format!("{} not found on PATH: {}", program.display(), e))
    })
}
