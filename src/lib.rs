//! # podkit
//!
//! Process orchestration for GPU pod workspaces: expose local web services
//! through quick tunnels and pull model artifacts into the shared volume.
//!
//! - **Tunnels** - [`TunnelPool`] waits for each local port to open, starts one
//!   tunnel process per port and reports the public URL it prints.
//! - **Downloads** - [`DownloadBatchCoordinator`] resolves `{name, url, type}`
//!   descriptors into aria2c or cloud-drive helper invocations and runs them
//!   in order, stopping at the first failure.
//!
//! ## Quick Start
//!
//! ```no_run
//! use podkit::{Config, Event, LaunchExit, TunnelPool};
//!
//! #[tokio::main]
//! async fn main() -> podkit::Result<()> {
//!     let config = Config::from_env()?;
//!     let mut pool = TunnelPool::new(config.tunnel)?;
//!
//!     let mut events = pool.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             if let Event::TunnelReady { port, url } = event {
//!                 println!("{port} -> {url}");
//!             }
//!         }
//!     });
//!
//!     let shutdown = podkit::wait_for_signal();
//!     tokio::pin!(shutdown);
//!     if pool.launch_all_until(&[3000, 8188], &mut shutdown).await == LaunchExit::Completed {
//!         pool.supervise(shutdown).await;
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Artifact resolution, progress rendering and batch downloads
pub mod download;
/// Error types
pub mod error;
/// TCP readiness polling
pub mod port;
/// Child process handles and output decoding
pub mod process;
/// Tunnel launch and supervision
pub mod tunnel;
/// Core shared types
pub mod types;

pub use config::{Config, Credentials, DownloadConfig, TunnelConfig};
pub use download::{
    BatchReport, DownloadBatchCoordinator, DownloadInvocation, ProgressRenderer, SourceResolver,
    fetch_manifest, load_manifest_file, parse_manifest,
};
pub use error::{Error, Result, ToExitCode};
pub use port::{PortProbe, PortWaiter, TcpProbe};
pub use process::{OutputLines, OutputMode, ProcessHandle};
pub use tunnel::{LaunchExit, SuperviseExit, TunnelPool, TunnelRecord, TunnelSupervisor};
pub use types::{ArtifactDescriptor, ArtifactKind, DownloadOutcome, Event, PortTarget, TunnelState};

/// Resolve once the process is asked to stop
///
/// Listens for SIGINT and SIGTERM on Unix. If a handler cannot be registered
/// (restricted containers) the remaining one is used, and `ctrl_c` as a last
/// resort.
#[cfg(unix)]
pub async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let sigterm = signal(SignalKind::terminate());
    let sigint = signal(SignalKind::interrupt());

    match (sigterm, sigint) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

/// Resolve once the process is asked to stop
#[cfg(not(unix))]
pub async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C signal");
}
