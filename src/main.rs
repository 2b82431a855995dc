//! `podkit` command line
//!
//! `podkit tunnel [PORT...]` exposes local services and prints their public
//! URLs until interrupted. `podkit download` runs a batch of model downloads.

use clap::{Args, Parser, Subcommand};
use podkit::{
    ArtifactDescriptor, Config, DownloadBatchCoordinator, Error, Event, LaunchExit, SuperviseExit,
    ToExitCode, TunnelPool, fetch_manifest, load_manifest_file,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_PORTS: [u16; 4] = [3000, 8080, 5000, 8000];

#[derive(Debug, Parser)]
#[command(name = "podkit", version, about = "Tunnels and model downloads for GPU pods")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Expose local ports through quick tunnels
    Tunnel {
        /// Local ports to expose (default: 3000 8080 5000 8000)
        ports: Vec<u16>,
    },
    /// Download model artifacts into the models volume
    Download(DownloadArgs),
}

#[derive(Debug, Args)]
struct DownloadArgs {
    /// URL of a JSON manifest listing `{name, url, type}` entries
    #[arg(long, conflicts_with_all = ["file", "url"])]
    manifest: Option<String>,

    /// Local JSON manifest file
    #[arg(long, conflicts_with = "url")]
    file: Option<PathBuf>,

    /// Single artifact URL
    #[arg(long, requires = "kind")]
    url: Option<String>,

    /// Storage category for --url (e.g. checkpoints, loras, vae)
    #[arg(long = "type")]
    kind: Option<String>,

    /// Display name for --url (defaults to the URL)
    #[arg(long)]
    name: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::debug!(code = e.error_code(), "command failed");
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> podkit::Result<ExitCode> {
    let config = Config::from_env()?;

    match cli.command {
        Command::Tunnel { ports } => run_tunnels(config, ports).await,
        Command::Download(args) => run_downloads(config, args).await,
    }
}

async fn run_tunnels(config: Config, ports: Vec<u16>) -> podkit::Result<ExitCode> {
    let ports = if ports.is_empty() {
        DEFAULT_PORTS.to_vec()
    } else {
        ports
    };

    let mut pool = TunnelPool::new(config.tunnel)?;
    let mut events = pool.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::TunnelReady { port, url } => println!("Port {port} is available at {url}"),
                Event::TunnelFailed { port, error } => eprintln!("Port {port}: {error}"),
                _ => {}
            }
        }
    });

    // Listen for signals from the start; launching can take minutes per port.
    let shutdown = podkit::wait_for_signal();
    tokio::pin!(shutdown);

    let launched = pool.launch_all_until(&ports, &mut shutdown).await;
    let live = pool.records().len();
    let failed = pool.failures().len();

    let exit = match launched {
        LaunchExit::Interrupted => {
            drop(pool);
            SuperviseExit::Interrupted
        }
        // Consumes the pool, which closes the event channel.
        LaunchExit::Completed => pool.supervise(shutdown).await,
    };
    let _ = printer.await;
    tracing::info!(?exit, "tunnel supervision finished");

    if exit == SuperviseExit::Interrupted {
        return Ok(ExitCode::SUCCESS);
    }
    if live == 0 && failed > 0 {
        return Ok(ExitCode::FAILURE);
    }
    if exit == SuperviseExit::AllExited && live > 0 {
        eprintln!("All tunnel processes have exited");
    }
    Ok(ExitCode::SUCCESS)
}

async fn run_downloads(config: Config, args: DownloadArgs) -> podkit::Result<ExitCode> {
    let descriptors = if let Some(url) = args.manifest {
        fetch_manifest(&reqwest::Client::new(), &url).await?
    } else if let Some(path) = args.file {
        load_manifest_file(&path).await?
    } else if let Some(url) = args.url {
        let kind = args.kind.ok_or(Error::MissingInput)?;
        let name = args.name.unwrap_or_else(|| url.clone());
        vec![ArtifactDescriptor::new(name, url, kind)]
    } else {
        return Err(Error::MissingInput);
    };

    let mut coordinator = DownloadBatchCoordinator::new(Arc::new(config), std::io::stdout());
    let report = coordinator.run(&descriptors).await?;
    println!("Downloaded {} artifact(s)", report.len());
    Ok(ExitCode::SUCCESS)
}
