//! Error types for podkit
//!
//! Every failure the tunnel and download subsystems can produce is a variant of
//! [`Error`]. None of them are retried internally; they propagate to the single
//! top-level boundary in the binary, which maps them to an exit code through
//! [`ToExitCode`].

use thiserror::Error;

/// Result type alias for podkit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for podkit
#[derive(Debug, Error)]
pub enum Error {
    /// The local service never accepted a connection within the attempt budget
    #[error("port {port} on {host} is not available after {attempts} attempts")]
    PortUnavailable {
        /// Host that was probed
        host: String,
        /// Port that was probed
        port: u16,
        /// Number of probes performed
        attempts: u32,
    },

    /// The tunnel process closed its output without printing a public URL
    #[error("tunnel for port {port} exited without providing a public URL")]
    TunnelUrlNotFound {
        /// Local port the tunnel was started for
        port: u16,
    },

    /// Artifact kind outside the storage allow-list
    #[error("invalid model type '{kind}' for {name}")]
    UnknownArtifactKind {
        /// Display name of the offending descriptor
        name: String,
        /// The rejected kind
        kind: String,
    },

    /// Artifact URL could not be parsed
    #[error("invalid url '{url}' for {name}")]
    InvalidUrl {
        /// Display name of the offending descriptor
        name: String,
        /// The rejected URL
        url: String,
    },

    /// A download subprocess exited unsuccessfully
    #[error("download failed for {name} (exit status: {})", format_exit_code(.exit_code))]
    DownloadProcessFailed {
        /// Display name of the artifact
        name: String,
        /// Exit code, `None` if the process was killed by a signal
        exit_code: Option<i32>,
    },

    /// Neither a manifest nor a download URL was provided
    #[error("no download url provided")]
    MissingInput,

    /// The manifest document could not be used
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "PODKIT_MODELS_DIR")
        key: Option<String>,
    },

    /// External tool execution failed (cloudflared, aria2c, etc.)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

fn format_exit_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "terminated by signal".to_string(),
    }
}

/// Map errors to process exit codes at the CLI boundary
pub trait ToExitCode {
    /// Exit code the process should terminate with
    fn exit_code(&self) -> u8;

    /// Machine-readable error code used in logs
    fn error_code(&self) -> &str;
}

impl ToExitCode for Error {
    fn exit_code(&self) -> u8 {
        // Every hard failure exits 1; the kinds stay distinct for logs and tests.
        1
    }

    fn error_code(&self) -> &str {
        match self {
            Error::PortUnavailable { .. } => "port_unavailable",
            Error::TunnelUrlNotFound { .. } => "tunnel_url_not_found",
            Error::UnknownArtifactKind { .. } => "unknown_artifact_kind",
            Error::InvalidUrl { .. } => "invalid_url",
            Error::DownloadProcessFailed { .. } => "download_process_failed",
            Error::MissingInput => "missing_input",
            Error::InvalidManifest(_) => "invalid_manifest",
            Error::Config { .. } => "config_error",
            Error::ExternalTool(_) => "external_tool_error",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
        }
    }
}
