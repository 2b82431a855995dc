//! Configuration types for podkit
//!
//! A [`Config`] is built once at process start (from defaults, a serialized
//! document, or the environment) and then shared read-only. Nothing in the
//! library mutates it after construction.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Placeholder in [`TunnelConfig::args`] replaced by the local service URL
pub const URL_PLACEHOLDER: &str = "{url}";

/// Tunnel launch and supervision settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Tunnel provider binary (default: "cloudflared")
    #[serde(default = "default_tunnel_binary")]
    pub binary: PathBuf,

    /// Argument list for the tunnel binary; `{url}` is substituted with
    /// `http://<host>:<port>` (default: `tunnel --url {url}`)
    #[serde(default = "default_tunnel_args")]
    pub args: Vec<String>,

    /// Domain public tunnel URLs belong to (default: "trycloudflare.com")
    #[serde(default = "default_provider_domain")]
    pub provider_domain: String,

    /// Host the local services listen on (default: "localhost")
    #[serde(default = "default_local_host")]
    pub local_host: String,

    /// Delay between readiness probes (default: 1s)
    #[serde(default = "default_poll_interval", with = "duration_secs")]
    pub poll_interval: Duration,

    /// Readiness probes before giving up on a port (default: 1200, about 20 minutes)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Timeout for a single TCP connect probe (default: 5s)
    #[serde(default = "default_connect_timeout", with = "duration_secs")]
    pub connect_timeout: Duration,

    /// How often the pool checks for exited tunnel processes (default: 1s)
    #[serde(default = "default_supervise_interval", with = "duration_secs")]
    pub supervise_interval: Duration,

    /// Upper bound on concurrent tunnel launches (default: 16)
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            binary: default_tunnel_binary(),
            args: default_tunnel_args(),
            provider_domain: default_provider_domain(),
            local_host: default_local_host(),
            poll_interval: default_poll_interval(),
            max_attempts: default_max_attempts(),
            connect_timeout: default_connect_timeout(),
            supervise_interval: default_supervise_interval(),
            max_parallel: default_max_parallel(),
        }
    }
}

/// Command used for cloud-drive downloads
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveHelperConfig {
    /// Helper program (default: "python")
    pub program: PathBuf,
    /// Leading arguments placed before `--path` and `--url`
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for DriveHelperConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("python"),
            args: vec!["./ui/google_drive_download.py".to_string()],
        }
    }
}

/// Artifact download settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Root directory holding one subdirectory per storage category
    /// (default: "./my-runpod-volume/models")
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,

    /// Path to the aria2c executable (default: "aria2c", resolved via PATH)
    #[serde(default = "default_aria2c_path")]
    pub aria2c_path: PathBuf,

    /// Connections per server (`-x`, default: 16)
    #[serde(default = "default_connections")]
    pub connections: u32,

    /// Pieces downloaded in parallel (`-s`, default: 16)
    #[serde(default = "default_connections")]
    pub split: u32,

    /// Minimum split size (`-k`, default: "1M")
    #[serde(default = "default_min_split_size")]
    pub min_split_size: String,

    /// Cloud-drive helper invocation
    #[serde(default)]
    pub drive_helper: DriveHelperConfig,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            aria2c_path: default_aria2c_path(),
            connections: default_connections(),
            split: default_connections(),
            min_split_size: default_min_split_size(),
            drive_helper: DriveHelperConfig::default(),
        }
    }
}

/// Provider credentials resolved by the environment
///
/// Empty strings are treated the same as absent values: the injection step is
/// skipped without error.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    /// CivitAI API key, sent as a `token` query parameter
    #[serde(default)]
    pub civitai_token: Option<String>,
    /// Hugging Face access token, sent as a bearer header
    #[serde(default)]
    pub huggingface_token: Option<String>,
}

impl Credentials {
    /// CivitAI token if configured and non-empty
    pub fn civitai(&self) -> Option<&str> {
        non_empty(self.civitai_token.as_deref())
    }

    /// Hugging Face token if configured and non-empty
    pub fn huggingface(&self) -> Option<&str> {
        non_empty(self.huggingface_token.as_deref())
    }
}

// Tokens never end up in logs.
impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("civitai_token", &self.civitai().map(|_| "<redacted>"))
            .field("huggingface_token", &self.huggingface().map(|_| "<redacted>"))
            .finish()
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Main configuration for podkit
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Tunnel settings
    #[serde(default)]
    pub tunnel: TunnelConfig,

    /// Download settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Provider credentials
    #[serde(default)]
    pub credentials: Credentials,
}

impl Config {
    /// Build a configuration from defaults overridden by environment variables
    ///
    /// Recognized variables: `CIVITAI_TOKEN`, `HUGGINGFACE_TOKEN`,
    /// `PODKIT_MODELS_DIR`, `PODKIT_ARIA2C`, `PODKIT_CLOUDFLARED` and
    /// `PODKIT_PORT_WAIT_ATTEMPTS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        config.credentials.civitai_token = lookup("CIVITAI_TOKEN");
        config.credentials.huggingface_token = lookup("HUGGINGFACE_TOKEN");

        if let Some(dir) = lookup("PODKIT_MODELS_DIR").filter(|v| !v.is_empty()) {
            config.download.models_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("PODKIT_ARIA2C").filter(|v| !v.is_empty()) {
            config.download.aria2c_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("PODKIT_CLOUDFLARED").filter(|v| !v.is_empty()) {
            config.tunnel.binary = PathBuf::from(path);
        }
        if let Some(raw) = lookup("PODKIT_PORT_WAIT_ATTEMPTS") {
            config.tunnel.max_attempts = raw.trim().parse().map_err(|_| Error::Config {
                message: format!("'{raw}' is not a valid attempt count"),
                key: Some("PODKIT_PORT_WAIT_ATTEMPTS".to_string()),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde defaults cannot express
    pub fn validate(&self) -> Result<()> {
        if self.tunnel.max_attempts == 0 {
            return Err(Error::Config {
                message: "port wait attempts must be at least 1".to_string(),
                key: Some("max_attempts".to_string()),
            });
        }
        if self.tunnel.max_parallel == 0 {
            return Err(Error::Config {
                message: "tunnel parallelism must be at least 1".to_string(),
                key: Some("max_parallel".to_string()),
            });
        }
        if !self.tunnel.args.iter().any(|a| a.contains(URL_PLACEHOLDER)) {
            return Err(Error::Config {
                message: format!("tunnel args must contain the {URL_PLACEHOLDER} placeholder"),
                key: Some("args".to_string()),
            });
        }
        Ok(())
    }
}

fn default_tunnel_binary() -> PathBuf {
    PathBuf::from("cloudflared")
}

fn default_tunnel_args() -> Vec<String> {
    vec![
        "tunnel".to_string(),
        "--url".to_string(),
        URL_PLACEHOLDER.to_string(),
    ]
}

fn default_provider_domain() -> String {
    "trycloudflare.com".to_string()
}

fn default_local_host() -> String {
    "localhost".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_max_attempts() -> u32 {
    1200
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_supervise_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_max_parallel() -> usize {
    16
}

fn default_models_dir() -> PathBuf {
    PathBuf::from("./my-runpod-volume/models")
}

fn default_aria2c_path() -> PathBuf {
    PathBuf::from("aria2c")
}

fn default_connections() -> u32 {
    16
}

fn default_min_split_size() -> String {
    "1M".to_string()
}

/// Serialize durations as fractional seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
