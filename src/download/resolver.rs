//! Descriptor to backend command resolution
//!
//! Resolution is pure: it reads the descriptor and the read-only
//! [`Config`], performs no I/O and always produces the same
//! [`DownloadInvocation`] for the same inputs.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{ArtifactDescriptor, ArtifactKind};
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

const CIVITAI_HOST: &str = "civitai.com";
const HUGGINGFACE_HOST: &str = "huggingface.co";
const GOOGLE_DRIVE_HOST: &str = "drive.google.com";

/// Where an artifact is hosted, decided from the URL host
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provider {
    /// CivitAI: token as query parameter, content-disposition filenames
    CivitAi,
    /// Hugging Face: bearer header, filename from the last path segment
    HuggingFace,
    /// Google Drive: dedicated helper instead of aria2c
    GoogleDrive,
    /// Anything else
    Generic,
}

impl Provider {
    /// Classify a parsed URL
    pub fn detect(url: &Url) -> Self {
        let Some(host) = url.host_str() else {
            return Provider::Generic;
        };
        if host_matches(host, GOOGLE_DRIVE_HOST) {
            Provider::GoogleDrive
        } else if host_matches(host, CIVITAI_HOST) {
            Provider::CivitAi
        } else if host_matches(host, HUGGINGFACE_HOST) {
            Provider::HuggingFace
        } else {
            Provider::Generic
        }
    }
}

fn host_matches(host: &str, domain: &str) -> bool {
    let host = host.trim_end_matches('.');
    host.eq_ignore_ascii_case(domain)
        || host
            .len()
            .checked_sub(domain.len() + 1)
            .is_some_and(|split| {
                host.as_bytes()[split] == b'.' && host[split + 1..].eq_ignore_ascii_case(domain)
            })
}

/// Which program performs the download
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    /// Multi-connection aria2c fetch
    Aria2,
    /// Cloud-drive helper
    DriveHelper,
}

/// Fully resolved command for one artifact
#[derive(Clone, PartialEq, Eq)]
pub struct DownloadInvocation {
    /// Selected backend
    pub backend: Backend,
    /// Provider the URL belongs to
    pub provider: Provider,
    /// Program to execute
    pub program: PathBuf,
    /// Argument list, passed without a shell
    pub args: Vec<String>,
    /// Destination directory
    pub destination: PathBuf,
    /// Source URL after credential injection
    pub url: String,
    /// Explicit output filename, if the provider needs one
    pub output_filename: Option<String>,
}

// Args and url can carry credentials.
impl std::fmt::Debug for DownloadInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadInvocation")
            .field("backend", &self.backend)
            .field("provider", &self.provider)
            .field("program", &self.program)
            .field("destination", &self.destination)
            .field("output_filename", &self.output_filename)
            .finish_non_exhaustive()
    }
}

/// Builds backend invocations from artifact descriptors
#[derive(Clone, Debug)]
pub struct SourceResolver {
    config: Arc<Config>,
}

impl SourceResolver {
    /// Create a resolver over a shared, immutable configuration
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }

    /// Destination directory for a storage kind
    pub fn destination_for(&self, kind: ArtifactKind) -> PathBuf {
        self.config.download.models_dir.join(kind.dir_name())
    }

    /// Resolve a descriptor into a backend command
    ///
    /// Fails with [`Error::UnknownArtifactKind`] before anything else is
    /// looked at if the kind is outside the allow-list.
    pub fn resolve(&self, descriptor: &ArtifactDescriptor) -> Result<DownloadInvocation> {
        let kind = descriptor.validated_kind()?;
        let destination = self.destination_for(kind);

        let raw_url = descriptor.url.trim();
        let parsed = Url::parse(raw_url).map_err(|_| Error::InvalidUrl {
            name: descriptor.name.clone(),
            url: descriptor.url.clone(),
        })?;

        match Provider::detect(&parsed) {
            Provider::GoogleDrive => Ok(self.drive_invocation(raw_url, destination)),
            provider => Ok(self.aria2_invocation(parsed, provider, destination)),
        }
    }

    fn drive_invocation(&self, url: &str, destination: PathBuf) -> DownloadInvocation {
        let helper = &self.config.download.drive_helper;
        let mut args = helper.args.clone();
        args.extend([
            "--path".to_string(),
            destination.display().to_string(),
            "--url".to_string(),
            url.to_string(),
        ]);

        DownloadInvocation {
            backend: Backend::DriveHelper,
            provider: Provider::GoogleDrive,
            program: helper.program.clone(),
            args,
            destination,
            url: url.to_string(),
            output_filename: None,
        }
    }

    fn aria2_invocation(
        &self,
        mut url: Url,
        provider: Provider,
        destination: PathBuf,
    ) -> DownloadInvocation {
        let download = &self.config.download;
        let credentials = &self.config.credentials;

        if provider == Provider::CivitAi
            && let Some(token) = credentials.civitai()
        {
            url.query_pairs_mut().append_pair("token", token);
        }

        let output_filename = match provider {
            Provider::HuggingFace => last_path_segment(&url),
            _ => None,
        };

        let url = url.to_string();
        let mut args = vec![
            "--console-log-level=error".to_string(),
            "-c".to_string(),
            "-x".to_string(),
            download.connections.to_string(),
            "-s".to_string(),
            download.split.to_string(),
            "-k".to_string(),
            download.min_split_size.clone(),
            url.clone(),
            format!("--dir={}", destination.display()),
            "--download-result=hide".to_string(),
        ];

        match provider {
            Provider::HuggingFace => {
                if let Some(token) = credentials.huggingface() {
                    args.push(format!("--header=Authorization: Bearer {token}"));
                }
                if let Some(filename) = &output_filename {
                    args.push("-o".to_string());
                    args.push(filename.clone());
                }
            }
            Provider::CivitAi => args.push("--content-disposition=true".to_string()),
            Provider::GoogleDrive | Provider::Generic => {}
        }

        DownloadInvocation {
            backend: Backend::Aria2,
            provider,
            program: download.aria2c_path.clone(),
            args,
            destination,
            url,
            output_filename,
        }
    }
}

fn last_path_segment(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    if segment.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    // A decoded separator would escape the destination directory.
    if decoded.contains('/') || decoded == ".." {
        return None;
    }
    Some(decoded)
}
