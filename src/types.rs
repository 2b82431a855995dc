//! Core types for podkit

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A local TCP endpoint a tunnel should wait for
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PortTarget {
    /// Hostname or address
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl PortTarget {
    /// Create a new target
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `http://host:port`, the URL handed to the tunnel binary
    pub fn http_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for PortTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Lifecycle of a single tunnel launch
///
/// States only move forward: `Waiting -> Launched -> {UrlFound | Failed}`.
/// `Waiting` may also go straight to `Failed` when the port never opens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelState {
    /// Waiting for the local port to accept connections
    Waiting,
    /// Tunnel process spawned, scanning its output
    Launched,
    /// Public URL extracted
    UrlFound,
    /// Launch failed
    Failed,
}

impl TunnelState {
    /// Whether no further transitions are possible
    pub fn is_terminal(self) -> bool {
        matches!(self, TunnelState::UrlFound | TunnelState::Failed)
    }

    /// Whether `self -> next` is a legal forward transition
    pub fn can_transition_to(self, next: TunnelState) -> bool {
        matches!(
            (self, next),
            (TunnelState::Waiting, TunnelState::Launched)
                | (TunnelState::Waiting, TunnelState::Failed)
                | (TunnelState::Launched, TunnelState::UrlFound)
                | (TunnelState::Launched, TunnelState::Failed)
        )
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TunnelState::Waiting => "waiting",
            TunnelState::Launched => "launched",
            TunnelState::UrlFound => "url_found",
            TunnelState::Failed => "failed",
        };
        f.write_str(s)
    }
}

macro_rules! artifact_kinds {
    ($($variant:ident => $label:literal),+ $(,)?) => {
        /// Storage category selecting the destination subdirectory of a download
        ///
        /// This is a closed set; anything else is rejected with
        /// [`Error::UnknownArtifactKind`].
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum ArtifactKind {
            $(
                #[doc = concat!("`", $label, "`")]
                $variant,
            )+
        }

        impl ArtifactKind {
            /// Every allowed kind, in display order
            pub const ALL: &'static [ArtifactKind] = &[$(ArtifactKind::$variant),+];

            /// Label used in descriptors
            pub fn as_str(self) -> &'static str {
                match self {
                    $(ArtifactKind::$variant => $label,)+
                }
            }

            fn from_label(label: &str) -> Option<Self> {
                match label {
                    $($label => Some(ArtifactKind::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

artifact_kinds! {
    CatVton => "CatVTON",
    Llm => "LLM",
    AnimatediffModels => "animatediff_models",
    AnimatediffMotionLora => "animatediff_motion_lora",
    Checkpoints => "checkpoints",
    Clip => "clip",
    ClipVision => "clip_vision",
    Configs => "configs",
    Controlnet => "controlnet",
    Diffusers => "diffusers",
    DiffusionModels => "diffusion_models",
    Embeddings => "embeddings",
    Facedetection => "facedetection",
    FacerestoreModels => "facerestore_models",
    Gligen => "gligen",
    GroundingDino => "grounding-dino",
    Hypernetworks => "hypernetworks",
    Insightface => "insightface",
    Ipadapter => "ipadapter",
    Loras => "loras",
    Mmdets => "mmdets",
    NsfwDetector => "nsfw_detector",
    Onnx => "onnx",
    Photomaker => "photomaker",
    Reactor => "reactor",
    Rembg => "rembg",
    Reswapper => "reswapper",
    Sam2 => "sam2",
    Sams => "sams",
    StyleModels => "style_models",
    TextEncoders => "text_encoders",
    Ultralytics => "ultralytics",
    Unet => "unet",
    UpscaleModels => "upscale_models",
    Vae => "vae",
    VaeApprox => "vae_approx",
}

impl ArtifactKind {
    /// Directory segment under the models root
    ///
    /// `checkpoints` is stored in `ckpts`; every other kind uses its own label.
    pub fn dir_name(self) -> &'static str {
        match self {
            ArtifactKind::Checkpoints => "ckpts",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ArtifactKind::from_label(s).ok_or_else(|| Error::UnknownArtifactKind {
            name: String::new(),
            kind: s.to_string(),
        })
    }
}

/// One model file to fetch, as it appears in a manifest
///
/// `kind` is kept as the raw label so that an unknown category surfaces as
/// [`Error::UnknownArtifactKind`] at validation time instead of a generic
/// deserialization failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    /// Display name
    pub name: String,
    /// Source location
    pub url: String,
    /// Storage category label
    #[serde(rename = "type")]
    pub kind: String,
}

impl ArtifactDescriptor {
    /// Create a descriptor
    pub fn new(name: impl Into<String>, url: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            kind: kind.into(),
        }
    }

    /// Check the kind against the allow-list
    pub fn validated_kind(&self) -> Result<ArtifactKind> {
        ArtifactKind::from_label(&self.kind).ok_or_else(|| Error::UnknownArtifactKind {
            name: self.name.clone(),
            kind: self.kind.clone(),
        })
    }
}

/// Terminal result of one artifact download
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DownloadOutcome {
    /// Whether the backend exited successfully
    pub success: bool,
    /// Backend exit code, `None` if terminated by a signal
    pub exit_code: Option<i32>,
}

impl From<std::process::ExitStatus> for DownloadOutcome {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            success: status.success(),
            exit_code: status.code(),
        }
    }
}

/// Events emitted by the tunnel pool and the download coordinator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Tunnel process spawned for a ready port
    TunnelLaunched {
        /// Local port
        port: u16,
        /// Tunnel process id
        pid: Option<u32>,
    },

    /// Public URL extracted from tunnel output
    TunnelReady {
        /// Local port
        port: u16,
        /// Public URL
        url: String,
    },

    /// Tunnel launch failed
    TunnelFailed {
        /// Local port
        port: u16,
        /// Error message
        error: String,
    },

    /// A supervised tunnel process exited on its own
    TunnelExited {
        /// Local port
        port: u16,
    },

    /// An artifact download started
    DownloadStarted {
        /// Artifact display name
        name: String,
    },

    /// An artifact download finished successfully
    DownloadComplete {
        /// Artifact display name
        name: String,
    },

    /// An artifact download failed; the batch stops here
    DownloadFailed {
        /// Artifact display name
        name: String,
        /// Error message
        error: String,
    },

    /// Every artifact in the batch downloaded successfully
    BatchComplete {
        /// Number of artifacts downloaded
        count: usize,
    },
}
