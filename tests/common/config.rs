//! Test configurations pointing at fake backends

use podkit::config::{DownloadConfig, DriveHelperConfig};
use podkit::{Config, TunnelConfig};
use std::path::Path;
use std::time::Duration;

/// Tunnel config with fast polling against 127.0.0.1
pub fn tunnel_config(binary: &Path) -> TunnelConfig {
    TunnelConfig {
        binary: binary.to_path_buf(),
        local_host: "127.0.0.1".to_string(),
        poll_interval: Duration::from_millis(50),
        max_attempts: 5,
        connect_timeout: Duration::from_millis(500),
        supervise_interval: Duration::from_millis(50),
        ..Default::default()
    }
}

/// Download config rooted in `root` using the given backends
pub fn download_config(root: &Path, aria2c: &Path, drive_helper: &Path) -> Config {
    Config {
        download: DownloadConfig {
            models_dir: root.join("models"),
            aria2c_path: aria2c.to_path_buf(),
            drive_helper: DriveHelperConfig {
                program: drive_helper.to_path_buf(),
                args: Vec::new(),
            },
            ..Default::default()
        },
        ..Default::default()
    }
}
