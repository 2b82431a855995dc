//! Fake backend scripts and local ports

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;

/// Write an executable `/bin/sh` script named `name` into `dir`
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod script");
    path
}

/// Tunnel binary that prints a quick-tunnel banner and keeps running
pub fn fake_cloudflared(dir: &Path, subdomain: &str) -> PathBuf {
    write_script(
        dir,
        "cloudflared",
        &format!(
            r#"echo "INF Requesting new quick Tunnel on trycloudflare.com..." >&2
echo "INF |  https://{subdomain}.trycloudflare.com  |" >&2
exec sleep 30"#
        ),
    )
}

/// Tunnel binary that touches `marker` when it receives SIGTERM
///
/// With `subdomain` set it prints that quick-tunnel URL first; without it the
/// process stays silent, as if still negotiating the tunnel.
pub fn trapping_cloudflared(dir: &Path, marker: &Path, subdomain: Option<&str>) -> PathBuf {
    let banner = subdomain
        .map(|sub| format!(r#"echo "https://{sub}.trycloudflare.com" >&2"#))
        .unwrap_or_default();
    write_script(
        dir,
        "cloudflared",
        &format!(
            r#"trap 'touch "{marker}"; exit 0' TERM
{banner}
while true; do sleep 0.1; done"#,
            marker = marker.display()
        ),
    )
}

/// aria2c stand-in
///
/// Appends its argument list to `log`, prints aria2c-style progress and
/// exits 3 for any URL containing `BROKEN-ARTIFACT`.
pub fn fake_aria2c(dir: &Path, log: &Path) -> PathBuf {
    write_script(
        dir,
        "aria2c",
        &format!(
            r#"echo "$@" >> "{log}"
for arg in "$@"; do
  case "$arg" in
    *BROKEN-ARTIFACT*) echo "errorCode=3 Resource not found"; exit 3 ;;
  esac
done
echo "[#2089b0 0B/1.0MiB(0%) CN:1 DL:0B]"
echo "[#2089b0 1.0MiB/1.0MiB(100%) CN:1 DL:4.2MiB]"
echo "[COMPLETED]""#,
            log = log.display()
        ),
    )
}

/// Listener on an ephemeral local port
pub async fn open_port() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("local addr").port();
    (listener, port)
}

/// A local port with nothing listening on it
pub async fn closed_port() -> u16 {
    let (listener, port) = open_port().await;
    drop(listener);
    port
}
