//! Launch of a single tunnel process

use super::url::TunnelUrlMatcher;
use crate::config::{TunnelConfig, URL_PLACEHOLDER};
use crate::error::{Error, Result};
use crate::port::PortWaiter;
use crate::process::{OutputMode, ProcessHandle};
use crate::types::{Event, PortTarget, TunnelState};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One tunnel and the process serving it
#[derive(Debug)]
pub struct TunnelRecord {
    port: u16,
    public_url: Option<String>,
    state: TunnelState,
    handle: Option<ProcessHandle>,
    drain: Option<JoinHandle<usize>>,
}

impl TunnelRecord {
    fn waiting(port: u16) -> Self {
        Self {
            port,
            public_url: None,
            state: TunnelState::Waiting,
            handle: None,
            drain: None,
        }
    }

    /// Local port this tunnel forwards to
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Public URL, set once the state is `UrlFound`
    pub fn public_url(&self) -> Option<&str> {
        self.public_url.as_deref()
    }

    /// Current lifecycle state
    pub fn state(&self) -> TunnelState {
        self.state
    }

    /// Tunnel process id while it is running
    pub fn pid(&self) -> Option<u32> {
        self.handle.as_ref().and_then(ProcessHandle::pid)
    }

    /// Whether the tunnel process has exited
    pub fn has_exited(&mut self) -> Result<bool> {
        match self.handle.as_mut() {
            Some(handle) => handle.has_exited(),
            None => Ok(true),
        }
    }

    /// Send the termination signal to the tunnel process without waiting
    pub fn terminate(&mut self) -> Result<()> {
        match self.handle.as_mut() {
            Some(handle) => handle.terminate(),
            None => Ok(()),
        }
    }

    fn advance(&mut self, next: TunnelState) {
        if self.state.can_transition_to(next) {
            debug!(port = self.port, from = %self.state, to = %next, "tunnel state change");
            self.state = next;
        } else {
            warn!(port = self.port, from = %self.state, to = %next, "ignoring backward tunnel state change");
        }
    }
}

/// Waits for a local port, starts the tunnel binary for it and extracts the
/// public URL from the binary's stderr
#[derive(Debug)]
pub struct TunnelSupervisor {
    config: TunnelConfig,
    waiter: PortWaiter,
    matcher: TunnelUrlMatcher,
    event_tx: broadcast::Sender<Event>,
}

impl TunnelSupervisor {
    /// Create a supervisor probing ports over TCP
    pub fn new(config: TunnelConfig, event_tx: broadcast::Sender<Event>) -> Result<Self> {
        let waiter = PortWaiter::from_config(&config);
        Self::with_waiter(config, waiter, event_tx)
    }

    /// Create a supervisor with an explicit port waiter
    pub fn with_waiter(
        config: TunnelConfig,
        waiter: PortWaiter,
        event_tx: broadcast::Sender<Event>,
    ) -> Result<Self> {
        let matcher = TunnelUrlMatcher::new(&config.provider_domain)?;
        Ok(Self {
            config,
            waiter,
            matcher,
            event_tx,
        })
    }

    /// Tunnel binary arguments for `target`
    pub fn tunnel_args(&self, target: &PortTarget) -> Vec<String> {
        let url = target.http_url();
        self.config
            .args
            .iter()
            .map(|arg| arg.replace(URL_PLACEHOLDER, &url))
            .collect()
    }

    /// Start a tunnel for `port`
    ///
    /// Fails with [`Error::PortUnavailable`] (no process is spawned) if the port
    /// never opens, and with [`Error::TunnelUrlNotFound`] if the tunnel
    /// process closes its output without printing a URL. Scanning stops at the
    /// first match; the process keeps running and later output is drained
    /// without being inspected.
    pub async fn launch(&self, port: u16) -> Result<TunnelRecord> {
        let target = PortTarget::new(self.config.local_host.clone(), port);
        let mut record = TunnelRecord::waiting(port);

        if !self.waiter.wait(&target).await {
            record.advance(TunnelState::Failed);
            return Err(Error::PortUnavailable {
                host: target.host,
                port,
                attempts: self.waiter.max_attempts(),
            });
        }

        let args = self.tunnel_args(&target);
        let mut handle = match ProcessHandle::spawn(&self.config.binary, &args, OutputMode::Stderr)
        {
            Ok(handle) => handle,
            Err(e) => {
                record.advance(TunnelState::Failed);
                return Err(e);
            }
        };
        let Some(mut lines) = handle.take_lines() else {
            handle.terminate()?;
            record.advance(TunnelState::Failed);
            return Err(Error::ExternalTool(format!(
                "no output stream for {}",
                self.config.binary.display()
            )));
        };

        let pid = handle.pid();
        record.handle = Some(handle);
        record.advance(TunnelState::Launched);
        info!(port, ?pid, binary = %self.config.binary.display(), "tunnel process started");
        let _ = self.event_tx.send(Event::TunnelLaunched { port, pid });

        while let Some(line) = lines.next_line().await {
            debug!(port, "{}", line);
            if let Some(url) = self.matcher.find(&line) {
                info!(port, %url, "tunnel active");
                record.public_url = Some(url);
                record.advance(TunnelState::UrlFound);
                record.drain = Some(lines.drain_in_background(format!("tunnel:{port}")));
                return Ok(record);
            }
        }

        record.advance(TunnelState::Failed);
        if let Some(handle) = record.handle.as_mut() {
            // Output closed; make sure the process is gone before reporting.
            if let Err(e) = handle.terminate() {
                warn!(port, error = %e, "failed to terminate tunnel process");
            }
            match handle.wait().await {
                Ok(status) => debug!(port, %status, "tunnel process ended without a URL"),
                Err(e) => warn!(port, error = %e, "failed to reap tunnel process"),
            }
        }
        Err(Error::TunnelUrlNotFound { port })
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn fake_tunnel(script: &str) -> TunnelConfig {
        TunnelConfig {
            binary: PathBuf::from("/bin/sh"),
            args: vec![
                "-c".to_string(),
                script.to_string(),
                "fake-cloudflared".to_string(),
                "{url}".to_string(),
            ],
            local_host: "127.0.0.1".to_string(),
            poll_interval: Duration::from_millis(10),
            max_attempts: 3,
            connect_timeout: Duration::from_millis(500),
            ..Default::default()
        }
    }

    fn supervisor(config: TunnelConfig) -> TunnelSupervisor {
        let (tx, _rx) = broadcast::channel(16);
        TunnelSupervisor::new(config, tx).unwrap()
    }

    async fn open_port() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    async fn closed_port() -> u16 {
        let (listener, port) = open_port().await;
        drop(listener);
        port
    }

    #[test]
    fn test_tunnel_args_substitute_url() {
        let supervisor = supervisor(TunnelConfig::default());
        let args = supervisor.tunnel_args(&PortTarget::new("localhost", 8188));
        assert_eq!(args, vec!["tunnel", "--url", "http://localhost:8188"]);
    }

    #[tokio::test]
    async fn test_launch_returns_url_and_running_process() {
        let (_listener, port) = open_port().await;
        let supervisor = supervisor(fake_tunnel(
            r#"echo "INF Requesting new quick Tunnel on trycloudflare.com..." >&2
               echo "INF |  https://calm-river-1234.trycloudflare.com  |" >&2
               exec sleep 30"#,
        ));

        let mut record = supervisor.launch(port).await.unwrap();
        assert_eq!(record.port(), port);
        assert_eq!(record.state(), TunnelState::UrlFound);
        assert_eq!(
            record.public_url(),
            Some("https://calm-river-1234.trycloudflare.com")
        );
        assert!(!record.has_exited().unwrap());

        record.terminate().unwrap();
    }

    #[tokio::test]
    async fn test_launch_passes_local_url_to_binary() {
        let (_listener, port) = open_port().await;
        // Echo the received --url value back inside the hostname.
        let supervisor = supervisor(fake_tunnel(
            r#"p=$(echo "$1" | sed 's/.*://'); echo "https://port-$p.trycloudflare.com" >&2; exec sleep 30"#,
        ));

        let mut record = supervisor.launch(port).await.unwrap();
        let expected = format!("https://port-{port}.trycloudflare.com");
        assert_eq!(record.public_url(), Some(expected.as_str()));
        record.terminate().unwrap();
    }

    #[tokio::test]
    async fn test_scanning_stops_at_first_match() {
        let (_listener, port) = open_port().await;
        let supervisor = supervisor(fake_tunnel(
            r#"echo "https://first.trycloudflare.com" >&2
               echo "https://second.trycloudflare.com" >&2
               echo "ERR something broke later" >&2
               exec sleep 30"#,
        ));

        let mut record = supervisor.launch(port).await.unwrap();
        assert_eq!(record.public_url(), Some("https://first.trycloudflare.com"));
        assert_eq!(record.state(), TunnelState::UrlFound);
        record.terminate().unwrap();
    }

    #[tokio::test]
    async fn test_closed_port_fails_without_spawning() {
        let port = closed_port().await;
        let mut config = fake_tunnel("exit 0");
        // A spawn attempt would surface as ExternalTool instead.
        config.binary = PathBuf::from("/nonexistent/cloudflared");
        let supervisor = supervisor(config);

        match supervisor.launch(port).await {
            Err(Error::PortUnavailable {
                port: failed,
                attempts,
                ..
            }) => {
                assert_eq!(failed, port);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected PortUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exit_without_url_is_not_found() {
        let (_listener, port) = open_port().await;
        let supervisor = supervisor(fake_tunnel(
            r#"echo "ERR failed to request quick Tunnel: Post \"https://api.trycloudflare.com/tunnel\": EOF" >&2; exit 1"#,
        ));

        match supervisor.launch(port).await {
            Err(Error::TunnelUrlNotFound { port: failed }) => assert_eq!(failed, port),
            other => panic!("expected TunnelUrlNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_closed_output_terminates_and_reaps_before_reporting() {
        let (_listener, port) = open_port().await;
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("terminated");
        // Closes stderr but keeps running until signalled.
        let supervisor = supervisor(fake_tunnel(&format!(
            r#"trap 'touch "{}"; exit 0' TERM
               exec 2>&-
               while true; do sleep 0.1; done"#,
            marker.display()
        )));

        let result = tokio::time::timeout(Duration::from_secs(10), supervisor.launch(port))
            .await
            .expect("launch hung on a silent tunnel");
        assert!(matches!(result, Err(Error::TunnelUrlNotFound { port: p }) if p == port));
        // wait() returned, so the TERM trap has already run.
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_missing_binary_is_external_tool_error() {
        let (_listener, port) = open_port().await;
        let mut config = fake_tunnel("exit 0");
        config.binary = PathBuf::from("/nonexistent/cloudflared");
        let supervisor = supervisor(config);

        assert!(matches!(
            supervisor.launch(port).await,
            Err(Error::ExternalTool(_))
        ));
    }

    #[tokio::test]
    async fn test_launch_emits_launched_event() {
        let (_listener, port) = open_port().await;
        let (tx, mut rx) = broadcast::channel(16);
        let supervisor = TunnelSupervisor::new(
            fake_tunnel(r#"echo "https://evt.trycloudflare.com" >&2; exec sleep 30"#),
            tx,
        )
        .unwrap();

        let mut record = supervisor.launch(port).await.unwrap();
        match rx.recv().await.unwrap() {
            Event::TunnelLaunched { port: p, pid } => {
                assert_eq!(p, port);
                assert_eq!(pid, record.pid());
            }
            other => panic!("unexpected event {other:?}"),
        }
        record.terminate().unwrap();
    }
}
