//! Bounded readiness polling for local TCP services

use crate::config::TunnelConfig;
use crate::types::PortTarget;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, trace};

/// A single readiness check against a target
///
/// Any failure (refused, timeout, DNS error) must be reported as `false`;
/// probes never return errors.
#[async_trait]
pub trait PortProbe: Send + Sync {
    /// Returns `true` if the target accepted a connection
    async fn probe(&self, target: &PortTarget) -> bool;
}

/// Probe that opens a fresh TCP connection with a connect timeout
#[derive(Clone, Debug)]
pub struct TcpProbe {
    connect_timeout: Duration,
}

impl TcpProbe {
    /// Create a probe with the given per-attempt connect timeout
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl PortProbe for TcpProbe {
    async fn probe(&self, target: &PortTarget) -> bool {
        let connect = TcpStream::connect((target.host.as_str(), target.port));
        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                trace!(%target, error = %e, "probe refused");
                false
            }
            Err(_) => {
                trace!(%target, "probe timed out");
                false
            }
        }
    }
}

/// Polls a target until it accepts connections or the attempt budget runs out
#[derive(Clone)]
pub struct PortWaiter {
    probe: Arc<dyn PortProbe>,
    poll_interval: Duration,
    max_attempts: u32,
}

impl PortWaiter {
    /// Create a waiter using an explicit probe
    pub fn new(probe: Arc<dyn PortProbe>, poll_interval: Duration, max_attempts: u32) -> Self {
        Self {
            probe,
            poll_interval,
            max_attempts,
        }
    }

    /// TCP waiter configured from tunnel settings
    pub fn from_config(config: &TunnelConfig) -> Self {
        Self::new(
            Arc::new(TcpProbe::new(config.connect_timeout)),
            config.poll_interval,
            config.max_attempts,
        )
    }

    /// Probe budget
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait for `target` to accept a connection
    ///
    /// Performs at most `max_attempts` probes and sleeps `poll_interval` after
    /// each failed one, so the worst case takes `max_attempts * poll_interval`.
    /// `false` is terminal; there is no retry beyond the budget.
    pub async fn wait(&self, target: &PortTarget) -> bool {
        for attempt in 1..=self.max_attempts {
            if self.probe.probe(target).await {
                debug!(%target, attempt, "port is accepting connections");
                return true;
            }
            trace!(%target, attempt, max_attempts = self.max_attempts, "port not ready yet");
            tokio::time::sleep(self.poll_interval).await;
        }
        debug!(%target, attempts = self.max_attempts, "gave up waiting for port");
        false
    }
}

impl std::fmt::Debug for PortWaiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortWaiter")
            .field("poll_interval", &self.poll_interval)
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::net::TcpListener;

    /// Probe that succeeds on a given attempt (or never) and counts calls
    struct CountingProbe {
        calls: AtomicU32,
        succeed_on: Option<u32>,
    }

    impl CountingProbe {
        fn new(succeed_on: Option<u32>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                succeed_on,
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PortProbe for CountingProbe {
        async fn probe(&self, _target: &PortTarget) -> bool {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.succeed_on == Some(call)
        }
    }

    fn target() -> PortTarget {
        PortTarget::new("localhost", 3000)
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_open_uses_exact_attempt_budget() {
        for max_attempts in [1, 2, 5, 17] {
            let probe = CountingProbe::new(None);
            let waiter = PortWaiter::new(probe.clone(), Duration::from_secs(1), max_attempts);

            let started = tokio::time::Instant::now();
            assert!(!waiter.wait(&target()).await);

            assert_eq!(probe.calls(), max_attempts);
            // Not earlier than the full budget of sleeps.
            assert!(started.elapsed() >= Duration::from_secs(u64::from(max_attempts)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_probing_once_open() {
        let probe = CountingProbe::new(Some(3));
        let waiter = PortWaiter::new(probe.clone(), Duration::from_secs(1), 10);

        assert!(waiter.wait(&target()).await);
        assert_eq!(probe.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_on_first_probe_does_not_sleep() {
        let probe = CountingProbe::new(Some(1));
        let waiter = PortWaiter::new(probe.clone(), Duration::from_secs(60), 10);

        let started = tokio::time::Instant::now();
        assert!(waiter.wait(&target()).await);
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_tcp_probe_against_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = TcpProbe::new(Duration::from_secs(2));
        assert!(probe.probe(&PortTarget::new("127.0.0.1", port)).await);
    }

    #[tokio::test]
    async fn test_tcp_probe_closed_port_is_not_ready() {
        // Bind and release a port so nothing is listening on it.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let probe = TcpProbe::new(Duration::from_secs(2));
        assert!(!probe.probe(&PortTarget::new("127.0.0.1", port)).await);
    }

    #[tokio::test]
    async fn test_tcp_probe_dns_failure_is_not_ready() {
        let probe = TcpProbe::new(Duration::from_secs(2));
        assert!(
            !probe
                .probe(&PortTarget::new("no-such-host.invalid", 80))
                .await
        );
    }

    #[test]
    fn test_from_config_uses_tunnel_settings() {
        let config = TunnelConfig {
            max_attempts: 7,
            ..Default::default()
        };
        let waiter = PortWaiter::from_config(&config);
        assert_eq!(waiter.max_attempts(), 7);
    }
}
