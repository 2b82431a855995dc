//! Concurrent tunnel launches and supervision of the resulting processes

use super::supervisor::{TunnelRecord, TunnelSupervisor};
use crate::config::TunnelConfig;
use crate::error::{Error, Result};
use crate::port::PortWaiter;
use crate::types::Event;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, broadcast};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// A port whose tunnel could not be established
#[derive(Debug)]
pub struct LaunchFailure {
    /// Local port
    pub port: u16,
    /// Why the launch failed
    pub error: Error,
}

/// Why [`TunnelPool::launch_all_until`] returned
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaunchExit {
    /// Every launch finished, successfully or not
    Completed,
    /// The shutdown future resolved first and all tunnels were terminated
    Interrupted,
}

/// Why [`TunnelPool::supervise`] returned
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuperviseExit {
    /// Every tunnel process exited on its own
    AllExited,
    /// The shutdown future resolved and remaining tunnels were terminated
    Interrupted,
}

/// Owns every live tunnel and shuts them down together
pub struct TunnelPool {
    supervisor: Arc<TunnelSupervisor>,
    records: Vec<TunnelRecord>,
    failures: Vec<LaunchFailure>,
    event_tx: broadcast::Sender<Event>,
    max_parallel: usize,
    supervise_interval: Duration,
}

impl TunnelPool {
    /// Create a pool probing ports over TCP
    pub fn new(config: TunnelConfig) -> Result<Self> {
        let waiter = PortWaiter::from_config(&config);
        Self::with_waiter(config, waiter)
    }

    /// Create a pool with an explicit port waiter
    pub fn with_waiter(config: TunnelConfig, waiter: PortWaiter) -> Result<Self> {
        let (event_tx, _rx) = broadcast::channel(256);
        let max_parallel = config.max_parallel.max(1);
        let supervise_interval = config.supervise_interval;
        let supervisor = TunnelSupervisor::with_waiter(config, waiter, event_tx.clone())?;
        Ok(Self {
            supervisor: Arc::new(supervisor),
            records: Vec::new(),
            failures: Vec::new(),
            event_tx,
            max_parallel,
            supervise_interval,
        })
    }

    /// Subscribe to tunnel events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Live tunnels
    pub fn records(&self) -> &[TunnelRecord] {
        &self.records
    }

    /// Ports that failed to launch
    pub fn failures(&self) -> &[LaunchFailure] {
        &self.failures
    }

    /// Launch one tunnel per distinct port, all concurrently
    ///
    /// Parallelism is the number of distinct ports, capped at `max_parallel`.
    /// A failure on one port never cancels or delays the others. Returns once
    /// every launch has finished; failed ports are recorded in
    /// [`failures`](Self::failures) and absent from [`records`](Self::records).
    pub async fn launch_all(&mut self, ports: &[u16]) -> &[TunnelRecord] {
        self.launch_all_until(ports, std::future::pending()).await;
        &self.records
    }

    /// Like [`launch_all`](Self::launch_all), but gives up when `shutdown`
    /// resolves
    ///
    /// On shutdown, launches still in flight are cancelled (a spawned tunnel
    /// process is signalled when its handle drops) and every tunnel that
    /// already found its URL is terminated. The pool is left empty.
    pub async fn launch_all_until<F>(&mut self, ports: &[u16], shutdown: F) -> LaunchExit
    where
        F: Future<Output = ()>,
    {
        let ports = distinct_ports(ports);
        if ports.is_empty() {
            return LaunchExit::Completed;
        }

        let permits = Arc::new(Semaphore::new(ports.len().min(self.max_parallel)));
        let mut tasks = JoinSet::new();

        for port in ports {
            let supervisor = Arc::clone(&self.supervisor);
            let permits = Arc::clone(&permits);
            let event_tx = self.event_tx.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let result = supervisor.launch(port).await;
                match &result {
                    Ok(record) => {
                        let url = record.public_url().unwrap_or_default().to_string();
                        let _ = event_tx.send(Event::TunnelReady { port, url });
                    }
                    Err(e) => {
                        let _ = event_tx.send(Event::TunnelFailed {
                            port,
                            error: e.to_string(),
                        });
                    }
                }
                (port, result)
            });
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    Some(Ok((_, Ok(record)))) => self.records.push(record),
                    Some(Ok((port, Err(error)))) => {
                        warn!(port, error = %error, "tunnel launch failed");
                        self.failures.push(LaunchFailure { port, error });
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "tunnel launch task panicked");
                    }
                    None => break,
                },
                _ = &mut shutdown => {
                    info!(
                        pending = tasks.len(),
                        live = self.records.len(),
                        "shutdown requested during launch, terminating tunnels"
                    );
                    tasks.abort_all();
                    // Aborted launches drop their handles; finished ones still
                    // hold a running tunnel.
                    while let Some(joined) = tasks.join_next().await {
                        if let Ok((port, Ok(mut record))) = joined
                            && let Err(e) = record.terminate()
                        {
                            warn!(port, error = %e, "failed to terminate tunnel process");
                        }
                    }
                    self.terminate_all();
                    return LaunchExit::Interrupted;
                }
            }
        }

        info!(
            live = self.records.len(),
            failed = self.failures.len(),
            "tunnel launches finished"
        );
        LaunchExit::Completed
    }

    /// Drop every record whose process has exited; returns how many were removed
    pub fn prune_exited(&mut self) -> usize {
        let before = self.records.len();
        let event_tx = &self.event_tx;
        self.records.retain_mut(|record| match record.has_exited() {
            Ok(false) => true,
            Ok(true) => {
                info!(port = record.port(), "tunnel process exited");
                let _ = event_tx.send(Event::TunnelExited {
                    port: record.port(),
                });
                false
            }
            Err(e) => {
                warn!(port = record.port(), error = %e, "could not check tunnel process");
                true
            }
        });
        before - self.records.len()
    }

    /// Send the termination signal to every live tunnel process
    ///
    /// Graceful only: a process that ignores the signal is not killed.
    pub fn terminate_all(&mut self) {
        for record in &mut self.records {
            if let Err(e) = record.terminate() {
                warn!(port = record.port(), error = %e, "failed to terminate tunnel process");
            }
        }
        self.records.clear();
    }

    /// Keep the pool alive while at least one tunnel is running
    ///
    /// Every `supervise_interval` exited tunnels are pruned. When `shutdown`
    /// resolves, all remaining tunnel processes are terminated.
    pub async fn supervise<F>(mut self, shutdown: F) -> SuperviseExit
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        while !self.records.is_empty() {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(live = self.records.len(), "shutdown requested, terminating tunnels");
                    self.terminate_all();
                    return SuperviseExit::Interrupted;
                }
                _ = tokio::time::sleep(self.supervise_interval) => {
                    self.prune_exited();
                }
            }
        }

        info!("all tunnel processes have exited");
        SuperviseExit::AllExited
    }
}

/// Ports with duplicates removed, keeping first occurrence order
pub fn distinct_ports(ports: &[u16]) -> Vec<u16> {
    let mut seen = std::collections::HashSet::new();
    ports.iter().copied().filter(|p| seen.insert(*p)).collect()
}
