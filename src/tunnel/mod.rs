//! Public tunnels for local HTTP services
//!
//! A [`TunnelSupervisor`] waits for one local port to open, launches the
//! tunnel binary (`cloudflared tunnel --url http://localhost:<port>` by
//! default) and scans its stderr for the public URL. A [`TunnelPool`] runs one
//! supervisor task per port concurrently, keeps the successful tunnels alive
//! and terminates them together on shutdown.

mod pool;
mod supervisor;
mod url;

pub use pool::{LaunchExit, LaunchFailure, SuperviseExit, TunnelPool, distinct_ports};
pub use supervisor::{TunnelRecord, TunnelSupervisor};
pub use url::TunnelUrlMatcher;
