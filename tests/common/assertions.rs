//! Event and filesystem polling helpers

use podkit::Event;
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast;

/// Every event currently buffered on `rx`
pub fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Position of the first event matching `predicate`
pub fn position_of<F>(events: &[Event], predicate: F) -> Option<usize>
where
    F: Fn(&Event) -> bool,
{
    events.iter().position(predicate)
}

/// Poll until `path` exists or `timeout` elapses
pub async fn wait_for_file(path: &Path, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, async {
        while !path.exists() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .is_ok()
}
