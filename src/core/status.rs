use tracing::info;

use crate::core::bookkeeping::StatusCount;

/// Receives one snapshot of per-state counters (sorted by state name) at
/// seeding and after every non-deduplicated outcome. Called synchronously by
/// the dispatcher; implementations should return quickly.
pub trait StatusListener: Send + Sync {
    fn status_update(&self, counts: Vec<StatusCount>);
}

impl<T: StatusListener + ?Sized> StatusListener for std::sync::Arc<T> {
    fn status_update(&self, counts: Vec<StatusCount>) {
        (**self).status_update(counts);
    }
}

/// Ignores every snapshot. The engine default when no listener is supplied.
pub struct NoopStatusListener;

impl StatusListener for NoopStatusListener {
    fn status_update(&self, _counts: Vec<StatusCount>) {}
}

/// Logs each snapshot through `tracing`.
pub struct TracingStatusListener;

impl StatusListener for TracingStatusListener {
    fn status_update(&self, counts: Vec<StatusCount>) {
        for count in &counts {
            info!(
                state = %count.state,
                executing = count.executing,
                waiting = count.waiting,
                completed = count.completed,
                "status"
            );
        }
    }
}
