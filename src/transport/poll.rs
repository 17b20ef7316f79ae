//! Injectable readiness polling.
//!
//! The file link has no change notification it can rely on across hosts, so
//! it re-checks file sizes on a cadence. The cadence is a [`Poller`] so tests
//! can drive it without real sleeps.

use std::fmt;
use std::future::Future;
use std::io;
use std::time::Duration;

use async_trait::async_trait;

/// Waits between readiness checks.
#[async_trait]
pub trait Poller: Send + Sync + fmt::Debug {
    /// Suspend until the next check is due.
    async fn tick(&self);
}

/// Sleeps a fixed interval between checks.
#[derive(Debug, Clone, Copy)]
pub struct IntervalPoller {
    interval: Duration,
}

impl IntervalPoller {
    /// Create a poller with the given interval.
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[async_trait]
impl Poller for IntervalPoller {
    async fn tick(&self) {
        tokio::time::sleep(self.interval).await;
    }
}

/// Re-run `check` until it reports ready, ticking `poller` in between.
///
/// Returns the number of ticks taken. Errors from `check` abort the wait.
pub async fn wait_until<F, Fut>(poller: &dyn Poller, mut check: F) -> io::Result<usize>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<bool>>,
{
    let mut ticks = 0;
    while !check().await? {
        poller.tick().await;
        ticks += 1;
    }
    Ok(ticks)
}
