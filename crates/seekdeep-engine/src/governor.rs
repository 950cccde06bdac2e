//! Global concurrency governor.
//!
//! One fair counting semaphore bounds the total number of simultaneously
//! in-flight model calls, search calls, and page fetches across all nodes
//! of one invocation. Capacity is deliberately small: the engine optimizes
//! for politeness to upstream services over raw throughput.

use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Clone)]
pub struct Governor {
    permits: Arc<Semaphore>,
}

impl Governor {
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity.max(1))),
        }
    }

    /// Run `fut` under a permit. Waiters are served FIFO, so no node can
    /// starve its siblings.
    pub async fn run<F, T>(&self, fut: F) -> T
    where
        F: std::future::Future<Output = T>,
    {
        // The semaphore is never closed, so acquire cannot fail.
        let _permit = self
            .permits
            .acquire()
            .await
            .expect("governor semaphore closed");
        fut.await
    }
}
