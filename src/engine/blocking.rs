//! Serialization of document-mutating requests.

use std::future::Future;

use tokio::sync::Mutex;

/// FIFO gate for requests whose results are edits against a specific
/// document version (rename, formatting, range formatting).
///
/// `tokio::sync::Mutex` grants the lock in request order, so each blocking
/// request starts only after every earlier one has finished.
#[derive(Debug, Default)]
pub struct BlockingQueue {
    gate: Mutex<()>,
}

impl BlockingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn run<T>(&self, fut: impl Future<Output = T>) -> T {
        let _guard = self.gate.lock().await;
        fut.await
    }
}
