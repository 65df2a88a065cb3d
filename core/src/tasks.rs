//! Cancellable background task registry.
//!
//! The original system scheduled no-show sweeps, retry backoff, and reminder
//! timers with fire-and-forget `asyncio.create_task(...)` calls (spec §9
//! redesign note). Here every such timer is registered under the id of the
//! entity it concerns, so it can be aborted deterministically when that
//! entity is seated, cancelled, or deleted before the timer fires.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use tokio::task::JoinHandle;

/// Registry of cancellable background tasks, keyed by an arbitrary caller
/// id (typically `"{entity_type}:{entity_id}"`).
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TaskRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `future` under `key`, aborting and replacing any task already
    /// registered under the same key.
    pub fn spawn<F>(&self, key: impl Into<String>, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let handle = tokio::spawn(future);
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = tasks.insert(key, handle) {
            previous.abort();
        }
    }

    /// Cancel the task registered under `key`, if any. Returns whether a task
    /// was found and aborted.
    pub fn cancel(&self, key: &str) -> bool {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = tasks.remove(key) {
            handle.abort();
            true
        } else {
            false
        }
    }

    /// Number of tasks currently tracked (including ones that may have
    /// already finished but were not explicitly cancelled).
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn cancel_aborts_the_task_before_it_completes() {
        let registry = TaskRegistry::new();
        let completed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&completed);

        registry.spawn("no-show:1", async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            flag.store(true, Ordering::SeqCst);
        });

        assert!(registry.cancel("no-show:1"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!completed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn spawning_under_an_existing_key_replaces_the_old_task() {
        let registry = TaskRegistry::new();
        registry.spawn("x", async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        assert_eq!(registry.len(), 1);
        registry.spawn("x", async {});
        assert_eq!(registry.len(), 1);
    }
}
