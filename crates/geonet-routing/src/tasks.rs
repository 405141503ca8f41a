//! Background task tracking
//!
//! Every task the router spawns is registered here so `stop` can wait for
//! all of them. Finished handles are pruned whenever a new task is added.

use std::future::Future;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct TaskSet {
    handles: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut handles = self.handles.lock().await;
        handles.retain(|(_, handle)| !handle.is_finished());
        handles.push((name, tokio::spawn(task)));
        debug!("Spawned {} task ({} tracked)", name, handles.len());
    }

    /// Tasks still running
    pub async fn active(&self) -> usize {
        self.handles
            .lock()
            .await
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .count()
    }

    /// Wait for every tracked task, including ones spawned while waiting
    pub async fn join_all(&self) {
        loop {
            let batch = std::mem::take(&mut *self.handles.lock().await);
            if batch.is_empty() {
                break;
            }
            for (name, handle) in batch {
                if let Err(e) = handle.await {
                    warn!("{} task failed: {}", name, e);
                }
            }
        }
    }
}
