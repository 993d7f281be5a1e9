//! Task management for async service lifecycle.

use std::{collections::BTreeMap, time::Duration};

use anyhow::{Context, Result, anyhow};
use log::{error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long a cancelled task may take to wind down.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the background services of the daemon.
///
/// Every task receives a child of one global cancellation token; shutting
/// down cancels the parent and waits for each task in turn. A tick that is
/// already running is never interrupted, tasks observe the token between
/// ticks.
pub struct TaskManager {
    tasks: BTreeMap<&'static str, JoinHandle<Result<()>>>,
    global_token: CancellationToken,
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
            global_token: CancellationToken::new(),
        }
    }

    /// Spawns and registers a task under `name`.
    pub fn spawn_task<F, Fut>(&mut self, name: &'static str, task_fn: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        if self.tasks.contains_key(name) {
            anyhow::bail!("Task '{name}' is already running");
        }

        let token = self.global_token.child_token();
        let handle = tokio::spawn(async move {
            info!("Starting task: {name}");
            let result = task_fn(token).await;
            match &result {
                Ok(()) => info!("Task '{name}' completed"),
                Err(e) => error!("Task '{name}' failed: {e:#}"),
            }
            result
        });

        self.tasks.insert(name, handle);
        Ok(())
    }

    /// Token cancelled when the daemon shuts down.
    pub fn token(&self) -> CancellationToken {
        self.global_token.clone()
    }

    /// Cancels every task and waits for it. Returns the first failure.
    pub async fn shutdown_all(&mut self) -> Result<()> {
        info!("Stopping all {} tasks", self.tasks.len());
        self.global_token.cancel();

        let mut first_error = None;
        for (name, handle) in std::mem::take(&mut self.tasks) {
            let error = match tokio::time::timeout(SHUTDOWN_TIMEOUT, handle).await {
                Ok(Ok(Ok(()))) => continue,
                Ok(Ok(Err(e))) => {
                    warn!("Task '{name}' failed during shutdown: {e}");
                    e
                }
                Ok(Err(e)) => anyhow!("Task '{name}' panicked: {e}"),
                Err(_) => anyhow!("Task '{name}' did not stop within {SHUTDOWN_TIMEOUT:?}"),
            };
            error!("{error}");
            first_error.get_or_insert(error);
        }

        match first_error {
            Some(error) => Err(error).context("One or more tasks failed during shutdown"),
            None => {
                info!("All tasks stopped");
                Ok(())
            }
        }
    }

    #[cfg(test)]
    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    #[cfg(test)]
    pub fn is_running(&self, name: &str) -> bool {
        self.tasks.get(name).is_some_and(|h| !h.is_finished())
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}
