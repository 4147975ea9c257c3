//! Named background tasks with a shared shutdown signal.
//!
//! Every long-running loop of a clusterq process (RPC accept loops, expiry
//! sweeps, the topology watcher, router membership and the orchestrator
//! ticker) is spawned through a [`BackgroundTaskRegistry`], so a role can stop
//! all of them with one call.
//!
//! ```rust,no_run
//! use clusterq::cluster::background_tasks::BackgroundTaskRegistry;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut registry = BackgroundTaskRegistry::new();
//!     registry.spawn_periodic("expiry_sweep", Duration::from_secs(60), |_tick| async {
//!         // purge expired records
//!     });
//!     registry.shutdown_all().await;
//! }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Status of a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    /// The task returned (or panicked) on its own.
    Finished,
}

struct TaskInfo {
    handle: JoinHandle<()>,
    spawned_at: Instant,
}

pub struct BackgroundTaskRegistry {
    tasks: HashMap<&'static str, TaskInfo>,
    shutdown_tx: broadcast::Sender<()>,
    shutting_down: bool,
}

impl BackgroundTaskRegistry {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            tasks: HashMap::new(),
            shutdown_tx,
            shutting_down: false,
        }
    }

    /// A receiver that fires when [`shutdown_all`](Self::shutdown_all) runs.
    ///
    /// For tasks that want to finish their own cleanup instead of being dropped
    /// mid-await, such as RPC servers.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Spawn a named task. A running task with the same name is aborted first.
    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shutting_down {
            tracing::warn!(task = name, "Ignoring spawn during shutdown");
            return;
        }

        if let Some(old_info) = self.tasks.remove(name) {
            old_info.handle.abort();
            tracing::debug!(task = name, "Aborted previous task instance");
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = task => {
                    tracing::debug!(task = name, "Task completed");
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!(task = name, "Task received shutdown signal");
                }
            }
        });

        tracing::info!(task = name, "Spawned background task");
        self.tasks.insert(
            name,
            TaskInfo {
                handle,
                spawned_at: Instant::now(),
            },
        );
    }

    /// Spawn a task running `task` every `interval`; the first run is immediate.
    pub fn spawn_periodic<F, Fut>(&mut self, name: &'static str, interval: Duration, mut task: F)
    where
        F: FnMut(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        self.spawn(name, async move {
            let mut tick = 0u64;
            let mut interval_timer = tokio::time::interval(interval);
            interval_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval_timer.tick().await;
                task(tick).await;
                tick = tick.wrapping_add(1);
            }
        });
    }

    pub fn health_check(&self) -> Vec<(&'static str, TaskStatus)> {
        let mut statuses: Vec<_> = self
            .tasks
            .iter()
            .map(|(name, info)| {
                let status = if info.handle.is_finished() {
                    TaskStatus::Finished
                } else {
                    TaskStatus::Running
                };
                (*name, status)
            })
            .collect();
        statuses.sort_by_key(|(name, _)| *name);
        statuses
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn task_uptime(&self, name: &str) -> Option<Duration> {
        self.tasks.get(name).map(|info| info.spawned_at.elapsed())
    }

    /// Wait until any task finishes on its own, returning its name.
    ///
    /// Pending forever when no task is registered.
    pub async fn wait_any(&self) -> &'static str {
        loop {
            if let Some(name) = self
                .tasks
                .iter()
                .find(|(_, info)| info.handle.is_finished())
                .map(|(name, _)| *name)
            {
                return name;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    pub async fn shutdown_all(&mut self) {
        self.shutdown_all_with_timeout(Duration::from_secs(5)).await;
    }

    /// Signal every task and wait up to `timeout` in total; stragglers are aborted.
    pub async fn shutdown_all_with_timeout(&mut self, timeout: Duration) {
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;

        tracing::info!(
            task_count = self.tasks.len(),
            "Initiating background task shutdown"
        );
        let _ = self.shutdown_tx.send(());

        let deadline = tokio::time::Instant::now() + timeout;
        for (name, info) in self.tasks.drain() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                tracing::warn!(task = name, "Aborting task (timeout exceeded)");
                info.handle.abort();
                continue;
            }
            match tokio::time::timeout(remaining, info.handle).await {
                Ok(Ok(())) => tracing::debug!(task = name, "Task shutdown complete"),
                Ok(Err(e)) => {
                    tracing::warn!(task = name, error = %e, "Task panicked during shutdown")
                }
                Err(_) => tracing::warn!(task = name, "Task did not respond to shutdown, aborting"),
            }
        }

        tracing::info!("All background tasks shutdown complete");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }
}

impl Default for BackgroundTaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BackgroundTaskRegistry {
    fn drop(&mut self) {
        if !self.shutting_down {
            let _ = self.shutdown_tx.send(());
            for (name, info) in self.tasks.drain() {
                tracing::debug!(task = name, "Aborting task on registry drop");
                info.handle.abort();
            }
        }
    }
}
