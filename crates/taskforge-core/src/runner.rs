//! Task runner: the poll loop, the stuck-task reaper, and task execution
//!
//! The runner owns two concurrent activities for the process lifetime:
//! the poll loop and the stuck-task reaper. Both observe a single
//! shutdown signal. At most one task executes at a time within a
//! runner process; this is deliberately not a worker pool (see
//! [`crate::registry`] for how handlers plug in).

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::registry::{ArtifactLogger, HandlerError, HandlerRegistry, ProgressReporter, TaskReporter};
use crate::content_log::{ContentAction, ContentLogEntry};
use crate::persistence::{StoreError, TaskStore};
use crate::reliability::RetryPolicy;
use crate::task::TaskStatus;

/// Runner timing constants.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(90),
            retry_base_delay: Duration::from_secs(10),
            retry_max_delay: Duration::from_secs(300),
        }
    }
}

impl RunnerConfig {
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_base_delay, self.retry_max_delay)
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

struct StoreProgressReporter {
    store: Arc<dyn TaskStore>,
    task_id: Uuid,
}

#[async_trait::async_trait]
impl ProgressReporter for StoreProgressReporter {
    async fn update_progress(&self, current: i32, total: i32, message: Option<String>) {
        if let Err(e) = self
            .store
            .update_task_progress(self.task_id, current, total, message)
            .await
        {
            warn!(task_id = %self.task_id, error = %e, "failed to persist progress update");
        }
    }
}

struct StoreArtifactLogger {
    store: Arc<dyn TaskStore>,
    task_id: Uuid,
    clock: Arc<dyn Clock>,
}

#[async_trait::async_trait]
impl ArtifactLogger for StoreArtifactLogger {
    async fn log_artifact(
        &self,
        entity_type: &str,
        entity_id: &str,
        action: ContentAction,
        previous_data: Option<serde_json::Value>,
    ) {
        let entry = ContentLogEntry::new(
            self.task_id,
            entity_type,
            entity_id,
            action,
            previous_data,
            self.clock.now(),
        );
        if let Err(e) = self.store.create_content_log(entry).await {
            warn!(task_id = %self.task_id, error = %e, "failed to append artifact log entry");
        }
    }
}

/// The durable task runner: poll loop + reaper + execution.
pub struct TaskRunner {
    store: Arc<dyn TaskStore>,
    handlers: Arc<HandlerRegistry>,
    clock: Arc<dyn Clock>,
    config: RunnerConfig,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TaskRunner {
    pub fn new(
        store: Arc<dyn TaskStore>,
        handlers: Arc<HandlerRegistry>,
        clock: Arc<dyn Clock>,
        config: RunnerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            store,
            handlers,
            clock,
            config,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Signal both loops to stop at their next suspension point.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    fn is_stopping(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Run the poll loop until shutdown. Never returns an error: any
    /// failure inside an iteration is logged and the loop continues.
    pub async fn run_poll_loop(&self) {
        info!("poll loop started");
        while !self.is_stopping() {
            match self.store.get_next_pending_task().await {
                Ok(Some(task)) => {
                    let task_id = task.id;
                    if let Err(e) = self.execute_task(task.id).await {
                        error!(task_id = %task_id, error = %e, "task execution loop error");
                    }
                }
                Ok(None) => {
                    self.wait_or_shutdown(self.config.poll_interval).await;
                }
                Err(e) => {
                    error!(error = %e, "failed to fetch next pending task");
                    self.wait_or_shutdown(self.config.poll_interval).await;
                }
            }
        }
        info!("poll loop stopped");
    }

    /// Run the stuck-task reaper until shutdown.
    pub async fn run_reaper_loop(&self) {
        info!("reaper loop started");
        let period = self.config.heartbeat_timeout / 2;
        while !self.is_stopping() {
            if let Err(e) = self.reap_stuck_tasks().await {
                error!(error = %e, "reaper cycle failed");
            }
            self.wait_or_shutdown(period).await;
        }
        info!("reaper loop stopped");
    }

    async fn wait_or_shutdown(&self, timeout: Duration) {
        let mut rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(timeout) => {}
            _ = rx.changed() => {}
        }
    }

    #[instrument(skip(self))]
    async fn reap_stuck_tasks(&self) -> Result<(), RunnerError> {
        let timeout_s = self.config.heartbeat_timeout.as_secs() as i64;
        let stuck = self.store.get_stuck_tasks(timeout_s).await?;
        for task in stuck {
            if task.retry_count < task.max_retries {
                let delay = self.config.retry_policy().delay_for_retry(task.retry_count + 1);
                self.store
                    .increment_retry_count(task.id, delay.as_secs_f64())
                    .await?;
                warn!(task_id = %task.id, retry_count = task.retry_count + 1, "reaped stuck task, retrying");
            } else {
                self.store
                    .update_task_status(
                        task.id,
                        TaskStatus::Failed,
                        Some("Task timed out (no heartbeat)".to_string()),
                    )
                    .await?;
                warn!(task_id = %task.id, "reaped stuck task, retries exhausted");
            }
        }
        Ok(())
    }

    /// Execute one dequeued task end to end.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn execute_task(&self, task_id: Uuid) -> Result<(), RunnerError> {
        let task = match self.store.get_task_by_id(task_id).await? {
            Some(task) => task,
            None => return Ok(()),
        };

        self.store
            .update_task_status(task_id, TaskStatus::InProgress, None)
            .await?;

        let heartbeat_handle = self.spawn_heartbeat(task_id);

        let handler = self.handlers.get(&task.task_type);
        let outcome = match handler {
            Some(handler) => {
                let reporter = TaskReporter::new(
                    task_id,
                    Arc::new(StoreProgressReporter {
                        store: self.store.clone(),
                        task_id,
                    }),
                    Arc::new(StoreArtifactLogger {
                        store: self.store.clone(),
                        task_id,
                        clock: self.clock.clone(),
                    }),
                );
                handler.run(&task, &reporter).await
            }
            None => Err(HandlerError::Failed(anyhow::anyhow!(
                "No handler registered for task type: {}",
                task.task_type
            ))),
        };

        heartbeat_handle.abort();

        match outcome {
            Ok(()) => {
                self.store
                    .transition_in_progress_to(task_id, TaskStatus::Completed, None)
                    .await?;
            }
            Err(HandlerError::CircuitOpen { retry_after_secs, .. }) => {
                let delay_s = retry_after_secs.max(0.0).ceil();
                let applied = self
                    .store
                    .transition_in_progress_to(task_id, TaskStatus::Pending, None)
                    .await?;
                if applied {
                    // Re-fetch rather than write back the pre-execution snapshot: the
                    // handler may have written progress updates while it ran.
                    if let Some(mut fresh) = self.store.get_task_by_id(task_id).await? {
                        fresh.delayed_until = Some(self.clock.now() + chrono::Duration::seconds(delay_s as i64));
                        fresh.started_at = None;
                        self.store.update_task(fresh).await?;
                    }
                }
            }
            Err(HandlerError::Failed(err)) => {
                self.handle_failure(task_id, task.retry_count, task.max_retries, &err.to_string())
                    .await?;
            }
        }

        Ok(())
    }

    async fn handle_failure(
        &self,
        task_id: Uuid,
        retry_count: i32,
        max_retries: i32,
        error_message: &str,
    ) -> Result<(), RunnerError> {
        let next_retry_count = retry_count + 1;
        if next_retry_count < max_retries {
            let delay = self.config.retry_policy().delay_for_retry(next_retry_count);
            let applied = self
                .store
                .transition_in_progress_to(task_id, TaskStatus::Pending, Some(error_message.to_string()))
                .await?;
            if applied {
                self.store
                    .increment_retry_count(task_id, delay.as_secs_f64())
                    .await?;
            }
        } else {
            let applied = self
                .store
                .transition_in_progress_to(task_id, TaskStatus::Failed, Some(error_message.to_string()))
                .await?;
            if applied {
                if let Some(mut fresh) = self.store.get_task_by_id(task_id).await? {
                    fresh.retry_count = next_retry_count;
                    self.store.update_task(fresh).await?;
                }
            }
        }
        Ok(())
    }

    fn spawn_heartbeat(&self, task_id: Uuid) -> tokio::task::JoinHandle<()> {
        let store = self.store.clone();
        let interval = self.config.heartbeat_interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if let Err(e) = store.update_task_heartbeat(task_id).await {
                    warn!(task_id = %task_id, error = %e, "heartbeat update failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::persistence::InMemoryTaskStore;
    use crate::registry::TaskHandler;
    use crate::task::Task;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AlwaysSucceeds;

    #[async_trait]
    impl TaskHandler for AlwaysSucceeds {
        async fn run(&self, _task: &Task, reporter: &TaskReporter) -> Result<(), HandlerError> {
            reporter.update_progress(1, 1, None).await;
            Ok(())
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl TaskHandler for AlwaysFails {
        async fn run(&self, _task: &Task, _reporter: &TaskReporter) -> Result<(), HandlerError> {
            Err(HandlerError::Failed(anyhow::anyhow!("boom")))
        }
    }

    struct CountingFailsThenSucceeds {
        remaining_failures: AtomicUsize,
    }

    #[async_trait]
    impl TaskHandler for CountingFailsThenSucceeds {
        async fn run(&self, _task: &Task, _reporter: &TaskReporter) -> Result<(), HandlerError> {
            let remaining = self.remaining_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
                Err(HandlerError::Failed(anyhow::anyhow!("transient")))
            } else {
                Ok(())
            }
        }
    }

    fn runner_with(
        store: Arc<InMemoryTaskStore>,
        handlers: HandlerRegistry,
    ) -> TaskRunner {
        TaskRunner::new(store, Arc::new(handlers), Arc::new(SystemClock), RunnerConfig::default())
    }

    #[tokio::test]
    async fn successful_task_transitions_to_completed() {
        let store = Arc::new(InMemoryTaskStore::new());
        let task = Task::new("noop", serde_json::json!({}), None, None, Utc::now());
        let task_id = task.id;
        store.create_task(task).await.unwrap();

        let mut handlers = HandlerRegistry::new();
        handlers.register("noop", Arc::new(AlwaysSucceeds));
        let runner = runner_with(store.clone(), handlers);

        runner.execute_task(task_id).await.unwrap();

        let task = store.get_task_by_id(task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());
    }

    #[tokio::test]
    async fn unregistered_handler_counts_as_failure() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut task = Task::new("unknown", serde_json::json!({}), None, None, Utc::now());
        task.max_retries = 1;
        let task_id = task.id;
        store.create_task(task).await.unwrap();

        let runner = runner_with(store.clone(), HandlerRegistry::new());
        runner.execute_task(task_id).await.unwrap();

        let task = store.get_task_by_id(task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error_message.as_deref(), Some("No handler registered for task type: unknown"));
    }

    #[tokio::test]
    async fn failure_under_retry_budget_requeues_as_pending() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut task = Task::new("flaky", serde_json::json!({}), None, None, Utc::now());
        task.max_retries = 3;
        let task_id = task.id;
        store.create_task(task).await.unwrap();

        let mut handlers = HandlerRegistry::new();
        handlers.register("flaky", Arc::new(AlwaysFails));
        let runner = runner_with(store.clone(), handlers);

        runner.execute_task(task_id).await.unwrap();

        let task = store.get_task_by_id(task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);
        assert!(task.delayed_until.is_some());
    }

    #[tokio::test]
    async fn exhausting_retries_marks_failed() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut task = Task::new("flaky", serde_json::json!({}), None, None, Utc::now());
        task.max_retries = 1;
        let task_id = task.id;
        store.create_task(task).await.unwrap();

        let mut handlers = HandlerRegistry::new();
        handlers.register("flaky", Arc::new(AlwaysFails));
        let runner = runner_with(store.clone(), handlers);

        runner.execute_task(task_id).await.unwrap();

        let task = store.get_task_by_id(task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 1);
    }

    #[tokio::test]
    async fn retry_then_success_completes_with_retry_count_recorded() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut task = Task::new("flaky", serde_json::json!({}), None, None, Utc::now());
        task.max_retries = 3;
        let task_id = task.id;
        store.create_task(task).await.unwrap();

        let mut handlers = HandlerRegistry::new();
        handlers.register(
            "flaky",
            Arc::new(CountingFailsThenSucceeds {
                remaining_failures: AtomicUsize::new(1),
            }),
        );
        let runner = runner_with(store.clone(), handlers);

        runner.execute_task(task_id).await.unwrap();
        let mut task = store.get_task_by_id(task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);

        task.status = TaskStatus::Pending;
        task.delayed_until = None;
        store.update_task(task).await.unwrap();
        runner.execute_task(task_id).await.unwrap();

        let task = store.get_task_by_id(task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.retry_count, 1);
    }

    struct AlwaysCircuitOpen;

    #[async_trait]
    impl TaskHandler for AlwaysCircuitOpen {
        async fn run(&self, _task: &Task, _reporter: &TaskReporter) -> Result<(), HandlerError> {
            Err(HandlerError::CircuitOpen {
                name: "billing".to_string(),
                retry_after_secs: 5.0,
            })
        }
    }

    #[tokio::test]
    async fn circuit_open_reschedules_without_charging_retry_budget() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut task = Task::new("guarded", serde_json::json!({}), None, None, Utc::now());
        task.max_retries = 3;
        let task_id = task.id;
        store.create_task(task).await.unwrap();

        let mut handlers = HandlerRegistry::new();
        handlers.register("guarded", Arc::new(AlwaysCircuitOpen));
        let runner = runner_with(store.clone(), handlers);

        runner.execute_task(task_id).await.unwrap();

        let task = store.get_task_by_id(task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 0);
        let delayed_until = task.delayed_until.expect("delayed_until should be set");
        let now = Utc::now();
        assert!(delayed_until > now + chrono::Duration::seconds(3));
        assert!(delayed_until <= now + chrono::Duration::seconds(6));
    }

    #[tokio::test]
    async fn reap_stuck_tasks_requeues_in_progress_task_with_stale_heartbeat() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut task = Task::new("flaky", serde_json::json!({}), None, None, Utc::now());
        task.status = TaskStatus::InProgress;
        task.max_retries = 3;
        task.heartbeat_at = Some(Utc::now() - chrono::Duration::seconds(200));
        let task_id = task.id;
        store.create_task(task).await.unwrap();

        let runner = runner_with(store.clone(), HandlerRegistry::new());
        runner.reap_stuck_tasks().await.unwrap();

        let task = store.get_task_by_id(task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);
        let delayed_until = task.delayed_until.expect("delayed_until should be set");
        let now = Utc::now();
        assert!(delayed_until > now + chrono::Duration::seconds(8));
        assert!(delayed_until <= now + chrono::Duration::seconds(11));
    }

    #[tokio::test]
    async fn reap_stuck_tasks_fails_task_once_retry_budget_exhausted() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut task = Task::new("flaky", serde_json::json!({}), None, None, Utc::now());
        task.status = TaskStatus::InProgress;
        task.max_retries = 1;
        task.retry_count = 1;
        task.heartbeat_at = Some(Utc::now() - chrono::Duration::seconds(200));
        let task_id = task.id;
        store.create_task(task).await.unwrap();

        let runner = runner_with(store.clone(), HandlerRegistry::new());
        runner.reap_stuck_tasks().await.unwrap();

        let task = store.get_task_by_id(task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
    }
}
