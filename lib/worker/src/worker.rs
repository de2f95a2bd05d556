//! The worker consume loop.
//!
//! Each worker repeats: receive a dispatch, open an execution log, consult
//! the execution policy, run the task, terminate the log, ack. Task
//! failures are recorded and acked; only infrastructure failures (log
//! store, lock service) leave the dispatch unacked so the queue redelivers
//! it to another worker.

use crate::error::WorkerError;
use crate::lock::LockService;
use crate::registry::{TaskFn, TaskInvocation, TaskRegistry};
use marketbeat_bus::DispatchConsumer;
use marketbeat_core::ExecutionId;
use marketbeat_schedule::{DispatchMessage, ExecutionPolicy, param_digest};
use marketbeat_store::ExecutionLogStore;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, Instant};

/// Tunables for policy enforcement and queue behavior.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Lock lifetime; slightly above the expected task duration so orphan
    /// locks from worker crashes expire on their own.
    pub lock_ttl: Duration,
    /// Bounded wait under the `queue` policy.
    pub queue_wait: Duration,
    /// Poll interval while waiting for the lock.
    pub queue_poll: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(900),
            queue_wait: Duration::from_secs(300),
            queue_poll: Duration::from_millis(500),
        }
    }
}

/// One worker over the dispatch queue.
pub struct Worker {
    registry: Arc<TaskRegistry>,
    logs: Arc<dyn ExecutionLogStore>,
    locks: Arc<dyn LockService>,
    options: WorkerOptions,
}

impl Worker {
    /// Creates a worker.
    #[must_use]
    pub fn new(
        registry: Arc<TaskRegistry>,
        logs: Arc<dyn ExecutionLogStore>,
        locks: Arc<dyn LockService>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            registry,
            logs,
            locks,
            options,
        }
    }

    /// Consumes dispatches until shutdown is signalled.
    ///
    /// The in-flight task is finished before exiting.
    pub async fn run(
        self: Arc<Self>,
        mut consumer: Box<dyn DispatchConsumer>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let delivery = tokio::select! {
                delivery = consumer.next() => delivery,
                _ = shutdown.changed() => break,
            };

            match delivery {
                Ok(delivery) => {
                    let dispatch_id = delivery.message.dispatch_id;
                    match self.handle(&delivery.message).await {
                        Ok(()) => {
                            if let Err(e) = delivery.ack().await {
                                tracing::warn!(
                                    error = %e,
                                    dispatch_id = %dispatch_id,
                                    "Failed to ack dispatch; it may be redelivered"
                                );
                            }
                        }
                        Err(e) => {
                            tracing::error!(
                                error = %e,
                                dispatch_id = %dispatch_id,
                                "Worker infrastructure failure; leaving dispatch for redelivery"
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Dispatch consume failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }

            if *shutdown.borrow() {
                break;
            }
        }

        tracing::info!("Worker stopped");
    }

    /// Processes one dispatch message: log, policy, execute, terminate.
    ///
    /// Task-level failures are recorded in the log and return `Ok` so the
    /// caller acks the message.
    ///
    /// # Errors
    ///
    /// Returns an error only when the log store or lock service fails.
    pub async fn handle(&self, msg: &DispatchMessage) -> Result<(), WorkerError> {
        let log_id = self
            .logs
            .begin(&msg.task_name, Some(msg.schedule_id))
            .await
            .map_err(|e| WorkerError::LogStore {
                message: e.to_string(),
            })?;

        let Some(task) = self.registry.get(&msg.task_name) else {
            tracing::warn!(
                task_name = %msg.task_name,
                schedule_id = %msg.schedule_id,
                "Unknown task name in dispatch"
            );
            return self
                .terminate_failed(log_id, &format!("unknown task: {}", msg.task_name))
                .await;
        };

        let lock_key = format!("{}:{}", msg.task_name, param_digest(&msg.kwargs));

        match msg.execution_policy {
            ExecutionPolicy::Allow => self.execute(&task, msg, log_id).await,
            ExecutionPolicy::Skip => {
                if self.try_lock(&lock_key).await? {
                    self.execute_locked(&task, msg, log_id, &lock_key).await
                } else {
                    tracing::info!(
                        task_name = %msg.task_name,
                        schedule_id = %msg.schedule_id,
                        "Skipping overlapping execution"
                    );
                    self.logs
                        .mark_skipped(log_id)
                        .await
                        .map_err(|e| WorkerError::LogStore {
                            message: e.to_string(),
                        })
                }
            }
            ExecutionPolicy::Queue => {
                if self.wait_for_lock(&lock_key).await? {
                    self.execute_locked(&task, msg, log_id, &lock_key).await
                } else {
                    self.terminate_failed(log_id, "timed out waiting for execution lock")
                        .await
                }
            }
        }
    }

    async fn try_lock(&self, key: &str) -> Result<bool, WorkerError> {
        self.locks.try_acquire(key, self.options.lock_ttl).await
    }

    /// Polls for the lock until `queue_wait` elapses.
    async fn wait_for_lock(&self, key: &str) -> Result<bool, WorkerError> {
        let deadline = Instant::now() + self.options.queue_wait;
        loop {
            if self.try_lock(key).await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(self.options.queue_poll).await;
        }
    }

    async fn execute_locked(
        &self,
        task: &TaskFn,
        msg: &DispatchMessage,
        log_id: ExecutionId,
        lock_key: &str,
    ) -> Result<(), WorkerError> {
        let result = self.execute(task, msg, log_id).await;
        if let Err(e) = self.locks.release(lock_key).await {
            // The TTL bounds how long a leaked lock blocks others.
            tracing::warn!(error = %e, lock_key, "Failed to release execution lock");
        }
        result
    }

    async fn execute(
        &self,
        task: &TaskFn,
        msg: &DispatchMessage,
        log_id: ExecutionId,
    ) -> Result<(), WorkerError> {
        let invocation = TaskInvocation::new(msg.args.clone(), msg.kwargs.clone());

        match task(invocation).await {
            Ok(result) => {
                tracing::info!(
                    task_name = %msg.task_name,
                    schedule_id = %msg.schedule_id,
                    dispatch_id = %msg.dispatch_id,
                    "Task completed"
                );
                self.logs
                    .complete(log_id, result)
                    .await
                    .map_err(|e| WorkerError::LogStore {
                        message: e.to_string(),
                    })
            }
            Err(e) => {
                tracing::warn!(
                    task_name = %msg.task_name,
                    schedule_id = %msg.schedule_id,
                    error = %e,
                    "Task failed"
                );
                self.terminate_failed(log_id, &e.to_string()).await
            }
        }
    }

    async fn terminate_failed(
        &self,
        log_id: ExecutionId,
        message: &str,
    ) -> Result<(), WorkerError> {
        self.logs
            .fail(log_id, message)
            .await
            .map_err(|e| WorkerError::LogStore {
                message: e.to_string(),
            })
    }
}
