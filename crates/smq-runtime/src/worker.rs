//! Consumer framework on top of a [`QueueClient`].
//!
//! A [`Worker`] polls one queue and hands each received message to a
//! [`MessageHandler`] on its own task. At most `concurrency` handlers run at
//! once; the receive loop only claims a message once a slot is free, so no
//! message sits hidden while waiting for a slot.
//!
//! Per message:
//!
//! - the handler runs under a timeout equal to the visibility window the
//!   store granted, timed from the claim
//! - [`HandlerOutcome::Ack`] deletes the message
//! - [`HandlerOutcome::Retain`] leaves it hidden until its deadline
//! - an error makes the message visible again immediately, then calls
//!   [`MessageHandler::on_error`]
//! - a timeout calls [`MessageHandler::on_deadline_passed`]; the message is
//!   redelivered once its deadline passes

use crate::client::QueueClient;
use crate::error::QueueError;
use crate::message::{QueueName, ReceivedMessage};
use crate::queue::QueueSettings;
use async_trait::async_trait;
use chrono::Duration;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn, Instrument};

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;

/// What to do with a message after the handler finished with it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Processing succeeded; delete the message
    Ack,
    /// Keep the message hidden until its deadline, then redeliver it
    Retain,
}

/// Failure reported by a message handler
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Processing logic plugged into a [`Worker`]
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one message
    async fn handle(&self, message: &ReceivedMessage) -> Result<HandlerOutcome, HandlerError>;

    /// Called after `handle` failed and the message was made visible again
    async fn on_error(&self, error: &HandlerError, message: &ReceivedMessage) {
        warn!(message_id = %message.id, error = %error, "Message handler failed");
    }

    /// Called when `handle` did not finish before the visibility deadline
    async fn on_deadline_passed(&self, message: &ReceivedMessage) {
        warn!(message_id = %message.id, "Message handler exceeded visibility deadline");
    }
}

/// Worker tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Maximum number of handlers running at once
    pub concurrency: usize,

    /// Pause between receives while the queue is empty
    pub poll_interval: std::time::Duration,

    /// Visibility timeout for received messages; the queue default when `None`
    pub visibility_timeout: Option<Duration>,

    /// Create the queue with default settings when starting
    pub create_queue: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            poll_interval: std::time::Duration::from_secs(1),
            visibility_timeout: None,
            create_queue: true,
        }
    }
}

/// Counters of a worker's activity
#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    acknowledged: AtomicU64,
    failed: AtomicU64,
    deadline_passed: AtomicU64,
}

/// Snapshot of a worker's activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub received: u64,
    pub acknowledged: u64,
    pub failed: u64,
    pub deadline_passed: u64,
}

impl Counters {
    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            received: self.received.load(Ordering::SeqCst),
            acknowledged: self.acknowledged.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            deadline_passed: self.deadline_passed.load(Ordering::SeqCst),
        }
    }
}

/// Queue consumer dispatching messages to a handler
pub struct Worker {
    client: Arc<dyn QueueClient>,
    queue: QueueName,
    handler: Arc<dyn MessageHandler>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        client: Arc<dyn QueueClient>,
        queue: QueueName,
        handler: Arc<dyn MessageHandler>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            client,
            queue,
            handler,
            config,
        }
    }

    /// Start the receive loop on a background task.
    ///
    /// Dropping the returned handle stops the loop as well.
    pub async fn start(self) -> Result<WorkerHandle, QueueError> {
        if self.config.concurrency == 0 {
            return Err(QueueError::InvalidConfig {
                message: "worker concurrency must be at least 1".to_string(),
            });
        }

        if self.config.create_queue {
            self.client
                .create_queue(&self.queue, QueueSettings::default())
                .await?;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counters = Arc::new(Counters::default());
        let span = tracing::info_span!("worker", queue = %self.queue);
        let task = tokio::spawn(self.run(shutdown_rx, Arc::clone(&counters)).instrument(span));

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            task,
            counters,
        })
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>, counters: Arc<Counters>) {
        info!(concurrency = self.config.concurrency, "Worker started");
        let slots = Arc::new(Semaphore::new(self.config.concurrency));
        let mut in_flight = JoinSet::new();

        loop {
            while in_flight.try_join_next().is_some() {}

            let permit = tokio::select! {
                _ = shutdown.changed() => break,
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let pause = match self
                .client
                .receive_message(&self.queue, self.config.visibility_timeout)
                .await
            {
                Ok(Some(message)) => {
                    counters.received.fetch_add(1, Ordering::SeqCst);
                    let dispatch = Dispatch {
                        client: Arc::clone(&self.client),
                        queue: self.queue.clone(),
                        handler: Arc::clone(&self.handler),
                        counters: Arc::clone(&counters),
                    };
                    in_flight.spawn(
                        async move {
                            dispatch.process(message).await;
                            drop(permit);
                        }
                        .in_current_span(),
                    );
                    continue;
                }
                Ok(None) => self.config.poll_interval,
                Err(e) if e.is_transient() => {
                    let pause = e
                        .retry_after()
                        .and_then(|delay| delay.to_std().ok())
                        .unwrap_or(self.config.poll_interval);
                    warn!(error = %e, retry_in_ms = pause.as_millis() as u64, "Receive failed");
                    pause
                }
                Err(e) => {
                    error!(error = %e, "Receive failed permanently; stopping worker");
                    break;
                }
            };

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        debug!(in_flight = in_flight.len(), "Waiting for in-flight messages");
        while in_flight.join_next().await.is_some() {}
        info!("Worker stopped");
    }
}

/// Everything a handler task needs
struct Dispatch {
    client: Arc<dyn QueueClient>,
    queue: QueueName,
    handler: Arc<dyn MessageHandler>,
    counters: Arc<Counters>,
}

impl Dispatch {
    async fn process(&self, message: ReceivedMessage) {
        let outcome = match message.visibility_window() {
            Some(window) => {
                let window = window.to_std().unwrap_or_default();
                tokio::time::timeout(window, self.handler.handle(&message))
                    .await
                    .ok()
            }
            None => Some(self.handler.handle(&message).await),
        };

        match outcome {
            Some(Ok(HandlerOutcome::Ack)) => {
                match self.client.delete_message(&self.queue, &message.id).await {
                    Ok(()) => {
                        self.counters.acknowledged.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(e) => {
                        error!(message_id = %message.id, error = %e, "Failed to delete message");
                    }
                }
            }
            Some(Ok(HandlerOutcome::Retain)) => {
                debug!(message_id = %message.id, "Message retained until deadline");
            }
            Some(Err(handler_error)) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                if message.hidden_until.is_some() {
                    if let Err(e) = self
                        .client
                        .change_message_visibility(&self.queue, &message.id, Duration::zero())
                        .await
                    {
                        warn!(message_id = %message.id, error = %e, "Failed to release message");
                    }
                }
                self.handler.on_error(&handler_error, &message).await;
            }
            None => {
                self.counters.deadline_passed.fetch_add(1, Ordering::SeqCst);
                self.handler.on_deadline_passed(&message).await;
            }
        }
    }
}

/// Control handle of a running [`Worker`]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl WorkerHandle {
    /// Activity so far
    pub fn stats(&self) -> WorkerStats {
        self.counters.snapshot()
    }

    /// Whether the receive loop has stopped
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop receiving, wait for in-flight handlers and return the final stats
    pub async fn shutdown(self) -> WorkerStats {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Worker task failed");
        }
        self.counters.snapshot()
    }
}
