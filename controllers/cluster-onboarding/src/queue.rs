//! Per-key work queue
//!
//! Keys are deduplicated while waiting, never processed by two tasks at once,
//! and re-queued with a per-key Fibonacci backoff when their reconcile fails.
//! A key enqueued while it is being processed runs once more afterwards.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info_span, warn};

use crate::backoff::Backoffs;
use crate::error::ControllerError;

/// Work performed for one key
#[async_trait::async_trait]
pub trait KeyHandler<Key>: Send + Sync {
    async fn handle(&self, key: &Key) -> Result<(), ControllerError>;
}

#[derive(Debug)]
struct QueueState<Key> {
    queued: HashSet<Key>,
    in_flight: HashSet<Key>,
    // Enqueued while in flight; re-run once the current run finishes
    dirty: HashSet<Key>,
}

/// Handle used to enqueue keys; clones share the same queue
#[derive(Debug)]
pub struct WorkQueue<Key> {
    tx: mpsc::UnboundedSender<Key>,
    state: Arc<Mutex<QueueState<Key>>>,
}

impl<Key> Clone for WorkQueue<Key> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

impl<Key> WorkQueue<Key>
where
    Key: Clone + Eq + Hash + std::fmt::Display + Send + Sync + 'static,
{
    /// Starts the dispatcher.
    ///
    /// Returns the queue handle and the dispatcher task, which ends once
    /// every handle has been dropped and no retries are pending.
    pub fn start(
        handler: Arc<dyn KeyHandler<Key>>,
        backoffs: Arc<Backoffs>,
        span: tracing::Span,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Key>();
        let queue = Self {
            tx,
            state: Arc::new(Mutex::new(QueueState {
                queued: HashSet::new(),
                in_flight: HashSet::new(),
                dirty: HashSet::new(),
            })),
        };

        let dispatcher = queue.clone();
        let task = tokio::spawn(async move {
            // Keep only a weak hold on the channel so the loop can end
            let weak_tx = dispatcher.tx.downgrade();
            let state = Arc::clone(&dispatcher.state);
            drop(dispatcher);

            while let Some(key) = rx.recv().await {
                {
                    let mut state = lock(&state);
                    state.queued.remove(&key);
                    state.in_flight.insert(key.clone());
                }
                let Some(tx) = weak_tx.upgrade() else {
                    break;
                };
                let queue = Self {
                    tx,
                    state: Arc::clone(&state),
                };
                let handler = Arc::clone(&handler);
                let backoffs = Arc::clone(&backoffs);
                let key_span = info_span!(parent: &span, "reconcile", object = %key);
                tokio::spawn(
                    async move {
                        let result = handler.handle(&key).await;
                        queue.finish(key, result, &backoffs);
                    }
                    .instrument(key_span),
                );
            }
        });

        (queue, task)
    }

    /// Schedules `key`; a no-op when it is already waiting
    pub fn enqueue(&self, key: Key) {
        let mut state = lock(&self.state);
        if state.in_flight.contains(&key) {
            state.dirty.insert(key);
            return;
        }
        if state.queued.insert(key.clone()) && self.tx.send(key).is_err() {
            warn!("Work queue is shut down, dropping key");
        }
    }

    fn finish(&self, key: Key, result: Result<(), ControllerError>, backoffs: &Backoffs) {
        let backoff_key = key.to_string();
        let rerun = {
            let mut state = lock(&self.state);
            state.in_flight.remove(&key);
            state.dirty.remove(&key)
        };

        match result {
            Ok(()) => {
                backoffs.reset(&backoff_key);
                debug!("Reconciled {}", key);
            }
            Err(e) => {
                let delay = backoffs.next_for(&backoff_key);
                if e.is_transient() {
                    warn!("Reconcile of {} failed, retrying in {:?}: {}", key, delay, e);
                } else {
                    error!("Reconcile of {} failed, retrying in {:?}: {}", key, delay, e);
                }
                let queue = self.clone();
                let retry_key = key.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    queue.enqueue(retry_key);
                });
            }
        }

        if rerun {
            self.enqueue(key);
        }
    }
}

fn lock<Key>(state: &Mutex<QueueState<Key>>) -> MutexGuard<'_, QueueState<Key>> {
    state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
