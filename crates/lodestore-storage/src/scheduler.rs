//! Debounced flush scheduling.
//!
//! [`FlushScheduler`] owns at most one armed timer. Triggering while a timer
//! is armed moves its deadline and hands back the same completion, so a burst
//! of mutations collapses into a single durable write.

use crate::{StorageError, StorageResult};
use futures::future::BoxFuture;
use std::future::{Future, IntoFuture};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Result of one flush, shared by every handle that waited on it.
pub type FlushOutcome = Result<(), Arc<StorageError>>;

/// Completion of a (possibly coalesced) flush.
///
/// Await it directly, or drop it to let the flush run unobserved.
#[derive(Debug, Clone)]
pub struct FlushHandle {
    rx: watch::Receiver<Option<FlushOutcome>>,
}

impl FlushHandle {
    /// A handle that is already complete.
    pub fn ready() -> Self {
        Self::settled(Ok(()))
    }

    /// A handle that already failed.
    pub fn failed(error: StorageError) -> Self {
        Self::settled(Err(Arc::new(error)))
    }

    fn settled(outcome: FlushOutcome) -> Self {
        let (_, rx) = watch::channel(Some(outcome));
        Self { rx }
    }

    /// True once the flush has finished, successfully or not.
    pub fn is_done(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Wait for the flush to finish.
    pub async fn wait(mut self) -> StorageResult<()> {
        let waited = self
            .rx
            .wait_for(Option::is_some)
            .await
            .map(|outcome| (*outcome).clone());
        let outcome = match waited {
            Ok(outcome) => outcome,
            Err(_) => self.rx.borrow().clone(),
        };

        match outcome {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(StorageError::Flush(e)),
            None => Err(StorageError::backend("flush task ended without a result")),
        }
    }
}

impl IntoFuture for FlushHandle {
    type Output = StorageResult<()>;
    type IntoFuture = BoxFuture<'static, StorageResult<()>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

struct ArmedFlush {
    id: u64,
    deadline: watch::Sender<Instant>,
    done: watch::Receiver<Option<FlushOutcome>>,
}

type Slot = Arc<Mutex<Option<ArmedFlush>>>;

/// Handed to a flush task so it can disarm its timer at the moment it cuts
/// its batch.
///
/// Until then, triggers keep joining the running flush. A task that never
/// disarms is disarmed when it finishes.
pub struct FlushTicket {
    slot: Slot,
    id: u64,
}

impl FlushTicket {
    /// Stop handing this flush's completion to new triggers.
    pub fn disarm(&self) {
        let mut armed = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if armed.as_ref().map(|a| a.id) == Some(self.id) {
            armed.take();
        }
    }
}

/// Coalesces flush requests behind a single timer.
pub struct FlushScheduler {
    delay: Duration,
    armed: Slot,
    next_id: AtomicU64,
}

impl FlushScheduler {
    /// Create a scheduler whose [`FlushScheduler::schedule`] waits `delay`.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            armed: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }

    /// The default debounce delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// True while a flush is waiting to fire or has not cut its batch yet.
    pub fn is_armed(&self) -> bool {
        self.armed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Run `task` after the default delay.
    pub fn schedule<F, Fut>(&self, task: F) -> FlushHandle
    where
        F: FnOnce(FlushTicket) -> Fut + Send + 'static,
        Fut: Future<Output = StorageResult<()>> + Send + 'static,
    {
        self.trigger(self.delay, task)
    }

    /// Run `task` after `delay`.
    ///
    /// If a flush is already armed, its deadline moves to `now + delay`,
    /// `task` is dropped and the armed flush's handle is returned.
    pub fn trigger<F, Fut>(&self, delay: Duration, task: F) -> FlushHandle
    where
        F: FnOnce(FlushTicket) -> Fut + Send + 'static,
        Fut: Future<Output = StorageResult<()>> + Send + 'static,
    {
        let deadline = Instant::now() + delay;
        let mut armed = self.armed.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(current) = armed.as_ref() {
            current.deadline.send_replace(deadline);
            return FlushHandle {
                rx: current.done.clone(),
            };
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(error = %e, "Cannot schedule flush outside a tokio runtime");
                return FlushHandle::failed(StorageError::backend(e.to_string()));
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (deadline_tx, mut deadline_rx) = watch::channel(deadline);
        let (done_tx, done_rx) = watch::channel(None);
        *armed = Some(ArmedFlush {
            id,
            deadline: deadline_tx,
            done: done_rx.clone(),
        });
        drop(armed);

        let slot = self.armed.clone();
        runtime.spawn(async move {
            loop {
                let target = *deadline_rx.borrow_and_update();
                tokio::select! {
                    _ = tokio::time::sleep_until(target) => break,
                    changed = deadline_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }

            debug!("Running scheduled flush");
            let outcome = task(FlushTicket {
                slot: slot.clone(),
                id,
            })
            .await
            .map_err(Arc::new);
            FlushTicket { slot, id }.disarm();
            let _ = done_tx.send(Some(outcome));
        });

        FlushHandle { rx: done_rx }
    }
}
