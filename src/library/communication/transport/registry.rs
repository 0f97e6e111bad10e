use super::{CorrelationHandle, ReplyHandler, RequestHints, TimeoutHandler};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, trace};

/// Result of handing a reply to the [`CorrelationRegistry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Reply was handed to the handler and further replies will be accepted
    Accepting,
    /// Reply was handed to the handler and the correlation is gone now
    Released,
    /// Correlation is unknown or busy, the reply has been dropped
    ///
    /// A correlation is busy while its handler runs. Replies delivered from within the handler
    /// or concurrently by another task are therefore dropped for correlations without a reply
    /// limit. Single-reply correlations are released before their handler runs, so nothing is
    /// lost for them.
    Discarded,
}

struct Inflight {
    on_reply: Option<ReplyHandler>,
    remaining: Option<usize>,
    timer: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
}

impl Inflight {
    fn release(self) {
        if let Some(timer) = self.timer {
            timer.abort();
        }

        if let Some(worker) = self.worker {
            worker.abort();
        }
    }
}

/// Bookkeeping of in-flight requests for [`Transport`](super::Transport) implementations
///
/// Holds the reply handler, the remaining reply budget, the timer and an optional worker task
/// (e.g. a listener) of every correlation. Once a correlation is released, either because its
/// reply budget is used up or because its timer expired, all of its tasks are aborted and
/// anything arriving for it afterwards is discarded. Thus a timer can never fire after the
/// final reply has been delivered.
///
/// Timers are spawned onto the ambient tokio runtime.
#[derive(Clone, Default)]
pub struct CorrelationRegistry {
    entries: Arc<Mutex<HashMap<CorrelationHandle, Inflight>>>,
}

impl CorrelationRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<CorrelationHandle, Inflight>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts tracking a new correlation
    pub fn register(&self, handle: CorrelationHandle, hints: RequestHints, on_reply: ReplyHandler) {
        trace!(correlation = %handle, ?hints, "Registering correlation");

        self.lock().insert(
            handle,
            Inflight {
                on_reply: Some(on_reply),
                remaining: hints.max_replies,
                timer: None,
                worker: None,
            },
        );
    }

    /// Ties the lifetime of a task to a correlation
    ///
    /// The task is aborted right away if the correlation has already been released.
    pub fn attach_worker(&self, handle: &CorrelationHandle, worker: JoinHandle<()>) {
        match self.lock().get_mut(handle) {
            Some(inflight) => inflight.worker = Some(worker),
            None => worker.abort(),
        }
    }

    /// Arms the timer of a correlation, replacing the previous one
    pub fn schedule_timeout(
        &self,
        handle: &CorrelationHandle,
        duration: Duration,
        on_timeout: TimeoutHandler,
    ) {
        let mut entries = self.lock();

        let inflight = match entries.get_mut(handle) {
            Some(inflight) => inflight,
            None => {
                trace!(correlation = %handle, "Ignoring timeout for released correlation");
                return;
            }
        };

        let registry = self.clone();
        let expiring = handle.clone();
        let timer = tokio::spawn(async move {
            sleep(duration).await;
            registry.expire(&expiring, on_timeout);
        });

        if let Some(previous) = inflight.timer.replace(timer) {
            previous.abort();
        }
    }

    /// Hands a reply to the handler of its correlation
    pub fn deliver(&self, handle: &CorrelationHandle, reply: Vec<u8>) -> Delivery {
        let (mut on_reply, exhausted) = {
            let mut entries = self.lock();

            let taken = match entries.get_mut(handle) {
                Some(inflight) => match inflight.on_reply.take() {
                    Some(on_reply) => {
                        if let Some(remaining) = inflight.remaining.as_mut() {
                            *remaining = remaining.saturating_sub(1);
                        }

                        Some((on_reply, inflight.remaining == Some(0)))
                    }
                    None => None,
                },
                None => None,
            };

            match taken {
                Some((on_reply, exhausted)) => {
                    if exhausted {
                        if let Some(inflight) = entries.remove(handle) {
                            inflight.release();
                        }
                    }

                    (on_reply, exhausted)
                }
                None => {
                    trace!(correlation = %handle, "Discarding reply");
                    return Delivery::Discarded;
                }
            }
        };

        // The handler runs unlocked so it may issue requests of its own
        on_reply(reply);

        if exhausted {
            return Delivery::Released;
        }

        match self.lock().get_mut(handle) {
            Some(inflight) => {
                inflight.on_reply = Some(on_reply);
                Delivery::Accepting
            }
            None => Delivery::Released,
        }
    }

    fn expire(&self, handle: &CorrelationHandle, on_timeout: TimeoutHandler) {
        let expired = self.lock().remove(handle);

        match expired {
            Some(mut inflight) => {
                debug!(correlation = %handle, "Correlation timed out");
                // Detach instead of aborting, this is the task currently running
                inflight.timer = None;
                inflight.release();
                on_timeout();
            }
            None => trace!(correlation = %handle, "Timer fired for released correlation"),
        }
    }

    /// Number of correlations currently tracked
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no correlation is tracked
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of armed timers
    pub fn timer_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|inflight| inflight.timer.is_some())
            .count()
    }
}
