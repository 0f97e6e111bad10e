use std::fmt::{self, Debug, Formatter};
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Listener<V> = Box<dyn FnOnce(V) + Send + 'static>;

enum State<T, E> {
    Pending {
        callbacks: Vec<Listener<T>>,
        errbacks: Vec<Listener<E>>,
    },
    Resolved(Result<T, E>),
}

/// Single-resolution completion handle
///
/// Starts out pending and is resolved at most once, either with a value (see [`succeed`](Deferred::succeed))
/// or with an error (see [`fail`](Deferred::fail)). The first resolution wins, every later attempt is
/// ignored and reported back as such. Listeners registered through [`callback`](Deferred::callback) only ever
/// observe successes, those registered through [`errback`](Deferred::errback) only ever observe failures.
/// Listeners registered after the resolution are invoked immediately if they match the outcome.
///
/// Clones share the same state. Listeners run on whichever thread resolves the instance, outside of any lock,
/// so they may freely interact with the instance they are registered on.
pub struct Deferred<T, E> {
    state: Arc<Mutex<State<T, E>>>,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T, E> Default for Deferred<T, E> {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::Pending {
                callbacks: Vec::new(),
                errbacks: Vec::new(),
            })),
        }
    }
}

impl<T, E> Deferred<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Creates a new, pending instance
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State<T, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a listener for the success case
    pub fn callback<F>(&self, listener: F) -> &Self
    where
        F: FnOnce(T) + Send + 'static,
    {
        let mut state = self.lock();

        let value = match &mut *state {
            State::Pending { callbacks, .. } => {
                callbacks.push(Box::new(listener));
                return self;
            }
            State::Resolved(Ok(value)) => value.clone(),
            State::Resolved(Err(_)) => return self,
        };

        drop(state);
        listener(value);
        self
    }

    /// Registers a listener for the failure case
    pub fn errback<F>(&self, listener: F) -> &Self
    where
        F: FnOnce(E) + Send + 'static,
    {
        let mut state = self.lock();

        let error = match &mut *state {
            State::Pending { errbacks, .. } => {
                errbacks.push(Box::new(listener));
                return self;
            }
            State::Resolved(Err(error)) => error.clone(),
            State::Resolved(Ok(_)) => return self,
        };

        drop(state);
        listener(error);
        self
    }

    /// Resolves the instance with an already computed outcome
    ///
    /// Returns `false` without touching any listener if the instance has been resolved before.
    pub fn resolve(&self, outcome: Result<T, E>) -> bool {
        let mut state = self.lock();

        let (callbacks, errbacks) = match &mut *state {
            State::Pending {
                callbacks,
                errbacks,
            } => (mem::take(callbacks), mem::take(errbacks)),
            State::Resolved(_) => return false,
        };

        *state = State::Resolved(outcome.clone());
        drop(state);

        match outcome {
            Ok(value) => {
                for listener in callbacks {
                    listener(value.clone());
                }
            }
            Err(error) => {
                for listener in errbacks {
                    listener(error.clone());
                }
            }
        }

        true
    }

    /// Resolves the instance successfully, see [`resolve`](Deferred::resolve)
    pub fn succeed(&self, value: T) -> bool {
        self.resolve(Ok(value))
    }

    /// Resolves the instance with an error, see [`resolve`](Deferred::resolve)
    pub fn fail(&self, error: E) -> bool {
        self.resolve(Err(error))
    }

    /// Outcome of the instance, `None` while pending
    pub fn outcome(&self) -> Option<Result<T, E>> {
        match &*self.lock() {
            State::Pending { .. } => None,
            State::Resolved(outcome) => Some(outcome.clone()),
        }
    }

    /// Whether the instance is still awaiting its resolution
    pub fn is_pending(&self) -> bool {
        matches!(&*self.lock(), State::Pending { .. })
    }
}

impl<T: Debug, E: Debug> Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        match &*state {
            State::Pending {
                callbacks,
                errbacks,
            } => f
                .debug_struct("Deferred")
                .field("callbacks", &callbacks.len())
                .field("errbacks", &errbacks.len())
                .finish(),
            State::Resolved(outcome) => f.debug_tuple("Deferred").field(outcome).finish(),
        }
    }
}
