use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use sentry::{Hub, SentryFutureExt};
use thiserror::Error;
use tracing::Instrument;

use crate::config::MemoizeConfig;
use crate::time::Instant;
use crate::utils::defer::defer;

type ComputationChannel<V, E> = Shared<oneshot::Receiver<Result<V, E>>>;
type ComputeFn<A, V, E> = dyn Fn(A) -> BoxFuture<'static, Result<V, E>> + Send + Sync;
type HashFn<A, K> = dyn Fn(&A) -> K + Send + Sync;

/// The error returned by [`Memoizer::call`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoizeError<E> {
    /// The memoized function failed with this error.
    ///
    /// Every caller that was waiting on the same computation receives a clone of it.
    #[error("{0}")]
    Failed(E),
    /// The computation ended without producing a result.
    ///
    /// This happens when the memoized future panics, or the runtime shuts down while it runs.
    #[error("memoized computation was cancelled")]
    Cancelled,
}

impl<E> MemoizeError<E> {
    /// Returns the error of the memoized function, if it failed.
    pub fn into_failed(self) -> Option<E> {
        match self {
            Self::Failed(err) => Some(err),
            Self::Cancelled => None,
        }
    }
}

/// A successful result in the memo table.
#[derive(Clone, Debug)]
struct MemoEntry<V> {
    value: V,
    /// `None` if the value never expires.
    expires_at: Option<Instant>,
}

struct MemoState<K, V, E> {
    memos: HashMap<K, MemoEntry<V>>,
    in_flight: HashMap<K, ComputationChannel<V, E>>,
}

struct Inner<A, K, V, E> {
    name: String,
    compute: Box<ComputeFn<A, V, E>>,
    hasher: Box<HashFn<A, K>>,
    ttl: Option<Duration>,
    state: Mutex<MemoState<K, V, E>>,
}

impl<A, K, V, E> Inner<A, K, V, E> {
    fn is_fresh(&self, entry: &MemoEntry<V>) -> bool {
        match entry.expires_at {
            Some(expires_at) => Instant::now() < expires_at,
            None => true,
        }
    }

    /// A TTL too large to represent as a deadline never expires.
    fn expires_at(&self) -> Option<Instant> {
        self.ttl.and_then(|ttl| Instant::now().checked_add(ttl))
    }
}

/// Caches the results of an async function.
///
/// Each call derives a key from its argument using the hasher. Successful results are kept in a
/// memo table under that key, and concurrent calls for a key that is currently being computed
/// share one invocation of the function. Errors are handed to every waiting caller but are never
/// cached, so the next call for that key runs the function again.
///
/// With a TTL, a memoized value is only served until `ttl` has passed since it was computed.
/// Without one, it is served until [`reset`](Self::reset) or [`clear`](Self::clear) removes it.
///
/// Computations are spawned onto the tokio runtime and run to completion even if every caller
/// stops waiting for them.
///
/// Cloning a `Memoizer` is cheap, and all clones share the same tables.
pub struct Memoizer<A, K, V, E> {
    inner: Arc<Inner<A, K, V, E>>,
}

impl<A, K, V, E> Clone for Memoizer<A, K, V, E> {
    fn clone(&self) -> Self {
        Memoizer {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, K, V, E> fmt::Debug for Memoizer<A, K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (memos, in_flight) = self
            .inner
            .state
            .try_lock()
            .map(|state| (state.memos.len(), state.in_flight.len()))
            .unwrap_or_default();
        f.debug_struct("Memoizer")
            .field("name", &self.inner.name)
            .field("ttl", &self.inner.ttl)
            .field("memoized items", &memos)
            .field("running computations", &in_flight)
            .finish()
    }
}

/// Creates a [`Memoizer`] around `f`, keyed by `hasher` and with an optional `ttl`.
///
/// The hasher must be a pure function of the argument. A `ttl` of `None` or zero means that
/// memoized values never expire.
pub fn memoize<A, K, V, E, F, Fut, H>(
    f: F,
    hasher: H,
    ttl: Option<Duration>,
) -> Memoizer<A, K, V, E>
where
    A: 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
    H: Fn(&A) -> K + Send + Sync + 'static,
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let config = MemoizeConfig {
        ttl,
        ..Default::default()
    };
    Memoizer::from_config(f, hasher, &config)
}

impl<A, V, E> Memoizer<A, A, V, E>
where
    A: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Creates a memoizer that uses the argument itself as key, and never expires values.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        memoize(f, A::clone, None)
    }
}

impl<A, K, V, E> Memoizer<A, K, V, E>
where
    A: 'static,
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Creates a memoizer with the name and TTL from `config`.
    pub fn from_config<F, Fut, H>(f: F, hasher: H, config: &MemoizeConfig) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        H: Fn(&A) -> K + Send + Sync + 'static,
    {
        let compute: Box<ComputeFn<A, V, E>> = Box::new(move |arg: A| f(arg).boxed());
        Memoizer {
            inner: Arc::new(Inner {
                name: config.name.clone(),
                compute,
                hasher: Box::new(hasher),
                ttl: config.ttl.filter(|ttl| !ttl.is_zero()),
                state: Mutex::new(MemoState {
                    memos: HashMap::new(),
                    in_flight: HashMap::new(),
                }),
            }),
        }
    }

    /// Returns the memoized value for `arg`, or computes it.
    ///
    /// The lookup happens eagerly: a missing value starts computing right away, even if the
    /// returned future is never polled.
    ///
    /// # Panics
    ///
    /// Starting a computation panics when called outside of a tokio runtime.
    pub fn call(&self, arg: A) -> BoxFuture<'static, Result<V, MemoizeError<E>>> {
        let key = (self.inner.hasher)(&arg);
        let name = self.inner.name.as_str();

        // Checking the memos and the running computations, and registering a new computation
        // must happen under one lock, otherwise two callers could start computing the same key.
        let (sender, channel) = {
            let mut state = self.inner.state.lock();

            if let Some(entry) = state.memos.get(&key) {
                if self.inner.is_fresh(entry) {
                    metric!(counter("memoize.hit") += 1, "memoizer" => name);
                    return future::ready(Ok(entry.value.clone())).boxed();
                }
                tracing::trace!(memoizer = name, "Memoized value expired");
            }

            if let Some(channel) = state.in_flight.get(&key) {
                // A concurrent call was deduplicated.
                metric!(counter("memoize.channel.hit") += 1, "memoizer" => name);
                return Self::wait(channel.clone());
            }

            metric!(counter("memoize.channel.miss") += 1, "memoizer" => name);
            let (sender, receiver) = oneshot::channel();
            let channel = receiver.shared();
            let evicted = state.in_flight.insert(key.clone(), channel.clone());
            debug_assert!(evicted.is_none());
            metric!(
                gauge("memoize.in_flight") = state.in_flight.len() as u64,
                "memoizer" => name
            );

            (sender, channel)
        };

        self.spawn_computation(key, arg, sender);

        Self::wait(channel)
    }

    /// Runs the memoized function for `arg` as a separate task, and sends the result to `sender`.
    ///
    /// The in-flight entry for `key` must already be registered. It is removed once the task
    /// finishes, including when the function panics.
    fn spawn_computation(&self, key: K, arg: A, sender: oneshot::Sender<Result<V, E>>) {
        let remove_in_flight = {
            let inner = Arc::clone(&self.inner);
            let key = key.clone();
            defer(move || {
                inner.state.lock().in_flight.remove(&key);
            })
        };

        tracing::trace!(memoizer = %self.inner.name, "Starting memoized computation");
        let computation = (self.inner.compute)(arg);

        let inner = Arc::clone(&self.inner);
        let task = async move {
            let name = inner.name.as_str();
            let start = Instant::now();
            let result = computation.await;
            metric!(timer("memoize.computation.duration") = start.elapsed(), "memoizer" => name);

            match &result {
                Ok(value) => {
                    metric!(
                        counter("memoize.computation") += 1,
                        "memoizer" => name,
                        "status" => "ok",
                    );
                    let entry = MemoEntry {
                        value: value.clone(),
                        expires_at: inner.expires_at(),
                    };
                    inner.state.lock().memos.insert(key, entry);
                }
                Err(_) => {
                    metric!(
                        counter("memoize.computation") += 1,
                        "memoizer" => name,
                        "status" => "err",
                    );
                    tracing::debug!(memoizer = name, "Memoized computation failed");
                }
            }

            // Evict from the in-flight table before sending. This ensures that callers either
            // get a channel that will receive data, or find the memoized value.
            drop(remove_in_flight);
            sender.send(result).ok();
        }
        .bind_hub(Hub::new_from_top(Hub::current()))
        .in_current_span();

        tokio::spawn(task);
    }

    fn wait(channel: ComputationChannel<V, E>) -> BoxFuture<'static, Result<V, MemoizeError<E>>> {
        channel
            .map(|result| match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(MemoizeError::Failed(err)),
                Err(oneshot::Canceled) => Err(MemoizeError::Cancelled),
            })
            .boxed()
    }

    /// Removes the memoized value for `arg`.
    ///
    /// A computation that is currently running for the same key is not affected, and will memoize
    /// its result when it finishes.
    pub fn reset(&self, arg: &A) {
        let key = (self.inner.hasher)(arg);
        self.inner.state.lock().memos.remove(&key);
    }

    /// Removes all memoized values. Running computations are not affected.
    pub fn clear(&self) {
        self.inner.state.lock().memos.clear();
    }

    /// The number of memoized values, including expired ones that were not replaced yet.
    pub fn len(&self) -> usize {
        self.inner.state.lock().memos.len()
    }

    /// Returns `true` if no values are memoized.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of computations that are currently running.
    pub fn in_flight(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }
}
