use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::{self, BoxFuture, FutureExt};
use sentry::{Hub, SentryFutureExt};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::Instrument;

use crate::config::CacheConfig;
use crate::error::CallError;
use crate::key::{CacheArgs, CacheKey};
use crate::ttl::Ttl;
use crate::utils::futures::CallOnDrop;

type Producer<A, T, E> = dyn Fn(A) -> BoxFuture<'static, Result<T, E>> + Send + Sync;
type ResultSender<T, E> = oneshot::Sender<Result<T, E>>;

/// Wraps an asynchronous `producer` into a [`Memoized`] function.
///
/// Concurrent calls with the same arguments share a single invocation of `producer`, and
/// successful results are reused until `ttl` has elapsed. See [`Memoized`] for details.
///
/// The `ttl` accepts anything that converts into a [`Ttl`], most notably a [`Duration`] or a
/// number of milliseconds. Zero, negative or non-finite values cache successes forever.
pub fn wrap<A, T, E, F, Fut>(producer: F, ttl: impl Into<Ttl>) -> Memoized<A, T, E>
where
    A: CacheArgs + 'static,
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    let config = CacheConfig::default().with_ttl(ttl);
    wrap_with_config(producer, config)
}

/// Wraps an asynchronous `producer` into a [`Memoized`] function, using a full [`CacheConfig`].
pub fn wrap_with_config<A, T, E, F, Fut>(producer: F, config: CacheConfig) -> Memoized<A, T, E>
where
    A: CacheArgs + 'static,
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    let entries = Arc::new(Entries {
        name: config.name.as_str().into(),
        ttl: config.ttl(),
        table: Mutex::new(Table {
            entries: HashMap::new(),
            next_id: 0,
        }),
    });

    let producer: Arc<Producer<A, T, E>> = Arc::new(move |args: A| producer(args).boxed());
    Memoized { producer, entries }
}

/// An asynchronous function with single-flight deduplication and a time-expiring result cache.
///
/// Calling [`Memoized::call`] with some arguments does one of three things, depending on the
/// state of the [`CacheKey`] derived from those arguments:
///
/// - If a successful result is cached, it is returned right away.
/// - If a computation is already in flight, the call joins it and receives its outcome.
/// - Otherwise, the producer is invoked and its future is spawned onto the tokio runtime.
///
/// Once the computation settles, every joined caller receives the outcome, in the order in which
/// they joined. A success is cached until the configured [`Ttl`] elapses, a failure is not cached
/// at all, so the next call retries.
///
/// Cloning a [`Memoized`] is cheap, clones share the same cache. Separate calls to [`wrap`] never
/// share anything.
pub struct Memoized<A, T, E> {
    producer: Arc<Producer<A, T, E>>,
    entries: Arc<Entries<T, E>>,
}

// https://github.com/rust-lang/rust/issues/26925
impl<A, T, E> Clone for Memoized<A, T, E> {
    fn clone(&self) -> Self {
        Memoized {
            producer: Arc::clone(&self.producer),
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<A, T, E> fmt::Debug for Memoized<A, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .entries
            .table
            .try_lock()
            .map(|table| table.entries.len())
            .unwrap_or_default();
        f.debug_struct("Memoized")
            .field("name", &self.entries.name)
            .field("ttl", &self.entries.ttl)
            .field("entries", &entries)
            .finish()
    }
}

impl<A, T, E> Memoized<A, T, E>
where
    A: CacheArgs,
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Calls the memoized function.
    ///
    /// NOTE: This function itself is *not* `async`, because it should eagerly register the call,
    /// and spawn the computation on the runtime, even if you don't explicitly `await` its result.
    /// Dropping the returned future does not cancel the computation for anyone else.
    ///
    /// # Panics
    ///
    /// Panics when a computation needs to be started outside of a tokio runtime.
    pub fn call(&self, args: A) -> BoxFuture<'static, Result<T, CallError<E>>> {
        let key = CacheKey::from_args(&args);
        let name = self.entries.name.as_ref();
        metric!(counter("caches.access") += 1, "cache" => name);

        let (sender, receiver) = oneshot::channel();

        let id = {
            let mut table = self.entries.lock();
            if table.remove_if_expired(&key, Instant::now()).is_some() {
                // The expiry timer did not get to run, for example because its runtime is gone.
                metric!(counter("caches.expired") += 1, "cache" => name);
                tracing::trace!("Discarding expired {} result for {}", name, key);
            }

            match table.entries.get_mut(&key) {
                Some(CacheEntry {
                    state: EntryState::Success { value, .. },
                    ..
                }) => {
                    metric!(counter("caches.memory.hit") += 1, "cache" => name);
                    tracing::trace!("Serving cached {} result for {}", name, key);
                    return future::ready(Ok(value.clone())).boxed();
                }
                Some(CacheEntry {
                    state: EntryState::Pending { waiters },
                    ..
                }) => {
                    // A concurrent call was deduplicated.
                    metric!(counter("caches.channel.hit") += 1, "cache" => name);
                    tracing::trace!("Joining in-flight {} computation for {}", name, key);
                    waiters.push(sender);
                    return receive(receiver);
                }
                None => {
                    metric!(counter("caches.channel.miss") += 1, "cache" => name);
                    table.insert_pending(key.clone())
                }
            }
        };

        // The table lock is released at this point, so the producer is free to call back into
        // this function. Such calls join the computation that is just being started.
        let remove_computation_token = self.entries.removal_token(key.clone(), id);
        let computation = (self.producer)(args);
        self.entries
            .spawn_computation(key, id, computation, sender, remove_computation_token);

        receive(receiver)
    }

    /// Removes the cached successful result for the given arguments.
    ///
    /// Computations in flight are never interrupted, and their outcome will still be delivered and
    /// cached. Returns `true` if a cached result that had not yet expired was removed.
    pub fn invalidate(&self, args: A) -> bool {
        let key = CacheKey::from_args(&args);
        let now = Instant::now();
        let removed = {
            let mut table = self.entries.lock();
            let is_success = table
                .entries
                .get(&key)
                .is_some_and(|entry| matches!(entry.state, EntryState::Success { .. }));
            if is_success {
                table.entries.remove(&key)
            } else {
                None
            }
        };

        let removed = removed.is_some_and(|entry| !entry.is_expired(now));
        if removed {
            tracing::trace!("Invalidated {} result for {}", self.entries.name, key);
        }
        removed
    }
}

impl<A, T, E> Memoized<A, T, E> {
    /// Removes all cached successful results, leaving computations in flight untouched.
    pub fn clear(&self) {
        let removed: Vec<_> = {
            let mut table = self.entries.lock();
            let keys: Vec<_> = table
                .entries
                .iter()
                .filter(|(_, entry)| matches!(entry.state, EntryState::Success { .. }))
                .map(|(key, _)| key.clone())
                .collect();
            keys.iter()
                .filter_map(|key| table.entries.remove(key))
                .collect()
        };
        tracing::trace!("Cleared {} cached {} results", removed.len(), self.entries.name);
    }

    /// The number of keys that currently have either a live cached result or a computation in
    /// flight.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let table = self.entries.lock();
        table
            .entries
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The name used to tag logs and metrics.
    pub fn name(&self) -> &str {
        &self.entries.name
    }

    /// The configured time-to-live of successful results.
    pub fn ttl(&self) -> Ttl {
        self.entries.ttl
    }
}

/// Turns the receiving end of a result channel into the caller-facing future.
fn receive<T, E>(
    receiver: oneshot::Receiver<Result<T, E>>,
) -> BoxFuture<'static, Result<T, CallError<E>>>
where
    T: Send + 'static,
    E: Send + 'static,
{
    receiver
        .map(|received| match received {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(CallError::Failed(err)),
            Err(oneshot::Canceled) => Err(CallError::Interrupted),
        })
        .boxed()
}

/// The lifecycle of a single key.
///
/// A key without an entry in the table is idle. Failures are never stored: the error is broadcast
/// and the entry removed in one step.
enum EntryState<T, E> {
    /// The producer is running, the callers that joined in the meantime wait in FIFO order.
    Pending { waiters: Vec<ResultSender<T, E>> },
    /// The producer succeeded, and its result is reused until `expires_at`.
    ///
    /// The timer removes the entry eagerly. Lookups check `expires_at` themselves, since the timer
    /// never fires if its runtime shuts down first.
    Success {
        value: T,
        expires_at: Option<Instant>,
        _expiry: Option<ExpiryTimer>,
    },
}

struct CacheEntry<T, E> {
    /// Identifies this entry among all entries that ever existed for its key.
    id: u64,
    state: EntryState<T, E>,
}

impl<T, E> CacheEntry<T, E> {
    fn is_expired(&self, now: Instant) -> bool {
        match self.state {
            EntryState::Success {
                expires_at: Some(expires_at),
                ..
            } => now >= expires_at,
            _ => false,
        }
    }
}

/// A scheduled removal of a [`CacheEntry`], which is aborted when the entry is dropped.
struct ExpiryTimer(AbortHandle);

impl Drop for ExpiryTimer {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct Table<T, E> {
    entries: HashMap<CacheKey, CacheEntry<T, E>>,
    next_id: u64,
}

impl<T, E> Table<T, E> {
    /// Inserts a fresh pending entry and returns its id.
    fn insert_pending(&mut self, key: CacheKey) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        let entry = CacheEntry {
            id,
            state: EntryState::Pending {
                waiters: Vec::new(),
            },
        };
        let evicted = self.entries.insert(key, entry);
        debug_assert!(evicted.is_none());
        id
    }

    /// Removes the entry for `key` if it holds a result that expired at or before `now`.
    fn remove_if_expired(&mut self, key: &CacheKey, now: Instant) -> Option<CacheEntry<T, E>> {
        if self.entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            self.entries.remove(key)
        } else {
            None
        }
    }

    /// Removes the entry for `key`, but only if it is still the entry identified by `id`.
    fn remove_if_current(&mut self, key: &CacheKey, id: u64) -> Option<CacheEntry<T, E>> {
        if self.entries.get(key).is_some_and(|entry| entry.id == id) {
            self.entries.remove(key)
        } else {
            None
        }
    }
}

/// The state shared between a [`Memoized`] function, its computations and its expiry timers.
struct Entries<T, E> {
    name: Arc<str>,
    ttl: Ttl,
    table: Mutex<Table<T, E>>,
}

impl<T, E> Entries<T, E> {
    fn lock(&self) -> MutexGuard<'_, Table<T, E>> {
        // The table is consistent after every critical section, so it is safe to keep using it
        // even if some other thread panicked while holding the lock.
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T, E> Entries<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Creates a token that tears down the pending entry `id` when the computation is dropped
    /// before it had a chance to settle.
    ///
    /// Dropping the entry drops all the waiting result channels, which surfaces as
    /// [`CallError::Interrupted`] to the callers.
    fn removal_token(self: &Arc<Self>, key: CacheKey, id: u64) -> CallOnDrop {
        let entries = Arc::downgrade(self);
        CallOnDrop::new(move || {
            let Some(entries) = entries.upgrade() else {
                return;
            };
            let removed = entries.lock().remove_if_current(&key, id);
            if removed.is_some() {
                metric!(counter("caches.computation.interrupted") += 1, "cache" => entries.name.as_ref());
                tracing::warn!("{} computation for {} was interrupted", entries.name, key);
            }
        })
    }

    /// Spawns the `computation` for the pending entry `id` onto the runtime.
    fn spawn_computation(
        self: &Arc<Self>,
        key: CacheKey,
        id: u64,
        computation: BoxFuture<'static, Result<T, E>>,
        sender: ResultSender<T, E>,
        remove_computation_token: CallOnDrop,
    ) {
        let span = tracing::debug_span!("memoized computation", cache = %self.name, key = %key);
        let entries = Arc::clone(self);

        let task = async move {
            tracing::debug!("Starting computation");
            let start = Instant::now();
            let result = computation.await;
            metric!(timer("caches.computation.duration") = start.elapsed(), "cache" => entries.name.as_ref());

            // Settling the entry takes over from the token, which is only there for unwinding.
            remove_computation_token.disarm();
            entries.settle(key, id, result, sender);
        }
        .instrument(span)
        .bind_hub(Hub::new_from_top(Hub::current()));

        tokio::spawn(task);
    }

    /// Transitions the pending entry `id` out of pending state, and broadcasts the outcome.
    ///
    /// Waiters are settled first, in the order they joined, followed by the caller that started
    /// the computation.
    fn settle(
        self: &Arc<Self>,
        key: CacheKey,
        id: u64,
        result: Result<T, E>,
        sender: ResultSender<T, E>,
    ) {
        let name = self.name.as_ref();
        let (waiters, num_entries) = {
            let mut table = self.lock();

            let waiters = match &result {
                Ok(value) => match table.entries.get_mut(&key) {
                    Some(entry) if entry.id == id => {
                        let ttl = self.ttl.duration();
                        let success = EntryState::Success {
                            value: value.clone(),
                            expires_at: ttl.map(|ttl| Instant::now() + ttl),
                            _expiry: ttl.map(|ttl| self.schedule_expiry(key.clone(), id, ttl)),
                        };
                        take_waiters(mem::replace(&mut entry.state, success))
                    }
                    _ => Vec::new(),
                },
                Err(_) => table
                    .remove_if_current(&key, id)
                    .map(|entry| take_waiters(entry.state))
                    .unwrap_or_default(),
            };

            (waiters, table.entries.len())
        };

        let status = if result.is_ok() { "success" } else { "failure" };
        metric!(counter("caches.computation") += 1, "cache" => name, "status" => status);
        metric!(gauge("caches.entries") = num_entries as u64, "cache" => name);
        tracing::debug!(waiters = waiters.len(), "Computation settled with {}", status);

        // A waiter that gave up on its result does not affect anybody else.
        for waiter in waiters {
            waiter.send(result.clone()).ok();
        }
        sender.send(result).ok();
    }

    /// Schedules the removal of the successful entry `id` after `ttl`.
    ///
    /// The timer only holds a weak reference, and is identity-checked against the entry, so it can
    /// neither keep the table alive nor remove a newer entry for the same key.
    fn schedule_expiry(self: &Arc<Self>, key: CacheKey, id: u64, ttl: Duration) -> ExpiryTimer {
        let span = tracing::trace_span!("memoized expiry", cache = %self.name, key = %key);
        let entries: Weak<Self> = Arc::downgrade(self);

        let task = async move {
            tokio::time::sleep(ttl).await;

            let Some(entries) = entries.upgrade() else {
                return;
            };
            let removed = entries.lock().remove_if_current(&key, id);
            if removed.is_some() {
                metric!(counter("caches.expired") += 1, "cache" => entries.name.as_ref());
                tracing::trace!("Expired cached result after {:?}", ttl);
            }
            // `removed` owns this very timer; aborting a task that is about to finish is a no-op.
            drop(removed);
        }
        .instrument(span);

        ExpiryTimer(tokio::spawn(task).abort_handle())
    }
}

fn take_waiters<T, E>(state: EntryState<T, E>) -> Vec<ResultSender<T, E>> {
    match state {
        EntryState::Pending { waiters } => waiters,
        EntryState::Success { .. } => Vec::new(),
    }
}
