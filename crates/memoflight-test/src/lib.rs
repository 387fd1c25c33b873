//! Helpers for testing memoized functions.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Producers that should stay in flight for a while can wait on a [`Gate`]. This is more
//!    reliable than sleeping, and does not depend on the tokio clock being paused.
//!
//!  - Use a [`CallLog`] to count producer invocations, or to record the order in which callers
//!    observed their results.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `memoflight` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("memoflight=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// A one-shot barrier that holds back any number of tasks until it is opened.
///
/// Clones share the same barrier. Once opened, a gate stays open, and [`Gate::wait`] returns
/// immediately.
#[derive(Clone)]
pub struct Gate {
    sender: Arc<watch::Sender<bool>>,
}

impl Gate {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Waits until the gate is opened.
    pub async fn wait(&self) {
        let mut receiver = self.sender.subscribe();
        // the sender is kept alive by `self`
        receiver.wait_for(|open| *open).await.ok();
    }

    /// Opens the gate, releasing all current and future waiters.
    pub fn open(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_open(&self) -> bool {
        *self.sender.borrow()
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate").field("open", &self.is_open()).finish()
    }
}

/// A shared, ordered log of events.
///
/// Typically a producer records its arguments on every invocation, so that tests can assert on
/// how many computations actually happened.
pub struct CallLog<T> {
    events: Arc<Mutex<Vec<T>>>,
}

impl<T> CallLog<T> {
    pub fn new() -> Self {
        Self {
            events: Default::default(),
        }
    }

    /// Appends an event to the log.
    pub fn record(&self, event: T) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// The number of recorded events.
    pub fn count(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<T: Clone> CallLog<T> {
    /// A snapshot of all recorded events, in recording order.
    pub fn events(&self) -> Vec<T> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// https://github.com/rust-lang/rust/issues/26925
impl<T> Clone for CallLog<T> {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
        }
    }
}

impl<T> Default for CallLog<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for CallLog<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_list().entries(events.iter()).finish()
    }
}
