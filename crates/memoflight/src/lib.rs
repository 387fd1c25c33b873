//! # Single-flight memoization of asynchronous computations
//!
//! This crate wraps an asynchronous producer function, such as a network call or an expensive
//! computation, into a [`Memoized`] function that:
//!
//! - deduplicates concurrent calls with identical arguments, so that the producer runs at most once
//!   per distinct argument list at any given time,
//! - caches successful results per argument list for a configurable [`Ttl`], and
//! - broadcasts the eventual result or failure to every caller that arrived while the computation
//!   was in flight.
//!
//! ```
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let fetch_user = memoflight::wrap(
//!     |(id,): (u32,)| async move { Ok::<_, String>(format!("user {id}")) },
//!     Duration::from_secs(1),
//! );
//!
//! let (first, second) = futures::join!(fetch_user.call((42,)), fetch_user.call((42,)));
//! assert_eq!(first, Ok("user 42".to_owned()));
//! assert_eq!(second, Ok("user 42".to_owned()));
//! # }
//! ```
//!
//! ## Keys
//!
//! Arguments are passed as tuples (or slices, arrays and vectors) of [`Display`](std::fmt::Display)
//! values, and canonicalized into a [`CacheKey`] by joining their renderings with `,`. A call
//! without arguments uses a dedicated sentinel key. See [`CacheArgs`].
//!
//! ## Lifecycle
//!
//! Every key is either idle, pending or successful. A pending key collects the callers that join
//! it and settles all of them at once, in the order they joined. Failures are handed to everyone
//! who was waiting, but never cached: the next call starts a fresh computation. Successes are kept
//! until their time-to-live elapses, or forever if no positive time-to-live is configured.
//!
//! Every cached result records when it expires, and lookups never serve a result past that point.
//! A timer owned by the cached entry additionally removes it eagerly. The timer is aborted whenever
//! the entry is removed through other means (see [`Memoized::invalidate`]), and it only ever
//! removes the very entry it was created for, never a newer one that reuses the same key.
//!
//! ## Runtime
//!
//! Computations and expiry timers are spawned onto the tokio runtime of the caller, so
//! [`Memoized::call`] must be invoked from within a tokio runtime. Calling it outside of one panics
//! whenever a new computation has to be started. A [`Memoized`] itself is not bound to any runtime,
//! and can be shared across runtimes, or outlive the one that computed its cached results.
//!
//! ## Errors
//!
//! Producer errors are passed through unmodified as [`CallError::Failed`]. A computation that is
//! torn down without settling, for example because the producer panicked, is reported as
//! [`CallError::Interrupted`].
//!
//! ## Metrics
//!
//! See the [`metrics`] module for the list of emitted metrics.

#[macro_use]
pub mod metrics;

mod config;
mod error;
mod key;
mod memoized;
mod ttl;
pub mod utils;

pub use config::{CacheConfig, DEFAULT_CACHE_NAME};
pub use error::CallError;
pub use key::{CacheArgs, CacheKey, CacheKeyBuilder};
pub use memoized::{Memoized, wrap, wrap_with_config};
pub use ttl::Ttl;
