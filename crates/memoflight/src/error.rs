use thiserror::Error;

/// The error returned by a memoized call.
///
/// Producer failures are passed through unmodified as [`CallError::Failed`]. Every caller that
/// shared the failed invocation receives its own clone of the same error value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError<E> {
    /// The producer settled with this error.
    #[error("{0}")]
    Failed(E),
    /// The computation was torn down before it settled.
    ///
    /// This happens when the producer panics, or when the runtime it was spawned on shuts down.
    /// The key is not poisoned by this, the next call starts a fresh computation.
    #[error("memoized computation was interrupted")]
    Interrupted,
}

impl<E> CallError<E> {
    /// Returns the producer error, if this is a [`CallError::Failed`].
    pub fn as_failed(&self) -> Option<&E> {
        match self {
            CallError::Failed(err) => Some(err),
            CallError::Interrupted => None,
        }
    }

    /// Converts into the producer error, if this is a [`CallError::Failed`].
    pub fn into_failed(self) -> Option<E> {
        match self {
            CallError::Failed(err) => Some(err),
            CallError::Interrupted => None,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, CallError::Interrupted)
    }
}
