use crate::StoreError;
use core::time::Duration;
use thiserror::Error;

/// A result type defaulting to the crate-wide [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors `seqid` can surface to a caller.
///
/// Lock contention and store failures are always reported; nothing on the
/// allocation path is swallowed, since a caller that wrongly assumes success
/// could hand out a duplicate ID.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The lease on `key` could not be acquired before the wait timeout.
    ///
    /// This is the normal outcome of contention. Callers may retry or report
    /// the allocation as unavailable.
    #[error("timed out after {waited:?} waiting for lock `{key}`")]
    LockTimeout { key: String, waited: Duration },

    /// The lock or sequence table could not be read or written.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// [`crate::SequenceAllocator::allocate`] was called for a key that was
    /// never registered.
    #[error("no sequence registered for key `{0}`")]
    UnknownKey(String),

    /// The options supplied for a sequence are out of range.
    #[error("invalid options for sequence `{key}`: {reason}")]
    InvalidOptions { key: String, reason: String },

    /// A date pattern uses a field this crate cannot render.
    #[error("invalid date pattern `{pattern}`: {reason}")]
    InvalidDatePattern { pattern: String, reason: String },

    /// The sequence row vanished between being read and being written while
    /// its lock was held.
    #[error("sequence `{0}` disappeared while its lock was held")]
    SequenceMissing(String),

    /// Cursor arithmetic exceeded `u64`.
    #[error("cursor arithmetic overflowed for sequence `{0}`")]
    CursorOverflow(String),

    /// A blocking allocation task panicked or was cancelled by the runtime.
    #[cfg_attr(docsrs, doc(cfg(feature = "async-tokio")))]
    #[cfg(feature = "async-tokio")]
    #[error("blocking task failed: {0}")]
    Task(String),
}

impl Error {
    /// Returns `true` for errors a caller can reasonably retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::Store(_))
    }
}
