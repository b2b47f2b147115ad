//! Error hierarchy for the `/v2/keys` client stack.
//!
//! Store-level failures are a closed set of variants keyed by the numeric
//! wire error code; unknown codes fall back to [`Error::Keys`] instead of
//! failing to decode. [`Error::kind`] projects every variant onto the
//! coarse [`ErrorKind`] taxonomy used by the repository layer.

use serde::Deserialize;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

/// Decoded `/v2/keys` JSON error payload.
///
/// The wire field `cause` is renamed to `reason` to avoid confusion with
/// `std::error::Error::cause`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, thiserror::Error)]
#[error("{message}: {reason}")]
pub struct KeysError {
    #[serde(rename = "errorCode")]
    pub error_code: u32,

    /// Store index at the time of the error.
    #[serde(default)]
    pub index: u64,

    #[serde(default)]
    pub message: String,

    #[serde(rename = "cause", default)]
    pub reason: String,
}

/// Coarse error taxonomy.
///
/// Every [`Error`] variant maps to exactly one kind; callers that only care
/// about the class of failure match on this instead of the full enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Absent key where existence was required.
    NotFound,
    /// Precondition failed: already-exists on create, index/value mismatch
    /// on compare-and-swap, non-empty directory on rmdir.
    Conflict,
    /// Payload or response failed to decode.
    Invalid,
    /// Connectivity-level or leader-unavailable failure, retryable.
    Transient,
    /// Response shape or action tag the client does not recognize. Fatal.
    ProtocolViolation,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Wire code 100
    #[error("key not found: {0}")]
    KeyNotFound(KeysError),

    /// Wire code 101: prevIndex/prevValue compare failed
    #[error("test failed: {0}")]
    TestFailed(KeysError),

    /// Wire code 102: operated on a directory as if it were a leaf
    #[error("not a file: {0}")]
    NotFile(KeysError),

    /// Wire code 104
    #[error("not a directory: {0}")]
    NotDir(KeysError),

    /// Wire code 105: create-only write hit an existing node
    #[error("node already exists: {0}")]
    NodeExist(KeysError),

    /// Wire code 108
    #[error("directory not empty: {0}")]
    DirNotEmpty(KeysError),

    /// Wire codes 300/301: raft internal error or leader election in
    /// progress. Transient; the caller may retry.
    #[error("store unavailable: {0}")]
    Unavailable(KeysError),

    /// Wire codes 400/401: the watch resume index has been compacted out of
    /// the store's event history. The reader recovers with a fresh sync.
    #[error("event index cleared: {0}")]
    EventIndexCleared(KeysError),

    /// Any other wire error code.
    #[error("store error {}: {0}", .0.error_code)]
    Keys(KeysError),

    /// Transport-level failure, before any store response was decoded.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Response body or node payload failed to decode.
    #[error("invalid payload: {0}")]
    Invalid(String),

    /// Action tag or response shape the client does not recognize.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
}

impl Error {
    /// Build the variant for a decoded wire error payload.
    ///
    /// Unknown codes map to the [`Error::Keys`] fallback rather than a
    /// decode failure.
    pub fn from_keys(error: KeysError) -> Self {
        match error.error_code {
            100 => Error::KeyNotFound(error),
            101 => Error::TestFailed(error),
            102 => Error::NotFile(error),
            104 => Error::NotDir(error),
            105 => Error::NodeExist(error),
            108 => Error::DirNotEmpty(error),
            300 | 301 => Error::Unavailable(error),
            400 | 401 => Error::EventIndexCleared(error),
            _ => Error::Keys(error),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::KeyNotFound(_) => ErrorKind::NotFound,
            Error::TestFailed(_) | Error::NodeExist(_) | Error::DirNotEmpty(_) => {
                ErrorKind::Conflict
            }
            Error::NotFile(_) | Error::NotDir(_) | Error::Invalid(_) => ErrorKind::Invalid,
            Error::Unavailable(_) | Error::Transport(_) => ErrorKind::Transient,
            Error::EventIndexCleared(_) | Error::Keys(_) | Error::ProtocolViolation(_) => {
                ErrorKind::ProtocolViolation
            }
        }
    }

    /// True for absent-key errors, which several operations treat as a
    /// valid initial state rather than a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KeyNotFound(_))
    }
}
