//! Error types for the synchronization engine
//!
//! One tagged error type covering four classes of failure, so callers can
//! branch on `kind()` instead of matching message strings:
//! recognized non-fatal conditions, validation errors, transient
//! infrastructure errors, and logical impossibilities.

use thiserror::Error;
use uuid::Uuid;

/// Convenience Result type using the engine Error
pub type Result<T> = std::result::Result<T, Error>;

/// Which class of failure an [`Error`] belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Expected, success-adjacent conditions callers swallow at the call site
    Recognized,
    /// Bad input; returned to the immediate caller, never retried
    Validation,
    /// Store/bus/resolver unavailability; propagates, logged, self-heals
    Infrastructure,
    /// "This should never happen" branches; logged, operation returns safely
    Logic,
}

/// Engine error type
#[derive(Error, Debug)]
pub enum Error {
    // --- recognized non-fatal conditions ---
    /// Autofill is switched off for the station
    #[error("autofill is disabled for this station")]
    AutofillDisabled,

    /// The queue already holds the configured number of autofill entries
    #[error("autofill limit already reached")]
    AutofillLimitReached,

    /// No current song to act on
    #[error("nothing to skip")]
    NothingToSkip,

    /// Station missing from the store
    #[error("station not found: {0}")]
    StationNotFound(Uuid),

    // --- validation errors ---
    /// Malformed or out-of-range input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The station does not accept song requests
    #[error("song requests are disabled for this station")]
    RequestsDisabled,

    /// The requester already holds the maximum queue slots
    #[error("request limit of {limit} reached")]
    RequestLimitReached { limit: usize },

    /// The song is already queued or playing
    #[error("song is already in the queue")]
    DuplicateRequest,

    /// The playlist is already an autofill source for the station
    #[error("playlist {0} is already autofilling this station")]
    PlaylistAlreadyAutofilled(Uuid),

    /// The playlist is already blacklisted for the station
    #[error("playlist {0} is already blacklisted for this station")]
    PlaylistAlreadyBlacklisted(Uuid),

    // --- transient infrastructure errors ---
    /// Durable store error (wraps sqlx::Error)
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Shared cache/notification bus error
    #[error("bus error: {0}")]
    Bus(String),

    /// Media resolver collaborator error
    #[error("resolver error: {0}")]
    Resolver(String),

    // --- logical impossibilities ---
    /// Internal invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify this error into one of the four taxonomy classes
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AutofillDisabled
            | Error::AutofillLimitReached
            | Error::NothingToSkip
            | Error::StationNotFound(_) => ErrorKind::Recognized,
            Error::InvalidInput(_)
            | Error::RequestsDisabled
            | Error::RequestLimitReached { .. }
            | Error::DuplicateRequest
            | Error::PlaylistAlreadyAutofilled(_)
            | Error::PlaylistAlreadyBlacklisted(_) => ErrorKind::Validation,
            Error::Database(_) | Error::Bus(_) | Error::Resolver(_) => ErrorKind::Infrastructure,
            Error::Internal(_) => ErrorKind::Logic,
        }
    }

    /// Whether callers may treat this error as a success-adjacent condition
    pub fn is_recognized(&self) -> bool {
        self.kind() == ErrorKind::Recognized
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Internal(format!("serialization failure: {}", e))
    }
}
