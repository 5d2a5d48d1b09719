//! Error taxonomy for the harvester
//!
//! Two families cross component boundaries:
//!
//! - [`AuthError`] is fatal to a session but recoverable by re-authenticating.
//! - [`FetchError`] is scoped to one operation against the remote service.
//!
//! A location that cannot be resolved is *not* an error; it is recorded as
//! [`ResolutionSource::Unresolved`](crate::models::ResolutionSource::Unresolved)
//! on the location record.

use std::time::Duration;

use thiserror::Error;

/// Authentication failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Username/password or challenge code rejected
    #[error("invalid credentials")]
    InvalidCredentials,

    /// A multi-factor challenge must be answered before the session is usable
    #[error("two-factor challenge required")]
    ChallengeRequired,

    /// The service could not be reached or answered unexpectedly
    #[error("network failure: {0}")]
    NetworkFailure(String),

    /// `submit_challenge` called without an outstanding challenge
    #[error("no pending challenge to answer")]
    NoPendingChallenge,

    /// The caller gave up on the challenge loop
    #[error("challenge abandoned")]
    Abandoned,
}

/// Failure of a single fetch against the remote service
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Profile or post does not exist
    #[error("not found")]
    NotFound,

    /// Profile exists but is not visible to this session
    #[error("profile is private")]
    PrivateProfile,

    /// The service asked us to slow down
    #[error("throttled by remote service")]
    Throttled {
        /// Server-provided wait hint (`Retry-After`)
        retry_after: Option<Duration>,
    },

    /// Anything that may succeed on retry: network errors, 5xx, bad payloads
    #[error("transient failure: {0}")]
    Transient(String),
}

impl FetchError {
    /// Throttled without a server hint
    pub const fn throttled() -> Self {
        Self::Throttled { retry_after: None }
    }

    /// Build a transient error from anything printable
    pub fn transient(message: impl std::fmt::Display) -> Self {
        Self::Transient(message.to_string())
    }

    /// Whether this error ends the whole profile's harvest
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::NotFound | Self::PrivateProfile)
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Transient(format!("timed out: {err}"));
        }
        Self::Transient(err.to_string())
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::NetworkFailure(err.to_string())
    }
}
