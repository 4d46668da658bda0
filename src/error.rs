//! Error types for the command router.

use thiserror::Error;

/// Result type alias for router operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the command router.
///
/// Every failure reaches the caller through the command's completion slot,
/// never across the async boundary as a panic.
#[derive(Error, Debug)]
pub enum Error {
    /// The store produced a redirect payload this router could not parse.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The connection resolver failed to produce a usable connection.
    #[error("resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    /// The per-command redirect budget ran out.
    ///
    /// Usually a sign of topology flapping: the cluster keeps answering with
    /// redirects faster than the slot map stabilizes.
    #[error("redirect limit exhausted after {max} redirects")]
    RedirectsExhausted { max: u32 },

    /// Error reported by the store, delivered verbatim.
    #[error("store error: {0}")]
    Store(String),

    /// The connection dropped the command without completing it.
    #[error("connection closed before completion")]
    ConnectionClosed,

    /// The command was abandoned before a result arrived.
    #[error("command cancelled")]
    Cancelled,
}

/// Redirect payloads that violate the store's wire contract.
///
/// A recognized redirect keyword followed by a malformed target is a hard
/// failure, not something to silently swallow.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Redirect payload did not split into keyword, slot and target tokens.
    #[error("truncated redirect: {payload:?}")]
    TruncatedRedirect { payload: String },

    /// Slot token carried no decimal digits.
    #[error("invalid slot in redirect: {payload:?}")]
    InvalidSlot { payload: String },

    /// Target token had no host/port separator.
    #[error("missing port separator in redirect target: {target:?}")]
    MissingPortSeparator { target: String },

    /// Port was not a valid 16-bit integer.
    #[error("invalid port in redirect target: {target:?}")]
    InvalidPort { target: String },
}

/// Connection resolution failures.
///
/// Kept apart from store-level errors so outer layers can retry resolution
/// without re-interpreting store responses.
#[derive(Error, Debug)]
pub enum ResolutionError {
    /// Target node refused or dropped the connection attempt.
    #[error("connection failed to {addr}: {reason}")]
    ConnectionFailed { addr: String, reason: String },

    /// Resolution did not complete in time.
    #[error("resolution timed out for {addr}")]
    Timeout { addr: String },

    /// Handshake authentication failed.
    #[error("authentication failed for {addr}: {reason}")]
    AuthFailed { addr: String, reason: String },

    /// No node currently owns the requested slot.
    #[error("no node for slot {0}")]
    UnknownSlot(u16),
}
