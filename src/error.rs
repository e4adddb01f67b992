//! Error types for the RTSP streaming core.

use std::fmt;

/// Errors that can occur in the RTSP streaming core.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Protocol**: [`Parse`](Self::Parse) — malformed RTSP messages.
/// - **Transport**: [`Io`](Self::Io) — socket/network failures,
///   [`PortRangeExhausted`](Self::PortRangeExhausted) — no free UDP pair.
/// - **Server**: [`AlreadyRunning`](Self::AlreadyRunning),
///   [`InvalidBindAddress`](Self::InvalidBindAddress).
/// - **Tracks**: [`TrackAfterStart`](Self::TrackAfterStart),
///   [`TrackSlotMismatch`](Self::TrackSlotMismatch).
///
/// The feed entry points never return errors: per-connection transport
/// failures are absorbed by the fan-out, which removes the affected
/// session and keeps delivering to the rest.
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// [`Server::start_listen`](crate::Server::start_listen) was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// The configured bind address is not `host:port` with an explicit non-zero port.
    #[error("invalid bind address: {0}")]
    InvalidBindAddress(String),

    /// A track was attached after `start_listen`.
    #[error("tracks must be attached before start_listen")]
    TrackAfterStart,

    /// A track was attached to the slot of the other media kind.
    #[error("track id does not match the attach slot")]
    TrackSlotMismatch,

    /// Failed to parse an RTSP request message (RFC 2326 §6).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// No adjacent UDP port pair was free in the 50000–51000 range.
    #[error("UDP port range 50000-51000 exhausted")]
    PortRangeExhausted,
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
