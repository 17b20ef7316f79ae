//! Error types for the multiplexing layer.
//!
//! Role drivers and the binary use `anyhow`; these typed errors are what the
//! codec and session hand back so callers can tell a dead link apart from a
//! malformed record.

use thiserror::Error;

/// A wire record that cannot be decoded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Fewer bytes than the fixed header.
    #[error("record too short for header: {len} bytes")]
    ShortHeader {
        /// Bytes available.
        len: usize,
    },

    /// Payload length points past the end of the record.
    #[error("payload length {length} exceeds record ({available} bytes after header)")]
    PayloadOverrun {
        /// Declared payload length.
        length: u32,
        /// Bytes available after the header.
        available: usize,
    },
}

/// Session-level failures.
#[derive(Debug, Error)]
pub enum MuxError {
    /// Reading from the link failed or the peer closed it.
    #[error("link read failed: {0}")]
    LinkRead(#[source] std::io::Error),

    /// Writing to the link failed; the session cannot continue.
    #[error("link write failed: {0}")]
    LinkWrite(#[source] std::io::Error),

    /// No free connection id was found within the probe limit.
    #[error("no free connection id after {0} probes")]
    IdSpaceExhausted(usize),

    /// The session has shut down.
    #[error("session closed")]
    SessionClosed,
}
