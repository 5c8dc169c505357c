//! Domain-specific error types for the SerWB link.
//!
//! All fallible operations return `Result<T, SerwbError>`.
//! Malformed symbols, frames and records are reported as typed errors,
//! never as panics.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for the SerWB protocol stack.
#[derive(Debug, Error)]
pub enum SerwbError {
    // ── Line Code Errors ─────────────────────────────────────────
    /// A received code group could not be decoded.
    #[error("line decode error: {0}")]
    Decode(#[from] DecodeError),

    /// A control symbol outside the reserved K-code set was requested.
    #[error("invalid control symbol: {0:#04x}")]
    InvalidControl(u8),

    // ── Framing Errors ───────────────────────────────────────────
    /// The frame integrity code did not match the received contents.
    #[error("crc mismatch: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch { expected: u32, actual: u32 },

    /// A frame header announced a length outside the accepted range.
    #[error("invalid frame length: {length} words (max {max})")]
    InvalidLength { length: usize, max: usize },

    /// A record header did not carry the expected magic.
    #[error("invalid record magic: {0:#06x}")]
    InvalidMagic(u16),

    /// A record was shorter or longer than its header announced.
    #[error("invalid record length: expected {expected} words, got {actual}")]
    InvalidRecordLength { expected: usize, actual: usize },

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// A packet violated protocol rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    // ── Link Errors ──────────────────────────────────────────────
    /// The link went through a reset while the operation was in flight.
    #[error("link reset")]
    LinkReset,

    /// The link trainer gave up; an explicit reset is required.
    #[error("link training failed")]
    TrainingFailed,

    /// A read is already outstanding on this tunnel.
    #[error("read already pending at {0:#010x}")]
    ReadPending(u32),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Bus Errors ───────────────────────────────────────────────
    /// The local bus rejected an access.
    #[error("bus error at {address:#010x}: {reason}")]
    Bus { address: u32, reason: String },

    // ── Configuration Errors ─────────────────────────────────────
    /// A configuration value is out of range.
    #[error("invalid config: {0}")]
    Config(String),

    /// The I/O layer reported an error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── DecodeError ──────────────────────────────────────────────────

/// Per-lane 8b/10b decode failure.
///
/// This is the link's primary bit-error detector: every variant counts
/// toward the trainer's error tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The code group is not part of the line alphabet.
    #[error("code violation on lane {lane}: {code:#05x}")]
    CodeViolation { lane: usize, code: u16 },

    /// The code group exists, but only for the opposite running disparity.
    #[error("disparity error on lane {lane}: {code:#05x}")]
    Disparity { lane: usize, code: u16 },
}

impl DecodeError {
    /// Lane the error was observed on.
    pub fn lane(&self) -> usize {
        match self {
            Self::CodeViolation { lane, .. } | Self::Disparity { lane, .. } => *lane,
        }
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for SerwbError {
    fn from(s: String) -> Self {
        SerwbError::Other(s)
    }
}

impl From<&str> for SerwbError {
    fn from(s: &str) -> Self {
        SerwbError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for SerwbError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        SerwbError::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for SerwbError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        SerwbError::ChannelClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = SerwbError::CrcMismatch {
            expected: 0xDEADBEEF,
            actual: 0x1234,
        };
        assert!(e.to_string().contains("0xdeadbeef"));

        let e = SerwbError::InvalidLength { length: 900, max: 64 };
        assert!(e.to_string().contains("900"));
        assert!(e.to_string().contains("64"));
    }

    #[test]
    fn decode_error_converts() {
        let e: SerwbError = DecodeError::Disparity { lane: 2, code: 0x0F9 }.into();
        assert!(matches!(e, SerwbError::Decode(DecodeError::Disparity { lane: 2, .. })));
    }

    #[test]
    fn decode_error_lane() {
        assert_eq!(DecodeError::CodeViolation { lane: 3, code: 0 }.lane(), 3);
    }

    #[test]
    fn from_string() {
        let e: SerwbError = "something broke".into();
        assert!(matches!(e, SerwbError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: SerwbError = io_err.into();
        assert!(matches!(e, SerwbError::Io(_)));
    }
}
