use thiserror::Error;

/// Errors raised by the byte-level codec. All of them are fatal for the
/// decode call that hit them; the reader never substitutes defaults or
/// truncates silently.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum WireError {
    #[error("index out of range: {needed} byte(s) at position {pos} exceed length {len}")]
    OutOfRange {
        pos: usize,
        needed: usize,
        len: usize,
    },

    #[error("invalid varint encoding")]
    InvalidVarint,

    #[error("invalid wire type {0}")]
    InvalidWireType(u32),

    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("invalid base64 data")]
    InvalidBase64,

    #[error("unmatched end-group tag for field {0}")]
    UnmatchedGroup(u32),
}
