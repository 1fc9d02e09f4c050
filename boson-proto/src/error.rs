//! Wire error taxonomy (spec.md §4.2/§7). `ErrorCode` is the integer that
//! travels in an envelope's `e.c` field; `DhtError` is what handler code
//! actually matches on.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    Generic = 201,
    Protocol = 203,
    MethodUnknown = 204,
    MessageTooBig = 205,
    InvalidSignature = 206,
    CasFail = 301,
    SequenceNotMonotonic = 302,
    InvalidToken = 400,
}

impl From<ErrorCode> for u16 {
    fn from(c: ErrorCode) -> u16 {
        c as u16
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = ();

    fn try_from(v: u16) -> Result<Self, Self::Error> {
        Ok(match v {
            201 => ErrorCode::Generic,
            203 => ErrorCode::Protocol,
            204 => ErrorCode::MethodUnknown,
            205 => ErrorCode::MessageTooBig,
            206 => ErrorCode::InvalidSignature,
            301 => ErrorCode::CasFail,
            302 => ErrorCode::SequenceNotMonotonic,
            400 => ErrorCode::InvalidToken,
            _ => return Err(()),
        })
    }
}

#[derive(Debug, Error)]
#[error("{code:?}: {message}")]
pub struct DhtError {
    pub code: ErrorCode,
    pub message: String,
}

impl DhtError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        DhtError {
            code,
            message: message.into(),
        }
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Generic, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Protocol, message)
    }

    pub fn method_unknown(method: u8) -> Self {
        Self::new(ErrorCode::MethodUnknown, format!("unknown method {method}"))
    }

    pub fn message_too_big(len: usize, max: usize) -> Self {
        Self::new(
            ErrorCode::MessageTooBig,
            format!("message of {len} bytes exceeds max {max}"),
        )
    }

    pub fn invalid_signature() -> Self {
        Self::new(ErrorCode::InvalidSignature, "signature verification failed")
    }

    pub fn cas_fail() -> Self {
        Self::new(ErrorCode::CasFail, "compare-and-set precondition failed")
    }

    pub fn sequence_not_monotonic() -> Self {
        Self::new(
            ErrorCode::SequenceNotMonotonic,
            "sequence number is not strictly greater than the stored value",
        )
    }

    pub fn invalid_token() -> Self {
        Self::new(ErrorCode::InvalidToken, "token missing, expired, or invalid")
    }
}

pub type Result<T> = std::result::Result<T, DhtError>;
