//! Core error types and result handling.
//!
//! Every failure the codec and the dispatcher can detect is reported
//! synchronously through [`IlcError`]. The crate performs no retries and no
//! partial-frame recovery - recovery policy (flushing the response FIFO,
//! re-issuing requests) belongs to the caller.

use thiserror::Error;

/// Result type used throughout the crate.
pub type IlcResult<T> = Result<T, IlcError>;

/// Errors raised by buffer reads, CRC checks and response dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IlcError {
    /// Received CRC doesn't match the CRC calculated over the payload.
    ///
    /// The response buffer content is unreliable; flush it and re-issue the
    /// outstanding requests.
    #[error("invalid CRC - calculated 0x{expected:04X}, received 0x{got:04X}")]
    CrcMismatch { expected: u16, got: u16 },

    /// A read ran past the end of the FIFO buffer.
    #[error("end of buffer while reading response")]
    EndOfBuffer,

    /// A response arrived with no outstanding request in the ledger.
    #[error(
        "received response for function {function} (0x{function:02X}) \
         from address {address} without matching request"
    )]
    UnmatchedFunction { address: u8, function: u8 },

    /// A response arrived out of order - the front of the ledger names a
    /// different (address, function) pair.
    #[error(
        "invalid response - expected function {expected_function} \
         (0x{expected_function:02X}) from address {expected_address}, \
         got function {function} (0x{function:02X}) from address {address}"
    )]
    UnexpectedResponse {
        address: u8,
        function: u8,
        expected_address: u8,
        expected_function: u8,
    },

    /// `check_commanded_empty` found requests still awaiting replies.
    #[error("responses for those address:function pairs weren't received: {pairs:?}")]
    OutstandingRequests { pairs: Vec<(u8, u8)> },

    /// The response function code has no registered handler. Frame
    /// boundaries are unrecoverable from here on; flush and retry.
    #[error("unknown function {function} (0x{function:02X}) in response for address {address}")]
    UnknownResponse { address: u8, function: u8 },

    /// The ILC answered with a Modbus error response.
    #[error(
        "ILC exception {code} (address {address}, \
         response function {function} (0x{function:02X}))"
    )]
    IlcException { address: u8, function: u8, code: u8 },

    /// A framing token (frame end, wait-for-Rx, delay) was expected but a
    /// different word is at the read cursor. Structural corruption.
    #[error("expected {expected}, found 0x{found:04X} (at offset {offset})")]
    UnexpectedWord {
        expected: &'static str,
        found: u16,
        offset: usize,
    },

    /// A response payload violates the function's format.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },
}

impl IlcError {
    /// Shorthand for [`IlcError::InvalidResponse`].
    pub fn invalid_response(message: impl Into<String>) -> Self {
        IlcError::InvalidResponse {
            message: message.into(),
        }
    }
}
