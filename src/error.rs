use crate::protocol::{exception_name, FunctionCode};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PzemError>;

#[derive(Debug, Error)]
pub enum PzemError {
    #[error("no response from the device within the read timeout")]
    Timeout,

    #[error("device answered function 0x{function:02x} with an exception: {}", describe(.code))]
    ExceptionResponse { function: u8, code: Option<u8> },

    #[error("unexpected function code in response: expected 0x{expected:02x}, got 0x{actual:02x}")]
    UnexpectedFunction { expected: u8, actual: u8 },

    #[error("response came from slave 0x{actual:02x} instead of 0x{expected:02x}")]
    UnexpectedSlave { expected: u8, actual: u8 },

    #[error("malformed payload: expected {expected} bytes, got {actual}")]
    MalformedPayload { expected: usize, actual: usize },

    #[error("response checksum mismatch: computed 0x{expected:04x}, received 0x{actual:04x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    #[error("unsupported function code 0x{0:02x}")]
    UnsupportedFunction(u8),

    #[error("{0} request needs a value to send")]
    MissingPayload(FunctionCode),

    #[error("writing register 0x{register:04x} failed: {}", describe(.code))]
    WriteFailed { register: u16, code: Option<u8> },

    #[error("energy reset failed: {}", describe(.code))]
    ResetFailed { code: Option<u8> },

    #[error("write echo does not match the request: sent {sent:?}, got {echoed:?}")]
    EchoMismatch {
        sent: (u16, u16),
        echoed: (u16, u16),
    },

    #[error("slave address {0} is outside 1..=247")]
    InvalidAddress(u8),

    #[error("the device session has been closed")]
    SessionClosed,

    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn describe(code: &Option<u8>) -> String {
    match code {
        Some(code) => format!("{} (0x{code:02x})", exception_name(*code)),
        None => "no exception code".to_string(),
    }
}
