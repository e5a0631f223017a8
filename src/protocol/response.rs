//! Response validation.
//!
//! Layouts handled here:
//! - read:      `[slave][function][byte count][data...][crc lo][crc hi]`
//! - write:     `[slave][0x06][register:2][value:2][crc lo][crc hi]` (echo of the request)
//! - reset:     `[slave][0x42][crc lo][crc hi]`
//! - exception: `[slave][function | 0x80][exception code][crc lo][crc hi]`

use super::{crc, FunctionCode, EXCEPTION_FLAG, GENERAL_ADDRESS};
use crate::error::{PzemError, Result};

/// Length of an exception response.
pub const EXCEPTION_LEN: usize = 5;

/// Smallest well-formed response (the reset acknowledgement).
const MIN_RESPONSE_LEN: usize = 4;

/// A response that passed every check, borrowed from the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response<'a> {
    slave: u8,
    function: FunctionCode,
    /// Everything between the function code and the checksum.
    body: &'a [u8],
}

impl<'a> Response<'a> {
    pub fn slave(&self) -> u8 {
        self.slave
    }

    pub fn function(&self) -> FunctionCode {
        self.function
    }

    pub fn body(&self) -> &'a [u8] {
        self.body
    }

    /// Register data of a read response, checked against the number of
    /// registers that was requested.
    pub fn register_data(&self, count: u16) -> Result<&'a [u8]> {
        let wanted = 2 * usize::from(count);
        let (byte_count, data) = match self.body.split_first() {
            Some((&byte_count, data)) => (usize::from(byte_count), data),
            None => {
                return Err(PzemError::MalformedPayload {
                    expected: wanted,
                    actual: 0,
                })
            }
        };

        if byte_count != wanted || data.len() != wanted {
            return Err(PzemError::MalformedPayload {
                expected: wanted,
                actual: byte_count.min(data.len()),
            });
        }

        Ok(data)
    }

    /// Register and value echoed back by a single register write.
    pub fn echo(&self) -> Result<(u16, u16)> {
        match self.body {
            [r_hi, r_lo, v_hi, v_lo] => Ok((
                u16::from_be_bytes([*r_hi, *r_lo]),
                u16::from_be_bytes([*v_hi, *v_lo]),
            )),
            other => Err(PzemError::MalformedPayload {
                expected: 4,
                actual: other.len(),
            }),
        }
    }
}

/// How many bytes a complete answer to `function` is, judging by what has
/// been received so far. `count` is the number of registers requested.
pub fn expected_len(received: &[u8], function: FunctionCode, count: u16) -> usize {
    match received.get(1) {
        Some(code) if code & EXCEPTION_FLAG != 0 => EXCEPTION_LEN,
        _ => function.response_len(count),
    }
}

/// Validates `raw` as the answer of `slave` to a `function` request.
///
/// Checks run in this order: empty input, exception flag, function code,
/// length, checksum, slave address. Bytes after the end of the frame are
/// ignored.
pub fn validate(raw: &[u8], slave: u8, function: FunctionCode) -> Result<Response<'_>> {
    let code = match raw.get(1) {
        Some(&code) => code,
        None if raw.is_empty() => return Err(PzemError::Timeout),
        None => {
            return Err(PzemError::MalformedPayload {
                expected: MIN_RESPONSE_LEN,
                actual: raw.len(),
            })
        }
    };

    if code & EXCEPTION_FLAG != 0 {
        return Err(PzemError::ExceptionResponse {
            function: code & !EXCEPTION_FLAG,
            code: raw.get(2).copied(),
        });
    }

    if code != function.code() {
        return Err(PzemError::UnexpectedFunction {
            expected: function.code(),
            actual: code,
        });
    }

    let frame_len = match function {
        FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
            // byte count plus header and checksum
            raw.get(2).map_or(5, |&n| 5 + usize::from(n))
        }
        FunctionCode::WriteSingleRegister | FunctionCode::ResetEnergy => function.response_len(0),
    };
    if raw.len() < frame_len {
        return Err(PzemError::MalformedPayload {
            expected: frame_len,
            actual: raw.len(),
        });
    }
    let frame = &raw[..frame_len];

    if !crc::verify(frame) {
        let (prefix, trailer) = frame.split_at(frame_len - 2);
        return Err(PzemError::ChecksumMismatch {
            expected: crc::crc16(prefix),
            actual: u16::from_le_bytes([trailer[0], trailer[1]]),
        });
    }

    if slave != GENERAL_ADDRESS && frame[0] != slave {
        return Err(PzemError::UnexpectedSlave {
            expected: slave,
            actual: frame[0],
        });
    }

    Ok(Response {
        slave: frame[0],
        function,
        body: &frame[2..frame_len - 2],
    })
}
