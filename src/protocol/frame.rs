//! Request frames: `[slave][function][body][crc lo][crc hi]`, body fields big-endian.

use super::crc;
use super::FunctionCode;
use crate::error::{PzemError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use std::ops::Deref;

/// A complete request, checksum included. Cannot be modified once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    function: FunctionCode,
    bytes: Bytes,
}

impl Frame {
    pub fn function(&self) -> FunctionCode {
        self.function
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Deref for Frame {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.bytes))
    }
}

/// Builds a request from a raw function code byte.
///
/// For the read functions `value` is the register count (one register when
/// omitted), for a register write it is the value to store and is mandatory.
/// The energy reset ignores both `register` and `value`.
pub fn build(slave: u8, function: u8, register: u16, value: Option<u16>) -> Result<Frame> {
    let function = FunctionCode::try_from(function)?;
    build_request(slave, function, register, value)
}

pub fn build_request(
    slave: u8,
    function: FunctionCode,
    register: u16,
    value: Option<u16>,
) -> Result<Frame> {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u8(slave);
    buf.put_u8(function.code());

    match function {
        FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
            buf.put_u16(register);
            buf.put_u16(value.unwrap_or(1));
        }
        FunctionCode::WriteSingleRegister => {
            let value = value.ok_or(PzemError::MissingPayload(function))?;
            buf.put_u16(register);
            buf.put_u16(value);
        }
        FunctionCode::ResetEnergy => {}
    }

    let checksum = crc::checksum(&buf);
    buf.put_slice(&checksum);

    Ok(Frame {
        function,
        bytes: buf.freeze(),
    })
}

pub fn read_input_registers(slave: u8, start: u16, count: u16) -> Result<Frame> {
    build_request(slave, FunctionCode::ReadInputRegisters, start, Some(count))
}

pub fn write_single_register(slave: u8, register: u16, value: u16) -> Result<Frame> {
    build_request(slave, FunctionCode::WriteSingleRegister, register, Some(value))
}

pub fn reset_energy(slave: u8) -> Result<Frame> {
    build_request(slave, FunctionCode::ResetEnergy, 0, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_request_layout() {
        let frame = read_input_registers(0x01, 0x0000, 10).unwrap();
        assert_eq!(
            frame.as_bytes(),
            &[0x01, 0x04, 0x00, 0x00, 0x00, 0x0A, 0x70, 0x0D]
        );
        assert_eq!(frame.function(), FunctionCode::ReadInputRegisters);
    }

    #[test]
    fn frames_display_as_packed_hex() {
        let frame = read_input_registers(0x01, 0x0000, 10).unwrap();
        assert_eq!(frame.to_string(), "01040000000a700d");
    }

    #[test]
    fn read_request_defaults_to_one_register() {
        let frame = build(0x01, 0x03, 0x0000, None).unwrap();
        assert_eq!(
            frame.as_bytes(),
            &[0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x84, 0x0A]
        );
    }

    #[test]
    fn write_request_layout() {
        let frame = write_single_register(0x01, 0x0001, 2300).unwrap();
        assert_eq!(
            frame.as_bytes(),
            &[0x01, 0x06, 0x00, 0x01, 0x08, 0xFC, 0xDF, 0x8B]
        );
    }

    #[test]
    fn reset_request_has_empty_body() {
        let frame = reset_energy(0x01).unwrap();
        assert_eq!(frame.as_bytes(), &[0x01, 0x42, 0x80, 0x11]);
    }

    #[test]
    fn write_without_value_is_rejected() {
        let err = build(0x01, 0x06, 0x0001, None).unwrap_err();
        assert!(matches!(
            err,
            PzemError::MissingPayload(FunctionCode::WriteSingleRegister)
        ));
    }

    #[test]
    fn unsupported_function_is_rejected() {
        let err = build(0x01, 0x10, 0x0000, Some(1)).unwrap_err();
        assert!(matches!(err, PzemError::UnsupportedFunction(0x10)));
    }

    #[test]
    fn every_frame_ends_with_the_checksum_of_its_prefix() {
        let frames = [
            read_input_registers(0xF8, 0x0000, 10).unwrap(),
            build(0x07, 0x03, 0x0001, Some(2)).unwrap(),
            write_single_register(0x22, 0x0002, 0x0005).unwrap(),
            reset_energy(0xAB).unwrap(),
        ];
        for frame in frames {
            assert!(crc::verify(&frame), "bad checksum in {frame}");
        }
    }
}
