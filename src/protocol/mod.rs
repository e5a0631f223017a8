use crate::error::PzemError;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod crc;
pub mod frame;
pub mod response;

/// Address every PZEM-004T answers to regardless of its configured one.
/// Only usable when a single device is on the bus.
pub const GENERAL_ADDRESS: u8 = 0xF8;

/// First input register of the measurement block.
pub const MEASUREMENT_START: u16 = 0x0000;
/// Number of input registers holding one full measurement.
pub const MEASUREMENT_REGISTERS: u16 = 10;

/// Holding register with the power alarm threshold, 1 LSB = 1 W.
pub const POWER_ALARM_THRESHOLD_REGISTER: u16 = 0x0001;
/// Holding register with the Modbus-RTU address of the device.
pub const SLAVE_ADDRESS_REGISTER: u16 = 0x0002;

/// Largest response the device ever sends; reads never ask for more.
pub const MAX_RESPONSE_LEN: usize = 256;

/// Set on the function code byte of exception responses.
pub const EXCEPTION_FLAG: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionCode {
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleRegister,
    ResetEnergy,
}

impl FunctionCode {
    pub fn code(self) -> u8 {
        match self {
            FunctionCode::ReadHoldingRegisters => 0x03,
            FunctionCode::ReadInputRegisters => 0x04,
            FunctionCode::WriteSingleRegister => 0x06,
            FunctionCode::ResetEnergy => 0x42,
        }
    }

    /// Length of a complete, non-exception response to a request with this
    /// function code. `count` is only meaningful for the read variants.
    pub fn response_len(self, count: u16) -> usize {
        match self {
            FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
                5 + 2 * usize::from(count)
            }
            FunctionCode::WriteSingleRegister => 8,
            FunctionCode::ResetEnergy => 4,
        }
    }
}

impl TryFrom<u8> for FunctionCode {
    type Error = PzemError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0x03 => Ok(FunctionCode::ReadHoldingRegisters),
            0x04 => Ok(FunctionCode::ReadInputRegisters),
            0x06 => Ok(FunctionCode::WriteSingleRegister),
            0x42 => Ok(FunctionCode::ResetEnergy),
            v => Err(PzemError::UnsupportedFunction(v)),
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FunctionCode::ReadHoldingRegisters => write!(f, "ReadHoldingRegisters"),
            FunctionCode::ReadInputRegisters => write!(f, "ReadInputRegisters"),
            FunctionCode::WriteSingleRegister => write!(f, "WriteSingleRegister"),
            FunctionCode::ResetEnergy => write!(f, "ResetEnergy"),
        }
    }
}

/// Human readable name of a Modbus exception code.
pub fn exception_name(code: u8) -> &'static str {
    match code {
        0x01 => "illegal function",
        0x02 => "illegal data address",
        0x03 => "illegal data value",
        0x04 => "slave device failure",
        _ => "unknown exception",
    }
}
