use crate::error::{PzemError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Bytes of register data making up one measurement (ten registers).
pub const PAYLOAD_LEN: usize = 20;

/// One reading of the meter, already converted to physical units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Volts, 0.1 V resolution.
    pub voltage: f64,
    /// Amperes, 0.001 A resolution.
    pub current: f64,
    /// Watts, 0.1 W resolution.
    pub power: f64,
    /// Watt-hours since the last counter reset.
    pub energy: u32,
    /// Hertz, 0.1 Hz resolution.
    pub frequency: f64,
    /// 0.01 resolution.
    pub power_factor: f64,
    /// Power alarm state.
    pub alarm: bool,
}

impl Measurement {
    /// Decodes the register data of the measurement block, exactly
    /// [`PAYLOAD_LEN`] bytes.
    ///
    /// Registers are big-endian words. The 32 bit quantities (current, power,
    /// energy) span two registers with the low word first.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let payload: &[u8; PAYLOAD_LEN] =
            payload.try_into().map_err(|_| PzemError::MalformedPayload {
                expected: PAYLOAD_LEN,
                actual: payload.len(),
            })?;

        let word = |i: usize| u16::from_be_bytes([payload[2 * i], payload[2 * i + 1]]);
        let long = |low: usize| (u32::from(word(low + 1)) << 16) | u32::from(word(low));

        Ok(Self {
            voltage: fixed_point(word(0).into(), 1),
            current: fixed_point(long(1), 3),
            power: fixed_point(long(3), 1),
            energy: long(5),
            frequency: fixed_point(word(7).into(), 1),
            power_factor: fixed_point(word(8).into(), 2),
            alarm: word(9) != 0,
        })
    }
}

/// `raw / 10^decimals`. Dividing (rather than multiplying by 0.1 and
/// rounding) lands on the double closest to the decimal value directly.
fn fixed_point(raw: u32, decimals: i32) -> f64 {
    f64::from(raw) / 10f64.powi(decimals)
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "  Voltage:        {:.1} V", self.voltage)?;
        writeln!(f, "  Current:        {:.3} A", self.current)?;
        writeln!(f, "  Power:          {:.1} W", self.power)?;
        writeln!(f, "  Energy:         {} Wh", self.energy)?;
        writeln!(f, "  Frequency:      {:.1} Hz", self.frequency)?;
        writeln!(f, "  Power Factor:   {:.2}", self.power_factor)?;
        write!(
            f,
            "  Alarm Active:   {}",
            if self.alarm { "YES" } else { "Nope" }
        )
    }
}
