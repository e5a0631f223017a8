//! Client for the PZEM-004T energy meter.
//!
//! The meter speaks a Modbus-RTU dialect over a serial line. [`protocol`]
//! builds request frames and validates responses, [`measurement`] turns the
//! register block into physical units and [`session::DeviceSession`] ties
//! both to a byte stream. [`logger`] polls a session and records samples.

pub mod config;
pub mod error;
pub mod logger;
pub mod measurement;
pub mod protocol;
pub mod session;
pub mod utils;

pub use error::{PzemError, Result};
pub use measurement::Measurement;
pub use session::DeviceSession;
