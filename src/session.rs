use crate::error::{PzemError, Result};
use crate::measurement::Measurement;
use crate::protocol::frame::{self, Frame};
use crate::protocol::response::{self, Response};
use crate::protocol::{
    FunctionCode, MAX_RESPONSE_LEN, MEASUREMENT_REGISTERS, MEASUREMENT_START,
    POWER_ALARM_THRESHOLD_REGISTER, SLAVE_ADDRESS_REGISTER,
};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{self, Instant};
use tokio_serial::{
    ClearBuffer, DataBits, Parity, SerialPort, SerialPortBuilderExt, SerialStream, StopBits,
};
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Time the meter's serial interface needs after the port is opened.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);
/// Pause between sending a request and starting to read the answer.
pub const RESPONSE_DELAY: Duration = Duration::from_millis(1);
/// Silence on the line after which leftovers of an unfinished exchange are
/// considered gone.
pub const DRAIN_WINDOW: Duration = Duration::from_millis(100);

/// Connection to a single meter.
///
/// Every operation writes one request and waits for its answer before
/// returning, and takes `&mut self`, so exchanges can never interleave.
/// Failures are returned as they happen; nothing is retried.
pub struct DeviceSession<T> {
    transport: Option<T>,
    slave: u8,
    timeout: Duration,
    /// The last exchange ended before its answer was complete, so the rest of
    /// it may still arrive.
    stale_input: bool,
}

impl DeviceSession<SerialStream> {
    /// Opens `port` at 8N1 and waits for the device to settle.
    #[instrument]
    pub async fn open(port: &str, baud_rate: u32, slave: u8, timeout: Duration) -> Result<Self> {
        let stream = tokio_serial::new(port, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(timeout)
            .open_native_async()?;

        info!("Opened {} at {} baud, waiting for the device", port, baud_rate);
        time::sleep(SETTLE_DELAY).await;
        stream.clear(ClearBuffer::Input)?;

        Ok(Self::new(stream, slave).with_timeout(timeout))
    }
}

impl<T> DeviceSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(transport: T, slave: u8) -> Self {
        Self {
            transport: Some(transport),
            slave,
            timeout: DEFAULT_READ_TIMEOUT,
            stale_input: false,
        }
    }

    /// Sets how long to wait for a complete response.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn slave(&self) -> u8 {
        self.slave
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    #[instrument(skip(self), fields(slave = self.slave))]
    pub async fn read_measurements(&mut self) -> Result<Measurement> {
        let request =
            frame::read_input_registers(self.slave, MEASUREMENT_START, MEASUREMENT_REGISTERS)?;
        let raw = self.exchange(&request, MEASUREMENT_REGISTERS).await?;
        let response = response::validate(&raw, self.slave, FunctionCode::ReadInputRegisters)?;
        Measurement::decode(response.register_data(MEASUREMENT_REGISTERS)?)
    }

    /// Reads `count` input registers starting at `start`.
    #[instrument(skip(self), fields(slave = self.slave))]
    pub async fn read_input_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        let request = frame::read_input_registers(self.slave, start, count)?;
        let raw = self.exchange(&request, count).await?;
        let response = response::validate(&raw, self.slave, FunctionCode::ReadInputRegisters)?;
        let data = response.register_data(count)?;

        Ok(data
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect())
    }

    /// Writes a holding register and checks the device echoed it back.
    #[instrument(skip(self), fields(slave = self.slave))]
    pub async fn write_register(&mut self, register: u16, value: u16) -> Result<()> {
        let request = frame::write_single_register(self.slave, register, value)?;
        let raw = self.exchange(&request, 0).await?;

        let response = match response::validate(&raw, self.slave, FunctionCode::WriteSingleRegister)
        {
            Err(PzemError::ExceptionResponse { code, .. }) => {
                return Err(PzemError::WriteFailed { register, code })
            }
            other => other?,
        };

        let echoed = response.echo()?;
        if echoed != (register, value) {
            return Err(PzemError::EchoMismatch {
                sent: (register, value),
                echoed,
            });
        }

        info!("Register 0x{:04x} set to {}", register, value);
        Ok(())
    }

    /// Sets the power alarm threshold in watts.
    pub async fn set_power_alarm_threshold(&mut self, watts: u16) -> Result<()> {
        self.write_register(POWER_ALARM_THRESHOLD_REGISTER, watts).await
    }

    /// Moves the device to another bus address (1 to 247) and keeps talking
    /// to it there.
    pub async fn set_slave_address(&mut self, address: u8) -> Result<()> {
        if !(1..=247).contains(&address) {
            return Err(PzemError::InvalidAddress(address));
        }
        self.write_register(SLAVE_ADDRESS_REGISTER, address.into()).await?;
        self.slave = address;
        Ok(())
    }

    #[instrument(skip(self), fields(slave = self.slave))]
    pub async fn reset_energy(&mut self) -> Result<()> {
        let request = frame::reset_energy(self.slave)?;
        let raw = self.exchange(&request, 0).await?;

        let _: Response = match response::validate(&raw, self.slave, FunctionCode::ResetEnergy) {
            Err(PzemError::ExceptionResponse { code, .. }) => {
                return Err(PzemError::ResetFailed { code })
            }
            other => other?,
        };

        info!("Energy counter reset");
        Ok(())
    }

    /// Releases the transport. Later operations fail with
    /// [`PzemError::SessionClosed`]; closing again does nothing.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown().await?;
            info!(slave = self.slave, "Session closed");
        }
        Ok(())
    }

    /// Sends `request` and collects its answer.
    ///
    /// Reading stops once a complete response has arrived or when the
    /// timeout expires; whatever was received by then is returned, possibly
    /// nothing.
    async fn exchange(&mut self, request: &Frame, count: u16) -> Result<Vec<u8>> {
        let transport = self.transport.as_mut().ok_or(PzemError::SessionClosed)?;

        if self.stale_input {
            let discarded = discard_pending(transport, self.timeout).await?;
            if discarded > 0 {
                warn!("Discarded {} late bytes of a previous response", discarded);
            }
            self.stale_input = false;
        }

        debug!(request = %request, "Sending {} request", request.function());
        transport.write_all(request).await?;
        transport.flush().await?;

        time::sleep(RESPONSE_DELAY).await;

        let deadline = Instant::now() + self.timeout;
        let mut received = Vec::with_capacity(MAX_RESPONSE_LEN);
        let mut buf = [0u8; MAX_RESPONSE_LEN];

        while received.len()
            < response::expected_len(&received, request.function(), count).min(MAX_RESPONSE_LEN)
        {
            let room = MAX_RESPONSE_LEN - received.len();
            let n = match time::timeout_at(deadline, transport.read(&mut buf[..room])).await {
                Ok(read) => read?,
                Err(_) => {
                    warn!(
                        "Timed out after {:?} with {} bytes received",
                        self.timeout,
                        received.len()
                    );
                    break;
                }
            };

            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }

        self.stale_input = received.len()
            < response::expected_len(&received, request.function(), count).min(MAX_RESPONSE_LEN);

        debug!(
            response = %hex::encode(&received),
            "Received {} bytes",
            received.len()
        );
        Ok(received)
    }
}

/// Reads and drops input until the line has been quiet for [`DRAIN_WINDOW`],
/// giving up after `limit`. Returns how many bytes were thrown away.
async fn discard_pending<T>(transport: &mut T, limit: Duration) -> Result<usize>
where
    T: AsyncRead + Unpin,
{
    let deadline = Instant::now() + limit;
    let mut buf = [0u8; MAX_RESPONSE_LEN];
    let mut discarded = 0;

    loop {
        let quiet = (Instant::now() + DRAIN_WINDOW).min(deadline);
        match time::timeout_at(quiet, transport.read(&mut buf)).await {
            Ok(Ok(0)) | Err(_) => return Ok(discarded),
            Ok(Ok(n)) => discarded += n,
            Ok(Err(e)) => return Err(e.into()),
        }
    }
}
