use anyhow::{anyhow, Context};
use clap::ArgMatches;
use pzem_logger::config::{Config, SerialConfig};
use pzem_logger::logger::{CsvSink, Logger, LoggerOptions};
use pzem_logger::protocol::response;
use pzem_logger::protocol::{FunctionCode, MEASUREMENT_REGISTERS};
use pzem_logger::utils::hex_to_bytes;
use pzem_logger::{DeviceSession, Measurement};
use std::path::PathBuf;
use std::time::Duration;
use tokio_serial::SerialStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

async fn open_session(serial: &SerialConfig) -> anyhow::Result<DeviceSession<SerialStream>> {
    DeviceSession::open(
        &serial.port,
        serial.baud_rate,
        serial.slave_address,
        serial.timeout(),
    )
    .await
    .context(format!("Could not open serial port {}", serial.port))
}

fn print_measurement(measurement: &Measurement, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(measurement)?);
    } else {
        println!("PZEM-004T Readings:");
        println!("{}", measurement);
    }
    Ok(())
}

///
/// One-shot reading of the meter, printed to stdout.
///
pub(crate) async fn run_read(args: &ArgMatches, serial: &SerialConfig) -> anyhow::Result<()> {
    let mut session = open_session(serial).await?;

    let result = session.read_measurements().await;
    session.close().await?;
    let measurement = result.context("Failed to read measurements")?;

    print_measurement(&measurement, args.get_flag("json"))
}

pub(crate) async fn run_reset(serial: &SerialConfig) -> anyhow::Result<()> {
    let mut session = open_session(serial).await?;

    let result = session.reset_energy().await;
    session.close().await?;
    result.context("Failed to reset the energy counter")?;

    println!("Energy reset for {}", serial.port);
    Ok(())
}

pub(crate) async fn run_write(args: &ArgMatches, serial: &SerialConfig) -> anyhow::Result<()> {
    let register = *args
        .get_one::<u16>("register")
        .ok_or_else(|| anyhow!("Missing register"))?;
    let value = *args
        .get_one::<u16>("value")
        .ok_or_else(|| anyhow!("Missing value"))?;

    let mut session = open_session(serial).await?;

    let result = session.write_register(register, value).await;
    session.close().await?;
    result.context(format!("Failed to write register 0x{:04x}", register))?;

    println!("Register 0x{:04x} set to {}", register, value);
    Ok(())
}

///
/// Runs the polling loop until the sample limit is reached, a read fails or
/// `cancel` fires. Command line flags take precedence over the configuration.
///
pub(crate) async fn run_log(
    args: &ArgMatches,
    config: &Config,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let output = args
        .get_one::<PathBuf>("output")
        .cloned()
        .unwrap_or_else(|| config.logger.output.clone());
    let interval_secs = args
        .get_one::<f64>("interval")
        .copied()
        .unwrap_or(config.logger.interval_secs);
    let interval = Duration::try_from_secs_f64(interval_secs)
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or_else(|| anyhow!("Invalid polling interval: {} seconds", interval_secs))?;
    let append = args.get_flag("append") || config.logger.append;

    // The port goes first: a failing port must not truncate an existing log.
    let mut session = open_session(&config.serial).await?;
    let sink = match CsvSink::open(&output, append) {
        Ok(sink) => sink,
        Err(e) => {
            session.close().await?;
            return Err(anyhow::Error::new(e)
                .context(format!("Could not open log file {}", output.display())));
        }
    };

    info!(
        "Logging {} every {:?} to {}",
        config.serial.port,
        interval,
        output.display()
    );

    let logger = Logger::new(
        sink,
        LoggerOptions {
            interval,
            verbose: args.get_flag("verbose"),
            max_samples: args.get_one::<u64>("count").copied(),
        },
    );
    let samples = logger.run(session, cancel).await?;

    println!("Logging stopped, {} samples written to {}", samples, output.display());
    Ok(())
}

///
/// Validates and decodes a captured measurement response without touching
/// the serial port.
///
pub(crate) fn run_decode(args: &ArgMatches, serial: &SerialConfig) -> anyhow::Result<()> {
    let hex: &String = args
        .get_one("hex")
        .ok_or_else(|| anyhow!("Missing response bytes"))?;
    let measurement = decode_capture(hex, serial.slave_address)?;

    print_measurement(&measurement, args.get_flag("json"))
}

fn decode_capture(hex: &str, slave: u8) -> anyhow::Result<Measurement> {
    let raw = hex_to_bytes(hex).context("Could not parse the response")?;

    let response = response::validate(&raw, slave, FunctionCode::ReadInputRegisters)?;
    let measurement = Measurement::decode(response.register_data(MEASUREMENT_REGISTERS)?)?;
    Ok(measurement)
}
