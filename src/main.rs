use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use clap::parser::ValueSource;
use clap::{
    arg, crate_authors, crate_description, crate_name, crate_version, value_parser, ArgMatches,
    Command,
};
use tokio::signal;
use tokio::signal::unix::SignalKind;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_panic::panic_hook;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use tracing_unwrap::ResultExt;

use pzem_logger::config::{self, Config};

mod commands;

#[tokio::main]
async fn main() -> Result<()> {
    // First thing: load the arguments and configuration file.
    let args = get_cli_conf().get_matches();

    let config = load_config(&args).await?;

    // Set up logging
    let _logger_guard = init_logging(&config)?;

    info!("{} version {} started.", crate_name!(), crate_version!());

    match args.subcommand() {
        Some(("read", sub)) => commands::run_read(sub, &config.serial).await,
        Some(("reset", _)) => commands::run_reset(&config.serial).await,
        Some(("write", sub)) => commands::run_write(sub, &config.serial).await,
        Some(("log", sub)) => {
            let cancel = CancellationToken::new();
            let token = cancel.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                info!("Received shutdown signal. Stopping.");
                token.cancel();
            });

            commands::run_log(sub, &config, cancel).await
        }
        Some(("decode", sub)) => commands::run_decode(sub, &config.serial),
        other => Err(anyhow!("Unsupported subcommand {:?}", other.map(|(name, _)| name))),
    }
}

/// Reads the configuration file and applies the serial overrides given on
/// the command line. A missing file is only an error if it was asked for.
async fn load_config(args: &ArgMatches) -> Result<Config> {
    let config_path: &String = args
        .get_one("config_path")
        .context("Missing configuration path")?;
    let required = args.value_source("config_path") != Some(ValueSource::DefaultValue);

    let mut config = read_config(config_path, required).await?;

    if let Some(port) = args.get_one::<String>("port") {
        config.serial.port = port.clone();
    }
    if let Some(baud) = args.get_one::<u32>("baud") {
        config.serial.baud_rate = *baud;
    }
    if let Some(address) = args.get_one::<u8>("address") {
        config.serial.slave_address = *address;
    }

    Ok(config)
}

async fn read_config(path: &str, required: bool) -> Result<Config> {
    match config::load_from_yaml(path).await {
        Ok(config) => Ok(config),
        Err(e) if !required && is_not_found(&e) => Ok(Config::default()),
        Err(e) => Err(e.context(format!(
            "Failed to load the configuration file from {}",
            path
        ))),
    }
}

fn is_not_found(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<io::Error>()
        .is_some_and(|e| e.kind() == io::ErrorKind::NotFound)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect_or_log("Failed to listen for Ctrl+C");
    };

    let sigterm = async {
        signal::unix::signal(SignalKind::terminate())
            .expect_or_log("Failed to listen for SIGTERM")
            .recv()
            .await;
    };

    tokio::pin!(ctrl_c, sigterm);
    // Wait for a termination condition
    futures::future::select(ctrl_c, sigterm).await;
}

fn init_logging(config: &Config) -> Result<Option<WorkerGuard>> {
    let options = config.logging.as_ref();

    let level = options
        .and_then(|logging| logging.level.clone())
        .unwrap_or("warn".to_string());
    let base_logging =
        LevelFilter::from_str(&level).context(format!("Invalid log level '{}'", level))?;

    let console_logging_filter = EnvFilter::builder()
        .with_default_directive(base_logging.into())
        .with_env_var("LOG_LEVEL")
        .from_env_lossy();

    // stdout is reserved for readings
    let console = fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = match options.and_then(|l| l.directory.clone()) {
        Some(directory) => {
            let file_appender = tracing_appender::rolling::RollingFileAppender::builder()
                .rotation(tracing_appender::rolling::Rotation::HOURLY)
                .filename_prefix(crate_name!())
                .filename_suffix("log")
                .build(directory)
                .context("Initializing rolling file appender failed")?;

            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(non_blocking)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(console_logging_filter)
        .with(file_layer)
        .init();

    // Hook to log also panics with tracing
    std::panic::set_hook(Box::new(panic_hook));

    Ok(guard)
}

fn parse_number<T>(value: &str) -> Result<T, String>
where
    T: TryFrom<u32>,
{
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse::<u32>(),
    }
    .map_err(|e| format!("'{}' is not a number: {}", value, e))?;

    T::try_from(parsed).map_err(|_| format!("{} is out of range", value))
}

fn get_cli_conf() -> Command {
    Command::new(crate_name!())
        .version(crate_version!())
        .author(crate_authors!("\n"))
        .about(crate_description!())
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            arg!(config_path: -c --config_path <PATH> "Path to configuration file")
                .help("Path to the YAML config file; defaults apply when the default file is absent")
                .default_value("./config.yaml"),
        )
        .arg(arg!(port: -p --port <PORT> "Serial port of the meter (e.g. /dev/ttyUSB0 or COM3)"))
        .arg(arg!(baud: -b --baud <BAUD> "Serial baud rate").value_parser(value_parser!(u32)))
        .arg(
            arg!(address: --address <ADDRESS> "Modbus address of the meter, 0xF8 for any")
                .value_parser(parse_number::<u8>),
        )
        .subcommand(
            Command::new("read")
                .about("Prints the current readings of the meter")
                .arg(arg!(json: --json "Print the readings as JSON")),
        )
        .subcommand(Command::new("reset").about("Resets the energy counter of the meter"))
        .subcommand(
            Command::new("write")
                .about("Writes a single holding register (0x0001 alarm threshold, 0x0002 address)")
                .arg(arg!(register: <REGISTER> "Register address").value_parser(parse_number::<u16>))
                .arg(arg!(value: <VALUE> "Value to write").value_parser(parse_number::<u16>)),
        )
        .subcommand(
            Command::new("log")
                .about("Polls the meter and appends the samples to a CSV file")
                .arg(
                    arg!(output: -o --output <FILE> "Output CSV file path")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    arg!(interval: -i --interval <SECONDS> "Polling interval in seconds (e.g. 1.0)")
                        .value_parser(value_parser!(f64)),
                )
                .arg(
                    arg!(count: -n --count <COUNT> "Stop after this many samples")
                        .value_parser(value_parser!(u64)),
                )
                .arg(arg!(append: -a --append "Append to the log file"))
                .arg(arg!(verbose: -v --verbose "Echo every sample to stdout")),
        )
        .subcommand(
            Command::new("decode")
                .about("Decodes a captured measurement response given as hex")
                .arg(arg!(hex: <HEX> "Response bytes, e.g. \"01 04 14 08 fc ...\""))
                .arg(arg!(json: --json "Print the readings as JSON")),
        )
}
