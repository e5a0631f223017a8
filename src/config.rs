use crate::session::{DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(default)]
pub struct Config {
    pub serial: SerialConfig,
    pub logger: LoggerConfig,
    pub logging: Option<Logging>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    #[serde(alias = "baud")]
    pub baud_rate: u32,
    #[serde(alias = "address")]
    pub slave_address: u8,
    pub timeout_ms: u64,
}

impl SerialConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            slave_address: 0x01,
            timeout_ms: DEFAULT_READ_TIMEOUT.as_millis() as u64,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct LoggerConfig {
    pub output: PathBuf,
    #[serde(alias = "interval")]
    pub interval_secs: f64,
    pub append: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("pzem_log.csv"),
            interval_secs: 1.0,
            append: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Logging {
    pub level: Option<String>,
    pub directory: Option<String>,
}

pub async fn load_from_yaml(path: &str) -> anyhow::Result<Config> {
    let yaml = fs::read_to_string(path).await?;
    let config = serde_yaml::from_str(&yaml)?;
    Ok(config)
}
