use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::api::{IngestConfig, DEFAULT_INGEST_ADDR, DEFAULT_INGEST_PATH};

pub const CONFIG_ENV: &str = "PERSON_DETECTION_CONFIG";

const DEFAULT_SERVICE_NAME: &str = "device-person-detection";
const DEFAULT_DEVICE_NAME: &str = "person-detection-camera";
const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Deserialize, Default)]
struct ServiceConfigFile {
    service_name: Option<String>,
    device_name: Option<String>,
    ingest: Option<IngestConfigFile>,
    poll: Option<PollConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct IngestConfigFile {
    addr: Option<String>,
    path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct PollConfigFile {
    interval_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub service_name: String,
    pub device_name: String,
    pub ingest: IngestConfig,
    pub poll_interval: Duration,
}

impl ServiceConfig {
    /// Load from the file named by `PERSON_DETECTION_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => ServiceConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServiceConfigFile) -> Self {
        let ingest = file.ingest.unwrap_or_default();
        Self {
            service_name: file
                .service_name
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            device_name: file
                .device_name
                .unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string()),
            ingest: IngestConfig {
                addr: ingest
                    .addr
                    .unwrap_or_else(|| DEFAULT_INGEST_ADDR.to_string()),
                path: ingest
                    .path
                    .unwrap_or_else(|| DEFAULT_INGEST_PATH.to_string()),
            },
            poll_interval: Duration::from_millis(
                file.poll
                    .and_then(|poll| poll.interval_ms)
                    .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("PERSON_DETECTION_INGEST_ADDR") {
            if !addr.trim().is_empty() {
                self.ingest.addr = addr;
            }
        }
        if let Ok(path) = std::env::var("PERSON_DETECTION_INGEST_PATH") {
            if !path.trim().is_empty() {
                self.ingest.path = path;
            }
        }
        if let Ok(device) = std::env::var("PERSON_DETECTION_DEVICE_NAME") {
            if !device.trim().is_empty() {
                self.device_name = device;
            }
        }
        if let Ok(interval) = std::env::var("PERSON_DETECTION_POLL_INTERVAL_MS") {
            let millis: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("PERSON_DETECTION_POLL_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.poll_interval = Duration::from_millis(millis);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.ingest
            .addr
            .parse::<SocketAddr>()
            .map_err(|e| anyhow!("invalid ingest address '{}': {}", self.ingest.addr, e))?;
        if !self.ingest.path.starts_with('/') {
            return Err(anyhow!(
                "ingest path must start with '/', got '{}'",
                self.ingest.path
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll interval must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ServiceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
