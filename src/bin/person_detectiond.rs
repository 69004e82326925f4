//! person_detectiond - person-detection device service daemon
//!
//! This daemon:
//! 1. Creates the shared alert buffer (once, before anything can reach it)
//! 2. Serves the camera ingestion endpoint
//! 3. Polls the "Alert" resource on a fixed interval, standing in for the
//!    device-management framework, and logs the readings
//! 4. Stops cleanly on Ctrl-C

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;

use person_detection::{
    config::{ServiceConfig, CONFIG_ENV},
    AlertBuffer, CommandRequest, CommandValue, IngestServer, PersonDetectionDriver, PollBridge,
    ProtocolDriver, ALERT_RESOURCE,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Person-detection device service")]
struct Args {
    /// JSON config file. Environment variables override its values.
    #[arg(long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Run a single poll cycle after startup, then exit.
    #[arg(long)]
    once: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = ServiceConfig::load_from(args.config.as_deref())?;

    let buffer = Arc::new(AlertBuffer::new());
    let mut driver = PersonDetectionDriver::new(PollBridge::new(buffer.clone()));
    driver.initialize()?;
    driver.add_device(&cfg.device_name)?;

    let ingest_handle = IngestServer::new(cfg.ingest.clone(), buffer).spawn()?;
    log::info!(
        "{} {} listening on {}{}",
        cfg.service_name,
        env!("CARGO_PKG_VERSION"),
        ingest_handle.addr,
        cfg.ingest.path
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    let reqs = [CommandRequest::new(ALERT_RESOURCE)];
    loop {
        if !args.once {
            match rx.recv_timeout(cfg.poll_interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    log::info!("shutdown signal received, stopping service...");
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        }

        match driver.handle_read_commands(&cfg.device_name, &reqs) {
            Ok(values) => log_readings(&cfg.device_name, &values),
            Err(err) => log::error!("poll of {} failed: {}", cfg.device_name, err),
        }

        if args.once {
            break;
        }
    }

    driver.remove_device(&cfg.device_name)?;
    driver.stop(false)?;
    ingest_handle.stop()?;
    Ok(())
}

fn log_readings(device_name: &str, values: &[Option<CommandValue>]) {
    for value in values.iter().flatten() {
        match value {
            CommandValue::Int64Array { values, .. } if values.is_empty() => {
                log::debug!("{}: no new alerts", device_name);
            }
            CommandValue::Int64Array {
                resource, values, ..
            } => {
                log::info!(
                    "{}: {} {} alert(s) {:?}",
                    device_name,
                    resource,
                    values.len(),
                    values
                );
            }
        }
    }
}
