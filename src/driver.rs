//! Device-service driver seam.
//!
//! The device-management framework talks to this service through
//! `ProtocolDriver`: lifecycle callbacks plus read/write command batches. Only
//! the `"Alert"` resource carries data; it is served by one poll cycle of the
//! `PollBridge`.

use crate::poll::{PollBridge, TimestampParseError};

/// Device resource that reports buffered detection alerts.
pub const ALERT_RESOURCE: &str = "Alert";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandRequest {
    pub device_resource_name: String,
}

impl CommandRequest {
    pub fn new(device_resource_name: impl Into<String>) -> Self {
        Self {
            device_resource_name: device_resource_name.into(),
        }
    }
}

/// A reading returned to the framework.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandValue {
    Int64Array {
        resource: String,
        origin: i64,
        values: Vec<i64>,
    },
}

impl CommandValue {
    pub fn int64_array(resource: impl Into<String>, origin: i64, values: Vec<i64>) -> Self {
        CommandValue::Int64Array {
            resource: resource.into(),
            origin,
            values,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    TimestampParse(#[from] TimestampParseError),
}

/// Callbacks a device service implements for the management framework.
pub trait ProtocolDriver {
    fn initialize(&mut self) -> Result<(), DriverError>;

    /// One slot per request; `None` for resources this driver does not serve.
    fn handle_read_commands(
        &mut self,
        device_name: &str,
        reqs: &[CommandRequest],
    ) -> Result<Vec<Option<CommandValue>>, DriverError>;

    fn handle_write_commands(
        &mut self,
        device_name: &str,
        reqs: &[CommandRequest],
        params: &[CommandValue],
    ) -> Result<(), DriverError>;

    fn stop(&mut self, force: bool) -> Result<(), DriverError>;

    fn add_device(&mut self, device_name: &str) -> Result<(), DriverError>;

    fn update_device(&mut self, device_name: &str) -> Result<(), DriverError>;

    fn remove_device(&mut self, device_name: &str) -> Result<(), DriverError>;

    /// Devices are configured statically; there is nothing to discover.
    fn discover(&mut self) {}
}

pub struct PersonDetectionDriver {
    bridge: PollBridge,
}

impl PersonDetectionDriver {
    pub fn new(bridge: PollBridge) -> Self {
        Self { bridge }
    }

    pub fn bridge(&self) -> &PollBridge {
        &self.bridge
    }
}

impl ProtocolDriver for PersonDetectionDriver {
    fn initialize(&mut self) -> Result<(), DriverError> {
        log::debug!("person detection driver initialized");
        Ok(())
    }

    fn handle_read_commands(
        &mut self,
        device_name: &str,
        reqs: &[CommandRequest],
    ) -> Result<Vec<Option<CommandValue>>, DriverError> {
        let mut res = Vec::with_capacity(reqs.len());
        for req in reqs {
            match req.device_resource_name.as_str() {
                ALERT_RESOURCE => {
                    let values = self.bridge.poll()?;
                    log::debug!(
                        "device {} read {}: {} alert(s)",
                        device_name,
                        ALERT_RESOURCE,
                        values.len()
                    );
                    res.push(Some(CommandValue::int64_array(ALERT_RESOURCE, 0, values)));
                }
                other => {
                    log::debug!("device {} has no readable resource {}", device_name, other);
                    res.push(None);
                }
            }
        }
        Ok(res)
    }

    fn handle_write_commands(
        &mut self,
        device_name: &str,
        reqs: &[CommandRequest],
        _params: &[CommandValue],
    ) -> Result<(), DriverError> {
        log::debug!(
            "ignoring {} write command(s) for device {}",
            reqs.len(),
            device_name
        );
        Ok(())
    }

    fn stop(&mut self, force: bool) -> Result<(), DriverError> {
        log::debug!("driver stop called: force={}", force);
        Ok(())
    }

    fn add_device(&mut self, device_name: &str) -> Result<(), DriverError> {
        log::debug!("a new device is added: {}", device_name);
        Ok(())
    }

    fn update_device(&mut self, device_name: &str) -> Result<(), DriverError> {
        log::debug!("device {} is updated", device_name);
        Ok(())
    }

    fn remove_device(&mut self, device_name: &str) -> Result<(), DriverError> {
        log::debug!("device {} is removed", device_name);
        Ok(())
    }
}
