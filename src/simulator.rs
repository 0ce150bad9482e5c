//! HTTP client for the network-simulator collaborator.
//!
//! The core uses exactly one capability: fetching a device's running
//! configuration by device *name*. Names are resolved to device ids via
//! the simulator's device listing, case-insensitively; a failed lookup
//! reports the available names so the model can correct itself.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::TutorError;

/// Device-state seam. The production implementation is
/// [`SimulatorClient`]; tests substitute canned backends.
#[async_trait]
pub trait DeviceBackend: Send + Sync {
    /// Full running configuration of the named device.
    async fn running_config(&self, device_name: &str) -> Result<String, TutorError>;
}

#[derive(Debug, Deserialize)]
struct DeviceRecord {
    device_id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RunningConfigResponse {
    config: String,
}

/// Client for the simulator's JSON API.
pub struct SimulatorClient {
    client: reqwest::Client,
    base_url: String,
}

impl SimulatorClient {
    pub fn new(config: &Config) -> Result<Self, TutorError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.simulator_timeout_s))
            .build()
            .map_err(TutorError::Http)?;

        Ok(Self {
            client,
            base_url: config.simulator_base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn list_devices(&self) -> Result<Vec<DeviceRecord>, TutorError> {
        let url = format!("{}/devices", self.base_url);
        let response = self.client.get(&url).send().await.map_err(map_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TutorError::Simulator(format!(
                "device listing returned {status}"
            )));
        }

        response.json().await.map_err(map_transport)
    }
}

#[async_trait]
impl DeviceBackend for SimulatorClient {
    async fn running_config(&self, device_name: &str) -> Result<String, TutorError> {
        debug!(device_name, "resolving device id");
        let devices = self.list_devices().await?;

        let target = devices.iter().find(|d| {
            d.name
                .as_deref()
                .map(|n| n.eq_ignore_ascii_case(device_name))
                .unwrap_or(false)
        });

        let Some(target) = target else {
            let available: Vec<&str> = devices
                .iter()
                .map(|d| d.name.as_deref().unwrap_or("?"))
                .collect();
            return Err(TutorError::ToolFailure(format!(
                "device '{device_name}' not found; available devices: {}",
                available.join(", ")
            )));
        };

        let url = format!("{}/devices/{}/running-config", self.base_url, target.device_id);
        let response = self.client.get(&url).send().await.map_err(map_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TutorError::Simulator(format!(
                "running-config fetch returned {status}"
            )));
        }

        let body: RunningConfigResponse = response.json().await.map_err(map_transport)?;
        if body.config.is_empty() {
            return Err(TutorError::ToolFailure(format!(
                "no configuration returned for device '{device_name}'"
            )));
        }

        info!(
            device_name,
            bytes = body.config.len(),
            "running-config retrieved"
        );
        Ok(body.config)
    }
}

fn map_transport(e: reqwest::Error) -> TutorError {
    if e.is_timeout() {
        TutorError::ToolTimeout("simulator did not respond in time".to_string())
    } else {
        TutorError::Simulator(e.to_string())
    }
}
