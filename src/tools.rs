//! Typed tool dispatcher for the troubleshooting tool loop.
//!
//! Arguments are validated against the declared JSON schema before any
//! external call; every failure — validation, timeout, backend error —
//! is stringified as `tool_error: <short reason>` and returned to the
//! model, never bubbled to the user.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::simulator::DeviceBackend;
use crate::types::{ToolCall, ToolSpec};

/// Name of the single tool offered today.
pub const GET_DEVICE_RUNNING_CONFIG: &str = "get_device_running_config";

/// Executes tool calls sequentially: at most one in flight per session.
pub struct ToolExecutor {
    backend: Arc<dyn DeviceBackend>,
    timeout: std::time::Duration,
}

impl ToolExecutor {
    pub fn new(backend: Arc<dyn DeviceBackend>, timeout_s: u64) -> Self {
        Self {
            backend,
            timeout: std::time::Duration::from_secs(timeout_s),
        }
    }

    /// Tool declarations offered to the model.
    pub fn specs() -> Vec<ToolSpec> {
        vec![ToolSpec {
            name: GET_DEVICE_RUNNING_CONFIG.to_string(),
            description: "Retrieve the current running configuration for a network device. \
                          Use this when you need the actual configuration state of a device \
                          (IP addresses, routing, VLANs, passwords, interface status)."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "device_name": {
                        "type": "string",
                        "description": "The name of the device (e.g. 'R1', 'Switch1')"
                    }
                },
                "required": ["device_name"],
                "additionalProperties": false
            }),
        }]
    }

    /// Execute one tool call. The result string goes straight back to
    /// the model as a tool message.
    pub async fn execute(&self, call: &ToolCall) -> String {
        if call.name != GET_DEVICE_RUNNING_CONFIG {
            warn!(tool = %call.name, "unknown tool requested");
            return format!("tool_error: unknown tool '{}'", call.name);
        }

        let device_name = match validate_device_name(&call.arguments) {
            Ok(name) => name,
            Err(reason) => {
                warn!(tool = %call.name, %reason, "argument validation failed");
                return format!("tool_error: {reason}");
            }
        };

        info!(tool = %call.name, device = %device_name, "executing tool");

        let result = tokio::time::timeout(
            self.timeout,
            self.backend.running_config(&device_name),
        )
        .await;

        match result {
            Ok(Ok(config)) => config,
            Ok(Err(e)) => {
                warn!(tool = %call.name, error = %e, "tool call failed");
                format!("tool_error: {e}")
            }
            Err(_elapsed) => {
                warn!(tool = %call.name, "tool call timed out");
                format!(
                    "tool_error: timed out after {}s",
                    self.timeout.as_secs()
                )
            }
        }
    }
}

/// Schema check for `get_device_running_config` arguments: an object
/// whose required `device_name` is a non-empty string, with no extras.
fn validate_device_name(arguments: &serde_json::Value) -> Result<String, String> {
    let Some(obj) = arguments.as_object() else {
        return Err("arguments must be a JSON object".to_string());
    };

    for key in obj.keys() {
        if key != "device_name" {
            return Err(format!("unexpected argument '{key}'"));
        }
    }

    let Some(value) = obj.get("device_name") else {
        return Err("missing required argument 'device_name'".to_string());
    };

    let Some(name) = value.as_str() else {
        return Err("'device_name' must be a string".to_string());
    };

    if name.trim().is_empty() {
        return Err("'device_name' must not be empty".to_string());
    }

    Ok(name.to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────
