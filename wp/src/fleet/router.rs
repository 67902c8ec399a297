//! Request router
//!
//! Forwards a single tool call to a ready worker. No retries happen here.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::error::FleetError;
use super::transport::WorkerTransport;

/// Address of a worker that passed the readiness check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub worker: String,
    pub base_url: String,
}

/// POST `{tool, parameters}` to the worker's `/call-tool` endpoint
///
/// Returns the worker's JSON body unchanged on HTTP 200.
pub async fn route(
    transport: &dyn WorkerTransport,
    target: &Route,
    tool: &str,
    params: Value,
    timeout: Duration,
) -> Result<Value, FleetError> {
    debug!(worker = %target.worker, %tool, ?timeout, "route: called");
    let url = format!("{}/call-tool", target.base_url);
    let body = serde_json::json!({
        "tool": tool,
        "parameters": params,
    });

    let response = transport.post_json(&url, &body, timeout).await.map_err(|e| {
        warn!(worker = %target.worker, %tool, error = %e, "Call failed");
        FleetError::CallTransport {
            worker: target.worker.clone(),
            tool: tool.to_string(),
            reason: e.to_string(),
        }
    })?;

    if response.status != 200 {
        warn!(worker = %target.worker, %tool, status = response.status, body = %response.body, "Call returned error status");
        return Err(FleetError::CallStatus {
            worker: target.worker.clone(),
            tool: tool.to_string(),
            status: response.status,
            body: response.body,
        });
    }

    let result: Value = serde_json::from_str(&response.body).map_err(|e| FleetError::CallDecode {
        worker: target.worker.clone(),
        tool: tool.to_string(),
        reason: e.to_string(),
    })?;
    info!(worker = %target.worker, %tool, chars = response.body.len(), "Call succeeded");
    Ok(result)
}
