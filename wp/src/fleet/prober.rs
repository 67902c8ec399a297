//! Worker health probe

use std::time::Duration;

use tracing::debug;

use super::transport::WorkerTransport;

/// Probe `base_url/health`
///
/// True only on HTTP 200. Errors, timeouts and other statuses all read as
/// unhealthy; this never fails.
pub async fn probe(transport: &dyn WorkerTransport, base_url: &str, timeout: Duration) -> bool {
    let url = format!("{}/health", base_url);
    match transport.get(&url, timeout).await {
        Ok(response) => {
            debug!(%url, status = response.status, "probe: response");
            response.status == 200
        }
        Err(e) => {
            debug!(%url, error = %e, "probe: unreachable");
            false
        }
    }
}
