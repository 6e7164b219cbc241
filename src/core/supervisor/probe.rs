use std::time::Duration;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::error::{PanelError, PanelResult};

pub const PROBE_INTERVAL: Duration = Duration::from_millis(500);
/// Per-request limit for a single probe attempt.
pub const PROBE_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready,
    TimedOut,
    Cancelled,
}

pub fn probe_url(port: u16) -> String {
    format!("http://localhost:{port}/")
}

/// Any HTTP answer counts, whatever the status.
pub async fn is_port_responding(client: &Client, port: u16) -> bool {
    match client.get(probe_url(port)).send().await {
        Ok(response) => {
            debug!("Port {} answered {}", port, response.status());
            true
        }
        Err(_) => false,
    }
}

/// Refuse to start on a port something already serves.
pub async fn precheck_port(client: &Client, port: u16) -> PanelResult<()> {
    if is_port_responding(client, port).await {
        return Err(PanelError::PortBusy { port });
    }
    Ok(())
}

/// Poll every `interval` until the port answers, `timeout` passes or
/// `cancel` fires.
pub async fn wait_until_ready(
    client: &Client,
    port: u16,
    timeout: Duration,
    interval: Duration,
    cancel: &CancellationToken,
) -> ProbeOutcome {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cancel.is_cancelled() {
            return ProbeOutcome::Cancelled;
        }
        if is_port_responding(client, port).await {
            return ProbeOutcome::Ready;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return ProbeOutcome::TimedOut;
        }
        let pause = interval.min(deadline - now);
        tokio::select! {
            _ = cancel.cancelled() => return ProbeOutcome::Cancelled,
            _ = tokio::time::sleep(pause) => {}
        }
    }
}
