pub mod ping;

use std::future::Future;
use std::time::Duration;
use shared::types::ProbeOutcome;

/// A single-attempt liveness check against one server.
///
/// Implementations must be bounded in time and must fold every failure into
/// `ProbeOutcome::Offline`.
pub trait Prober: Send + Sync + 'static {
    fn probe(&self, host: &str, port: u16) -> impl Future<Output = ProbeOutcome> + Send;
}

/// Prober speaking the Minecraft Server List Ping protocol
#[derive(Debug, Clone)]
pub struct SlpProber {
    timeout: Duration,
}

impl SlpProber {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Prober for SlpProber {
    async fn probe(&self, host: &str, port: u16) -> ProbeOutcome {
        match ping::ping(host, port, self.timeout).await {
            Ok(response) => response.into_outcome(),
            Err(e) => {
                tracing::debug!("{}:{} unreachable: {}", host, port, e);
                ProbeOutcome::Offline
            }
        }
    }
}
