use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Reachability check. Never fails: any error reads as offline.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, address: &str) -> bool;
}

/// One ICMP echo through the system `ping`, waiting at most one second for the reply.
pub struct PingProber {
    wait_secs: u32,
    hard_timeout: Duration,
}

impl Default for PingProber {
    fn default() -> Self {
        Self { wait_secs: 1, hard_timeout: Duration::from_secs(2) }
    }
}

#[async_trait]
impl Prober for PingProber {
    async fn probe(&self, address: &str) -> bool {
        let wait = self.wait_secs.to_string();
        let child = Command::new("ping")
            .args(["-c", "1", "-W", &wait, address])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(self.hard_timeout, child).await {
            Ok(Ok(status)) => {
                debug!("ping {address}: {status}");
                status.success()
            }
            Ok(Err(e)) => {
                warn!("error checking device status for {address}: {e}");
                false
            }
            Err(_) => {
                debug!("ping {address} timed out");
                false
            }
        }
    }
}
