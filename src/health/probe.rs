use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace};

/// Liveness check for a network address
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// True when the address answered within `timeout`
    async fn probe(&self, address: &str, timeout: Duration) -> bool;
}

/// Single ICMP echo through the system `ping` binary
pub struct PingProbe {
    program: String,
}

impl PingProbe {
    pub fn new() -> Self {
        Self {
            program: "ping".to_string(),
        }
    }

    pub fn with_program<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, address: &str, timeout: Duration) -> Command {
        let wait_secs = timeout.as_secs().max(1).to_string();
        let mut command = Command::new(&self.program);

        if cfg!(windows) {
            let wait_ms = timeout.as_millis().max(1).to_string();
            command.args(["-n", "1", "-w", wait_ms.as_str(), address]);
        } else {
            command.args(["-c", "1", "-W", wait_secs.as_str(), address]);
        }

        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        command
    }
}

impl Default for PingProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthProbe for PingProbe {
    async fn probe(&self, address: &str, timeout: Duration) -> bool {
        if address.is_empty() {
            return false;
        }

        let mut command = self.command(address, timeout);
        // ping's own -W bounds the reply wait; this bounds a hung process
        let hard_limit = timeout.saturating_mul(2);

        match tokio::time::timeout(hard_limit, command.status()).await {
            Ok(Ok(status)) => {
                trace!("Ping {} exited with {}", address, status);
                status.success()
            }
            Ok(Err(e)) => {
                debug!("Ping {} could not run: {}", address, e);
                false
            }
            Err(_) => {
                debug!("Ping {} exceeded {}ms", address, hard_limit.as_millis());
                false
            }
        }
    }
}
