use super::{FleetOrchestrator, ShutdownReason};
use crate::error::{Result, TaubenError};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info};

type SharedSender = Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>;

impl FleetOrchestrator {
    /// Run until a shutdown signal arrives, then shut down gracefully
    pub async fn run(&mut self) -> Result<i32> {
        info!("Fleet core is running");

        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| TaubenError::system("Shutdown receiver already taken"))?;

        // Absent when shutdown was already requested
        if let Some(shutdown_sender) = self.shutdown_sender.take() {
            self.setup_signal_handlers(shutdown_sender);
        }

        let shutdown_reason = shutdown_receiver
            .await
            .map_err(|_| TaubenError::system("Shutdown channel closed unexpectedly"))?;

        info!("Shutdown initiated: {:?}", shutdown_reason);

        let exit_code = self.shutdown().await?;

        info!("Fleet core shutdown complete");
        Ok(exit_code)
    }

    /// Request shutdown before or instead of waiting for a signal
    pub fn request_shutdown(&mut self, reason: ShutdownReason) -> bool {
        match self.shutdown_sender.take() {
            Some(sender) => sender.send(reason).is_ok(),
            None => false,
        }
    }

    fn setup_signal_handlers(&self, shutdown_sender: oneshot::Sender<ShutdownReason>) {
        let shutdown_sender: SharedSender = Arc::new(Mutex::new(Some(shutdown_sender)));

        // SIGTERM from systemd
        #[cfg(unix)]
        {
            let sender = Arc::clone(&shutdown_sender);
            tokio::spawn(async move {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        if sigterm.recv().await.is_some() {
                            info!("Received SIGTERM signal");
                            send_reason(&sender, ShutdownReason::Signal("SIGTERM".to_string()));
                        }
                    }
                    Err(e) => error!("Failed to register SIGTERM handler: {}", e),
                }
            });
        }

        let sender = Arc::clone(&shutdown_sender);
        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received SIGINT signal (Ctrl+C)");
                    send_reason(&sender, ShutdownReason::Signal("SIGINT".to_string()));
                }
                Err(e) => {
                    error!("Failed to listen for Ctrl+C: {}", e);
                    send_reason(&sender, ShutdownReason::Error(e.to_string()));
                }
            }
        });
    }
}

fn send_reason(sender: &SharedSender, reason: ShutdownReason) {
    if let Some(sender) = sender.lock().take() {
        let _ = sender.send(reason);
    }
}
