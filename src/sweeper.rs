//! Background cache cleanup
//!
//! Periodically sweeps expired entries out of every cache tier and reports
//! each sweep over a tokio channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cache::CleanupReport;
use crate::client::ResilientClient;

/// Messages sent from the background sweeper
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupMessage {
    /// A sweep finished
    Completed(CleanupReport),
    /// A sweep failed; the sweeper keeps running
    Failed(String),
}

/// Handle for controlling the background sweeper
pub struct CleanupHandle {
    /// Channel for receiving sweep results
    pub receiver: mpsc::Receiver<CleanupMessage>,
    /// Signals the task to stop
    shutdown_tx: mpsc::Sender<()>,
}

impl CleanupHandle {
    /// Spawns the sweeper task
    ///
    /// # Arguments
    /// * `client` - Client whose caches are swept
    /// * `interval` - Time between sweeps; the first sweep runs after one interval
    ///
    /// # Returns
    /// A handle that receives a [`CleanupMessage`] per sweep
    pub fn spawn(client: Arc<ResilientClient>, interval: Duration) -> Self {
        let (msg_tx, msg_rx) = mpsc::channel(32);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // Skip the first tick (immediate)
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let message = match client.cleanup_caches().await {
                            Ok(report) => {
                                debug!(removed = report.total(), "Cache sweep finished");
                                CleanupMessage::Completed(report)
                            }
                            Err(e) => {
                                warn!(error = %e, "Cache sweep failed");
                                CleanupMessage::Failed(e.to_string())
                            }
                        };
                        // Nobody listening is fine; results are advisory
                        let _ = msg_tx.try_send(message);
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("Cache sweeper stopped");
                        break;
                    }
                }
            }
        });

        Self {
            receiver: msg_rx,
            shutdown_tx,
        }
    }

    /// Stops the background task
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }

    /// Returns a pending sweep result without blocking
    pub fn try_recv(&mut self) -> Option<CleanupMessage> {
        self.receiver.try_recv().ok()
    }
}
