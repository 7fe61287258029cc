//! Background job that expires idle uploads.

use super::upload_service::UploadService;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone)]
pub struct UploadSweepConfig {
    /// Uploads not updated for this long are expired.
    pub ttl: Duration,
    /// Interval between sweeps.
    pub interval: Duration,
}

pub struct UploadSweeper {
    uploads: Arc<UploadService>,
    config: UploadSweepConfig,
}

impl UploadSweeper {
    pub fn new(uploads: Arc<UploadService>, config: UploadSweepConfig) -> Self {
        Self { uploads, config }
    }

    /// Run one sweep now.
    pub async fn sweep(&self, cancel: &CancellationToken) -> usize {
        self.uploads.expire_stale(self.config.ttl, cancel).await
    }

    /// Sweep every `interval` until `shutdown` fires.
    pub fn start(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "starting upload expiry sweep: ttl {:?}, interval {:?}",
                self.config.ttl, self.config.interval
            );
            let mut timer = tokio::time::interval(self.config.interval);
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let expired = self.sweep(&shutdown).await;
                        if expired > 0 {
                            info!("expired {} idle uploads", expired);
                        }
                    }
                    _ = shutdown.cancelled() => {
                        info!("upload expiry sweep shutting down");
                        break;
                    }
                }
            }
        })
    }
}
