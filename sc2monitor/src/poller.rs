use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sc2monitor_task::{ShutdownSignal, Task};

use crate::monitor::Monitor;

/// Runs a polling cycle at a fixed interval until shutdown.
pub struct PollingTask {
    monitor: Arc<Monitor>,
    interval: Duration,
}

impl PollingTask {
    pub fn new(monitor: Arc<Monitor>, interval: Duration) -> Self {
        Self { monitor, interval }
    }
}

#[async_trait]
impl Task for PollingTask {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "ladder polling";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        debug!(interval = ?self.interval, "Task started");

        loop {
            if let Err(error) = self.monitor.update_all_until(&shutdown_signal).await {
                error!(error = format!("{error:#}"), "Polling cycle failed");
            }

            if !shutdown_signal.sleep(self.interval).await {
                break;
            }
        }

        debug!("Task terminated");

        Ok(())
    }
}
