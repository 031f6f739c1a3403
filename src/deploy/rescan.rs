//! Best-effort inventory cache refresh after a deployment.
//!
//! The refresh runs as a detached task. Its failures are logged and never
//! reach the caller, and it is never retried.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::gateway::{ApplianceGateway, DeviceRef};

/// Fires cache refreshes.
#[derive(Clone)]
pub struct RescanTrigger {
    gateway: Arc<dyn ApplianceGateway>,
}

/// Handle to a fired refresh. Dropping it does not cancel the refresh.
#[derive(Debug)]
pub struct RescanHandle {
    task: JoinHandle<bool>,
}

impl RescanTrigger {
    /// Creates a trigger over the given gateway.
    #[must_use]
    pub fn new(gateway: Arc<dyn ApplianceGateway>) -> Self {
        Self { gateway }
    }

    /// Spawns a refresh for the device.
    #[must_use = "await the handle or drop it to detach"]
    pub fn fire(&self, device: &DeviceRef, fast: bool) -> RescanHandle {
        let gateway = Arc::clone(&self.gateway);
        let device_id = device.id;
        let hostname = device.hostname.clone();

        let task = tokio::spawn(async move {
            match gateway.rescan(device_id, fast).await {
                Ok(()) => {
                    info!("Cache refresh requested for {hostname} (fast: {fast})");
                    true
                }
                Err(e) => {
                    warn!("Cache refresh for {hostname} failed: {e}");
                    false
                }
            }
        });

        RescanHandle { task }
    }
}

impl RescanHandle {
    /// Waits up to `grace` for the refresh to finish. Returns `None` if it
    /// is still running, otherwise whether the backend acknowledged it.
    pub async fn wait(self, grace: Duration) -> Option<bool> {
        match tokio::time::timeout(grace, self.task).await {
            Ok(Ok(acknowledged)) => Some(acknowledged),
            Ok(Err(e)) => {
                warn!("Cache refresh task ended abnormally: {e}");
                Some(false)
            }
            Err(_) => None,
        }
    }

    /// True once the refresh has completed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::gateway::MockApplianceGateway;

    fn device() -> DeviceRef {
        DeviceRef::new(7, "bigip-01.example.net", "10.0.0.7")
    }

    #[tokio::test]
    async fn test_fire_reports_acknowledgement() {
        let mut mock = MockApplianceGateway::new();
        mock.expect_rescan()
            .withf(|id, fast| *id == 7 && *fast)
            .times(1)
            .returning(|_, _| Ok(()));

        let handle = RescanTrigger::new(Arc::new(mock)).fire(&device(), true);
        assert_eq!(handle.wait(Duration::from_secs(5)).await, Some(true));
    }

    #[tokio::test]
    async fn test_failure_is_swallowed() {
        let mut mock = MockApplianceGateway::new();
        mock.expect_rescan()
            .times(1)
            .returning(|_, _| Err(GatewayError::api_error(502, "refresh failed").into()));

        let handle = RescanTrigger::new(Arc::new(mock)).fire(&device(), false);
        assert_eq!(handle.wait(Duration::from_secs(5)).await, Some(false));
    }
}
