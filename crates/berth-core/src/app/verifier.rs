//! Verifier - liveness probe of a freshly provisioned instance.

use std::sync::Arc;

use super::retry::RetryPolicy;
use crate::domain::{ErrorKind, InstanceRef};
use crate::ports::{AdminChannel, AdminError};

pub struct Verifier {
    admin: Arc<dyn AdminChannel>,
}

impl Verifier {
    pub fn new(admin: Arc<dyn AdminChannel>) -> Self {
        Self { admin }
    }

    /// True on the first successful ping, false once attempts run out.
    pub async fn probe(&self, instance: &InstanceRef, policy: &RetryPolicy) -> bool {
        self.probe_detailed(instance, policy).await.is_ok()
    }

    /// Like `probe`, but returns the attempts used or the last error.
    ///
    /// Configuration-class failures (rejected credentials, a command that
    /// cannot run) stop probing immediately.
    pub async fn probe_detailed(
        &self,
        instance: &InstanceRef,
        policy: &RetryPolicy,
    ) -> Result<u32, AdminError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.admin.ping(instance).await {
                Ok(()) => {
                    tracing::debug!(%instance, attempts, "probe answered");
                    return Ok(attempts);
                }
                Err(e) if e.kind() == ErrorKind::ConfigurationError => return Err(e),
                Err(e) if policy.allows_another(attempts) => {
                    let delay = policy.next_delay(attempts);
                    tracing::debug!(%instance, attempts, ?delay, error = %e, "probe failed");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
