//! Poll executor - one poll cycle for one device
//!
//! The executor issues a bounded number of attempts against the transport,
//! classifies the terminal outcome, and normalizes it into a
//! [`HealthObservation`]. It holds no state of its own and is shared across
//! all worker tasks.
//!
//! ## Retry policy
//!
//! Attempts use linear spacing, no exponential backoff. Only unreachable
//! errors are retried; auth rejections and malformed responses end the cycle
//! immediately. Between attempts the executor re-checks the device's active
//! flag so a deactivated device cancels instead of polling on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, trace, warn};

use crate::config::{CredentialFailover, PollingConfig};
use crate::registry::{Device, DeviceRegistry};
use crate::transport::{SnmpTransport, TransportError};
use crate::{FailureReason, HealthObservation, PollMetrics};

/// Retry and timeout tuning for one poll cycle
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per cycle (first try plus retries)
    pub attempts: u32,

    /// Per-attempt timeout passed to the transport
    pub timeout: Duration,

    /// Linear spacing between attempts
    pub retry_spacing: Duration,

    /// Policy for devices with fallback credential sets
    pub credential_failover: CredentialFailover,
}

impl RetryPolicy {
    pub fn from_config(config: &PollingConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            timeout: Duration::from_secs(config.timeout_secs),
            retry_spacing: Duration::from_secs(config.retry_spacing_secs),
            credential_failover: config.credential_failover,
        }
    }

    /// Worst-case wall time of one well-behaved poll cycle
    pub fn cycle_budget(&self) -> Duration {
        (self.timeout + self.retry_spacing) * self.attempts
    }
}

/// Outcome of one poll cycle
#[derive(Debug)]
pub enum PollOutcome {
    /// The cycle ran to completion, successfully or not
    Completed(HealthObservation),

    /// The device was deactivated mid-cycle; nothing is recorded
    Cancelled,
}

/// Performs one poll cycle per invocation
///
/// One shared instance serves every worker task; all per-cycle state lives on
/// the stack of [`PollExecutor::execute`].
pub struct PollExecutor {
    transport: Arc<dyn SnmpTransport>,
    registry: Arc<dyn DeviceRegistry>,
    policy: RetryPolicy,
}

impl PollExecutor {
    pub fn new(
        transport: Arc<dyn SnmpTransport>,
        registry: Arc<dyn DeviceRegistry>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            registry,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run one poll cycle for `device`
    #[instrument(skip(self, device), fields(device = %device.config.display_name()))]
    pub async fn execute(&self, device: &Device) -> PollOutcome {
        let device_id = device.device_id();
        let mut last_failure = FailureReason::Timeout;

        for attempt in 1..=self.policy.attempts {
            if attempt > 1 {
                tokio::time::sleep(self.policy.retry_spacing).await;

                // Deactivation between attempts cancels the cycle
                if !self.registry.is_active(device_id).await {
                    debug!("device deactivated mid-cycle, cancelling");
                    return PollOutcome::Cancelled;
                }
            }

            trace!("attempt {attempt}/{}", self.policy.attempts);

            match self.attempt(device).await {
                Ok(metrics) => {
                    trace!("poll succeeded in {}ms", metrics.latency_ms);
                    return PollOutcome::Completed(HealthObservation::success(device_id, metrics));
                }

                Err(e) if e.is_transient() => {
                    trace!("attempt {attempt} failed: {e}");
                    last_failure = FailureReason::Timeout;
                }

                Err(TransportError::AuthRejected(msg)) => {
                    // Credential issues are not transient; surface for the
                    // operator and stop retrying.
                    warn!("credentials rejected: {msg}");
                    return PollOutcome::Completed(HealthObservation::failure(
                        device_id,
                        FailureReason::Auth,
                    ));
                }

                Err(TransportError::Malformed(msg)) => {
                    warn!("malformed response: {msg}");
                    return PollOutcome::Completed(HealthObservation::failure(
                        device_id,
                        FailureReason::Malformed,
                    ));
                }

                Err(TransportError::Unreachable(_)) => unreachable!("handled as transient"),
            }
        }

        debug!("all {} attempts failed", self.policy.attempts);
        PollOutcome::Completed(HealthObservation::failure(device_id, last_failure))
    }

    /// One attempt: walk the device's credential sets per the failover policy
    async fn attempt(&self, device: &Device) -> Result<PollMetrics, TransportError> {
        let oids = device.config.kind.oid_set();

        let sets = match self.policy.credential_failover {
            CredentialFailover::FailFast => {
                device.config.credentials.get(..1).unwrap_or_default()
            }
            CredentialFailover::TryAll => &device.config.credentials[..],
        };

        let mut last_rejection = None;
        for credentials in sets {
            let started = Instant::now();
            match self
                .transport
                .get(&device.config.address, credentials, oids, self.policy.timeout)
                .await
            {
                Ok(values) => {
                    return Ok(PollMetrics {
                        latency_ms: started.elapsed().as_millis() as u64,
                        values,
                    });
                }

                Err(TransportError::AuthRejected(msg)) => {
                    trace!("credential set '{}' rejected: {msg}", credentials.name);
                    last_rejection = Some(TransportError::AuthRejected(msg));
                }

                // Unreachable and malformed end the attempt; trying another
                // credential set cannot change either outcome.
                Err(other) => return Err(other),
            }
        }

        Err(last_rejection.unwrap_or_else(|| {
            TransportError::AuthRejected("no credential sets configured".to_string())
        }))
    }
}
