//! Simulated SNMP transport
//!
//! This transport answers polls from scripted per-device behaviors instead of
//! the network. It's useful for:
//! - Testing the scheduler pipeline without real devices
//! - Local development runs of the hub
//! - Reproducing failure scenarios (timeouts, auth rejects, hangs) on demand
//!
//! Behavior is keyed by device address; unscripted devices answer healthy.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use crate::MetricValue;
use crate::config::CredentialSet;

use super::{OidSpec, SnmpTransport, TransportError};

/// Response latency for unscripted devices
const DEFAULT_LATENCY: Duration = Duration::from_millis(5);

/// Scripted behavior for one device address
#[derive(Debug, Clone)]
pub enum SimBehavior {
    /// Answer every request after `latency`
    Healthy { latency: Duration },

    /// Never answer; the call returns an unreachable error after the timeout
    Unreachable,

    /// Reject every credential set
    RejectAuth,

    /// Answer only the named credential set, reject all others
    AcceptOnly {
        credential: String,
        latency: Duration,
    },

    /// Return responses that fail decoding
    Garbled,

    /// Block far past any per-attempt timeout (for reaper tests)
    Hang,

    /// Fail `failures` requests with unreachable, then answer healthy
    FlakyThenHealthy { failures: u32, latency: Duration },
}

/// In-memory transport with scripted per-device behavior
pub struct SimTransport {
    behaviors: Mutex<HashMap<String, SimBehavior>>,
    calls: Mutex<HashMap<String, u32>>,
}

impl SimTransport {
    pub fn new() -> Self {
        Self {
            behaviors: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Script the behavior for a device address
    pub fn set_behavior(&self, address: impl Into<String>, behavior: SimBehavior) {
        self.behaviors
            .lock()
            .expect("behavior lock poisoned")
            .insert(address.into(), behavior);
    }

    /// Number of transport calls made for a device so far
    pub fn calls(&self, address: &str) -> u32 {
        self.calls
            .lock()
            .expect("call counter lock poisoned")
            .get(address)
            .copied()
            .unwrap_or(0)
    }

    fn record_call(&self, address: &str) -> u32 {
        let mut calls = self.calls.lock().expect("call counter lock poisoned");
        let count = calls.entry(address.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Take the current behavior, decrementing flaky counters in place
    fn next_behavior(&self, address: &str) -> SimBehavior {
        let mut behaviors = self.behaviors.lock().expect("behavior lock poisoned");
        match behaviors.get_mut(address) {
            Some(SimBehavior::FlakyThenHealthy { failures, latency }) => {
                if *failures > 0 {
                    *failures -= 1;
                    SimBehavior::Unreachable
                } else {
                    SimBehavior::Healthy { latency: *latency }
                }
            }
            Some(other) => other.clone(),
            None => SimBehavior::Healthy {
                latency: DEFAULT_LATENCY,
            },
        }
    }

    fn answer(&self, oids: &[OidSpec], call_count: u32) -> BTreeMap<String, MetricValue> {
        oids.iter()
            .map(|spec| {
                let value = match spec.name {
                    "sys_descr" => MetricValue::Text("simulated device".to_string()),
                    "sys_uptime" => MetricValue::Unsigned(call_count as u64 * 100),
                    _ => MetricValue::Unsigned(call_count as u64),
                };
                (spec.name.to_string(), value)
            })
            .collect()
    }
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnmpTransport for SimTransport {
    async fn get(
        &self,
        address: &str,
        credentials: &CredentialSet,
        oids: &[OidSpec],
        timeout: Duration,
    ) -> Result<BTreeMap<String, MetricValue>, TransportError> {
        let call_count = self.record_call(address);
        let behavior = self.next_behavior(address);

        trace!("sim transport: {address} call #{call_count} -> {behavior:?}");

        match behavior {
            SimBehavior::Healthy { latency } => {
                tokio::time::sleep(latency).await;
                Ok(self.answer(oids, call_count))
            }

            SimBehavior::Unreachable => {
                tokio::time::sleep(timeout).await;
                Err(TransportError::Unreachable(format!(
                    "no response from {address} within {timeout:?}"
                )))
            }

            SimBehavior::RejectAuth => Err(TransportError::AuthRejected(format!(
                "{address} rejected credential set '{}'",
                credentials.name
            ))),

            SimBehavior::AcceptOnly {
                credential,
                latency,
            } => {
                if credentials.name == credential {
                    tokio::time::sleep(latency).await;
                    Ok(self.answer(oids, call_count))
                } else {
                    Err(TransportError::AuthRejected(format!(
                        "{address} rejected credential set '{}'",
                        credentials.name
                    )))
                }
            }

            SimBehavior::Garbled => Err(TransportError::Malformed(format!(
                "undecodable response from {address}"
            ))),

            SimBehavior::Hang => {
                // Deliberately ignores the timeout; only the reaper ends this.
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(TransportError::Unreachable(format!("{address} hung")))
            }

            SimBehavior::FlakyThenHealthy { .. } => unreachable!("resolved in next_behavior"),
        }
    }
}
