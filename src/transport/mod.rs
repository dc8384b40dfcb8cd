//! SNMP transport seam
//!
//! The scheduler core does not own any SNMP wire encoding. It talks to
//! devices through the [`SnmpTransport`] trait: one bounded-timeout GET
//! against one device with one credential set, returning either a value
//! mapping or a classified failure.
//!
//! Production deployments plug their SNMP stack in behind this trait.
//! [`sim::SimTransport`] ships with the crate for tests and local runs.

pub mod sim;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::MetricValue;
use crate::config::CredentialSet;

/// One OID to poll, paired with the metric name it is recorded under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OidSpec {
    pub name: &'static str,
    pub oid: &'static str,
}

/// Detected or configured device type, selecting the OID set to poll.
///
/// Vendors differ in which tables are worth reading; the mapping is a static
/// dispatch table rather than per-device conditionals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Generic,
    Router,
    Switch,
    Host,
}

const GENERIC_OIDS: &[OidSpec] = &[
    OidSpec {
        name: "sys_descr",
        oid: "1.3.6.1.2.1.1.1.0",
    },
    OidSpec {
        name: "sys_uptime",
        oid: "1.3.6.1.2.1.1.3.0",
    },
];

const ROUTER_OIDS: &[OidSpec] = &[
    OidSpec {
        name: "sys_descr",
        oid: "1.3.6.1.2.1.1.1.0",
    },
    OidSpec {
        name: "sys_uptime",
        oid: "1.3.6.1.2.1.1.3.0",
    },
    OidSpec {
        name: "if_number",
        oid: "1.3.6.1.2.1.2.1.0",
    },
    OidSpec {
        name: "ip_forwarding",
        oid: "1.3.6.1.2.1.4.1.0",
    },
];

const SWITCH_OIDS: &[OidSpec] = &[
    OidSpec {
        name: "sys_descr",
        oid: "1.3.6.1.2.1.1.1.0",
    },
    OidSpec {
        name: "sys_uptime",
        oid: "1.3.6.1.2.1.1.3.0",
    },
    OidSpec {
        name: "if_number",
        oid: "1.3.6.1.2.1.2.1.0",
    },
];

const HOST_OIDS: &[OidSpec] = &[
    OidSpec {
        name: "sys_descr",
        oid: "1.3.6.1.2.1.1.1.0",
    },
    OidSpec {
        name: "sys_uptime",
        oid: "1.3.6.1.2.1.1.3.0",
    },
    OidSpec {
        name: "hr_num_users",
        oid: "1.3.6.1.2.1.25.1.5.0",
    },
    OidSpec {
        name: "hr_processes",
        oid: "1.3.6.1.2.1.25.1.6.0",
    },
];

impl DeviceKind {
    /// The OID set polled for this device kind
    pub fn oid_set(self) -> &'static [OidSpec] {
        match self {
            DeviceKind::Generic => GENERIC_OIDS,
            DeviceKind::Router => ROUTER_OIDS,
            DeviceKind::Switch => SWITCH_OIDS,
            DeviceKind::Host => HOST_OIDS,
        }
    }
}

/// Classified transport failure
///
/// The executor's retry policy is driven entirely by this classification:
/// only [`TransportError::Unreachable`] is transient.
#[derive(Debug)]
pub enum TransportError {
    /// No response within the timeout, or the network path is down
    Unreachable(String),

    /// The device rejected the credential set
    AuthRejected(String),

    /// A response arrived but failed decoding or validation
    Malformed(String),
}

impl TransportError {
    /// Whether retrying the same request can reasonably succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Unreachable(_))
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Unreachable(msg) => write!(f, "device unreachable: {}", msg),
            TransportError::AuthRejected(msg) => write!(f, "credentials rejected: {}", msg),
            TransportError::Malformed(msg) => write!(f, "malformed response: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

/// Supplied SNMP capability: issue one GET for a set of OIDs.
///
/// Implementations own the wire protocol, socket handling, and the
/// per-request timeout. They must be `Send + Sync`; one instance is shared
/// across all poll workers.
#[async_trait]
pub trait SnmpTransport: Send + Sync {
    /// Fetch `oids` from `address` using `credentials`.
    ///
    /// Must return within roughly `timeout`; the worker pool reaps callers
    /// that hang well past it.
    async fn get(
        &self,
        address: &str,
        credentials: &CredentialSet,
        oids: &[OidSpec],
        timeout: Duration,
    ) -> Result<BTreeMap<String, MetricValue>, TransportError>;
}
