//! Build-time configuration of a [`NetworkStack`](crate::stack::NetworkStack)
//!
//! Every field has a default, so a partial JSON document is enough:
//!
//! ```
//! use std::time::Duration;
//! use flow_strata::config::StackConfig;
//!
//! let conf: StackConfig = serde_json::from_str(r#"{ "flows_timeout": 30 }"#).unwrap();
//! assert_eq!(conf.flows_timeout, Duration::from_secs(30));
//! assert_eq!(conf.total_tcp_flows, 65536);
//! assert!(conf.validate().is_ok());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::stack::StackError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StackConfig {
    /// Inactivity after which a flow is released back to its cache.
    /// - Default Value: `180s`
    #[serde(default = "defaults::flows_timeout", with = "duration_secs")]
    pub flows_timeout: Duration,

    /// Ceiling of TCP flows allocated by the TCP cache.
    /// - Default Value: `65536`
    #[serde(default = "defaults::total_flows")]
    pub total_tcp_flows: usize,

    /// Ceiling of UDP flows allocated by the UDP cache.
    /// - Default Value: `65536`
    #[serde(default = "defaults::total_flows")]
    pub total_udp_flows: usize,

    /// Flows created in each cache at construction.
    /// - Default Value: `1024`
    #[serde(default = "defaults::preallocated_flows")]
    pub preallocated_flows: usize,

    /// Hand payloads to signature consumers.
    #[serde(default = "defaults::enabled")]
    pub enable_nids_engine: bool,

    /// Hand payloads to frequency consumers.
    #[serde(default)]
    pub enable_frequency_engine: bool,

    /// Deepest chain of nested multiplexers a packet may traverse.
    /// - Default Value: `16`
    #[serde(default = "defaults::max_dispatch_depth")]
    pub max_dispatch_depth: usize,
}

impl Default for StackConfig {
    fn default() -> StackConfig {
        StackConfig {
            flows_timeout: defaults::flows_timeout(),
            total_tcp_flows: defaults::total_flows(),
            total_udp_flows: defaults::total_flows(),
            preallocated_flows: defaults::preallocated_flows(),
            enable_nids_engine: defaults::enabled(),
            enable_frequency_engine: false,
            max_dispatch_depth: defaults::max_dispatch_depth(),
        }
    }
}

impl StackConfig {
    pub fn validate(&self) -> Result<(), StackError> {
        if self.flows_timeout.is_zero() {
            return Err(StackError::Config("flows_timeout must be greater than zero"));
        }
        if self.max_dispatch_depth == 0 {
            return Err(StackError::Config("max_dispatch_depth must be greater than zero"));
        }
        if self.preallocated_flows > self.total_tcp_flows.min(self.total_udp_flows) {
            return Err(StackError::Config(
                "preallocated_flows exceeds the flow ceiling",
            ));
        }
        Ok(())
    }
}

mod defaults {
    use std::time::Duration;

    pub fn flows_timeout() -> Duration {
        Duration::from_secs(180)
    }
    pub fn total_flows() -> usize {
        65536
    }
    pub fn preallocated_flows() -> usize {
        1024
    }
    pub fn enabled() -> bool {
        true
    }
    pub fn max_dispatch_depth() -> usize {
        16
    }
}

/// Durations as whole seconds.
pub mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
