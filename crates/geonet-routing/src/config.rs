//! Router configuration
//!
//! Defaults follow the protocol constants of ETSI EN 302 636-4-1 Annex H.

use crate::error::{Result, RoutingError};
use geonet_protocol::GnAddress;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Forwarding algorithm for unicast and anycast outside the destination area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonAreaForwarding {
    #[default]
    Greedy,
    Cbf,
    #[serde(other)]
    Unsupported,
}

/// Forwarding algorithm inside a GeoBroadcast / GeoAnycast area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AreaForwarding {
    #[default]
    Simple,
    Cbf,
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Our GeoNetworking address, hex encoded in YAML
    #[serde(with = "hex_address")]
    pub local_address: GnAddress,

    /// Station is mobile (Common header flag)
    pub is_mobile: bool,

    pub location_table_lifetime_secs: u64,
    pub location_service_max_retrans: u32,
    pub location_service_retransmit_ms: u64,

    pub default_hop_limit: u8,
    pub default_packet_lifetime_secs: u64,

    pub cbf_min_time_ms: u64,
    pub cbf_max_time_ms: u64,

    /// Meters
    pub max_communication_range: f64,

    pub beacon_enabled: bool,
    pub beacon_interval_ms: u64,
    pub beacon_jitter_ms: u64,

    pub table_sweep_interval_secs: u64,

    pub broadcast_queue_capacity: usize,
    pub unicast_queue_capacity: usize,
    pub location_service_queue_capacity: usize,

    pub non_area_forwarding: NonAreaForwarding,
    pub area_forwarding: AreaForwarding,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            local_address: GnAddress::default(),
            is_mobile: true,
            location_table_lifetime_secs: 20,
            location_service_max_retrans: 10,
            location_service_retransmit_ms: 1000,
            default_hop_limit: 10,
            default_packet_lifetime_secs: 60,
            cbf_min_time_ms: 1,
            cbf_max_time_ms: 100,
            max_communication_range: 1000.0,
            beacon_enabled: true,
            beacon_interval_ms: 3000,
            beacon_jitter_ms: 750,
            table_sweep_interval_secs: 10,
            broadcast_queue_capacity: 64,
            unicast_queue_capacity: 16,
            location_service_queue_capacity: 16,
            non_area_forwarding: NonAreaForwarding::Greedy,
            area_forwarding: AreaForwarding::Simple,
        }
    }
}

impl RouterConfig {
    pub fn new(local_address: GnAddress) -> Self {
        Self {
            local_address,
            ..Default::default()
        }
    }

    /// Parse a YAML document; missing keys take their defaults
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let config: RouterConfig = serde_yaml::from_str(contents)
            .map_err(|e| RoutingError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| RoutingError::Config(format!("Failed to serialize configuration: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.cbf_min_time_ms > self.cbf_max_time_ms {
            return Err(RoutingError::Config(format!(
                "CBF min time {}ms exceeds max time {}ms",
                self.cbf_min_time_ms, self.cbf_max_time_ms
            )));
        }
        if self.broadcast_queue_capacity == 0
            || self.unicast_queue_capacity == 0
            || self.location_service_queue_capacity == 0
        {
            return Err(RoutingError::Config(
                "Queue capacities must be non-zero".to_string(),
            ));
        }
        if !(self.max_communication_range > 0.0) {
            return Err(RoutingError::Config(format!(
                "Invalid max communication range: {}",
                self.max_communication_range
            )));
        }
        if self.default_hop_limit == 0 {
            return Err(RoutingError::Config(
                "Default hop limit must be non-zero".to_string(),
            ));
        }
        if self.location_service_retransmit_ms == 0 {
            return Err(RoutingError::Config(
                "Location service retransmit timer must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn location_table_lifetime(&self) -> Duration {
        Duration::from_secs(self.location_table_lifetime_secs)
    }

    pub fn location_service_retransmit(&self) -> Duration {
        Duration::from_millis(self.location_service_retransmit_ms)
    }

    pub fn default_packet_lifetime(&self) -> Duration {
        Duration::from_secs(self.default_packet_lifetime_secs)
    }

    pub fn cbf_min_time(&self) -> Duration {
        Duration::from_millis(self.cbf_min_time_ms)
    }

    pub fn cbf_max_time(&self) -> Duration {
        Duration::from_millis(self.cbf_max_time_ms)
    }

    pub fn beacon_interval(&self) -> Duration {
        Duration::from_millis(self.beacon_interval_ms)
    }

    pub fn table_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.table_sweep_interval_secs.max(1))
    }

    /// Configured non-area algorithm, falling back to greedy
    pub fn effective_non_area_forwarding(&self) -> NonAreaForwarding {
        match self.non_area_forwarding {
            NonAreaForwarding::Unsupported => {
                warn!("Unsupported non-area forwarding algorithm, falling back to greedy");
                NonAreaForwarding::Greedy
            }
            algorithm => algorithm,
        }
    }

    /// Configured area algorithm, falling back to simple broadcast
    pub fn effective_area_forwarding(&self) -> AreaForwarding {
        match self.area_forwarding {
            AreaForwarding::Unsupported => {
                warn!("Unsupported area forwarding algorithm, falling back to simple");
                AreaForwarding::Simple
            }
            algorithm => algorithm,
        }
    }
}

mod hex_address {
    use geonet_protocol::GnAddress;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(address: &GnAddress, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(address.as_bytes()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<GnAddress, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        let bytes: [u8; 8] = bytes.try_into().map_err(|b: Vec<u8>| {
            serde::de::Error::custom(format!("expected 8 address bytes, got {}", b.len()))
        })?;
        Ok(GnAddress::from_bytes(bytes))
    }
}
