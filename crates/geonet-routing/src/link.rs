//! Link-layer transmit hook

use geonet_protocol::MacAddress;
use std::fmt;
use std::sync::Arc;

/// Link-layer destination of an outgoing frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkDestination {
    Broadcast,
    Unicast(MacAddress),
}

impl LinkDestination {
    pub fn mac(&self) -> MacAddress {
        match self {
            LinkDestination::Broadcast => MacAddress::BROADCAST,
            LinkDestination::Unicast(mac) => *mac,
        }
    }
}

impl fmt::Display for LinkDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkDestination::Broadcast => write!(f, "broadcast"),
            LinkDestination::Unicast(mac) => write!(f, "{}", mac),
        }
    }
}

/// Hands an encoded GeoNetworking packet to the radio
pub type TransmitCallback = Arc<dyn Fn(LinkDestination, &[u8]) + Send + Sync>;
