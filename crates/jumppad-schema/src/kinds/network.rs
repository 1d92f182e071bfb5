use super::Payload;
use serde::{Deserialize, Serialize};

/// A bridge network with a fixed subnet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Network {
    pub subnet: String,
    pub enable_ipv6: bool,
}

impl Payload for Network {
    const KIND: &'static str = "network";
}
