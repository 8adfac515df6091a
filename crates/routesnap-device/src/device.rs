//! Device descriptors consumed from the inventory feed

use routesnap_core::Afi;
use serde::{Deserialize, Serialize};

/// One entry of the inventory feed: everything the adapter needs to reach a
/// device and enumerate its table coordinates.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Device {
    /// Stable device name, used as the snapshot store key.
    pub name: String,
    /// Opaque platform tag from the inventory (e.g. "cisco_nxos").
    pub device_type: String,
    pub host: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// VRFs to snapshot on this device.
    #[serde(default)]
    pub vrfs: Vec<String>,
    /// Address families to snapshot per VRF.
    #[serde(default)]
    pub afis: Vec<Afi>,
}

impl Device {
    /// Whether the platform tag identifies the JSON-RPC-over-HTTPS family.
    pub fn supports_nxapi(&self) -> bool {
        let tag = self.device_type.to_ascii_lowercase();
        tag.contains("nxos") || tag.contains("nxapi")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nxapi_family_detection() {
        let mut device = Device {
            name: "edge1".to_string(),
            device_type: "cisco_nxos".to_string(),
            host: "198.51.100.1".to_string(),
            username: "ops".to_string(),
            password: "secret".to_string(),
            vrfs: vec!["default".to_string()],
            afis: vec![Afi::Ipv4],
        };
        assert!(device.supports_nxapi());

        device.device_type = "cisco_ios".to_string();
        assert!(!device.supports_nxapi());
    }
}
