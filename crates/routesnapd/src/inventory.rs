//! Inventory sources
//!
//! Two feeds produce device descriptors: a static JSON file and a NetBox
//! query. Entries may omit credentials and coordinates; those are filled
//! from process-level defaults before the scheduler sees them.

use anyhow::{bail, Context};
use async_trait::async_trait;
use routesnap_core::Afi;
use routesnap_device::Device;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

/// Fill-in values for inventory entries that omit credentials or
/// coordinates.
#[derive(Clone, Debug, Default)]
pub struct DeviceDefaults {
    pub username: String,
    pub password: String,
    pub vrfs: Vec<String>,
    pub afis: Vec<Afi>,
}

fn apply_defaults(device: &mut Device, defaults: &DeviceDefaults) {
    if device.username.is_empty() {
        device.username = defaults.username.clone();
    }
    if device.password.is_empty() {
        device.password = defaults.password.clone();
    }
    if device.vrfs.is_empty() {
        device.vrfs = defaults.vrfs.clone();
    }
    if device.afis.is_empty() {
        device.afis = defaults.afis.clone();
    }
}

/// A feed of device descriptors, re-read every cycle.
#[async_trait]
pub trait InventorySource: Send + Sync {
    async fn devices(&self) -> anyhow::Result<Vec<Device>>;
}

/// The enumerated static list, loaded once from a JSON file.
pub struct StaticInventory {
    devices: Vec<Device>,
}

impl StaticInventory {
    pub fn new(devices: Vec<Device>) -> Self {
        Self { devices }
    }

    pub fn from_file(path: &Path, defaults: &DeviceDefaults) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading inventory file {}", path.display()))?;
        let mut devices: Vec<Device> = serde_json::from_str(&data)
            .with_context(|| format!("parsing inventory file {}", path.display()))?;
        if devices.is_empty() {
            bail!("inventory file {} lists no devices", path.display());
        }
        for device in &mut devices {
            apply_defaults(device, defaults);
        }
        Ok(Self { devices })
    }
}

#[async_trait]
impl InventorySource for StaticInventory {
    async fn devices(&self) -> anyhow::Result<Vec<Device>> {
        Ok(self.devices.clone())
    }
}

/// Device discovery against a NetBox instance.
pub struct NetboxInventory {
    http: reqwest::Client,
    base_url: String,
    token: String,
    defaults: DeviceDefaults,
}

impl NetboxInventory {
    pub fn new(
        base_url: &str,
        token: &str,
        defaults: DeviceDefaults,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("building NetBox HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            defaults,
        })
    }

    /// Map one NetBox device record onto a descriptor. Records without a
    /// name are skipped; a missing primary IP falls back to the name for
    /// DNS resolution.
    fn device_from_record(&self, record: &Value) -> Option<Device> {
        let name = record.get("name").and_then(Value::as_str)?;
        let host = record
            .get("primary_ip")
            .and_then(|ip| ip.get("address"))
            .and_then(Value::as_str)
            .and_then(|addr| addr.split('/').next())
            .unwrap_or(name)
            .to_string();
        let device_type = record
            .get("platform")
            .and_then(|p| p.get("slug"))
            .and_then(Value::as_str)
            .unwrap_or("cisco_nxos")
            .to_string();
        let mut device = Device {
            name: name.to_string(),
            device_type,
            host,
            username: String::new(),
            password: String::new(),
            vrfs: Vec::new(),
            afis: Vec::new(),
        };
        apply_defaults(&mut device, &self.defaults);
        Some(device)
    }
}

#[async_trait]
impl InventorySource for NetboxInventory {
    async fn devices(&self) -> anyhow::Result<Vec<Device>> {
        let url = format!("{}/api/dcim/devices/?status=active&limit=0", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("Token {}", self.token))
            .send()
            .await
            .context("querying NetBox")?
            .error_for_status()
            .context("NetBox rejected the device query")?;
        let body: Value = response.json().await.context("decoding NetBox response")?;

        let records = body
            .get("results")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        Ok(records
            .iter()
            .filter_map(|record| self.device_from_record(record))
            .collect())
    }
}
