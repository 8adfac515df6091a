//! Configuration for routesnapd

use clap::Parser;
use routesnap_core::Afi;
use routesnap_device::NxapiConfig;
use std::path::PathBuf;
use std::time::Duration;

/// routesnapd - route table snapshot and churn daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "routesnapd")]
#[command(about = "Snapshots device RIB/BGP tables, diffs them, and exports churn metrics")]
pub struct Config {
    /// Root directory of the snapshot store
    #[arg(long, env = "SNAPDIR", default_value = "./route_snaps")]
    pub snapdir: PathBuf,

    /// Seconds between collection cycles
    #[arg(long, env = "POLL_INTERVAL_SEC", default_value_t = 60)]
    pub poll_interval_sec: u64,

    /// Listener port for /metrics and the read API
    #[arg(long, env = "PROM_PORT", default_value_t = 9108)]
    pub prom_port: u16,

    /// Prefer JSON-RPC over HTTPS for devices that support it
    #[arg(long, env = "USE_NXAPI")]
    pub use_nxapi: bool,

    /// HTTPS scheme for the management API
    #[arg(long, env = "NXAPI_SCHEME", default_value = "https")]
    pub nxapi_scheme: String,

    /// HTTPS port for the management API
    #[arg(long, env = "NXAPI_PORT", default_value_t = 443)]
    pub nxapi_port: u16,

    /// Verify device TLS certificates
    #[arg(long, env = "NXAPI_VERIFY", default_value_t = true, action = clap::ArgAction::Set)]
    pub nxapi_verify: bool,

    /// Device login username for inventory entries without one
    #[arg(long, env = "NETOPS_USER")]
    pub username: Option<String>,

    /// Device login password for inventory entries without one
    #[arg(long, env = "NETOPS_PASS", hide_env_values = true)]
    pub password: Option<String>,

    /// Pull the inventory from NetBox instead of a static file
    #[arg(long, env = "USE_NETBOX")]
    pub use_netbox: bool,

    /// NetBox base URL
    #[arg(long, env = "NB_URL")]
    pub netbox_url: Option<String>,

    /// NetBox API token
    #[arg(long, env = "NB_TOKEN", hide_env_values = true)]
    pub netbox_token: Option<String>,

    /// Static inventory file (JSON array of device descriptors)
    #[arg(long, env = "INVENTORY")]
    pub inventory: Option<PathBuf>,

    /// VRFs for inventory entries without explicit VRFs
    #[arg(long, value_delimiter = ',', default_value = "default")]
    pub vrfs: Vec<String>,

    /// Address families for inventory entries without explicit ones
    #[arg(long, value_delimiter = ',', default_values_t = [Afi::Ipv4, Afi::Ipv6])]
    pub afis: Vec<Afi>,

    /// Run exactly one cycle, print a JSON report, and exit
    #[arg(long)]
    pub once: bool,

    /// Upper bound on concurrent device tasks
    #[arg(long, default_value_t = 16)]
    pub max_parallel: usize,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

impl Config {
    /// Fail fast on configuration that cannot produce a working daemon.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_sec == 0 {
            anyhow::bail!("POLL_INTERVAL_SEC must be at least 1");
        }
        if self.use_netbox {
            if self.netbox_url.is_none() || self.netbox_token.is_none() {
                anyhow::bail!("USE_NETBOX requires NB_URL and NB_TOKEN");
            }
            if self.username.is_none() || self.password.is_none() {
                anyhow::bail!("NetBox inventory requires NETOPS_USER and NETOPS_PASS");
            }
        } else if self.inventory.is_none() {
            anyhow::bail!("no inventory source: set --inventory or USE_NETBOX");
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_sec)
    }

    pub fn nxapi_config(&self) -> NxapiConfig {
        NxapiConfig {
            scheme: self.nxapi_scheme.clone(),
            port: self.nxapi_port,
            verify: self.nxapi_verify,
            ..NxapiConfig::default()
        }
    }
}
