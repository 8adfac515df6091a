//! Raw table acquisition
//!
//! One collector serves the whole inventory; it holds the acquisition
//! preferences and hands back per-device [`Collected`] bundles. Failures are
//! scoped: a broken HTTPS client setup aborts the device, anything that goes
//! wrong for a single command is recorded as a [`TableFailure`] and the table
//! is simply absent from the cycle.

use crate::cli::{CliError, CliSession, CliTextParser, SshCliSession};
use crate::device::Device;
use crate::nxapi::{NxapiClient, NxapiConfig, NxapiError};
use async_trait::async_trait;
use routesnap_core::{Afi, TableKind};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Device-scope adapter errors
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("HTTPS client setup failed: {0}")]
    ClientSetup(#[from] NxapiError),
}

/// One raw table payload, not yet reconciled into rows.
#[derive(Clone, Debug)]
pub struct RawTable {
    pub kind: TableKind,
    pub vrf: String,
    pub afi: Afi,
    pub payload: Value,
}

/// A table that could not be collected this cycle.
#[derive(Clone, Debug)]
pub struct TableFailure {
    pub kind: TableKind,
    pub vrf: String,
    pub afi: Afi,
    pub error: String,
}

/// Everything one device produced in one cycle.
#[derive(Clone, Debug, Default)]
pub struct Collected {
    pub rib: Vec<RawTable>,
    pub bgp: Vec<RawTable>,
    pub failures: Vec<TableFailure>,
}

impl Collected {
    fn push(&mut self, kind: TableKind, vrf: &str, afi: Afi, payload: Value) {
        let table = RawTable {
            kind,
            vrf: vrf.to_string(),
            afi,
            payload,
        };
        match kind {
            TableKind::Rib => self.rib.push(table),
            TableKind::Bgp => self.bgp.push(table),
        }
    }
}

/// The `show` command for one table coordinate.
pub fn command_for(kind: TableKind, vrf: &str, afi: Afi) -> String {
    match (kind, afi) {
        (TableKind::Rib, Afi::Ipv4) => format!("show ip route vrf {vrf}"),
        (TableKind::Rib, Afi::Ipv6) => format!("show ipv6 route vrf {vrf}"),
        (TableKind::Bgp, Afi::Ipv4) => format!("show bgp vrf {vrf} ipv4 unicast"),
        (TableKind::Bgp, Afi::Ipv6) => format!("show bgp vrf {vrf} ipv6 unicast"),
    }
}

fn plan(device: &Device) -> Vec<(TableKind, String, Afi, String)> {
    let mut commands = Vec::new();
    for vrf in &device.vrfs {
        for &afi in &device.afis {
            for kind in [TableKind::Rib, TableKind::Bgp] {
                commands.push((kind, vrf.clone(), afi, command_for(kind, vrf, afi)));
            }
        }
    }
    commands
}

/// Collection seam consumed by the scheduler; [`Collector`] is the real
/// implementation, tests substitute canned tables.
#[async_trait]
pub trait Collect: Send + Sync {
    async fn collect(&self, device: &Device) -> Result<Collected, AdapterError>;
}

#[async_trait]
impl Collect for Collector {
    async fn collect(&self, device: &Device) -> Result<Collected, AdapterError> {
        Collector::collect(self, device).await
    }
}

/// Acquisition policy and session ownership for the whole inventory.
pub struct Collector {
    prefer_nxapi: bool,
    nxapi: NxapiConfig,
    cli_timeout: Duration,
    parser: Option<Arc<dyn CliTextParser>>,
}

impl Collector {
    pub fn new(prefer_nxapi: bool, nxapi: NxapiConfig, cli_timeout: Duration) -> Self {
        Self {
            prefer_nxapi,
            nxapi,
            cli_timeout,
            parser: None,
        }
    }

    /// Plug in a structured-CLI parser for devices that cannot render JSON.
    pub fn with_parser(mut self, parser: Arc<dyn CliTextParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Fetch all of a device's tables for one cycle.
    pub async fn collect(&self, device: &Device) -> Result<Collected, AdapterError> {
        if self.prefer_nxapi && device.supports_nxapi() {
            let client = NxapiClient::new(device, &self.nxapi)?;
            Ok(self.collect_nxapi(device, &client).await)
        } else {
            let mut session = SshCliSession::new(device, self.cli_timeout);
            Ok(self.collect_cli(device, &mut session).await)
        }
    }

    async fn collect_nxapi(&self, device: &Device, client: &NxapiClient) -> Collected {
        let mut collected = Collected::default();
        for (kind, vrf, afi, cmd) in plan(device) {
            match client.cli_show(&cmd).await {
                Ok(payload) => collected.push(kind, &vrf, afi, payload),
                Err(e) => {
                    warn!(device = %device.name, %cmd, error = %e, "table collection failed");
                    collected.failures.push(TableFailure {
                        kind,
                        vrf,
                        afi,
                        error: e.to_string(),
                    });
                }
            }
        }
        collected
    }

    /// CLI acquisition over an already-open session. Public so tests and
    /// alternative SSH backends can drive it directly.
    pub async fn collect_cli(&self, device: &Device, session: &mut dyn CliSession) -> Collected {
        let mut collected = Collected::default();
        for (kind, vrf, afi, cmd) in plan(device) {
            match self.fetch_cli(session, &cmd).await {
                Ok(payload) => collected.push(kind, &vrf, afi, payload),
                Err(e) => {
                    warn!(device = %device.name, %cmd, error = %e, "table collection failed");
                    collected.failures.push(TableFailure {
                        kind,
                        vrf,
                        afi,
                        error: e.to_string(),
                    });
                }
            }
        }
        collected
    }

    /// Try `<cmd> | json` first; fall back to the bare command through the
    /// pluggable parser.
    async fn fetch_cli(
        &self,
        session: &mut dyn CliSession,
        cmd: &str,
    ) -> Result<Value, CliError> {
        match session.run(&format!("{cmd} | json")).await {
            Ok(output) => {
                let trimmed = output.trim();
                if trimmed.starts_with('{') || trimmed.starts_with('[') {
                    if let Ok(decoded) = serde_json::from_str(trimmed) {
                        return Ok(decoded);
                    }
                }
            }
            Err(e) => debug!(%cmd, error = %e, "json modifier rejected, falling back"),
        }
        let raw = session.run(cmd).await?;
        match &self.parser {
            Some(parser) => parser.parse(cmd, &raw),
            None => Err(CliError::NoParser),
        }
    }
}
