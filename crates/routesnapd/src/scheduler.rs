//! Collection cycle orchestration
//!
//! One task per device, bounded fan-out, tables sequential inside a device
//! task. Every failure is caught at the device boundary; a crashing device
//! cannot take down the cycle, and an overrunning cycle is aborted at
//! `interval * 2` and followed immediately by the next one (coalesced,
//! never queued).

use crate::inventory::InventorySource;
use crate::metrics::Metrics;
use crate::store::{SnapshotStore, StoreError};
use chrono::Utc;
use routesnap_core::diff::{diff_bgp, diff_rib};
use routesnap_core::{Afi, BgpRow, CoordinateDiff, DiffSummary, RibRow, TableKind};
use routesnap_device::{shape, Collect, Collected, Device, RawTable};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Per-coordinate slice of a device report.
#[derive(Clone, Debug, Serialize)]
pub struct CoordinateReport {
    pub vrf: String,
    pub afi: Afi,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rib_routes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bgp_routes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<DiffSummary>,
}

/// One entry of the `--once` report array.
#[derive(Clone, Debug, Serialize)]
pub struct DeviceReport {
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub coordinates: Vec<CoordinateReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_tables: Vec<String>,
}

impl DeviceReport {
    fn failed(device: String, error: String) -> Self {
        Self {
            device,
            error: Some(error),
            coordinates: Vec::new(),
            failed_tables: Vec::new(),
        }
    }
}

pub struct Scheduler {
    store: Arc<SnapshotStore>,
    collector: Arc<dyn Collect>,
    metrics: Arc<Metrics>,
    inventory: Arc<dyn InventorySource>,
    interval: Duration,
    max_parallel: usize,
}

impl Scheduler {
    pub fn new(
        store: Arc<SnapshotStore>,
        collector: Arc<dyn Collect>,
        metrics: Arc<Metrics>,
        inventory: Arc<dyn InventorySource>,
        interval: Duration,
        max_parallel: usize,
    ) -> Self {
        Self {
            store,
            collector,
            metrics,
            inventory,
            interval,
            max_parallel,
        }
    }

    /// Run cycles until shutdown.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut inventory_cache: Vec<Device> = Vec::new();
        loop {
            let started = Instant::now();
            let deadline = self.interval * 2;
            match timeout(deadline, self.cycle(&mut inventory_cache)).await {
                Ok(reports) => {
                    let failed = reports.iter().filter(|r| r.error.is_some()).count();
                    info!(
                        devices = reports.len(),
                        failed,
                        elapsed = ?started.elapsed(),
                        "cycle complete"
                    );
                }
                // Dropping the cycle future aborts its device tasks.
                Err(_) => warn!(?deadline, "cycle exceeded deadline, aborted"),
            }
            let wait = self.interval.saturating_sub(started.elapsed());
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.recv() => {
                    info!("scheduler stopping");
                    return;
                }
            }
        }
    }

    /// Run exactly one cycle and return the per-device reports.
    pub async fn run_once(&self) -> Vec<DeviceReport> {
        let mut cache = Vec::new();
        self.cycle(&mut cache).await
    }

    async fn cycle(&self, inventory_cache: &mut Vec<Device>) -> Vec<DeviceReport> {
        match self.inventory.devices().await {
            Ok(devices) => *inventory_cache = devices,
            Err(e) => warn!(error = %e, "inventory refresh failed, reusing previous inventory"),
        }
        let devices = inventory_cache.clone();
        if devices.is_empty() {
            warn!("inventory is empty, nothing to collect");
            return Vec::new();
        }

        let expected: Vec<String> = devices.iter().map(|d| d.name.clone()).collect();
        let permits = devices.len().min(self.max_parallel).max(1);
        let semaphore = Arc::new(Semaphore::new(permits));
        // Dropping the set (deadline abort) cancels every outstanding task.
        let mut tasks: JoinSet<DeviceReport> = JoinSet::new();

        for device in devices {
            let semaphore = semaphore.clone();
            let store = self.store.clone();
            let collector = self.collector.clone();
            let metrics = self.metrics.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let started = Instant::now();
                let report = run_device(&store, collector.as_ref(), &metrics, &device).await;
                metrics.observe_cycle_duration(&device.name, started.elapsed().as_secs_f64());
                report
            });
        }

        let mut reports = Vec::with_capacity(expected.len());
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(report) => reports.push(report),
                Err(e) => warn!(error = %e, "device task crashed"),
            }
        }
        // A crashed task produced no report; synthesize its error entry.
        for name in expected {
            if !reports.iter().any(|r| r.device == name) {
                reports.push(DeviceReport::failed(name, "device task crashed".to_string()));
            }
        }
        reports.sort_by(|a, b| a.device.cmp(&b.device));
        reports
    }
}

async fn run_device(
    store: &SnapshotStore,
    collector: &dyn Collect,
    metrics: &Metrics,
    device: &Device,
) -> DeviceReport {
    let collected = match collector.collect(device).await {
        Ok(collected) => collected,
        Err(e) => {
            metrics.record_failure(&device.name);
            return DeviceReport::failed(device.name.clone(), e.to_string());
        }
    };
    for _ in &collected.failures {
        metrics.record_failure(&device.name);
    }
    let failed_tables = collected
        .failures
        .iter()
        .map(|f| format!("{} {} {}: {}", f.kind, f.vrf, f.afi, f.error))
        .collect();

    let ts = Utc::now().format("%Y%m%d%H%M%S").to_string();
    let mut report = DeviceReport {
        device: device.name.clone(),
        error: None,
        coordinates: Vec::new(),
        failed_tables,
    };

    'coords: for vrf in &device.vrfs {
        for &afi in &device.afis {
            match process_coordinate(store, metrics, device, vrf, afi, &collected, &ts) {
                Ok(Some(coordinate)) => report.coordinates.push(coordinate),
                Ok(None) => {}
                Err(StoreError::LatestReplace { archive, source }) => {
                    // The archive survived; keep it as evidence and stop the
                    // device for this cycle.
                    warn!(
                        device = %device.name,
                        archive = %archive.display(),
                        error = %source,
                        "latest replace failed"
                    );
                    report.error = Some(format!(
                        "latest replace failed after archiving {}: {source}",
                        archive.display()
                    ));
                    break 'coords;
                }
                Err(e) => {
                    warn!(device = %device.name, %vrf, %afi, error = %e, "coordinate abandoned");
                    metrics.record_failure(&device.name);
                }
            }
        }
    }
    report
}

fn find_table<'a>(tables: &'a [RawTable], vrf: &str, afi: Afi) -> Option<&'a RawTable> {
    tables.iter().find(|t| t.vrf == vrf && t.afi == afi)
}

/// Reconcile, diff, and persist one coordinate. `Ok(None)` means neither of
/// the coordinate's tables was collected this cycle, which must leave the
/// store untouched.
fn process_coordinate(
    store: &SnapshotStore,
    metrics: &Metrics,
    device: &Device,
    vrf: &str,
    afi: Afi,
    collected: &Collected,
    ts: &str,
) -> Result<Option<CoordinateReport>, StoreError> {
    let rib_rows =
        find_table(&collected.rib, vrf, afi).map(|t| shape::parse_rib(&t.payload, vrf, afi));
    let bgp_rows =
        find_table(&collected.bgp, vrf, afi).map(|t| shape::parse_bgp(&t.payload, vrf, afi));
    if rib_rows.is_none() && bgp_rows.is_none() {
        return Ok(None);
    }

    let mut diff = CoordinateDiff {
        device: device.name.clone(),
        vrf: vrf.to_string(),
        afi,
        rib: Default::default(),
        bgp: Default::default(),
    };
    let mut have_prior = false;

    if let Some(rows) = &rib_rows {
        let prior: Option<Vec<RibRow>> = store.read_latest(&device.name, TableKind::Rib, vrf, afi)?;
        if let Some(prev) = prior {
            diff.rib = diff_rib(prev, rows.clone());
            have_prior = true;
        }
        store.write_latest_and_archive(&device.name, TableKind::Rib, vrf, afi, rows, ts)?;
    }
    if let Some(rows) = &bgp_rows {
        let prior: Option<Vec<BgpRow>> = store.read_latest(&device.name, TableKind::Bgp, vrf, afi)?;
        if let Some(prev) = prior {
            diff.bgp = diff_bgp(prev, rows.clone());
            have_prior = true;
        }
        store.write_latest_and_archive(&device.name, TableKind::Bgp, vrf, afi, rows, ts)?;
    }

    metrics.observe_snapshot(
        &device.name,
        vrf,
        afi,
        rib_rows.as_ref().map(Vec::len),
        bgp_rows
            .as_ref()
            .map(|rows| rows.iter().filter(|r| r.best).count()),
    );

    let summary = if have_prior {
        store.write_diff(&device.name, vrf, afi, ts, &diff)?;
        metrics.observe_diff(&diff);
        Some(diff.summary())
    } else {
        debug!(device = %device.name, %vrf, %afi, "no prior snapshot, diff skipped");
        None
    };

    Ok(Some(CoordinateReport {
        vrf: vrf.to_string(),
        afi,
        rib_routes: rib_rows.map(|r| r.len()),
        bgp_routes: bgp_rows.map(|r| r.len()),
        diff: summary,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::StaticInventory;
    use async_trait::async_trait;
    use routesnap_device::{AdapterError, TableFailure};
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Hands out one canned [`Collected`] per collect() call.
    struct FakeCollect {
        queue: Mutex<Vec<Collected>>,
    }

    #[async_trait]
    impl Collect for FakeCollect {
        async fn collect(&self, _device: &Device) -> Result<Collected, AdapterError> {
            Ok(self.queue.lock().unwrap().remove(0))
        }
    }

    fn rib_payload(prefix: &str, nh: &str) -> Value {
        json!({
            "TABLE_vrf": {"ROW_vrf": {
                "vrf-name-out": "default",
                "TABLE_addrf": {"ROW_addrf": {
                    "addrf": "ipv4",
                    "TABLE_prefix": {"ROW_prefix": {
                        "ipprefix": prefix,
                        "TABLE_paths": {"ROW_paths": {
                            "ipnexthop": nh, "ifname": "Eth1/1",
                            "pref": "110", "metric": "20",
                            "clientname": "ospf", "ubest": "true"
                        }}
                    }}
                }}
            }}
        })
    }

    fn raw(kind: TableKind, afi: Afi, payload: Value) -> RawTable {
        RawTable {
            kind,
            vrf: "default".to_string(),
            afi,
            payload,
        }
    }

    fn device(afis: Vec<Afi>) -> Device {
        Device {
            name: "edge1".to_string(),
            device_type: "cisco_nxos".to_string(),
            host: "198.51.100.1".to_string(),
            username: "ops".to_string(),
            password: "secret".to_string(),
            vrfs: vec!["default".to_string()],
            afis,
        }
    }

    fn scheduler(
        store: Arc<SnapshotStore>,
        collects: Vec<Collected>,
        afis: Vec<Afi>,
    ) -> Scheduler {
        Scheduler::new(
            store,
            Arc::new(FakeCollect {
                queue: Mutex::new(collects),
            }),
            Arc::new(Metrics::new().unwrap()),
            Arc::new(StaticInventory::new(vec![device(afis)])),
            Duration::from_secs(60),
            16,
        )
    }

    #[tokio::test]
    async fn test_cold_start_emits_no_diff() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SnapshotStore::new(dir.path()));

        let cycle1 = Collected {
            rib: vec![raw(TableKind::Rib, Afi::Ipv4, rib_payload("10.0.0.0/24", "1.1.1.1"))],
            bgp: vec![],
            failures: vec![],
        };
        let cycle2 = Collected {
            rib: vec![raw(TableKind::Rib, Afi::Ipv4, rib_payload("10.1.0.0/24", "1.1.1.1"))],
            bgp: vec![],
            failures: vec![],
        };

        let sched = scheduler(store.clone(), vec![cycle1, cycle2], vec![Afi::Ipv4]);

        let reports = sched.run_once().await;
        assert_eq!(reports.len(), 1);
        assert!(reports[0].error.is_none());
        assert!(reports[0].coordinates[0].diff.is_none());
        assert!(store.list_diffs("edge1", "default", Afi::Ipv4).unwrap().is_empty());

        // Second cycle has a prior and produces one add + one remove.
        let reports = sched.run_once().await;
        let summary = reports[0].coordinates[0].diff.unwrap();
        assert_eq!(summary.added, 1);
        assert_eq!(summary.removed, 1);
        assert_eq!(store.list_diffs("edge1", "default", Afi::Ipv4).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_table_failure_leaves_coordinate_untouched() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SnapshotStore::new(dir.path()));

        let both = |v6_prefix: &str| Collected {
            rib: vec![
                raw(TableKind::Rib, Afi::Ipv4, rib_payload("10.0.0.0/24", "1.1.1.1")),
                raw(
                    TableKind::Rib,
                    Afi::Ipv6,
                    json!({
                        "TABLE_vrf": {"ROW_vrf": {
                            "vrf-name-out": "default",
                            "TABLE_addrf": {"ROW_addrf": {
                                "addrf": "ipv6",
                                "TABLE_prefix": {"ROW_prefix": {
                                    "ipv6prefix": v6_prefix,
                                    "TABLE_paths": {"ROW_paths": {"ipv6nexthop": "fe80::1", "clientname": "bgp"}}
                                }}
                            }}
                        }}
                    }),
                ),
            ],
            bgp: vec![],
            failures: vec![],
        };

        // Cycle 2: the ipv6 command raised; only ipv4 was collected, with a
        // changed prefix so a diff is produced.
        let cycle2 = Collected {
            rib: vec![raw(TableKind::Rib, Afi::Ipv4, rib_payload("10.9.0.0/24", "1.1.1.1"))],
            bgp: vec![],
            failures: vec![TableFailure {
                kind: TableKind::Rib,
                vrf: "default".to_string(),
                afi: Afi::Ipv6,
                error: "command timed out".to_string(),
            }],
        };

        let sched = scheduler(
            store.clone(),
            vec![both("2001:db8::/32"), cycle2, both("2001:db8::/32")],
            vec![Afi::Ipv4, Afi::Ipv6],
        );

        sched.run_once().await;
        let v6_before: Vec<RibRow> = store
            .read_latest("edge1", TableKind::Rib, "default", Afi::Ipv6)
            .unwrap()
            .unwrap();

        let reports = sched.run_once().await;
        assert_eq!(reports[0].failed_tables.len(), 1);
        // ipv4 produced a diff, ipv6 was skipped entirely.
        assert_eq!(reports[0].coordinates.len(), 1);
        assert_eq!(reports[0].coordinates[0].afi, Afi::Ipv4);
        let v6_after: Vec<RibRow> = store
            .read_latest("edge1", TableKind::Rib, "default", Afi::Ipv6)
            .unwrap()
            .unwrap();
        assert_eq!(v6_before, v6_after);
        assert!(store.list_diffs("edge1", "default", Afi::Ipv6).unwrap().is_empty());

        // Cycle 3: ipv6 recovers and diffs cleanly against its old latest.
        let reports = sched.run_once().await;
        assert_eq!(reports[0].coordinates.len(), 2);
        assert!(reports[0].failed_tables.is_empty());
    }

    #[tokio::test]
    async fn test_unchanged_snapshot_diffs_empty() {
        let dir = tempdir().unwrap();
        let store = Arc::new(SnapshotStore::new(dir.path()));
        let make = || Collected {
            rib: vec![raw(TableKind::Rib, Afi::Ipv4, rib_payload("10.0.0.0/24", "1.1.1.1"))],
            bgp: vec![],
            failures: vec![],
        };

        let sched = scheduler(store.clone(), vec![make(), make()], vec![Afi::Ipv4]);
        sched.run_once().await;
        let reports = sched.run_once().await;

        let summary = reports[0].coordinates[0].diff.unwrap();
        assert_eq!(summary, DiffSummary::default());
    }
}
