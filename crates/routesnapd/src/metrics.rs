//! Churn metrics
//!
//! One registry per process, owned by [`Metrics`] and passed to the
//! scheduler as a dependency. Counters only ever move forward; gauges track
//! the most recent successful snapshot per coordinate.

use prometheus::{Encoder, GaugeVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use routesnap_core::{Afi, CoordinateDiff};

const COORD_LABELS: &[&str] = &["device", "vrf", "afi"];

pub struct Metrics {
    registry: Registry,
    route_count: IntGaugeVec,
    bgp_best_count: IntGaugeVec,
    rib_adds_total: IntCounterVec,
    rib_removes_total: IntCounterVec,
    bgp_attr_changes_total: IntCounterVec,
    default_nexthop_change_total: IntCounterVec,
    upstream_as_change_total: IntCounterVec,
    collect_failures_total: IntCounterVec,
    cycle_duration_seconds: GaugeVec,
}

fn gauge_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<IntGaugeVec, prometheus::Error> {
    let gauge = IntGaugeVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> Result<IntCounterVec, prometheus::Error> {
    let counter = IntCounterVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let route_count = gauge_vec(
            &registry,
            "route_count",
            "RIB entries in the current snapshot, by (prefix, protocol)",
            COORD_LABELS,
        )?;
        let bgp_best_count = gauge_vec(
            &registry,
            "bgp_best_count",
            "BGP rows flagged best in the current snapshot",
            COORD_LABELS,
        )?;
        let rib_adds_total = counter_vec(
            &registry,
            "rib_adds_total",
            "RIB prefixes added across cycles",
            COORD_LABELS,
        )?;
        let rib_removes_total = counter_vec(
            &registry,
            "rib_removes_total",
            "RIB prefixes removed across cycles",
            COORD_LABELS,
        )?;
        let bgp_attr_changes_total = counter_vec(
            &registry,
            "bgp_attr_changes_total",
            "BGP attribute changes by attribute name",
            &["device", "vrf", "afi", "attr"],
        )?;
        let default_nexthop_change_total = counter_vec(
            &registry,
            "default_nexthop_change_total",
            "Next-hop changes of the default route",
            COORD_LABELS,
        )?;
        let upstream_as_change_total = counter_vec(
            &registry,
            "upstream_as_change_total",
            "Changes of the leftmost AS in a prefix's AS path",
            &["device", "vrf", "afi", "prefix"],
        )?;
        let collect_failures_total = counter_vec(
            &registry,
            "collect_failures_total",
            "Device or table collection failures",
            &["device"],
        )?;
        let cycle_duration_seconds = GaugeVec::new(
            Opts::new("cycle_duration_seconds", "Duration of the last device cycle"),
            &["device"],
        )?;
        registry.register(Box::new(cycle_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            route_count,
            bgp_best_count,
            rib_adds_total,
            rib_removes_total,
            bgp_attr_changes_total,
            default_nexthop_change_total,
            upstream_as_change_total,
            collect_failures_total,
            cycle_duration_seconds,
        })
    }

    /// Update the per-coordinate gauges after a successful snapshot. Absent
    /// tables leave their gauge untouched.
    pub fn observe_snapshot(
        &self,
        device: &str,
        vrf: &str,
        afi: Afi,
        rib_routes: Option<usize>,
        bgp_best: Option<usize>,
    ) {
        let labels = [device, vrf, afi.as_str()];
        if let Some(count) = rib_routes {
            self.route_count.with_label_values(&labels).set(count as i64);
        }
        if let Some(count) = bgp_best {
            self.bgp_best_count.with_label_values(&labels).set(count as i64);
        }
    }

    /// Translate one coordinate's diff into counter increments.
    pub fn observe_diff(&self, diff: &CoordinateDiff) {
        let afi = diff.afi.as_str();
        let labels = [diff.device.as_str(), diff.vrf.as_str(), afi];

        self.rib_adds_total
            .with_label_values(&labels)
            .inc_by(diff.rib.adds.len() as u64);
        self.rib_removes_total
            .with_label_values(&labels)
            .inc_by(diff.rib.rems.len() as u64);

        for chg in &diff.bgp.chgs {
            let Some(delta) = chg.get("delta").and_then(|d| d.as_object()) else {
                continue;
            };
            let prefix = chg.get("prefix").and_then(|p| p.as_str()).unwrap_or("");
            for attr in delta.keys() {
                if attr == "upstream_as" {
                    self.upstream_as_change_total
                        .with_label_values(&[diff.device.as_str(), diff.vrf.as_str(), afi, prefix])
                        .inc();
                } else {
                    self.bgp_attr_changes_total
                        .with_label_values(&[diff.device.as_str(), diff.vrf.as_str(), afi, attr])
                        .inc();
                }
            }
            if (prefix == "0.0.0.0/0" || prefix == "::/0") && delta.contains_key("nh") {
                self.default_nexthop_change_total
                    .with_label_values(&labels)
                    .inc();
            }
        }
    }

    pub fn record_failure(&self, device: &str) {
        self.collect_failures_total
            .with_label_values(&[device])
            .inc();
    }

    pub fn observe_cycle_duration(&self, device: &str, seconds: f64) {
        self.cycle_duration_seconds
            .with_label_values(&[device])
            .set(seconds);
    }

    /// Prometheus text exposition of the whole registry.
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::error!(error = %e, "metrics encoding failed");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}
