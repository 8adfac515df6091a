//! Canonical row model for RIB and BGP table snapshots
//!
//! Rows are the unit of comparison between snapshots. Both row types are
//! designed for deterministic JSON serialization: `nexthops` is held sorted
//! and deduplicated so device output ordering can never leak into equality,
//! and snapshots are written sorted by equality key.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Which device table a snapshot coordinate refers to.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    Rib,
    Bgp,
}

impl TableKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TableKind::Rib => "rib",
            TableKind::Bgp => "bgp",
        }
    }
}

impl FromStr for TableKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rib" => Ok(TableKind::Rib),
            "bgp" => Ok(TableKind::Bgp),
            other => Err(Error::UnknownTableKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address family of a snapshot coordinate.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Afi {
    Ipv4,
    Ipv6,
}

impl Afi {
    pub fn as_str(self) -> &'static str {
        match self {
            Afi::Ipv4 => "ipv4",
            Afi::Ipv6 => "ipv6",
        }
    }

    /// Case-insensitive match against a device-reported address-family label
    /// ("ipv4", "IPv4 Unicast", ...).
    pub fn matches_label(self, label: &str) -> bool {
        label.to_ascii_lowercase().contains(self.as_str())
    }
}

impl FromStr for Afi {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ipv4" => Ok(Afi::Ipv4),
            "ipv6" => Ok(Afi::Ipv6),
            other => Err(Error::UnknownAfi(other.to_string())),
        }
    }
}

impl std::fmt::Display for Afi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single next-hop. Two next-hops with the same address but different
/// egress interfaces are distinct set members (ECMP over multiple
/// interfaces).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NextHop {
    pub nh: String,
    pub iface: Option<String>,
}

impl NextHop {
    pub fn new(nh: impl Into<String>, iface: Option<String>) -> Self {
        Self { nh: nh.into(), iface }
    }
}

/// Equality key for RIB rows.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RibKey {
    pub vrf: String,
    pub afi: Afi,
    pub prefix: String,
    pub protocol: String,
}

/// One RIB entry for a `(vrf, afi, prefix, protocol)` coordinate.
///
/// `nexthops` is semantically a set; it is kept sorted and deduplicated at
/// all times so that two rows with the same members compare equal regardless
/// of the order the device emitted them in.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RibRow {
    pub vrf: String,
    pub afi: Afi,
    pub prefix: String,
    pub protocol: String,
    pub distance: Option<i64>,
    pub metric: Option<i64>,
    pub best: bool,
    pub nexthops: Vec<NextHop>,
}

impl RibRow {
    pub fn key(&self) -> RibKey {
        RibKey {
            vrf: self.vrf.clone(),
            afi: self.afi,
            prefix: self.prefix.clone(),
            protocol: self.protocol.clone(),
        }
    }

    /// Insert a next-hop, preserving sorted set semantics.
    pub fn push_nexthop(&mut self, nh: NextHop) {
        if let Err(pos) = self.nexthops.binary_search(&nh) {
            self.nexthops.insert(pos, nh);
        }
    }

    /// Merge another adjacency entry for the same key: union of next-hops,
    /// first non-null scalar wins, `best` is OR-ed.
    pub fn merge_adjacency(&mut self, other: RibRow) {
        for nh in other.nexthops {
            self.push_nexthop(nh);
        }
        if self.distance.is_none() {
            self.distance = other.distance;
        }
        if self.metric.is_none() {
            self.metric = other.metric;
        }
        self.best = self.best || other.best;
    }
}

/// Equality key for BGP rows.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BgpKey {
    pub vrf: String,
    pub afi: Afi,
    pub prefix: String,
}

/// One BGP path for a `(vrf, afi, prefix)` coordinate, after best-path
/// collapse.
///
/// `communities` holds at most [`MAX_STORED_COMMUNITIES`] tokens for display;
/// equality and change detection go through `communities_hash`, which is
/// computed over the full normalized list.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BgpRow {
    pub vrf: String,
    pub afi: Afi,
    pub prefix: String,
    pub best: bool,
    pub nh: Option<String>,
    pub as_path: String,
    pub local_pref: Option<i64>,
    pub med: Option<i64>,
    pub origin: Option<String>,
    pub communities: Vec<String>,
    pub communities_hash: String,
    pub weight: Option<i64>,
    pub peer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub originator_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_list: Option<String>,
}

/// Cap on the stored `communities` list. The hash always covers the full
/// list.
pub const MAX_STORED_COMMUNITIES: usize = 256;

impl BgpRow {
    pub fn key(&self) -> BgpKey {
        BgpKey {
            vrf: self.vrf.clone(),
            afi: self.afi,
            prefix: self.prefix.clone(),
        }
    }
}

/// Collapse duplicate RIB adjacency rows into one row per equality key.
///
/// Output is sorted by key, which within a single coordinate means
/// `(prefix, protocol)`.
pub fn collapse_rib(rows: Vec<RibRow>) -> Vec<RibRow> {
    let mut merged: BTreeMap<RibKey, RibRow> = BTreeMap::new();
    for row in rows {
        match merged.entry(row.key()) {
            Entry::Vacant(e) => {
                e.insert(row);
            }
            Entry::Occupied(mut e) => {
                e.get_mut().merge_adjacency(row);
            }
        }
    }
    merged.into_values().collect()
}

/// Collapse multiple BGP paths into one representative per equality key:
/// the first path flagged `best`, else the first encountered. Output is
/// sorted by key.
pub fn collapse_bgp(rows: Vec<BgpRow>) -> Vec<BgpRow> {
    let mut picked: BTreeMap<BgpKey, BgpRow> = BTreeMap::new();
    for row in rows {
        match picked.entry(row.key()) {
            Entry::Vacant(e) => {
                e.insert(row);
            }
            Entry::Occupied(mut e) => {
                if row.best && !e.get().best {
                    e.insert(row);
                }
            }
        }
    }
    picked.into_values().collect()
}
