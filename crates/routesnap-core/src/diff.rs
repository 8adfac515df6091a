//! Delta computation between two snapshots of one table coordinate
//!
//! The caller decides whether to diff at all: a coordinate with no prior
//! snapshot produces no diff (cold starts must not flood as all-adds). Given
//! both sides, this module produces adds/rems/chgs with per-attribute
//! `[old, new]` deltas, ordered deterministically.

use crate::normalize::head_as;
use crate::rows::{collapse_bgp, collapse_rib, Afi, BgpKey, BgpRow, RibKey, RibRow};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Adds, removals, and changes for one table. Change rows are the serialized
/// current row with a `delta` object of `attr -> [old, new]` appended.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TableDiff {
    pub adds: Vec<Value>,
    pub rems: Vec<Value>,
    pub chgs: Vec<Value>,
}

impl TableDiff {
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.rems.is_empty() && self.chgs.is_empty()
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary {
            added: self.adds.len(),
            removed: self.rems.len(),
            changed: self.chgs.len(),
        }
    }
}

/// Counts shown in diff listings.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
}

impl DiffSummary {
    pub fn merge(self, other: DiffSummary) -> DiffSummary {
        DiffSummary {
            added: self.added + other.added,
            removed: self.removed + other.removed,
            changed: self.changed + other.changed,
        }
    }
}

/// The combined RIB + BGP delta for one `(device, vrf, afi)` at one instant.
/// This is the archived diff payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoordinateDiff {
    pub device: String,
    pub vrf: String,
    pub afi: Afi,
    pub rib: TableDiff,
    pub bgp: TableDiff,
}

impl CoordinateDiff {
    pub fn is_empty(&self) -> bool {
        self.rib.is_empty() && self.bgp.is_empty()
    }

    pub fn summary(&self) -> DiffSummary {
        self.rib.summary().merge(self.bgp.summary())
    }
}

fn row_value<T: Serialize>(row: &T) -> Value {
    serde_json::to_value(row).unwrap_or(Value::Null)
}

fn with_delta<T: Serialize>(row: &T, delta: Map<String, Value>) -> Value {
    let mut value = row_value(row);
    if let Value::Object(ref mut obj) = value {
        obj.insert("delta".to_string(), Value::Object(delta));
    }
    value
}

/// Diff two RIB snapshots of the same coordinate.
///
/// Both sides are collapsed defensively before comparison, so duplicate
/// adjacency rows in either input cannot manufacture spurious changes.
pub fn diff_rib(prev: Vec<RibRow>, curr: Vec<RibRow>) -> TableDiff {
    let prev_map: BTreeMap<RibKey, RibRow> = collapse_rib(prev)
        .into_iter()
        .map(|r| (r.key(), r))
        .collect();
    let curr_map: BTreeMap<RibKey, RibRow> = collapse_rib(curr)
        .into_iter()
        .map(|r| (r.key(), r))
        .collect();

    let mut diff = TableDiff::default();

    for (key, cur) in &curr_map {
        let Some(old) = prev_map.get(key) else {
            diff.adds.push(row_value(cur));
            continue;
        };
        let mut delta = Map::new();
        if old.nexthops != cur.nexthops {
            delta.insert("nexthops".to_string(), json!([old.nexthops, cur.nexthops]));
        }
        if old.distance != cur.distance {
            delta.insert("distance".to_string(), json!([old.distance, cur.distance]));
        }
        if old.metric != cur.metric {
            delta.insert("metric".to_string(), json!([old.metric, cur.metric]));
        }
        if old.best != cur.best {
            delta.insert("best".to_string(), json!([old.best, cur.best]));
        }
        if !delta.is_empty() {
            diff.chgs.push(with_delta(cur, delta));
        }
    }

    for (key, old) in &prev_map {
        if !curr_map.contains_key(key) {
            diff.rems.push(row_value(old));
        }
    }

    diff
}

/// Diff two BGP snapshots of the same coordinate, comparing at the best-path
/// representative.
///
/// Community equality goes through `communities_hash` only; the stored
/// (capped) token list never participates. A change in the leading AS of the
/// path additionally emits a synthetic `upstream_as` delta entry.
pub fn diff_bgp(prev: Vec<BgpRow>, curr: Vec<BgpRow>) -> TableDiff {
    let prev_map: BTreeMap<BgpKey, BgpRow> = collapse_bgp(prev)
        .into_iter()
        .map(|r| (r.key(), r))
        .collect();
    let curr_map: BTreeMap<BgpKey, BgpRow> = collapse_bgp(curr)
        .into_iter()
        .map(|r| (r.key(), r))
        .collect();

    let mut diff = TableDiff::default();

    for (key, cur) in &curr_map {
        let Some(old) = prev_map.get(key) else {
            diff.adds.push(row_value(cur));
            continue;
        };
        let mut delta = Map::new();
        if old.best != cur.best {
            delta.insert("best".to_string(), json!([old.best, cur.best]));
        }
        if old.nh != cur.nh {
            delta.insert("nh".to_string(), json!([old.nh, cur.nh]));
        }
        if old.as_path != cur.as_path {
            delta.insert("as_path".to_string(), json!([old.as_path, cur.as_path]));
            let old_head = head_as(&old.as_path);
            let new_head = head_as(&cur.as_path);
            if old_head != new_head {
                delta.insert("upstream_as".to_string(), json!([old_head, new_head]));
            }
        }
        if old.local_pref != cur.local_pref {
            delta.insert(
                "local_pref".to_string(),
                json!([old.local_pref, cur.local_pref]),
            );
        }
        if old.med != cur.med {
            delta.insert("med".to_string(), json!([old.med, cur.med]));
        }
        if old.origin != cur.origin {
            delta.insert("origin".to_string(), json!([old.origin, cur.origin]));
        }
        if old.communities_hash != cur.communities_hash {
            delta.insert(
                "communities_hash".to_string(),
                json!([old.communities_hash, cur.communities_hash]),
            );
        }
        if old.peer != cur.peer {
            delta.insert("peer".to_string(), json!([old.peer, cur.peer]));
        }
        if !delta.is_empty() {
            diff.chgs.push(with_delta(cur, delta));
        }
    }

    for (key, old) in &prev_map {
        if !curr_map.contains_key(key) {
            diff.rems.push(row_value(old));
        }
    }

    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::NextHop;

    fn ospf_row(nexthops: Vec<(&str, &str)>) -> RibRow {
        let mut row = RibRow {
            vrf: "default".to_string(),
            afi: Afi::Ipv4,
            prefix: "10.0.0.0/24".to_string(),
            protocol: "ospf".to_string(),
            distance: Some(110),
            metric: Some(20),
            best: true,
            nexthops: vec![],
        };
        for (nh, iface) in nexthops {
            row.push_nexthop(NextHop::new(nh, Some(iface.to_string())));
        }
        row
    }

    fn bgp_row(prefix: &str, nh: &str, as_path: &str, peer: &str) -> BgpRow {
        BgpRow {
            vrf: "default".to_string(),
            afi: Afi::Ipv4,
            prefix: prefix.to_string(),
            best: true,
            nh: Some(nh.to_string()),
            as_path: as_path.to_string(),
            local_pref: Some(100),
            med: None,
            origin: Some("i".to_string()),
            communities: vec![],
            communities_hash: "00".to_string(),
            weight: None,
            peer: Some(peer.to_string()),
            originator_id: None,
            cluster_list: None,
        }
    }

    #[test]
    fn test_ecmp_order_flip_is_not_a_change() {
        let prev = ospf_row(vec![("1.1.1.1", "Eth1/1"), ("2.2.2.2", "Eth1/2")]);
        let curr = ospf_row(vec![("2.2.2.2", "Eth1/2"), ("1.1.1.1", "Eth1/1")]);

        let diff = diff_rib(vec![prev], vec![curr]);
        assert!(diff.is_empty());
    }

    #[test]
    fn test_ecmp_add_emits_nexthop_delta() {
        let prev = ospf_row(vec![("1.1.1.1", "Eth1/1")]);
        let curr = ospf_row(vec![("1.1.1.1", "Eth1/1"), ("2.2.2.2", "Eth1/2")]);

        let diff = diff_rib(vec![prev], vec![curr]);
        assert_eq!(diff.chgs.len(), 1);
        assert!(diff.adds.is_empty() && diff.rems.is_empty());

        let delta = &diff.chgs[0]["delta"]["nexthops"];
        assert_eq!(delta[0].as_array().unwrap().len(), 1);
        assert_eq!(delta[1].as_array().unwrap().len(), 2);
        assert_eq!(delta[1][1]["nh"], "2.2.2.2");
    }

    #[test]
    fn test_adds_and_removes() {
        let kept = ospf_row(vec![("1.1.1.1", "Eth1/1")]);
        let mut gone = kept.clone();
        gone.prefix = "10.1.0.0/24".to_string();
        let mut new = kept.clone();
        new.prefix = "10.2.0.0/24".to_string();

        let diff = diff_rib(vec![kept.clone(), gone], vec![kept, new]);
        assert_eq!(diff.summary(), DiffSummary { added: 1, removed: 1, changed: 0 });
        assert_eq!(diff.adds[0]["prefix"], "10.2.0.0/24");
        assert_eq!(diff.rems[0]["prefix"], "10.1.0.0/24");
    }

    #[test]
    fn test_default_route_upstream_change() {
        let prev = bgp_row("0.0.0.0/0", "3.3.3.3", "65001 3356", "3.3.3.3");
        let curr = bgp_row("0.0.0.0/0", "4.4.4.4", "65002 3356", "4.4.4.4");

        let diff = diff_bgp(vec![prev], vec![curr]);
        assert_eq!(diff.chgs.len(), 1);

        let delta = diff.chgs[0]["delta"].as_object().unwrap();
        assert!(delta.contains_key("nh"));
        assert!(delta.contains_key("as_path"));
        assert!(delta.contains_key("peer"));
        assert_eq!(delta["upstream_as"], json!(["65001", "65002"]));
    }

    #[test]
    fn test_same_head_as_has_no_upstream_entry() {
        let prev = bgp_row("10.0.0.0/8", "3.3.3.3", "65001 3356", "p");
        let curr = bgp_row("10.0.0.0/8", "3.3.3.3", "65001 1299", "p");

        let diff = diff_bgp(vec![prev], vec![curr]);
        let delta = diff.chgs[0]["delta"].as_object().unwrap();
        assert!(delta.contains_key("as_path"));
        assert!(!delta.contains_key("upstream_as"));
    }

    #[test]
    fn test_community_equality_is_hash_only() {
        let mut prev = bgp_row("10.0.0.0/8", "3.3.3.3", "65001", "p");
        prev.communities = vec!["65001:1".to_string()];
        prev.communities_hash = "abc".to_string();
        let mut curr = prev.clone();
        // Different stored (truncated) list, same full-list hash: equal.
        curr.communities = vec!["65001:2".to_string()];

        let diff = diff_bgp(vec![prev], vec![curr]);
        assert!(diff.is_empty());
    }

    #[test]
    fn test_both_none_scalars_are_equal() {
        let mut prev = ospf_row(vec![("1.1.1.1", "Eth1/1")]);
        prev.metric = None;
        let mut curr = prev.clone();
        curr.metric = None;

        assert!(diff_rib(vec![prev], vec![curr]).is_empty());
    }
}
