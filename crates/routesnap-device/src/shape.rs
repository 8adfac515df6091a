//! Table-shape reconciliation
//!
//! Two JSON dialects arrive here: the structured-parser tree ("Shape A",
//! `vrf -> address_family -> routes`) and the vendor tabular tree ("Shape B",
//! `TABLE_x -> ROW_x` where every `ROW_x` is either one object or a list of
//! objects). Both are reduced to canonical rows. Unknown fields are ignored;
//! nothing in this module returns an error, and a malformed subtree simply
//! contributes no rows.

use routesnap_core::normalize::{
    community_hash, normalize_as_path, normalize_communities, normalize_prefix, truthy,
};
use routesnap_core::rows::{collapse_bgp, collapse_rib, MAX_STORED_COMMUNITIES};
use routesnap_core::{Afi, BgpRow, NextHop, RibRow};
use serde_json::Value;

/// Reconcile a raw RIB payload of either shape into collapsed canonical rows.
pub fn parse_rib(payload: &Value, vrf: &str, afi: Afi) -> Vec<RibRow> {
    let rows = if payload.get("TABLE_vrf").is_some() {
        shape_b_rib(payload, vrf, afi)
    } else {
        shape_a_rib(payload, vrf, afi)
    };
    collapse_rib(rows)
}

/// Reconcile a raw BGP payload of either shape into best-path-collapsed rows.
pub fn parse_bgp(payload: &Value, vrf: &str, afi: Afi) -> Vec<BgpRow> {
    let rows = if payload.get("TABLE_vrf").is_some() {
        shape_b_bgp(payload, vrf, afi)
    } else {
        shape_a_bgp(payload, vrf, afi)
    };
    collapse_bgp(rows)
}

/// Flatten the dict-or-list polymorphism: a single object becomes a
/// one-element list, a list passes through, null vanishes.
pub fn as_list(value: &Value) -> Vec<&Value> {
    match value {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

/// Look up `parent[table][row]` and flatten it to a list.
fn table_rows<'a>(parent: &'a Value, table: &str, row: &str) -> Vec<&'a Value> {
    parent
        .get(table)
        .and_then(|t| t.get(row))
        .map(as_list)
        .unwrap_or_default()
}

/// Index-keyed mapping or plain list, flattened to entries.
fn map_or_list(value: &Value) -> Vec<&Value> {
    match value {
        Value::Object(map) => map.values().collect(),
        other => as_list(other),
    }
}

fn field<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|k| obj.get(*k))
        .filter(|v| !v.is_null())
}

fn field_str(obj: &Value, keys: &[&str]) -> Option<String> {
    field(obj, keys).and_then(|v| v.as_str()).map(|s| s.trim().to_string())
}

/// Integer field that may arrive as a JSON number or a numeric string.
fn field_i64(obj: &Value, keys: &[&str]) -> Option<i64> {
    match field(obj, keys)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn field_truthy(obj: &Value, keys: &[&str]) -> bool {
    field(obj, keys).map(truthy).unwrap_or(false)
}

/// A canonical prefix belongs to exactly one family; drop rows that leaked
/// through an absent address-family label.
fn prefix_in_family(prefix: &str, afi: Afi) -> bool {
    prefix.contains(':') == (afi == Afi::Ipv6)
}

/// Map device origin spellings onto the canonical `i|e|?` letters.
fn origin_letter(obj: &Value, keys: &[&str]) -> Option<String> {
    let raw = field_str(obj, keys)?.to_ascii_lowercase();
    match raw.as_str() {
        "igp" | "i" => Some("i".to_string()),
        "egp" | "e" => Some("e".to_string()),
        "incomplete" | "?" => Some("?".to_string()),
        _ => None,
    }
}

/// Normalized community list (capped for storage) plus the full-list hash.
fn communities_fields(raw: Option<&Value>) -> (Vec<String>, String) {
    let full = normalize_communities(raw.unwrap_or(&Value::Null));
    let hash = community_hash(&full);
    let mut stored = full;
    stored.truncate(MAX_STORED_COMMUNITIES);
    (stored, hash)
}

// ---------------------------------------------------------------------------
// Shape A: structured parser output
// ---------------------------------------------------------------------------

fn shape_a_rib(root: &Value, vrf: &str, afi: Afi) -> Vec<RibRow> {
    let mut out = Vec::new();
    let Some(af_map) = root
        .get("vrf")
        .and_then(|v| v.get(vrf))
        .and_then(|v| v.get("address_family"))
        .and_then(Value::as_object)
    else {
        return out;
    };

    for (label, af) in af_map {
        if !afi.matches_label(label) {
            continue;
        }
        let Some(routes) = af.get("routes").and_then(Value::as_object) else {
            continue;
        };
        for (prefix_key, route) in routes {
            let Ok(prefix) = normalize_prefix(prefix_key, afi) else {
                continue;
            };
            if !prefix_in_family(&prefix, afi) {
                continue;
            }
            let mut row = RibRow {
                vrf: vrf.to_string(),
                afi,
                prefix,
                protocol: field_str(route, &["source_protocol", "protocol"]).unwrap_or_default(),
                distance: field_i64(route, &["route_preference", "distance", "preference"]),
                metric: field_i64(route, &["metric"]),
                best: field_truthy(route, &["active", "best"]),
                nexthops: Vec::new(),
            };
            if let Some(nh) = route.get("next_hop") {
                shape_a_nexthops(nh, &mut row);
            }
            out.push(row);
        }
    }
    out
}

fn shape_a_nexthops(nh: &Value, row: &mut RibRow) {
    match nh {
        // Flat list of bare addresses.
        Value::Array(items) => {
            for item in items {
                if let Some(addr) = item.as_str() {
                    row.push_nexthop(NextHop::new(addr.trim(), None));
                }
            }
        }
        Value::String(addr) => row.push_nexthop(NextHop::new(addr.trim(), None)),
        Value::Object(_) => {
            if let Some(list) = nh.get("next_hop_list") {
                for entry in map_or_list(list) {
                    let Some(addr) = field_str(entry, &["next_hop", "nh"]) else {
                        continue;
                    };
                    let iface = field_str(entry, &["outgoing_interface", "ifname", "interface"]);
                    row.push_nexthop(NextHop::new(addr, iface));
                }
            }
        }
        _ => {}
    }
}

fn shape_a_bgp(root: &Value, vrf: &str, afi: Afi) -> Vec<BgpRow> {
    let mut out = Vec::new();
    let Some(af_map) = root
        .get("vrf")
        .and_then(|v| v.get(vrf))
        .and_then(|v| v.get("address_family"))
        .and_then(Value::as_object)
    else {
        return out;
    };

    for (label, af) in af_map {
        if !afi.matches_label(label) {
            continue;
        }
        let Some(routes) = af.get("routes").and_then(Value::as_object) else {
            continue;
        };
        for (prefix_key, route) in routes {
            let Ok(prefix) = normalize_prefix(prefix_key, afi) else {
                continue;
            };
            if !prefix_in_family(&prefix, afi) {
                continue;
            }
            let Some(index) = route.get("index") else {
                continue;
            };
            for path in map_or_list(index) {
                let (communities, communities_hash) =
                    communities_fields(field(path, &["community", "communities"]));
                let best = field_truthy(path, &["bestpath", "best"])
                    || field_str(path, &["status_codes"])
                        .map(|s| s.contains('>'))
                        .unwrap_or(false);
                out.push(BgpRow {
                    vrf: vrf.to_string(),
                    afi,
                    prefix: prefix.clone(),
                    best,
                    nh: field_str(path, &["next_hop", "nexthop"]),
                    as_path: normalize_as_path(
                        field(path, &["as_path", "path"]).unwrap_or(&Value::Null),
                    ),
                    local_pref: field_i64(path, &["localpref", "local_pref"]),
                    med: field_i64(path, &["med", "metric"]),
                    origin: origin_letter(path, &["origin_codes", "origin"]),
                    communities,
                    communities_hash,
                    weight: field_i64(path, &["weight"]),
                    peer: field_str(path, &["peer", "neighbor"]),
                    originator_id: field_str(path, &["originator_id"]),
                    cluster_list: field_str(path, &["cluster_list"]),
                });
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Shape B: vendor tabular output
// ---------------------------------------------------------------------------

fn shape_b_rib(root: &Value, vrf: &str, afi: Afi) -> Vec<RibRow> {
    let mut out = Vec::new();
    for vrow in table_rows(root, "TABLE_vrf", "ROW_vrf") {
        if field_str(vrow, &["vrf-name-out"]).as_deref() != Some(vrf) {
            continue;
        }
        for arow in table_rows(vrow, "TABLE_addrf", "ROW_addrf") {
            if let Some(label) = field_str(arow, &["addrf"]) {
                if !afi.matches_label(&label) {
                    continue;
                }
            }
            for prow in table_rows(arow, "TABLE_prefix", "ROW_prefix") {
                let Some(raw_prefix) = field_str(prow, &["ipprefix", "ipv6prefix"]) else {
                    continue;
                };
                let Ok(prefix) = normalize_prefix(&raw_prefix, afi) else {
                    continue;
                };
                if !prefix_in_family(&prefix, afi) {
                    continue;
                }
                let mut paths = table_rows(prow, "TABLE_paths", "ROW_paths");
                if paths.is_empty() {
                    paths = table_rows(prow, "TABLE_path", "ROW_path");
                }
                for path in paths {
                    let mut row = RibRow {
                        vrf: vrf.to_string(),
                        afi,
                        prefix: prefix.clone(),
                        protocol: field_str(path, &["clientname", "protocol"]).unwrap_or_default(),
                        distance: field_i64(path, &["pref", "preference"]),
                        metric: field_i64(path, &["metric"]),
                        best: field_truthy(path, &["ubest", "best"]),
                        nexthops: Vec::new(),
                    };
                    if let Some(addr) = field_str(path, &["ipnexthop", "ipv6nexthop", "nexthop"]) {
                        let iface = field_str(path, &["ifname", "outgoing_interface"]);
                        row.push_nexthop(NextHop::new(addr, iface));
                    }
                    out.push(row);
                }
            }
        }
    }
    out
}

fn shape_b_bgp(root: &Value, vrf: &str, afi: Afi) -> Vec<BgpRow> {
    let mut out = Vec::new();
    for vrow in table_rows(root, "TABLE_vrf", "ROW_vrf") {
        if field_str(vrow, &["vrf-name-out"]).as_deref() != Some(vrf) {
            continue;
        }
        for arow in table_rows(vrow, "TABLE_af", "ROW_af") {
            if let Some(label) = field_str(arow, &["af-name", "afname", "af"]) {
                if !afi.matches_label(&label) {
                    continue;
                }
            }
            for prow in table_rows(arow, "TABLE_prefix", "ROW_prefix") {
                let Some(raw_prefix) =
                    field_str(prow, &["ipprefix", "ipv6prefix", "nonipprefix"])
                else {
                    continue;
                };
                let Ok(prefix) = normalize_prefix(&raw_prefix, afi) else {
                    continue;
                };
                if !prefix_in_family(&prefix, afi) {
                    continue;
                }
                for path in table_rows(prow, "TABLE_path", "ROW_path") {
                    let (communities, communities_hash) =
                        communities_fields(field(path, &["community", "communities"]));
                    out.push(BgpRow {
                        vrf: vrf.to_string(),
                        afi,
                        prefix: prefix.clone(),
                        best: field_truthy(path, &["best", "bestpath"]),
                        nh: field_str(path, &["ipnexthop", "ipv6nexthop", "nexthop"]),
                        as_path: normalize_as_path(
                            field(path, &["aspath", "as-path", "as_path"]).unwrap_or(&Value::Null),
                        ),
                        local_pref: field_i64(path, &["localpref"]),
                        med: field_i64(path, &["med", "metric"]),
                        origin: origin_letter(path, &["origin"]),
                        communities,
                        communities_hash,
                        weight: field_i64(path, &["weight"]),
                        peer: field_str(path, &["neighborid", "neighbor", "peer"]),
                        originator_id: field_str(path, &["originatorid", "originator_id"]),
                        cluster_list: field_str(path, &["clusterlist", "cluster_list"]),
                    });
                }
            }
        }
    }
    out
}
