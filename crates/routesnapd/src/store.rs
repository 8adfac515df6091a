//! Filesystem snapshot store
//!
//! Layout per coordinate:
//!
//! ```text
//! <root>/<device>/{rib,bgp}/<vrf>.<afi>.latest.json     pretty JSON, mutable
//! <root>/<device>/{rib,bgp}/<vrf>.<afi>.<ts>.json.gz    compact JSON, append-only
//! <root>/<device>/diffs/<vrf>.<afi>.<ts>.json.gz
//! ```
//!
//! Writes order the archive before the latest replace, and the latest replace
//! goes through a temporary sibling plus rename so readers never observe a
//! partial file. Archives are never overwritten; a same-second collision
//! retries with a `-<n>` suffix, which still sorts between its timestamp and
//! the next.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use routesnap_core::{Afi, CoordinateDiff, DiffSummary, TableKind};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// The archive was written but the latest could not be replaced; the
    /// archive stays behind as forensic evidence.
    #[error("latest replace failed after archiving {archive}: {source}")]
    LatestReplace {
        archive: PathBuf,
        source: std::io::Error,
    },
    #[error("could not find a free archive name for {0}")]
    Collision(String),
}

/// Coordinates present in the store for one device, derived from its
/// directory tree.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Coordinates {
    pub rib: Vec<(String, Afi)>,
    pub bgp: Vec<(String, Afi)>,
}

/// One entry of a diff listing.
#[derive(Clone, Debug, Serialize)]
pub struct DiffEntry {
    pub ts: String,
    pub summary: DiffSummary,
}

pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_dir(&self, device: &str, kind: TableKind) -> PathBuf {
        self.root.join(device).join(kind.as_str())
    }

    fn diffs_dir(&self, device: &str) -> PathBuf {
        self.root.join(device).join("diffs")
    }

    /// Read the current snapshot for a coordinate; `None` means the
    /// coordinate has never completed a cycle.
    pub fn read_latest<T: DeserializeOwned>(
        &self,
        device: &str,
        kind: TableKind,
        vrf: &str,
        afi: Afi,
    ) -> Result<Option<Vec<T>>, StoreError> {
        let path = self
            .table_dir(device, kind)
            .join(format!("{vrf}.{afi}.latest.json"));
        match fs::read(&path) {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist a snapshot: archive first (append-only), then replace latest
    /// atomically via a temporary sibling.
    pub fn write_latest_and_archive<T: Serialize>(
        &self,
        device: &str,
        kind: TableKind,
        vrf: &str,
        afi: Afi,
        rows: &[T],
        ts: &str,
    ) -> Result<(), StoreError> {
        let dir = self.table_dir(device, kind);
        fs::create_dir_all(&dir)?;

        let archive = self.fresh_gz_path(&dir, vrf, afi, ts)?;
        write_gz_json(&archive, rows)?;

        // Latest is written sorted-key for diffability; routing each row
        // through a Value sorts its keys (serde_json maps are BTreeMap
        // backed).
        let mut sorted_rows: Vec<Value> = Vec::with_capacity(rows.len());
        for row in rows {
            sorted_rows.push(serde_json::to_value(row)?);
        }

        let latest = dir.join(format!("{vrf}.{afi}.latest.json"));
        let tmp = dir.join(format!("{vrf}.{afi}.latest.json.tmp"));
        let replace = fs::write(&tmp, serde_json::to_vec_pretty(&sorted_rows)?)
            .and_then(|_| fs::rename(&tmp, &latest));
        replace.map_err(|source| StoreError::LatestReplace { archive, source })
    }

    pub fn list_archive_timestamps(
        &self,
        device: &str,
        kind: TableKind,
        vrf: &str,
        afi: Afi,
    ) -> Result<Vec<String>, StoreError> {
        list_timestamps(&self.table_dir(device, kind), vrf, afi)
    }

    pub fn read_archive<T: DeserializeOwned>(
        &self,
        device: &str,
        kind: TableKind,
        vrf: &str,
        afi: Afi,
        ts: &str,
    ) -> Result<Vec<T>, StoreError> {
        let path = self
            .table_dir(device, kind)
            .join(format!("{vrf}.{afi}.{ts}.json.gz"));
        read_gz_json(&path)
    }

    /// Archive one cycle's combined RIB + BGP delta for a coordinate.
    pub fn write_diff(
        &self,
        device: &str,
        vrf: &str,
        afi: Afi,
        ts: &str,
        diff: &CoordinateDiff,
    ) -> Result<(), StoreError> {
        let dir = self.diffs_dir(device);
        fs::create_dir_all(&dir)?;
        let path = self.fresh_gz_path(&dir, vrf, afi, ts)?;
        write_gz_json(&path, diff)
    }

    pub fn read_diff(
        &self,
        device: &str,
        vrf: &str,
        afi: Afi,
        ts: &str,
    ) -> Result<CoordinateDiff, StoreError> {
        let path = self.diffs_dir(device).join(format!("{vrf}.{afi}.{ts}.json.gz"));
        read_gz_json(&path)
    }

    /// All archived diffs for a coordinate, oldest first, with summary
    /// counts.
    pub fn list_diffs(
        &self,
        device: &str,
        vrf: &str,
        afi: Afi,
    ) -> Result<Vec<DiffEntry>, StoreError> {
        let mut entries = Vec::new();
        for ts in list_timestamps(&self.diffs_dir(device), vrf, afi)? {
            let diff = self.read_diff(device, vrf, afi, &ts)?;
            entries.push(DiffEntry {
                ts,
                summary: diff.summary(),
            });
        }
        Ok(entries)
    }

    pub fn enumerate_devices(&self) -> Result<Vec<String>, StoreError> {
        let mut devices = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(devices),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                devices.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        devices.sort();
        Ok(devices)
    }

    pub fn enumerate_coordinates(&self, device: &str) -> Result<Coordinates, StoreError> {
        let mut coords = Coordinates::default();
        for (kind, out) in [
            (TableKind::Rib, &mut coords.rib),
            (TableKind::Bgp, &mut coords.bgp),
        ] {
            let dir = self.table_dir(device, kind);
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let name = entry?.file_name().to_string_lossy().into_owned();
                if let Some(coord) = coordinate_from_filename(&name) {
                    if !out.contains(&coord) {
                        out.push(coord);
                    }
                }
            }
            out.sort();
        }
        Ok(coords)
    }

    fn fresh_gz_path(
        &self,
        dir: &Path,
        vrf: &str,
        afi: Afi,
        ts: &str,
    ) -> Result<PathBuf, StoreError> {
        let base = dir.join(format!("{vrf}.{afi}.{ts}.json.gz"));
        if !base.exists() {
            return Ok(base);
        }
        for n in 1..100 {
            let candidate = dir.join(format!("{vrf}.{afi}.{ts}-{n}.json.gz"));
            if !candidate.exists() {
                return Ok(candidate);
            }
        }
        Err(StoreError::Collision(format!("{vrf}.{afi}.{ts}")))
    }
}

fn write_gz_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let file = fs::File::create(path)?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    serde_json::to_writer(&mut encoder, value)?;
    encoder.finish()?;
    Ok(())
}

fn read_gz_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let file = fs::File::open(path)?;
    let decoder = GzDecoder::new(BufReader::new(file));
    Ok(serde_json::from_reader(decoder)?)
}

/// Timestamps for `<vrf>.<afi>.<ts>.json.gz` files in a directory, sorted.
/// Lexical order equals chronological order for 14-digit UTC stamps.
fn list_timestamps(dir: &Path, vrf: &str, afi: Afi) -> Result<Vec<String>, StoreError> {
    let prefix = format!("{vrf}.{afi}.");
    let mut stamps = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(stamps),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if let Some(rest) = name.strip_prefix(&prefix) {
            if let Some(ts) = rest.strip_suffix(".json.gz") {
                stamps.push(ts.to_string());
            }
        }
    }
    stamps.sort();
    Ok(stamps)
}

/// Recover `(vrf, afi)` from a snapshot filename of either form.
fn coordinate_from_filename(name: &str) -> Option<(String, Afi)> {
    let stem = name
        .strip_suffix(".latest.json")
        .or_else(|| {
            name.strip_suffix(".json.gz")
                .and_then(|s| s.rsplit_once('.'))
                .map(|(head, _ts)| head)
        })?;
    let (vrf, afi) = stem.rsplit_once('.')?;
    Some((vrf.to_string(), afi.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use routesnap_core::{NextHop, RibRow, TableDiff};
    use tempfile::tempdir;

    fn rib_rows() -> Vec<RibRow> {
        vec![RibRow {
            vrf: "default".to_string(),
            afi: Afi::Ipv4,
            prefix: "10.0.0.0/24".to_string(),
            protocol: "ospf".to_string(),
            distance: Some(110),
            metric: Some(20),
            best: true,
            nexthops: vec![NextHop::new("1.1.1.1", Some("Eth1/1".to_string()))],
        }]
    }

    #[test]
    fn test_latest_round_trip() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        assert!(store
            .read_latest::<RibRow>("edge1", TableKind::Rib, "default", Afi::Ipv4)
            .unwrap()
            .is_none());

        store
            .write_latest_and_archive("edge1", TableKind::Rib, "default", Afi::Ipv4, &rib_rows(), "20260801120000")
            .unwrap();

        let loaded = store
            .read_latest::<RibRow>("edge1", TableKind::Rib, "default", Afi::Ipv4)
            .unwrap()
            .unwrap();
        assert_eq!(loaded, rib_rows());

        // No temporary sibling left behind.
        let stray: Vec<_> = fs::read_dir(dir.path().join("edge1").join("rib"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".tmp"))
            .collect();
        assert!(stray.is_empty());
    }

    #[test]
    fn test_latest_is_sorted_key_and_indented() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        store
            .write_latest_and_archive("edge1", TableKind::Rib, "default", Afi::Ipv4, &rib_rows(), "20260801120000")
            .unwrap();

        let text = fs::read_to_string(
            dir.path()
                .join("edge1")
                .join("rib")
                .join("default.ipv4.latest.json"),
        )
        .unwrap();

        // Row object keys appear in lexicographic order in the bytes.
        let positions: Vec<usize> = [
            "\"afi\"",
            "\"best\"",
            "\"distance\"",
            "\"metric\"",
            "\"nexthops\"",
            "\"prefix\"",
            "\"protocol\"",
            "\"vrf\"",
        ]
        .iter()
        .map(|key| text.find(key).unwrap())
        .collect();
        let mut ordered = positions.clone();
        ordered.sort_unstable();
        assert_eq!(positions, ordered);

        // 2-space indentation, and the content still decodes to the rows.
        assert!(text.contains("\n  {"));
        let decoded: Vec<RibRow> = serde_json::from_str(&text).unwrap();
        assert_eq!(decoded, rib_rows());
    }

    #[test]
    fn test_archive_matches_latest() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        store
            .write_latest_and_archive("edge1", TableKind::Rib, "default", Afi::Ipv4, &rib_rows(), "20260801120000")
            .unwrap();

        let archived: Vec<RibRow> = store
            .read_archive("edge1", TableKind::Rib, "default", Afi::Ipv4, "20260801120000")
            .unwrap();
        assert_eq!(archived, rib_rows());
    }

    #[test]
    fn test_same_second_collision_gets_suffix() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        let ts = "20260801120000";
        for _ in 0..3 {
            store
                .write_latest_and_archive("edge1", TableKind::Rib, "default", Afi::Ipv4, &rib_rows(), ts)
                .unwrap();
        }

        let stamps = store
            .list_archive_timestamps("edge1", TableKind::Rib, "default", Afi::Ipv4)
            .unwrap();
        assert_eq!(stamps, vec!["20260801120000", "20260801120000-1", "20260801120000-2"]);
    }

    #[test]
    fn test_archive_listing_is_chronological() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        for ts in ["20260801120100", "20260801115900", "20260801120000"] {
            store
                .write_latest_and_archive("edge1", TableKind::Rib, "default", Afi::Ipv4, &rib_rows(), ts)
                .unwrap();
        }

        let stamps = store
            .list_archive_timestamps("edge1", TableKind::Rib, "default", Afi::Ipv4)
            .unwrap();
        assert_eq!(stamps, vec!["20260801115900", "20260801120000", "20260801120100"]);
    }

    #[test]
    fn test_diff_round_trip_and_listing() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());

        let diff = CoordinateDiff {
            device: "edge1".to_string(),
            vrf: "default".to_string(),
            afi: Afi::Ipv4,
            rib: TableDiff {
                adds: vec![serde_json::json!({"prefix": "10.0.0.0/24"})],
                rems: vec![],
                chgs: vec![],
            },
            bgp: TableDiff::default(),
        };
        store
            .write_diff("edge1", "default", Afi::Ipv4, "20260801120000", &diff)
            .unwrap();

        let listed = store.list_diffs("edge1", "default", Afi::Ipv4).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].ts, "20260801120000");
        assert_eq!(listed[0].summary.added, 1);

        let loaded = store
            .read_diff("edge1", "default", Afi::Ipv4, "20260801120000")
            .unwrap();
        assert_eq!(loaded.rib.adds.len(), 1);
    }

    #[test]
    fn test_enumeration_from_directory() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path());
        store
            .write_latest_and_archive("edge1", TableKind::Rib, "default", Afi::Ipv4, &rib_rows(), "20260801120000")
            .unwrap();
        store
            .write_latest_and_archive("edge1", TableKind::Bgp, "cust-a", Afi::Ipv6, &rib_rows(), "20260801120000")
            .unwrap();
        store
            .write_latest_and_archive("edge2", TableKind::Rib, "default", Afi::Ipv4, &rib_rows(), "20260801120000")
            .unwrap();

        assert_eq!(store.enumerate_devices().unwrap(), vec!["edge1", "edge2"]);

        let coords = store.enumerate_coordinates("edge1").unwrap();
        assert_eq!(coords.rib, vec![("default".to_string(), Afi::Ipv4)]);
        assert_eq!(coords.bgp, vec![("cust-a".to_string(), Afi::Ipv6)]);
    }
}
