//! routesnap-core
//!
//! Canonical row model, normalization, and delta semantics for route table
//! snapshots. Everything in this crate is pure and deterministic: the same
//! device output, in any order, produces the same rows, the same serialized
//! snapshot, and the same diff.
//!
//! # Modules
//!
//! - [`rows`]: `RibRow`/`BgpRow`, equality keys, duplicate collapse
//! - [`normalize`]: community/AS-path/prefix canonicalization and hashing
//! - [`diff`]: add/remove/change computation with per-attribute deltas
//! - [`error`]: error types

pub mod diff;
pub mod error;
pub mod normalize;
pub mod rows;

pub use diff::{CoordinateDiff, DiffSummary, TableDiff};
pub use error::{Error, Result};
pub use rows::{Afi, BgpKey, BgpRow, NextHop, RibKey, RibRow, TableKind};
