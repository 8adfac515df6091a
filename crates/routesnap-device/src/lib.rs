//! routesnap-device
//!
//! Everything that talks to a network device: the NX-API JSON-RPC client,
//! the CLI session seam, the acquisition policy, and the reconciliation of
//! raw device JSON into canonical rows.
//!
//! # Modules
//!
//! - [`device`]: inventory device descriptors
//! - [`nxapi`]: JSON-RPC-over-HTTPS client
//! - [`cli`]: CLI session trait + OpenSSH backend + parser seam
//! - [`adapter`]: per-cycle table collection with failure isolation
//! - [`shape`]: Shape A / Shape B reconciliation into rows

pub mod adapter;
pub mod cli;
pub mod device;
pub mod nxapi;
pub mod shape;

pub use adapter::{command_for, AdapterError, Collect, Collected, Collector, RawTable, TableFailure};
pub use cli::{CliError, CliSession, CliTextParser, SshCliSession};
pub use device::Device;
pub use nxapi::{NxapiClient, NxapiConfig, NxapiError};
