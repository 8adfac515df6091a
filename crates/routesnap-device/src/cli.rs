//! CLI transport seam
//!
//! The adapter owns the acquisition policy; actual command execution sits
//! behind [`CliSession`] so SSH backends can be swapped (and tests can run
//! against canned output). The bundled implementation shells out to OpenSSH,
//! one subprocess per command; connection reuse across a cycle is an
//! OpenSSH `ControlMaster` concern, not modeled here.

use crate::device::Device;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// CLI transport and decode errors
#[derive(Debug, Error)]
pub enum CliError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
    #[error("command {cmd:?} failed: {detail}")]
    CommandFailed { cmd: String, detail: String },
    #[error("output is not JSON and no CLI parser is configured")]
    NoParser,
    #[error("CLI parser error: {0}")]
    Parse(String),
}

/// One CLI session to one device, held for the duration of a cycle.
#[async_trait]
pub trait CliSession: Send {
    async fn run(&mut self, cmd: &str) -> Result<String, CliError>;
}

/// Black-box structured-CLI parser for output that the device cannot render
/// as JSON itself. Implementations return a JSON-like tree in one of the
/// shapes the reconciler understands.
pub trait CliTextParser: Send + Sync {
    fn parse(&self, cmd: &str, output: &str) -> Result<Value, CliError>;
}

/// CLI session over the system OpenSSH client.
pub struct SshCliSession {
    target: String,
    timeout: Duration,
}

impl SshCliSession {
    pub fn new(device: &Device, timeout: Duration) -> Self {
        Self {
            target: format!("{}@{}", device.username, device.host),
            timeout,
        }
    }
}

#[async_trait]
impl CliSession for SshCliSession {
    async fn run(&mut self, cmd: &str) -> Result<String, CliError> {
        let output = tokio::time::timeout(
            self.timeout,
            Command::new("ssh")
                .arg("-o")
                .arg("BatchMode=yes")
                .arg(&self.target)
                .arg(cmd)
                .output(),
        )
        .await
        .map_err(|_| CliError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(CliError::CommandFailed {
                cmd: cmd.to_string(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
