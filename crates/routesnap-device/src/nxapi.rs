//! JSON-RPC-over-HTTPS client for the vendor management API
//!
//! One POST per `show` command against `/ins`, HTTP Basic auth, optional
//! certificate verification. The useful payload sits at
//! `outputs.output.body`; list-shaped elements are unwrapped to their first
//! entry.

use crate::device::Device;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

/// NX-API errors
#[derive(Debug, Error)]
pub enum NxapiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("device returned status {0}")]
    Status(u16),
    #[error("response has no outputs.output.body element")]
    MissingBody,
}

/// HTTPS client configuration, sourced from the daemon environment.
#[derive(Clone, Debug)]
pub struct NxapiConfig {
    pub scheme: String,
    pub port: u16,
    pub verify: bool,
    pub timeout: Duration,
}

impl Default for NxapiConfig {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            port: 443,
            verify: true,
            timeout: Duration::from_secs(8),
        }
    }
}

/// A client bound to one device for the duration of a cycle. The underlying
/// reqwest client keeps the connection alive across the cycle's commands.
pub struct NxapiClient {
    http: reqwest::Client,
    endpoint: String,
    username: String,
    password: String,
}

impl NxapiClient {
    pub fn new(device: &Device, config: &NxapiConfig) -> Result<Self, NxapiError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify)
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}://{}:{}/ins", config.scheme, device.host, config.port),
            username: device.username.clone(),
            password: device.password.clone(),
        })
    }

    /// Run one `show` command and return its decoded body.
    pub async fn cli_show(&self, cmd: &str) -> Result<Value, NxapiError> {
        let envelope = json!({
            "version": "1.2",
            "type": "cli_show",
            "input": cmd,
            "output_format": "json",
        });
        let response = self
            .http
            .post(&self.endpoint)
            .basic_auth(&self.username, Some(&self.password))
            .json(&envelope)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NxapiError::Status(response.status().as_u16()));
        }
        let decoded: Value = response.json().await?;
        extract_body(&decoded)
    }
}

/// Pull `outputs.output.body` out of a JSON-RPC response, unwrapping
/// list-shaped `output`/`body` elements to their first entry.
pub fn extract_body(response: &Value) -> Result<Value, NxapiError> {
    let mut output = response
        .get("outputs")
        .and_then(|o| o.get("output"))
        .ok_or(NxapiError::MissingBody)?;
    if let Some(first) = output.as_array().and_then(|a| a.first()) {
        output = first;
    }
    let mut body = output.get("body").ok_or(NxapiError::MissingBody)?;
    if let Some(first) = body.as_array().and_then(|a| a.first()) {
        body = first;
    }
    Ok(body.clone())
}
