//! Administrative channel to the cluster monitors.
//!
//! Responses are loosely typed JSON. In particular the OSD id may arrive as
//! `3` or `3.0`, so decoding goes through [`decode_admin_response`] rather
//! than a derived struct.

use anyhow::Result;
use async_trait::async_trait;
use pkg_types::osd::OsdIdentity;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Issues administrative commands to the cluster monitors.
#[async_trait]
pub trait MonClient: Send + Sync {
    /// Send a JSON command and return the raw response body.
    async fn mon_command(&self, command: &Value) -> Result<Vec<u8>>;
}

pub type BoxedMonClient = Arc<dyn MonClient>;

/// Monitor client speaking to a REST gateway (`POST <endpoint>/request`).
pub struct HttpMonClient {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpMonClient {
    pub fn new(endpoint: &str, token: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token,
        })
    }
}

#[async_trait]
impl MonClient for HttpMonClient {
    async fn mon_command(&self, command: &Value) -> Result<Vec<u8>> {
        let url = format!("{}/request", self.endpoint);
        debug!("mon command to {}: {}", url, command);

        let mut req = self.client.post(&url).json(command);
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }
        let resp = req.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("mon command {} failed: {} - {}", prefix_of(command), status, body);
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

fn prefix_of(command: &Value) -> &str {
    command
        .get("prefix")
        .and_then(|p| p.as_str())
        .unwrap_or("<unknown>")
}

/// Send a monitor command, retrying transport failures a bounded number of times.
pub async fn mon_command_with_retry(
    mon: &dyn MonClient,
    command: &Value,
    attempts: u32,
    delay: Duration,
) -> Result<Vec<u8>> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match mon.mon_command(command).await {
            Ok(body) => return Ok(body),
            Err(e) if attempt < attempts => {
                warn!(
                    "mon command {} failed (attempt {}/{}): {}",
                    prefix_of(command),
                    attempt,
                    attempts,
                    e
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(e.context(format!(
                    "mon command {} failed after {} attempt(s)",
                    prefix_of(command),
                    attempts
                )));
            }
        }
    }
}

// ─── Commands ───────────────────────────────────────────────────

/// `auth get-or-create-key` for `entity` with the given capabilities.
pub fn auth_get_or_create_key(entity: &str, caps: &[(&str, &str)]) -> Value {
    let caps: Vec<&str> = caps.iter().flat_map(|(svc, cap)| [*svc, *cap]).collect();
    json!({
        "prefix": "auth get-or-create-key",
        "entity": entity,
        "caps": caps,
        "format": "json",
    })
}

/// `osd create`, allocating (or returning the existing) id for `uuid`.
pub fn osd_create(uuid: &Uuid) -> Value {
    json!({
        "prefix": "osd create",
        "uuid": uuid.to_string(),
        "format": "json",
    })
}

// ─── Response decoding ──────────────────────────────────────────

/// Decoded administrative response. Fields absent from the payload are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminResponse {
    pub key: Option<String>,
    pub osd_id: Option<u32>,
}

impl AdminResponse {
    pub fn require_key(&self) -> Result<&str> {
        self.key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("admin response has no key"))
    }

    pub fn require_osd_id(&self) -> Result<u32> {
        self.osd_id
            .ok_or_else(|| anyhow::anyhow!("admin response has no osdid"))
    }
}

/// Decode a monitor response. Present fields must be well-formed: `key` a
/// non-empty string, `osdid` a non-negative integral number (int or float).
pub fn decode_admin_response(body: &[u8]) -> Result<AdminResponse> {
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        anyhow::anyhow!(
            "malformed admin response: {} (raw: {})",
            e,
            String::from_utf8_lossy(body).trim()
        )
    })?;
    let obj = value
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("admin response is not an object: {}", value))?;

    let key = match obj.get("key") {
        None | Some(Value::Null) => None,
        Some(Value::String(k)) if !k.is_empty() => Some(k.clone()),
        Some(other) => anyhow::bail!("admin response has invalid key: {}", other),
    };
    let osd_id = match obj.get("osdid") {
        None | Some(Value::Null) => None,
        Some(v) => Some(decode_osd_id(v)?),
    };
    Ok(AdminResponse { key, osd_id })
}

/// Decode a response that must carry both an OSD id and its secret.
pub fn decode_osd_identity(body: &[u8]) -> Result<OsdIdentity> {
    let resp = decode_admin_response(body)?;
    Ok(OsdIdentity {
        id: resp.require_osd_id()?,
        key: resp.require_key()?.to_string(),
    })
}

fn decode_osd_id(value: &Value) -> Result<u32> {
    if let Some(id) = value.as_u64() {
        return u32::try_from(id).map_err(|_| anyhow::anyhow!("osdid out of range: {}", id));
    }
    match value.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= 0.0 && f <= u32::MAX as f64 => Ok(f as u32),
        _ => anyhow::bail!("osdid is not a non-negative integer: {}", value),
    }
}
