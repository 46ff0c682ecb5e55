//! Proxmox VE REST client.
//!
//! Talks to `/api2/json` with API-token authentication. Every response is
//! wrapped in a `{"data": ...}` envelope; errors carry the HTTP status and
//! whatever body Proxmox returned.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use pvekeep_core::{KeeperConfig, NodeInfo, PowerAction, VmId, VmInfo};

use crate::ActionGateway;
use crate::error::{GatewayError, GatewayResult};

const DEFAULT_PORT: u16 = 8006;

/// Connection settings for a Proxmox VE cluster.
#[derive(Debug, Clone)]
pub struct ProxmoxSettings {
    /// Hostname, `host:port`, or a full `http(s)://` base URL.
    pub host: String,
    pub user: String,
    pub token_name: String,
    pub token_value: String,
    /// Verify the server certificate (Proxmox ships self-signed ones).
    pub verify_ssl: bool,
    pub timeout: Duration,
}

impl ProxmoxSettings {
    pub fn from_config(config: &KeeperConfig) -> Self {
        Self {
            host: config.proxmox.host.clone(),
            user: config.proxmox.user.clone(),
            token_name: config.proxmox.token_name.clone(),
            token_value: config.proxmox.token_value.clone(),
            verify_ssl: config.proxmox.verify_ssl,
            timeout: config.request_timeout(),
        }
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

/// [`ActionGateway`] backed by the Proxmox VE HTTP API.
#[derive(Debug, Clone)]
pub struct ProxmoxClient {
    http: reqwest::Client,
    base_url: String,
}

impl ProxmoxClient {
    pub fn new(settings: ProxmoxSettings) -> GatewayResult<Self> {
        let base_url = base_url_for(&settings.host)?;

        let token = token_header(&settings.user, &settings.token_name, &settings.token_value);
        let mut auth = HeaderValue::from_str(&token)
            .map_err(|e| GatewayError::Config(format!("API token is not a valid header: {e}")))?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .danger_accept_invalid_certs(!settings.verify_ssl)
            .user_agent(concat!("pvekeep/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::Config(format!("failed to build HTTP client: {e}")))?;

        if !settings.verify_ssl {
            warn!(%base_url, "TLS certificate verification disabled for Proxmox API");
        }
        info!(%base_url, user = %settings.user, "Proxmox client created");

        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> GatewayResult<T> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "GET");
        let resp = self.http.get(&url).send().await.map_err(transport_error)?;
        decode(resp).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str) -> GatewayResult<T> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "POST");
        let resp = self.http.post(&url).send().await.map_err(transport_error)?;
        decode(resp).await
    }
}

#[async_trait]
impl ActionGateway for ProxmoxClient {
    async fn list_nodes(&self) -> GatewayResult<Vec<NodeInfo>> {
        self.get("/nodes").await
    }

    async fn list_vms(&self, node: &str) -> GatewayResult<Vec<VmInfo>> {
        self.get(&format!("/nodes/{node}/qemu")).await
    }

    async fn vm_status(&self, node: &str, vmid: VmId) -> GatewayResult<VmInfo> {
        let mut info: VmInfo = self
            .get(&format!("/nodes/{node}/qemu/{vmid}/status/current"))
            .await
            .map_err(|e| missing_vm(e, node, vmid))?;
        // status/current omits vmid on some versions.
        if info.vmid == 0 {
            info.vmid = vmid;
        }
        Ok(info)
    }

    async fn power(&self, node: &str, vmid: VmId, action: PowerAction) -> GatewayResult<String> {
        let upid: String = self
            .post(&format!("/nodes/{node}/qemu/{vmid}/status/{}", action.as_str()))
            .await
            .map_err(|e| missing_vm(e, node, vmid))?;
        debug!(%node, vmid, %action, %upid, "power task submitted");
        Ok(upid)
    }
}

/// Build the `/api2/json` base URL for a configured host.
fn base_url_for(host: &str) -> GatewayResult<String> {
    let host = host.trim().trim_end_matches('/');
    if host.is_empty() {
        return Err(GatewayError::Config("Proxmox host is empty".to_string()));
    }

    if host.starts_with("http://") || host.starts_with("https://") {
        return Ok(format!("{host}/api2/json"));
    }

    // Bracketed IPv6 literals carry their own colons.
    let has_port = match host.rsplit_once(':') {
        Some((h, port)) => port.parse::<u16>().is_ok() && (!h.contains(':') || h.ends_with(']')),
        None => false,
    };
    if has_port {
        Ok(format!("https://{host}/api2/json"))
    } else {
        Ok(format!("https://{host}:{DEFAULT_PORT}/api2/json"))
    }
}

fn token_header(user: &str, token_name: &str, token_value: &str) -> String {
    format!("PVEAPIToken={user}!{token_name}={token_value}")
}

/// Proxmox answers requests for a VM that does not exist on the node with a
/// 500 naming the missing config file.
fn missing_vm(err: GatewayError, node: &str, vmid: VmId) -> GatewayError {
    match err {
        GatewayError::Api { status: 500, message } if message.contains("does not exist") => {
            GatewayError::VmNotFound {
                node: node.to_string(),
                vmid,
            }
        }
        other => other,
    }
}

fn transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Unavailable(format!("request timed out: {e}"))
    } else {
        GatewayError::Unavailable(e.to_string())
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> GatewayResult<T> {
    let status = resp.status();
    let body = resp.bytes().await.map_err(transport_error)?;

    if !status.is_success() {
        let text = String::from_utf8_lossy(&body).trim().to_string();
        let message = if text.is_empty() {
            status.canonical_reason().unwrap_or("unknown error").to_string()
        } else {
            text
        };
        return Err(GatewayError::Api {
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_slice::<Envelope<T>>(&body)
        .map(|env| env.data)
        .map_err(|e| GatewayError::Decode(e.to_string()))
}
