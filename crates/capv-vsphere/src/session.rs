//! Lazily established, re-validated vCenter session.

use std::fmt;
use std::sync::Arc;

use capv_common::config::VsphereSpec;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::api::{VsphereApi, VsphereConnector};
use crate::{Error, Result};

/// vCenter SDK endpoint and credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// SDK URL, always ending in `/sdk`
    pub url: Url,
    /// Login user
    pub username: String,
    /// Login password
    pub password: String,
    /// Skip TLS certificate verification
    pub insecure: bool,
}

impl Endpoint {
    /// Parse `server` (host or URL) and point it at the SDK path
    pub fn new(
        server: &str,
        username: impl Into<String>,
        password: impl Into<String>,
        insecure: bool,
    ) -> Result<Self> {
        let server = server.trim();
        if server.is_empty() {
            return Err(capv_common::Error::validation_for_field(
                "VcenterServer",
                "vCenter server must be set",
            )
            .into());
        }
        let raw = if server.contains("://") {
            server.to_string()
        } else {
            format!("https://{}", server)
        };
        let mut url = Url::parse(&raw)?;
        normalize_sdk_path(&mut url);
        Ok(Self {
            url,
            username: username.into(),
            password: password.into(),
            insecure,
        })
    }

    /// Endpoint from the vSphere section of a provisioning config
    pub fn from_spec(spec: &VsphereSpec) -> Result<Self> {
        Self::new(
            &spec.vcenter_server,
            spec.vsphere_username.clone(),
            spec.vsphere_password.clone(),
            spec.insecure,
        )
    }

    /// Host (and port) without scheme or path
    pub fn host(&self) -> String {
        match (self.url.host_str(), self.url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            _ => String::new(),
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.url.as_str())
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .field("insecure", &self.insecure)
            .finish()
    }
}

fn normalize_sdk_path(url: &mut Url) {
    let path = url.path().trim_end_matches('/').to_string();
    if !path.ends_with("sdk") {
        url.set_path(&format!("{}/sdk", path));
    }
}

/// Hands out a live session, logging in again when the cached one expired.
///
/// Callers are serialized on the lock, so at most one login is in flight.
pub struct SessionManager {
    connector: Arc<dyn VsphereConnector>,
    endpoint: Endpoint,
    client: Mutex<Option<Arc<dyn VsphereApi>>>,
}

impl SessionManager {
    /// No session until the first [`client`](Self::client) call
    pub fn new(connector: Arc<dyn VsphereConnector>, endpoint: Endpoint) -> Self {
        Self {
            connector,
            endpoint,
            client: Mutex::new(None),
        }
    }

    /// Endpoint this session logs into
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Cached client if its session is still active, otherwise a fresh login
    pub async fn client(&self) -> Result<Arc<dyn VsphereApi>> {
        let mut cached = self.client.lock().await;

        if let Some(client) = cached.as_ref() {
            match client.session_is_active().await {
                Ok(true) => return Ok(Arc::clone(client)),
                Ok(false) => debug!(url = %self.endpoint.url, "session expired"),
                Err(e) => warn!(url = %self.endpoint.url, error = %e, "session check failed"),
            }
        }

        let client = self.connector.login(&self.endpoint).await.map_err(|e| match e {
            Error::Api { message, .. } => Error::api("login", message),
            other => other,
        })?;
        info!(url = %self.endpoint.url, user = %self.endpoint.username, "logged in to vCenter");
        *cached = Some(Arc::clone(&client));
        Ok(client)
    }
}
