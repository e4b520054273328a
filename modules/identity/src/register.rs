//! Registration API client with bounded retry.

use crate::backoff::{classify, BackoffPolicy, FailureClass};
use crate::error::{ProvisioningError, TransportError};
use crate::keys::KeyPair;
use crate::Identity;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{info, warn};

pub const DEFAULT_REGISTRATION_URL: &str = "https://api.cloudflareclient.com/v0a3596/reg";
pub const USER_AGENT: &str = "okhttp/3.12.1";
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_else(|_| String::new())
}

/// Body of the registration POST.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationRequest {
    pub key: String,
    pub install_id: String,
    pub fcm_token: String,
    pub warp_enabled: bool,
    pub tos: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub locale: String,
}

impl RegistrationRequest {
    pub fn new(public_key_b64: &str) -> Self {
        RegistrationRequest {
            key: public_key_b64.to_string(),
            install_id: String::new(),
            fcm_token: String::new(),
            warp_enabled: true,
            tos: now_rfc3339(),
            device_type: "Android".into(),
            locale: "en_US".into(),
        }
    }
}

/// Provider-assigned part of an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub peer_public_key: String,
    pub client_id: String,
    pub address_v4: Ipv4Addr,
    pub address_v6: Ipv6Addr,
}

#[derive(Deserialize)]
struct Wire {
    config: Option<WireConfig>,
}

#[derive(Deserialize)]
struct WireConfig {
    client_id: Option<String>,
    peers: Option<Vec<WirePeer>>,
    interface: Option<WireInterface>,
}

#[derive(Deserialize)]
struct WirePeer {
    public_key: Option<String>,
}

#[derive(Deserialize)]
struct WireInterface {
    addresses: Option<WireAddresses>,
}

#[derive(Deserialize)]
struct WireAddresses {
    v4: Option<String>,
    v6: Option<String>,
}

fn non_empty(v: Option<String>, field: &'static str) -> Result<String, ProvisioningError> {
    match v {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(ProvisioningError::MalformedResponse(field)),
    }
}

impl Registration {
    /// Pull the required fields out of a registration response.
    pub fn from_value(v: Value) -> Result<Self, ProvisioningError> {
        let wire: Wire = serde_json::from_value(v).map_err(|_| ProvisioningError::MalformedResponse("config"))?;
        let config = wire.config.ok_or(ProvisioningError::MalformedResponse("config"))?;
        let peer = config
            .peers
            .and_then(|p| p.into_iter().next())
            .ok_or(ProvisioningError::MalformedResponse("config.peers[0]"))?;
        let peer_public_key = non_empty(peer.public_key, "config.peers[0].public_key")?;
        let client_id = non_empty(config.client_id, "config.client_id")?;
        let addrs = config
            .interface
            .and_then(|i| i.addresses)
            .ok_or(ProvisioningError::MalformedResponse("config.interface.addresses"))?;
        let address_v4 = non_empty(addrs.v4, "config.interface.addresses.v4")?
            .parse()
            .map_err(|_| ProvisioningError::MalformedResponse("config.interface.addresses.v4"))?;
        let address_v6 = non_empty(addrs.v6, "config.interface.addresses.v6")?
            .parse()
            .map_err(|_| ProvisioningError::MalformedResponse("config.interface.addresses.v6"))?;
        Ok(Registration { peer_public_key, client_id, address_v4, address_v6 })
    }
}

/// Carries one registration attempt.
#[async_trait]
pub trait RegistrationTransport: Send + Sync {
    async fn post(&self, request: &RegistrationRequest) -> Result<Value, TransportError>;
}

/// HTTPS transport on `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    url: String,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, per_attempt: Duration) -> Result<Self, ProvisioningError> {
        let client = Client::builder()
            .timeout(per_attempt)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ProvisioningError::Client(e.to_string()))?;
        Ok(HttpTransport { client, url: url.into() })
    }
}

#[async_trait]
impl RegistrationTransport for HttpTransport {
    async fn post(&self, request: &RegistrationRequest) -> Result<Value, TransportError> {
        let body = serde_json::to_vec(request).map_err(|e| TransportError::Body(e.to_string()))?;
        let res = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json; charset=UTF-8")
            .body(body)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { TransportError::Timeout } else { TransportError::Network(e.to_string()) })?;
        let status = res.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        res.json::<Value>().await.map_err(|e| {
            if e.is_timeout() { TransportError::Timeout } else { TransportError::Body(e.to_string()) }
        })
    }
}

/// Registers public keys, retrying per its [`BackoffPolicy`].
#[derive(Debug)]
pub struct Registrar<T> {
    transport: T,
    policy: BackoffPolicy,
}

impl<T: RegistrationTransport> Registrar<T> {
    pub fn new(transport: T) -> Self {
        Registrar { transport, policy: BackoffPolicy::default() }
    }

    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Submit `public_key_b64`; 429s back off exponentially, transient failures
    /// wait a flat delay, other HTTP errors fail at once.
    pub async fn register(&self, public_key_b64: &str) -> Result<Registration, ProvisioningError> {
        let request = RegistrationRequest::new(public_key_b64);
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            let err = match self.transport.post(&request).await {
                Ok(v) => return Registration::from_value(v),
                Err(e) => e,
            };
            let class = classify(&err);
            if class == FailureClass::Fatal {
                return Err(match err {
                    TransportError::Status(code) => ProvisioningError::Http(code),
                    other => ProvisioningError::RetriesExhausted { attempts: attempt + 1, last: other },
                });
            }
            match self.policy.delay(attempt, class) {
                Some(wait) if attempt + 1 < attempts => {
                    warn!(attempt = attempt + 1, error = %err, wait_s = wait.as_secs_f64(), "registration failed, retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                _ => return Err(ProvisioningError::RetriesExhausted { attempts: attempt + 1, last: err }),
            }
        }
    }

    /// Generate a key pair, register it and assemble the identity.
    pub async fn provision(&self) -> Result<Identity, ProvisioningError> {
        let keys = KeyPair::generate();
        let reg = self.register(&keys.public_b64()).await?;
        info!(client_id = %reg.client_id, v4 = %reg.address_v4, "identity registered");
        Ok(Identity {
            private_key: keys.private_b64(),
            public_key: keys.public_b64(),
            peer_public_key: reg.peer_public_key,
            client_id: reg.client_id,
            tunnel_address_v4: reg.address_v4,
            tunnel_address_v6: reg.address_v6,
            issued_at: now_rfc3339(),
        })
    }
}
