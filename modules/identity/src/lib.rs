//! Client identity provisioning: key generation, registration with retry, and
//! a persisted identity record.

pub mod backoff;
pub mod error;
pub mod keys;
pub mod register;
pub mod store;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};

pub use backoff::{BackoffPolicy, FailureClass};
pub use error::{ProvisioningError, TransportError};
pub use keys::{generate_key_pair, KeyPair};
pub use register::{
    HttpTransport, Registrar, Registration, RegistrationRequest, RegistrationTransport, ATTEMPT_TIMEOUT,
    DEFAULT_REGISTRATION_URL,
};
pub use store::IdentityStore;

/// Everything a tunnel config needs to authenticate this client.
///
/// Replaced whole on regeneration, never edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub private_key: String,
    pub public_key: String,
    /// The provider's peer key from the registration response.
    pub peer_public_key: String,
    pub client_id: String,
    pub tunnel_address_v4: Ipv4Addr,
    pub tunnel_address_v6: Ipv6Addr,
    /// RFC 3339, UTC.
    pub issued_at: String,
}

impl Identity {
    pub fn is_complete(&self) -> bool {
        [&self.private_key, &self.public_key, &self.peer_public_key, &self.client_id, &self.issued_at]
            .iter()
            .all(|s| !s.trim().is_empty())
    }

    /// Whether `public_key` is really derived from `private_key`.
    pub fn keys_match(&self) -> bool {
        keys::public_for_private_b64(&self.private_key).as_deref() == Some(self.public_key.as_str())
    }

    /// Decoded client id; some client formats carry these bytes as a reserved field.
    pub fn client_id_bytes(&self) -> Option<Vec<u8>> {
        STANDARD.decode(self.client_id.trim()).ok()
    }
}
