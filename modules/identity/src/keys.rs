//! X25519 key pairs for the tunnel interface.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use std::fmt;
use x25519_dalek::{PublicKey, StaticSecret};

pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Fresh pair from the OS entropy source.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        KeyPair { secret, public }
    }

    pub fn private_b64(&self) -> String {
        STANDARD.encode(self.secret.to_bytes())
    }

    pub fn public_b64(&self) -> String {
        STANDARD.encode(self.public.as_bytes())
    }

    pub fn public_bytes(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair").field("public", &self.public_b64()).finish_non_exhaustive()
    }
}

pub fn generate_key_pair() -> KeyPair {
    KeyPair::generate()
}

/// Derive the base64 public key for a base64 private key, if it decodes to 32 bytes.
pub fn public_for_private_b64(private_b64: &str) -> Option<String> {
    let raw: [u8; 32] = STANDARD.decode(private_b64.trim()).ok()?.try_into().ok()?;
    let secret = StaticSecret::from(raw);
    Some(STANDARD.encode(PublicKey::from(&secret).as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_are_fresh_and_consistent() {
        let a = generate_key_pair();
        let b = generate_key_pair();
        assert_ne!(a.private_b64(), b.private_b64());
        assert_ne!(a.public_bytes(), b.public_bytes());
        assert_eq!(public_for_private_b64(&a.private_b64()).as_deref(), Some(a.public_b64().as_str()));
        assert_eq!(STANDARD.decode(a.public_b64()).unwrap().len(), 32);
    }

    #[test]
    fn debug_hides_secret() {
        let k = generate_key_pair();
        let s = format!("{:?}", k);
        assert!(!s.contains(&k.private_b64()));
    }

    #[test]
    fn bad_private_keys() {
        assert!(public_for_private_b64("not base64!").is_none());
        assert!(public_for_private_b64(&STANDARD.encode([1u8; 16])).is_none());
    }
}
