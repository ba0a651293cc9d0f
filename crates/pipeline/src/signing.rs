//! HMAC-SHA256 signing shared by approval tokens and payment webhooks.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::PipelineError;

type HmacSha256 = Hmac<Sha256>;

/// A keyed HMAC-SHA256 signer.
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha256,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

impl Signer {
    /// Builds a signer. An empty secret is refused.
    pub fn new(secret: &[u8]) -> Result<Self, PipelineError> {
        if secret.is_empty() {
            return Err(PipelineError::InvalidSecret);
        }
        let mac = HmacSha256::new_from_slice(secret).map_err(|_| PipelineError::InvalidSecret)?;
        Ok(Self { mac })
    }

    /// Hex-encoded signature of `payload`.
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Checks a hex signature in constant time.
    pub fn verify(&self, payload: &[u8], signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures_are_hex_and_deterministic() {
        let signer = Signer::new(b"secret").unwrap();
        let a = signer.sign(b"payload");
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, signer.sign(b"payload"));
    }

    #[test]
    fn different_secrets_differ() {
        let a = Signer::new(b"secret_a").unwrap().sign(b"payload");
        let b = Signer::new(b"secret_b").unwrap().sign(b"payload");
        assert_ne!(a, b);
    }

    #[test]
    fn verify_accepts_only_the_right_signature() {
        let signer = Signer::new(b"secret").unwrap();
        let sig = signer.sign(b"payload");
        assert!(signer.verify(b"payload", &sig));
        assert!(!signer.verify(b"payload2", &sig));
        assert!(!signer.verify(b"payload", "zz"));
        assert!(!signer.verify(b"payload", "abc"));
    }

    #[test]
    fn empty_secret_is_refused() {
        assert!(matches!(Signer::new(b""), Err(PipelineError::InvalidSecret)));
    }

    #[test]
    fn uppercase_signature_is_accepted() {
        let signer = Signer::new(b"secret").unwrap();
        let sig = signer.sign(b"payload").to_uppercase();
        assert!(signer.verify(b"payload", &sig));
    }
}
