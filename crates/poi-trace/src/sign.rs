//! Signature provider capability and the default Ed25519 implementation.
//!
//! The core does not prescribe a key algorithm; anything that can produce
//! and check a detached signature over bytes plugs in through
//! `SignatureProvider`.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use rand::rngs::OsRng;
use thiserror::Error;

/// Errors raised by signature providers
#[derive(Error, Debug)]
pub enum SignatureError {
    /// The backend failed to produce a signature
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// The provider holds no key for the requested signer
    #[error("Unknown signer: {0}")]
    UnknownSigner(String),

    /// The signature bytes are not well-formed for this provider
    #[error("Malformed signature: {0}")]
    MalformedSignature(String),
}

/// Abstract signing capability: `{ signerId, sign, verify }`
pub trait SignatureProvider {
    /// Stable identifier stored on signed bundles
    fn signer_id(&self) -> &str;

    /// Produce a detached signature over the message bytes
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignatureError>;

    /// Check a detached signature attributed to `signer_id`
    fn verify(
        &self,
        message: &[u8],
        signature: &[u8],
        signer_id: &str,
    ) -> Result<bool, SignatureError>;
}

/// Ed25519-backed signature provider
pub struct Ed25519SignatureProvider {
    signing_key: SigningKey,
    signer_id: String,
}

impl Ed25519SignatureProvider {
    /// Generate a fresh keypair
    pub fn generate(signer_id: impl Into<String>) -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
            signer_id: signer_id.into(),
        }
    }

    /// Restore a provider from raw secret key bytes
    pub fn from_secret_bytes(secret: &[u8; 32], signer_id: impl Into<String>) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(secret),
            signer_id: signer_id.into(),
        }
    }

    /// Public verifying key, for distribution to verifiers
    pub fn verifying_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }
}

impl SignatureProvider for Ed25519SignatureProvider {
    fn signer_id(&self) -> &str {
        &self.signer_id
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignatureError> {
        Ok(self.signing_key.sign(message).to_bytes().to_vec())
    }

    fn verify(
        &self,
        message: &[u8],
        signature: &[u8],
        signer_id: &str,
    ) -> Result<bool, SignatureError> {
        if signer_id != self.signer_id {
            return Err(SignatureError::UnknownSigner(signer_id.to_string()));
        }
        let signature = Signature::from_slice(signature)
            .map_err(|e| SignatureError::MalformedSignature(e.to_string()))?;
        Ok(self
            .signing_key
            .verifying_key()
            .verify(message, &signature)
            .is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify_round_trip() {
        let provider = Ed25519SignatureProvider::generate("signer-a");
        let message = b"poi commitment payload";
        let signature = provider.sign(message).unwrap();
        assert!(provider
            .verify(message, &signature, "signer-a")
            .unwrap());
    }

    #[test]
    fn test_tampered_message_fails() {
        let provider = Ed25519SignatureProvider::generate("signer-a");
        let signature = provider.sign(b"original").unwrap();
        assert!(!provider.verify(b"tampered", &signature, "signer-a").unwrap());
    }

    #[test]
    fn test_unknown_signer_is_an_error() {
        let provider = Ed25519SignatureProvider::generate("signer-a");
        let signature = provider.sign(b"msg").unwrap();
        assert!(matches!(
            provider.verify(b"msg", &signature, "signer-b"),
            Err(SignatureError::UnknownSigner(_))
        ));
    }

    #[test]
    fn test_restored_key_produces_same_signatures() {
        let provider = Ed25519SignatureProvider::generate("signer-a");
        let secret = provider.signing_key.to_bytes();
        let restored = Ed25519SignatureProvider::from_secret_bytes(&secret, "signer-a");
        assert_eq!(
            provider.sign(b"msg").unwrap(),
            restored.sign(b"msg").unwrap()
        );
    }
}
