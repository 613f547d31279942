use bytes::Bytes;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};

use super::CryptoError;

/// A public/secret key pair for detached signatures.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub public_key: Bytes,
    pub secret_key: Bytes,
}

/// A detached-signature capability for one named algorithm.
pub trait Signer: Send + Sync {
    /// The algorithm name recorded in signed envelopes.
    fn algo(&self) -> &'static str;

    /// Signs `data` with the pair's secret key.
    fn sign(&self, data: &[u8], keys: &KeyPair) -> Result<Bytes, CryptoError>;

    /// Verifies a detached signature under `public_key`.
    ///
    /// A malformed signature or key is an error; a well-formed signature
    /// that does not match is `Ok(false)`.
    fn verify(&self, data: &[u8], signature: &[u8], public_key: &[u8])
        -> Result<bool, CryptoError>;

    /// Generates a fresh key pair.
    fn generate_key_pair(&self) -> Result<KeyPair, CryptoError>;
}

/// Stock signer over Ed25519 (32-byte keys, 64-byte signatures).
pub struct Ed25519Signer;

impl Ed25519Signer {
    fn signing_key(secret: &[u8]) -> Result<SigningKey, CryptoError> {
        let seed: &[u8; 32] = secret
            .try_into()
            .map_err(|_| CryptoError::MalformedKey("ed25519 secret key must be 32 bytes".into()))?;
        Ok(SigningKey::from_bytes(seed))
    }

    fn verifying_key(public: &[u8]) -> Result<VerifyingKey, CryptoError> {
        let bytes: &[u8; 32] = public
            .try_into()
            .map_err(|_| CryptoError::MalformedKey("ed25519 public key must be 32 bytes".into()))?;
        VerifyingKey::from_bytes(bytes)
            .map_err(|e| CryptoError::MalformedKey(format!("invalid ed25519 public key: {e}")))
    }
}

impl Signer for Ed25519Signer {
    fn algo(&self) -> &'static str {
        "ed25519"
    }

    fn sign(&self, data: &[u8], keys: &KeyPair) -> Result<Bytes, CryptoError> {
        let key = Self::signing_key(&keys.secret_key)?;
        let signature = key.sign(data);
        Ok(Bytes::copy_from_slice(&signature.to_bytes()))
    }

    fn verify(
        &self,
        data: &[u8],
        signature: &[u8],
        public_key: &[u8],
    ) -> Result<bool, CryptoError> {
        let key = Self::verifying_key(public_key)?;
        let sig_bytes: &[u8; 64] = signature
            .try_into()
            .map_err(|_| CryptoError::MalformedSignature)?;
        let signature = Signature::from_bytes(sig_bytes);
        Ok(key.verify(data, &signature).is_ok())
    }

    fn generate_key_pair(&self) -> Result<KeyPair, CryptoError> {
        let seed: [u8; 32] = rand::random();
        let key = SigningKey::from_bytes(&seed);
        Ok(KeyPair {
            public_key: Bytes::copy_from_slice(&key.verifying_key().to_bytes()),
            secret_key: Bytes::copy_from_slice(&seed),
        })
    }
}
