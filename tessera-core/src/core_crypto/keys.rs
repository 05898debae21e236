//! P-256 key material
//!
//! All asymmetric crypto in the protocol runs on NIST P-256 (secp256r1):
//! ECDH for the activation master secret, ECDSA-SHA256 for activation code
//! signatures and offline payloads.
//!
//! Public keys serialize as uncompressed SEC1 point bytes, private keys as
//! the raw 32-byte scalar; both are base64-encoded for storage and wire use.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::{EncodedPoint, PublicKey, SecretKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::error::{ServiceError, ServiceResult};

/// Server-side EC key pair
pub struct EcKeyPair {
    secret: SecretKey,
}

impl EcKeyPair {
    /// Generate a fresh random key pair
    pub fn generate() -> Self {
        Self {
            secret: SecretKey::random(&mut OsRng),
        }
    }

    /// Reconstruct from raw scalar bytes
    pub fn from_private_bytes(bytes: &[u8]) -> ServiceResult<Self> {
        let secret = SecretKey::from_slice(bytes)
            .map_err(|_| ServiceError::InvalidKeyFormat("invalid P-256 scalar".to_string()))?;
        Ok(Self { secret })
    }

    /// Reconstruct from a base64-encoded scalar
    pub fn from_private_base64(encoded: &str) -> ServiceResult<Self> {
        let bytes = Zeroizing::new(
            BASE64
                .decode(encoded)
                .map_err(|_| ServiceError::InvalidKeyFormat("invalid base64".to_string()))?,
        );
        Self::from_private_bytes(&bytes)
    }

    /// Raw 32-byte scalar
    pub fn private_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.secret.to_bytes().to_vec())
    }

    /// Base64 of the raw scalar
    pub fn private_base64(&self) -> String {
        BASE64.encode(self.secret.to_bytes())
    }

    /// Public half of the pair
    pub fn public_key(&self) -> EcPublicKey {
        EcPublicKey {
            key: self.secret.public_key(),
        }
    }

    /// ECDH with a peer public key; returns the 32-byte X coordinate
    pub fn shared_secret(&self, peer: &EcPublicKey) -> [u8; 32] {
        let shared = p256::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer.key.as_affine());
        let mut out = [0u8; 32];
        out.copy_from_slice(shared.raw_secret_bytes().as_slice());
        out
    }

    /// ECDSA-SHA256 signature over `data`, raw 64-byte R||S
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        let signing: SigningKey = SigningKey::from(&self.secret);
        let signature: Signature = signing.sign(data);
        signature.to_bytes().to_vec()
    }
}

/// EC public key (device, server, or ephemeral)
#[derive(Clone)]
pub struct EcPublicKey {
    key: PublicKey,
}

impl EcPublicKey {
    /// Parse uncompressed SEC1 point bytes, rejecting anything that is not
    /// a valid point on the curve
    pub fn from_bytes(bytes: &[u8]) -> ServiceResult<Self> {
        let point = EncodedPoint::from_bytes(bytes)
            .map_err(|_| ServiceError::InvalidKeyFormat("invalid SEC1 encoding".to_string()))?;
        let key = Option::<PublicKey>::from(PublicKey::from_encoded_point(&point))
            .ok_or_else(|| ServiceError::InvalidKeyFormat("not a P-256 point".to_string()))?;
        Ok(Self { key })
    }

    /// Parse a base64-encoded SEC1 point
    pub fn from_base64(encoded: &str) -> ServiceResult<Self> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|_| ServiceError::InvalidKeyFormat("invalid base64".to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Uncompressed SEC1 point bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.key.to_encoded_point(false).as_bytes().to_vec()
    }

    /// Base64 of the uncompressed point
    pub fn to_base64(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    /// The 32-byte affine X coordinate, used in fingerprints
    pub fn x_coordinate(&self) -> [u8; 32] {
        let point = self.key.to_encoded_point(false);
        let mut out = [0u8; 32];
        out.copy_from_slice(point.x().expect("uncompressed point has X"));
        out
    }

    /// Verify a raw R||S ECDSA-SHA256 signature over `data`
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        let Ok(sig) = Signature::from_slice(signature) else {
            return false;
        };
        let verifying = VerifyingKey::from(&self.key);
        verifying.verify(data, &sig).is_ok()
    }
}
