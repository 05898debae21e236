//! Cryptographic primitives
//!
//! P-256 key agreement and signing, HMAC-based key derivation, AES-CBC,
//! activation code generation, fingerprints, status blobs, request
//! signatures, and the ECIES-shaped envelope. Everything above this module
//! works with these primitives and never touches curve or cipher types
//! directly.

pub mod aes;
pub mod codes;
pub mod ecies;
pub mod fingerprint;
pub mod kdf;
pub mod keys;
pub mod signature;
pub mod status_blob;

pub use ecies::{EciesEnvelope, EciesPayload};
pub use kdf::Factor;
pub use keys::{EcKeyPair, EcPublicKey};
pub use signature::SignatureType;
pub use status_blob::StatusBlob;
