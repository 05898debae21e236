//! Online request signatures
//!
//! A request signature is one 8-digit decimal group per authentication
//! factor, joined by dashes. Factor keys derive from the activation master
//! secret; multi-factor signatures aggregate keys by prefix XOR in the
//! canonical factor order, so each additional factor strengthens the
//! preceding group instead of standing alone.
//!
//! Per factor `j` at counter `c`:
//!
//! ```text
//! K_agg[j] = keys[0] ^ ... ^ keys[j]
//! K_ctr[j] = HMAC-SHA256(K_agg[j], counter_block(c))
//! digits[j] = (last 4 bytes of HMAC-SHA256(K_ctr[j], data || '&' || app_secret)
//!              masked to 31 bits) mod 10^8, zero-padded
//! ```
//!
//! Comparison is constant-time; all candidate offsets in the lookahead
//! window are evaluated by the verifier in `core_signature`.

use std::fmt;
use subtle::ConstantTimeEq;

use super::kdf::{counter_bytes, hmac_sha256, Factor};
use crate::error::{ServiceError, ServiceResult};

/// Requested combination of authentication factors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureType {
    Possession,
    Knowledge,
    Biometry,
    PossessionKnowledge,
    PossessionBiometry,
    PossessionKnowledgeBiometry,
}

impl SignatureType {
    /// Factors in canonical derivation order
    pub fn factors(&self) -> Vec<Factor> {
        match self {
            SignatureType::Possession => vec![Factor::Possession],
            SignatureType::Knowledge => vec![Factor::Knowledge],
            SignatureType::Biometry => vec![Factor::Biometry],
            SignatureType::PossessionKnowledge => vec![Factor::Possession, Factor::Knowledge],
            SignatureType::PossessionBiometry => vec![Factor::Possession, Factor::Biometry],
            SignatureType::PossessionKnowledgeBiometry => {
                vec![Factor::Possession, Factor::Knowledge, Factor::Biometry]
            }
        }
    }

    /// Wire name, e.g. `possession_knowledge`
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureType::Possession => "possession",
            SignatureType::Knowledge => "knowledge",
            SignatureType::Biometry => "biometry",
            SignatureType::PossessionKnowledge => "possession_knowledge",
            SignatureType::PossessionBiometry => "possession_biometry",
            SignatureType::PossessionKnowledgeBiometry => "possession_knowledge_biometry",
        }
    }

    /// Parse a wire name
    pub fn parse(s: &str) -> ServiceResult<Self> {
        match s.to_lowercase().as_str() {
            "possession" => Ok(SignatureType::Possession),
            "knowledge" => Ok(SignatureType::Knowledge),
            "biometry" => Ok(SignatureType::Biometry),
            "possession_knowledge" => Ok(SignatureType::PossessionKnowledge),
            "possession_biometry" => Ok(SignatureType::PossessionBiometry),
            "possession_knowledge_biometry" => Ok(SignatureType::PossessionKnowledgeBiometry),
            other => Err(ServiceError::InvalidRequest(format!(
                "unknown signature type: {}",
                other
            ))),
        }
    }

    /// Whether this combination includes the biometry factor
    pub fn uses_biometry(&self) -> bool {
        self.factors().contains(&Factor::Biometry)
    }
}

impl fmt::Display for SignatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Compute the signature string for the given factor keys at a counter
pub fn compute_signature(
    factor_keys: &[[u8; 16]],
    counter: u64,
    data: &[u8],
    application_secret: &[u8],
) -> String {
    let ctr_block = counter_bytes(counter);

    let mut signed_data = Vec::with_capacity(data.len() + 1 + application_secret.len());
    signed_data.extend_from_slice(data);
    signed_data.push(b'&');
    signed_data.extend_from_slice(application_secret);

    let mut aggregated = [0u8; 16];
    let mut groups = Vec::with_capacity(factor_keys.len());
    for key in factor_keys {
        for i in 0..16 {
            aggregated[i] ^= key[i];
        }
        let ctr_key = hmac_sha256(&aggregated, &ctr_block);
        let digest = hmac_sha256(&ctr_key, &signed_data);

        let tail = u32::from_be_bytes([digest[28], digest[29], digest[30], digest[31]]);
        let value = (tail & 0x7FFF_FFFF) % 100_000_000;
        groups.push(format!("{:08}", value));
    }
    groups.join("-")
}

/// Constant-time equality of a candidate signature against an expected one
pub fn signatures_equal(expected: &str, candidate: &str) -> bool {
    // length leak is fine: the group count is public from the factor set
    if expected.len() != candidate.len() {
        return false;
    }
    expected.as_bytes().ct_eq(candidate.as_bytes()).into()
}
