//! Crash-point derivation and the multiplier growth curve.
//!
//! Both halves of the fairness contract live here: the server-side
//! derivation used when a round is generated, and the public re-computation
//! behind the verification endpoint. The two must stay bit-exact with each
//! other, since players re-run the formula after the seed is revealed.

use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Multiplier value representing exactly 1.00x.
pub const BASELINE_MULTIPLIER: u64 = 100;

/// Rolls below this threshold crash instantly at 1.00x.
const INSTANT_CRASH_THRESHOLD: f64 = 0.01;

/// Payout scale applied to the crash curve.
const HOUSE_EDGE_FACTOR: f64 = 0.99;

/// Derive the crash point for a round, in multiplier hundredths.
pub fn crash_point(server_seed: &[u8], client_seed: &str, nonce: u64, max_hundredths: u64) -> u64 {
    let raw = raw_roll(server_seed, client_seed, nonce);
    crash_point_from_raw(raw, max_hundredths)
}

/// Map a uniform roll in [0, 1) onto the crash curve.
pub(crate) fn crash_point_from_raw(raw: f64, max_hundredths: u64) -> u64 {
    if raw < INSTANT_CRASH_THRESHOLD {
        return BASELINE_MULTIPLIER;
    }
    let point = (HOUSE_EDGE_FACTOR / (1.0 - raw) * 100.0).floor() as u64;
    point.min(max_hundredths)
}

/// Uniform roll in [0, 1) from the first 48 bits of
/// HMAC-SHA256(server_seed, "{client_seed}:{nonce}").
fn raw_roll(server_seed: &[u8], client_seed: &str, nonce: u64) -> f64 {
    let mut mac =
        HmacSha256::new_from_slice(server_seed).expect("HMAC accepts keys of any length");
    mac.update(format!("{}:{}", client_seed, nonce).as_bytes());
    let digest = mac.finalize().into_bytes();

    let mut value: u64 = 0;
    for byte in &digest[..6] {
        value = (value << 8) | u64::from(*byte);
    }
    value as f64 / (1u64 << 48) as f64
}

/// Multiplier at `elapsed_ms` into a running round, in hundredths.
///
/// Truncated to the same two-decimal resolution as the crash point so the
/// crash-threshold comparison is exact.
pub fn multiplier_at(elapsed_ms: u64, growth_constant: f64) -> u64 {
    ((growth_constant * elapsed_ms as f64).exp() * 100.0).floor() as u64
}

/// SHA-256 of a seed, used for chain links and round commitments.
pub fn seed_hash(seed: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(seed);
    hasher.finalize().into()
}

/// Result of re-running the formula for a revealed seed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedRound {
    pub crash_point: f64,
    pub server_seed_hash: String,
}

/// Recompute the crash point and seed hash from revealed material.
pub fn verify(
    server_seed_hex: &str,
    client_seed: &str,
    nonce: u64,
    max_hundredths: u64,
) -> Result<VerifiedRound, hex::FromHexError> {
    let seed = hex::decode(server_seed_hex)?;
    let point = crash_point(&seed, client_seed, nonce, max_hundredths);
    Ok(VerifiedRound {
        crash_point: point as f64 / 100.0,
        server_seed_hash: hex::encode(seed_hash(&seed)),
    })
}
