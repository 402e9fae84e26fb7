//! Share combination and verification
//!
//! Merges validated per-node shares into one authoritative result. Two
//! shapes exist:
//!
//! - **Signature shares** are merged by a [`SignatureCombiner`], the seam
//!   behind which the scheme's combination math lives. The assembled
//!   signature is always verified against the target public key before it
//!   is returned.
//! - **Plaintext candidates** (decryption, execution output) are merged by
//!   agreement checking: every candidate must be byte-identical. Any
//!   mismatch indicates a compromised or misbehaving node subset and is
//!   reported as a combine error, never resolved by majority vote.
//!
//! No single node is ever trusted: both shapes demand the configured
//! threshold of shares before producing output.

use ed25519_dalek::{Signature, VerifyingKey};

use crate::error::{Error, Result};
use crate::quorum::Share;

/// Combination math for one signature scheme.
///
/// Shares carry the identity of the node that produced them, so an
/// order-sensitive scheme can key its combination on node indices instead
/// of arrival order.
pub trait SignatureCombiner: Send + Sync {
    /// Merge `threshold` partial signature shares over `message` into one
    /// signature, without verifying it (the caller always verifies).
    fn combine(&self, message: &[u8], shares: &[Share]) -> Result<Vec<u8>>;
}

/// Combiner for networks whose nodes each emit the identical deterministic
/// ed25519 signature from inside the MPC boundary.
///
/// Shares are interchangeable here, so agreement is the whole combination
/// step; an interpolating scheme slots into the same [`SignatureCombiner`]
/// seam.
pub struct ReplicatedEd25519;

impl SignatureCombiner for ReplicatedEd25519 {
    fn combine(&self, _message: &[u8], shares: &[Share]) -> Result<Vec<u8>> {
        let first = shares
            .first()
            .ok_or_else(|| Error::Combine("no signature shares to combine".into()))?;

        for share in &shares[1..] {
            if share.bytes != first.bytes {
                return Err(Error::Combine(format!(
                    "signature shares from {} and {} disagree",
                    first.node, share.node
                )));
            }
        }

        if first.bytes.len() != 64 {
            return Err(Error::Combine(format!(
                "signature share from {} has invalid length {}",
                first.node,
                first.bytes.len()
            )));
        }
        Ok(first.bytes.clone())
    }
}

/// Combine signature shares and verify the assembled signature against
/// the target public key. The unverified signature never escapes.
pub fn combine_signature(
    combiner: &dyn SignatureCombiner,
    message: &[u8],
    shares: &[Share],
    threshold: usize,
    verifying_key: &[u8],
) -> Result<Vec<u8>> {
    require_threshold(shares, threshold)?;
    let signature = combiner.combine(message, shares)?;
    verify_signature(message, &signature, verifying_key)?;
    Ok(signature)
}

/// Combine plaintext candidates by agreement: all `threshold` candidates
/// must be byte-identical.
pub fn combine_agreement(shares: &[Share], threshold: usize) -> Result<Vec<u8>> {
    require_threshold(shares, threshold)?;
    let first = &shares[0];
    for share in &shares[1..] {
        if share.bytes != first.bytes {
            return Err(Error::Combine(format!(
                "share disagreement between {} and {}",
                first.node, share.node
            )));
        }
    }
    Ok(first.bytes.clone())
}

fn require_threshold(shares: &[Share], threshold: usize) -> Result<()> {
    if shares.len() < threshold {
        return Err(Error::Combine(format!(
            "{} shares provided but {} required",
            shares.len(),
            threshold
        )));
    }
    Ok(())
}

fn verify_signature(message: &[u8], signature: &[u8], verifying_key: &[u8]) -> Result<()> {
    let key_bytes: [u8; 32] = verifying_key
        .try_into()
        .map_err(|_| Error::Combine("verifying key must be 32 bytes".into()))?;
    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| Error::Combine(format!("invalid verifying key: {e}")))?;
    let signature = Signature::from_slice(signature)
        .map_err(|e| Error::Combine(format!("malformed assembled signature: {e}")))?;

    key.verify_strict(message, &signature)
        .map_err(|_| Error::Combine("assembled signature failed verification".into()))
}
