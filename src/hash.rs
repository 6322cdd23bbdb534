//! Stable hashing for deterministic assignment.
//!
//! Variant assignment and cosmetic copy selection must produce the same
//! result for the same recipient on every call, across processes and
//! releases, without persisting an assignment table. `std`'s default
//! hasher makes no such stability guarantee, so we use FNV-1a directly.

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x100_0000_01b3;

/// FNV-1a 64-bit hash of a string key.
pub(crate) fn stable_hash(key: &str) -> u64 {
    key.bytes()
        .fold(FNV_OFFSET, |h, b| (h ^ u64::from(b)).wrapping_mul(FNV_PRIME))
}

/// Reduce a key to a bucket in `[0, 100)`.
pub(crate) fn percent_bucket(key: &str) -> u8 {
    (stable_hash(key) % 100) as u8
}
