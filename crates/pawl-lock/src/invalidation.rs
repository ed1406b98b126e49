use sha2::{Digest, Sha256};

/// Digest of the raw requirement strings a lockfile was generated from.
///
/// The strings are sorted and deduplicated before hashing, so the digest is
/// stable under reordering and repetition but deliberately not under
/// formatting changes. Legacy (version 1) lockfile headers store only this
/// digest and are validated by recomputing it.
pub fn invalidation_digest<'a>(requirements: impl IntoIterator<Item = &'a str>) -> String {
    let mut requirements: Vec<&str> = requirements.into_iter().collect();
    requirements.sort_unstable();
    requirements.dedup();
    let encoded =
        serde_json::to_string(&requirements).expect("Failed to serialize requirement strings");
    hex::encode(Sha256::digest(encoded.as_bytes()))
}
