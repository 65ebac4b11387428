/// Compute a short (16 hex chars) BLAKE3 digest over a sequence of string parts.
///
/// Parts are length-prefixed so `["ab", "c"]` and `["a", "bc"]` hash differently.
#[must_use]
pub fn short_digest(parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    let hex = hasher.finalize().to_hex();
    hex.as_str()[..16].to_string()
}
