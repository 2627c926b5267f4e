//! Content fingerprints embedded in public asset URLs.

/// Number of hex characters kept from the digest and embedded in URLs.
pub const FINGERPRINT_LEN: usize = 10;

/// md5 of the content, lowercase hex, truncated to [`FINGERPRINT_LEN`].
pub fn fingerprint(content: &[u8]) -> String {
    let mut digest = format!("{:x}", md5::compute(content));
    digest.truncate(FINGERPRINT_LEN);
    digest
}

pub fn is_fingerprint(raw: &str) -> bool {
    raw.len() == FINGERPRINT_LEN && raw.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
