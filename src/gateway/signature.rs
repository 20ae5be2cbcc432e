use sha1::{Digest, Sha1};

/// SHA-1 over the lexicographically sorted concatenation of the shared
/// token, timestamp and nonce, hex-encoded.
pub fn challenge_signature(token: &str, timestamp: &str, nonce: &str) -> String {
    let mut parts = [token, timestamp, nonce];
    parts.sort_unstable();

    let mut sha = Sha1::new();
    sha.update(parts.join(""));
    hex::encode(sha.finalize())
}

pub fn verify(token: &str, timestamp: &str, nonce: &str, signature: &str) -> bool {
    challenge_signature(token, timestamp, nonce).eq_ignore_ascii_case(signature.trim())
}
