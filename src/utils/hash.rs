use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use md5::Md5;
use sha3::{Digest, Keccak256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Lowercase hex md5 of `data`.
pub fn md5_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Md5::digest(data.as_ref()))
}

/// Base64 md5, the encoding object storage expects in `Content-MD5`.
pub fn md5_base64(data: impl AsRef<[u8]>) -> String {
    STANDARD.encode(Md5::digest(data.as_ref()))
}

pub fn generate_pseudorandom_keccak_hash() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let mut hasher = Keccak256::new();
    hasher.update(timestamp.to_string().as_bytes());
    hasher.update(uuid::Uuid::new_v4().as_bytes());

    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_known_vectors() {
        assert_eq!(md5_hex(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex("abc"), "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(md5_base64(""), "1B2M2Y8AsgTpgAmY7PhCfg==");
    }

    #[test]
    fn pseudorandom_hashes_differ() {
        let a = generate_pseudorandom_keccak_hash();
        let b = generate_pseudorandom_keccak_hash();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }
}
