//! Password hashing for the login exchange.
//!
//! The client never sends its password. It sends the SHA-256 digest masked
//! with a client salt. The server re-masks that value with its own salt before
//! storing it, so the stored bytes and the wire bytes never coincide.

use sha2::{Digest, Sha256};

use crate::packet::PASSWORD_HASH_LEN;

/// Masked digest length.
pub type PasswordHash = [u8; PASSWORD_HASH_LEN];

const SERVER_SALT: PasswordHash = [
    0x1a, 0x2b, 0xbe, 0x14, 0xc1, 0xb0, 0x34, 0xb3, 0x53, 0x94, 0xb0, 0x8f, 0xae, 0x54, 0xcc, 0xdd,
    0x32, 0x17, 0xbd, 0xe2, 0x8a, 0x52, 0xf8, 0xa5, 0xac, 0x17, 0xa4, 0x31, 0x97, 0x99, 0x7a, 0xe9,
];

const CLIENT_SALT: PasswordHash = [
    0x94, 0xf0, 0xe9, 0x9e, 0xad, 0xc3, 0x70, 0x69, 0x18, 0x03, 0x8e, 0x81, 0x44, 0xd8, 0x76, 0x68,
    0x71, 0xf6, 0x41, 0xa4, 0x52, 0x6d, 0xa6, 0xd0, 0xd8, 0xae, 0xd7, 0xb1, 0x12, 0x6e, 0xf9, 0x45,
];

fn mask(value: &PasswordHash, salt: &PasswordHash) -> PasswordHash {
    let mut out = *value;
    for (byte, s) in out.iter_mut().zip(salt) {
        *byte ^= s;
    }
    out
}

/// Hash `password` the way a client sends it in a login packet.
#[must_use]
pub fn hash_password(password: &str) -> PasswordHash {
    let digest: PasswordHash = Sha256::digest(password.as_bytes()).into();
    mask(&digest, &CLIENT_SALT)
}

/// Convert a hash received from a client into its stored form.
#[must_use]
pub fn stored_hash(client_hash: &PasswordHash) -> PasswordHash {
    mask(&mask(client_hash, &CLIENT_SALT), &SERVER_SALT)
}

/// Returns true when `client_hash` was derived from the same password as
/// `stored`.
#[must_use]
pub fn hash_matches(stored: &PasswordHash, client_hash: &PasswordHash) -> bool {
    mask(client_hash, &CLIENT_SALT) == mask(stored, &SERVER_SALT)
}

/// Usernames compare case-insensitively and are stored lowercase.
#[must_use]
pub fn normalize_username(username: &str) -> String { username.trim().to_lowercase() }

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn wire_hash_differs_from_plain_digest() {
        let plain: PasswordHash = Sha256::digest(b"hunter2").into();
        assert_ne!(hash_password("hunter2"), plain);
    }

    #[test]
    fn stored_hash_differs_from_wire_hash() {
        let wire = hash_password("hunter2");
        assert_ne!(stored_hash(&wire), wire);
    }

    #[rstest]
    #[case("hunter2", "hunter2", true)]
    #[case("hunter2", "Hunter2", false)]
    #[case("", "", true)]
    #[case("hunter2", "", false)]
    fn matching(#[case] registered: &str, #[case] attempt: &str, #[case] expected: bool) {
        let stored = stored_hash(&hash_password(registered));
        assert_eq!(hash_matches(&stored, &hash_password(attempt)), expected);
    }

    #[rstest]
    #[case("Ada", "ada")]
    #[case("  EVE ", "eve")]
    fn usernames_normalize(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_username(raw), expected);
    }
}
