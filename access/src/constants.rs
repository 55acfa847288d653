//! Cryptographic and format constants.

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Largest payload the credential codec will seal.
pub const MAX_CREDENTIAL_PAYLOAD_BYTES: usize = 4096;

/// Longest accepted credential rotation interval (one year).
pub const MAX_ROTATION_SECS: i64 = 365 * 24 * 60 * 60;

/// Associated-data domain tags.
///
/// Every AEAD operation binds one of these so ciphertexts produced for one
/// purpose can never be opened as another.
pub mod domains {
    /// Sealed ticket credentials.
    pub const CREDENTIAL: &[u8] = b"festival-access/credential/v1";

    /// Biometric templates at rest.
    pub const BIOMETRIC_TEMPLATE: &[u8] = b"festival-access/biometric/v1";

    /// Data keys wrapped under the master key.
    pub const KEY_WRAP: &[u8] = b"festival-access/key-wrap/v1";

    /// HKDF salt for deriving the master key from the configured secret.
    pub const MASTER_KEY_SALT: &[u8] = b"festival-access/master/v1";
}

/// Public token format.
pub mod token {
    /// Alphabet for the random token segment (Crockford base32, no I/L/O/U).
    pub const ALPHABET: &[u8] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

    /// Length of the random token segment.
    pub const RANDOM_LEN: usize = 10;

    /// Hex characters of the ticket ID used as token prefix.
    pub const TICKET_PREFIX_LEN: usize = 8;

    /// Attempts before giving up on a colliding token.
    pub const MAX_ISSUE_ATTEMPTS: usize = 3;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_alphabet_is_unambiguous() {
        assert_eq!(token::ALPHABET.len(), 32);
        for c in [b'I', b'L', b'O', b'U'] {
            assert!(!token::ALPHABET.contains(&c));
        }
    }

    #[test]
    fn test_domains_are_distinct() {
        assert_ne!(domains::CREDENTIAL, domains::BIOMETRIC_TEMPLATE);
        assert_ne!(domains::CREDENTIAL, domains::KEY_WRAP);
    }
}
