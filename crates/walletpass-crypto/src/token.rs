//! Random identifiers for issued passes.
//!
//! The authentication token is the bearer credential a device presents in
//! `Authorization: ApplePass <token>`, so it must be unguessable.

use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;

use crate::error::CryptoError;

/// Bytes of entropy in an authentication token (256 bits).
pub const AUTH_TOKEN_BYTES: usize = 32;

/// Bytes of entropy in a generated serial number (160 bits).
pub const SERIAL_NUMBER_BYTES: usize = 20;

fn random_hex(len: usize) -> Result<String, CryptoError> {
    let mut bytes = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| CryptoError::Random(e.to_string()))?;
    Ok(hex::encode(bytes))
}

/// Generate a fresh authentication token (64 hex characters).
pub fn generate_authentication_token() -> Result<String, CryptoError> {
    random_hex(AUTH_TOKEN_BYTES)
}

/// Generate a fresh serial number (40 hex characters).
pub fn generate_serial_number() -> Result<String, CryptoError> {
    random_hex(SERIAL_NUMBER_BYTES)
}

/// Compare two secrets without leaking the position of the first mismatch.
pub fn constant_time_str_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn token_lengths() {
        assert_eq!(generate_authentication_token().unwrap().len(), 64);
        assert_eq!(generate_serial_number().unwrap().len(), 40);
    }

    #[test]
    fn tokens_are_unique() {
        let a = generate_authentication_token().unwrap();
        let b = generate_authentication_token().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tokens_are_lowercase_hex() {
        let token = generate_authentication_token().unwrap();
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn constant_time_eq() {
        assert!(constant_time_str_eq("abc", "abc"));
        assert!(!constant_time_str_eq("abc", "abd"));
        assert!(!constant_time_str_eq("abc", "abcd"));
        assert!(!constant_time_str_eq("", "a"));
    }
}
