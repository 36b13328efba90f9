//! Principal token format.
//!
//! Tokens are six uppercase alphanumeric characters. The check is purely
//! syntactic; identity is resolved separately through the principal directory.

use uuid::Uuid;

pub const TOKEN_LEN: usize = 6;

const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Returns `true` when `token` matches `^[A-Z0-9]{6}$`.
pub fn is_valid_format(token: &str) -> bool {
    token.len() == TOKEN_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

/// Generate a fresh token from the random bytes of a v4 UUID.
pub fn generate_token() -> String {
    Uuid::new_v4()
        .as_bytes()
        .iter()
        .take(TOKEN_LEN)
        .map(|b| TOKEN_ALPHABET[*b as usize % TOKEN_ALPHABET.len()] as char)
        .collect()
}
