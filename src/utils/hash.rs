// src/utils/hash.rs

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use rand::{Rng, RngCore, seq::SliceRandom};

use crate::{config::TEMP_PASSWORD_LENGTH, error::AppError};

const LOWER: &[u8] = b"abcdefghijkmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ";
const DIGITS: &[u8] = b"23456789";
const SYMBOLS: &[u8] = b"!@#$%&*?";

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);

    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::InternalServerError(e.to_string()))?
        .to_string();

    Ok(password_hash)
}

/// A malformed stored hash counts as a mismatch, not a server error.
pub fn verify_password(password: &str, password_hash: &str) -> bool {
    match PasswordHash::new(password_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!("Stored password hash is unreadable: {}", e);
            false
        }
    }
}

/// Temporary password mailed to first-time users.
///
/// Always contains at least one lowercase letter, one uppercase letter, one digit and
/// one symbol. Look-alike characters (0/O, 1/l/I) are left out.
pub fn generate_temp_password() -> String {
    let mut rng = rand::rngs::OsRng;
    let pools = [LOWER, UPPER, DIGITS, SYMBOLS];
    let all: Vec<u8> = pools.concat();

    let mut chars: Vec<u8> = pools
        .iter()
        .map(|pool| pool[rng.gen_range(0..pool.len())])
        .collect();
    while chars.len() < TEMP_PASSWORD_LENGTH {
        chars.push(all[rng.gen_range(0..all.len())]);
    }
    chars.shuffle(&mut rng);

    chars.into_iter().map(char::from).collect()
}

/// Opaque token for password reset links: 32 random bytes, hex encoded.
pub fn generate_reset_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let hash = hash_password("secret1").unwrap();
        assert!(verify_password("secret1", &hash));
        assert!(!verify_password("secret2", &hash));
        assert!(!verify_password("secret1", "not-a-hash"));
    }

    #[test]
    fn temp_password_has_every_class() {
        for _ in 0..50 {
            let pwd = generate_temp_password();
            assert_eq!(pwd.len(), TEMP_PASSWORD_LENGTH);
            assert!(pwd.bytes().any(|b| LOWER.contains(&b)));
            assert!(pwd.bytes().any(|b| UPPER.contains(&b)));
            assert!(pwd.bytes().any(|b| DIGITS.contains(&b)));
            assert!(pwd.bytes().any(|b| SYMBOLS.contains(&b)));
        }
    }

    #[test]
    fn reset_tokens_are_hex_and_unique() {
        let a = generate_reset_token();
        let b = generate_reset_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
