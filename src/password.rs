use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{PasswordHash, SaltString};

use crate::errors::{MarketError, MarketResult};

pub const MIN_PASSWORD_LEN: usize = 8;

/// Argon2id PHC string for `password` with a fresh random salt.
pub fn hash_password(password: &str) -> MarketResult<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::fill(&mut salt_bytes)
        .map_err(|e| MarketError::config(format!("no randomness for password salt: {e}")))?;
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| MarketError::validation("password", e.to_string()))?;
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| MarketError::validation("password", e.to_string()))?
        .to_string();
    Ok(phc)
}

/// False for a mismatch and for a hash that does not parse.
pub fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

pub fn validate_new_password(password: &str) -> MarketResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(MarketError::validation(
            "password",
            format!("must be at least {MIN_PASSWORD_LEN} characters"),
        ));
    }
    Ok(())
}
