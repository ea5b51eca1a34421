//! Password contract: Argon2id hashing, credential syntax and registration
//!
//! Hashes are PHC strings, so salt and parameters travel with the hash and
//! verification is done by argon2 itself.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use tracing::info;

use crate::db::UserRepository;
use crate::types::{GateError, Result};

/// Usernames are 2 to 30 ASCII alphanumerics starting with a letter.
const USERNAME_MAX_LEN: usize = 30;

const PASSWORD_MIN_LEN: usize = 8;

/// Hash a password with Argon2id and a fresh random salt.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| GateError::Auth(format!("Failed to hash password: {e}")))
}

/// Check a password against a stored PHC hash.
///
/// A stored hash that does not parse is an error, not a mismatch.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|e| GateError::Auth(format!("Invalid password hash format: {e}")))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Whether `username` matches `[a-zA-Z][a-zA-Z0-9]{1,29}`.
pub fn is_valid_username(username: &str) -> bool {
    let mut chars = username.chars();
    let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_alphabetic());

    starts_with_letter
        && (2..=USERNAME_MAX_LEN).contains(&username.len())
        && chars.all(|c| c.is_ascii_alphanumeric())
}

/// Create a user after checking username syntax and password length.
pub async fn register_user(
    users: &dyn UserRepository,
    username: &str,
    password: &str,
) -> Result<()> {
    if !is_valid_username(username) {
        return Err(GateError::BadRequest("invalid username".into()));
    }
    if password.chars().count() < PASSWORD_MIN_LEN {
        return Err(GateError::BadRequest(format!(
            "password must be at least {PASSWORD_MIN_LEN} characters"
        )));
    }

    let hash = hash_password(password)?;
    users.insert(username, &hash).await?;

    info!(username, "User registered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryUserRepository;

    #[test]
    fn test_argon2id_round_trip() {
        let hash = hash_password("changeit-please").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("changeit-please", &hash).unwrap());
        assert!(!verify_password("changeit-pleasf", &hash).unwrap());
    }

    #[test]
    fn test_corrupt_hash_is_error() {
        assert!(verify_password("whatever", "plaintext").is_err());
    }

    #[test]
    fn test_username_syntax() {
        assert!(is_valid_username("alice"));
        assert!(is_valid_username("b0"));
        assert!(!is_valid_username("a"));
        assert!(!is_valid_username("1alice"));
        assert!(!is_valid_username("al ice"));
        assert!(!is_valid_username("alice:x"));
        assert!(!is_valid_username(&"a".repeat(31)));
        assert!(is_valid_username(&"a".repeat(30)));
    }

    #[tokio::test]
    async fn test_register_user() {
        let users = InMemoryUserRepository::new();
        register_user(&users, "alice", "password1").await.unwrap();

        let hash = users.password_hash("alice").await.unwrap().unwrap();
        assert!(verify_password("password1", &hash).unwrap());

        assert!(register_user(&users, "bob", "short").await.is_err());
        assert!(register_user(&users, "-bob", "password1").await.is_err());
        assert!(register_user(&users, "alice", "password2").await.is_err());
    }
}
