//! Handshake authentication.
//!
//! The client presents a bearer token; verification happens before any
//! session state is created. Comparison is constant-time via SHA-256
//! digests (hashing normalizes lengths so `ct_eq` always compares 32
//! bytes).

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Claims for an authenticated connection.
#[derive(Debug, Clone)]
pub struct Claims {
    pub user_id: String,
}

/// Read the expected token from the environment at startup and hash it.
/// `None` = dev mode (no auth enforced).
pub fn token_hash_from_env(env_var: &str) -> Option<Vec<u8>> {
    match std::env::var(env_var) {
        Ok(token) if !token.is_empty() => {
            tracing::info!(env_var, "client bearer-token auth enabled");
            Some(Sha256::digest(token.as_bytes()).to_vec())
        }
        _ => {
            tracing::warn!(env_var, "client bearer-token auth DISABLED — set {env_var} to enable");
            None
        }
    }
}

/// Verify a presented token against the startup-computed hash.
///
/// Dev mode (no expected hash) admits everyone as `anonymous`. With a
/// hash configured, a missing or mismatched token is refused.
pub fn verify_bearer(expected_hash: Option<&[u8]>, provided: Option<&str>) -> Result<Claims, ()> {
    let Some(expected) = expected_hash else {
        return Ok(Claims {
            user_id: "anonymous".into(),
        });
    };
    let Some(provided) = provided else {
        return Err(());
    };

    let provided_hash = Sha256::digest(provided.as_bytes());
    if provided_hash.ct_eq(expected).into() {
        Ok(Claims {
            user_id: "authenticated".into(),
        })
    } else {
        Err(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(token: &str) -> Vec<u8> {
        Sha256::digest(token.as_bytes()).to_vec()
    }

    #[test]
    fn dev_mode_admits_anonymous() {
        let claims = verify_bearer(None, None).unwrap();
        assert_eq!(claims.user_id, "anonymous");
        // Even a random token is fine in dev mode.
        assert!(verify_bearer(None, Some("whatever")).is_ok());
    }

    #[test]
    fn matching_token_is_accepted() {
        let expected = hash("sesame");
        let claims = verify_bearer(Some(&expected), Some("sesame")).unwrap();
        assert_eq!(claims.user_id, "authenticated");
    }

    #[test]
    fn wrong_or_missing_token_is_refused() {
        let expected = hash("sesame");
        assert!(verify_bearer(Some(&expected), Some("open")).is_err());
        assert!(verify_bearer(Some(&expected), Some("")).is_err());
        assert!(verify_bearer(Some(&expected), None).is_err());
    }
}
