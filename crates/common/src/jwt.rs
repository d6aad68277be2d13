//! User access token verification.
//!
//! User tokens are issued by the REST layer (login/registration) and signed
//! with HS256 using the shared `JWT_SECRET`. The hub only verifies them, on
//! the WebSocket handshake, to learn which user is connecting.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Only HS256 is accepted; `alg` confusion is rejected by `jsonwebtoken`
//! - `exp` is required, `nbf` is enforced when present
//! - `iat` may not be further in the future than the clock skew allowance
//! - Error messages are generic; details are logged at debug level
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::verify_user_token;
//!
//! let claims = verify_user_token(token, secret.expose_secret().as_bytes())?;
//! tracing::info!(user_id = %claims.user_id, "Token accepted");
//! ```

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Maximum accepted token size in bytes (8KB).
///
/// Typical user tokens are 250-400 bytes. Anything larger is rejected
/// before base64 decoding or HMAC verification.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Allowed clock skew for `iat` in the future.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

/// Errors that can occur while verifying a user token.
///
/// Every variant renders the same client-facing message so that callers can
/// return `to_string()` without leaking why a token was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token is not a structurally valid JWT.
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Signature did not verify against the configured secret.
    #[error("The access token is invalid or expired")]
    InvalidSignature,

    /// Token `exp` is in the past.
    #[error("The access token is invalid or expired")]
    Expired,

    /// Token `nbf` is in the future.
    #[error("The access token is invalid or expired")]
    NotYetValid,

    /// Token `iat` claim is too far in the future.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,
}

/// Claims carried by a user access token.
///
/// `email` is redacted in Debug output.
#[derive(Clone, Serialize, Deserialize)]
pub struct UserClaims {
    /// Authenticated user.
    pub user_id: Uuid,

    /// Display name at issue time.
    #[serde(default)]
    pub username: String,

    /// Account email (redacted in Debug output).
    #[serde(default)]
    pub email: String,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,

    /// Not-before timestamp (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,

    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Subject, the user id in text form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
}

impl fmt::Debug for UserClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserClaims")
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field("email", &"[REDACTED]")
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("nbf", &self.nbf)
            .field("iss", &self.iss)
            .finish_non_exhaustive()
    }
}

/// Verify an HS256 user token and return its claims.
///
/// # Errors
///
/// Returns a [`JwtValidationError`] describing why the token was refused.
pub fn verify_user_token(token: &str, secret: &[u8]) -> Result<UserClaims, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_nbf = true;

    let data = decode::<UserClaims>(token, &DecodingKey::from_secret(secret), &validation)
        .map_err(|e| {
            tracing::debug!(target: "common.jwt", error = %e, "Token rejected");
            match e.kind() {
                ErrorKind::ExpiredSignature => JwtValidationError::Expired,
                ErrorKind::ImmatureSignature => JwtValidationError::NotYetValid,
                ErrorKind::InvalidSignature => JwtValidationError::InvalidSignature,
                _ => JwtValidationError::MalformedToken,
            }
        })?;

    validate_iat(data.claims.iat, DEFAULT_CLOCK_SKEW)?;

    Ok(data.claims)
}

/// Reject tokens whose `iat` is more than `clock_skew` in the future.
///
/// # Errors
///
/// Returns `JwtValidationError::IatTooFarInFuture` when the check fails.
pub fn validate_iat(iat: i64, clock_skew: Duration) -> Result<(), JwtValidationError> {
    validate_iat_at(iat, clock_skew, chrono::Utc::now().timestamp())
}

pub(crate) fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    // clock_skew is a few minutes; no wrap
    #[allow(clippy::cast_possible_wrap)]
    let max_iat = now + clock_skew.as_secs() as i64;

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &[u8] = b"test-secret-for-user-tokens-0001";

    fn claims_at(now: i64) -> UserClaims {
        let user_id = Uuid::new_v4();
        UserClaims {
            user_id,
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            exp: now + 3600,
            iat: now,
            nbf: Some(now),
            iss: Some("chat-app".to_string()),
            sub: Some(user_id.to_string()),
        }
    }

    fn sign(claims: &UserClaims, secret: &[u8]) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token_round_trips_claims() {
        let claims = claims_at(chrono::Utc::now().timestamp());
        let token = sign(&claims, SECRET);

        let verified = verify_user_token(&token, SECRET).unwrap();
        assert_eq!(verified.user_id, claims.user_id);
        assert_eq!(verified.username, "alice");
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let claims = claims_at(chrono::Utc::now().timestamp());
        let token = sign(&claims, b"some-other-secret-entirely-00000");

        let result = verify_user_token(&token, SECRET);
        assert_eq!(result.unwrap_err(), JwtValidationError::InvalidSignature);
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let now = chrono::Utc::now().timestamp();
        let mut claims = claims_at(now - 7200);
        claims.exp = now - 3600;
        let token = sign(&claims, SECRET);

        let result = verify_user_token(&token, SECRET);
        assert_eq!(result.unwrap_err(), JwtValidationError::Expired);
    }

    #[test]
    fn test_garbage_is_malformed() {
        let result = verify_user_token("not-a-jwt", SECRET);
        assert_eq!(result.unwrap_err(), JwtValidationError::MalformedToken);
    }

    #[test]
    fn test_oversized_token_rejected_before_parsing() {
        let token = "a".repeat(MAX_JWT_SIZE_BYTES + 1);
        let result = verify_user_token(&token, SECRET);
        assert_eq!(result.unwrap_err(), JwtValidationError::TokenTooLarge);
    }

    #[test]
    fn test_iat_boundary() {
        let now = 1_700_000_000;
        assert!(validate_iat_at(now + 300, DEFAULT_CLOCK_SKEW, now).is_ok());
        assert_eq!(
            validate_iat_at(now + 301, DEFAULT_CLOCK_SKEW, now).unwrap_err(),
            JwtValidationError::IatTooFarInFuture
        );
    }

    #[test]
    fn test_error_messages_are_uniform() {
        let variants = [
            JwtValidationError::TokenTooLarge,
            JwtValidationError::MalformedToken,
            JwtValidationError::InvalidSignature,
            JwtValidationError::Expired,
            JwtValidationError::NotYetValid,
            JwtValidationError::IatTooFarInFuture,
        ];
        for v in variants {
            assert_eq!(v.to_string(), "The access token is invalid or expired");
        }
    }

    #[test]
    fn test_debug_redacts_email() {
        let claims = claims_at(chrono::Utc::now().timestamp());
        let debug = format!("{claims:?}");
        assert!(debug.contains("alice"));
        assert!(!debug.contains("alice@example.com"));
    }
}
