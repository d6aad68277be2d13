//! Secret wrappers for credentials the hub must never log.
//!
//! Re-exports the [`secrecy`] types. The hub holds three kinds of secrets:
//!
//! - the HMAC key used to verify user access tokens (`JWT_SECRET`)
//! - the Postgres connection string (may embed a password)
//! - the Redis connection string (may embed a password)
//!
//! All three are carried as [`SecretString`] from the moment they are read
//! from the environment. `Debug` output of a `SecretString` is redacted, so
//! any config struct deriving `Debug` stays safe to log.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let database_url = SecretString::from("postgres://chat:hunter2@db/chat");
//! assert!(!format!("{database_url:?}").contains("hunter2"));
//! assert!(database_url.expose_secret().starts_with("postgres://"));
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_connection_string_is_redacted() {
        let url = SecretString::from("redis://:bus-password@redis:6379/0");
        let debug_str = format!("{url:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("bus-password"));
    }

    #[test]
    fn test_expose_secret_returns_signing_key() {
        let key = SecretString::from("signing-key-0123456789");
        assert_eq!(key.expose_secret(), "signing-key-0123456789");
    }

    #[test]
    fn test_settings_struct_with_secret_is_safe() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct BusSettings {
            address: String,
            password: SecretString,
        }

        let json = r#"{"address": "redis:6379", "password": "pubsub-pass"}"#;
        let settings: BusSettings = serde_json::from_str(json).expect("deserialize");

        assert_eq!(settings.password.expose_secret(), "pubsub-pass");

        let debug = format!("{settings:?}");
        assert!(debug.contains("redis:6379"));
        assert!(!debug.contains("pubsub-pass"));
    }
}
