//! Common utilities and types shared across chat hub crates.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for user access token verification
pub mod jwt;
