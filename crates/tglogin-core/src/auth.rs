//! Port to the remote platform's account-authentication API.
//!
//! One [`AuthClient`] is one temporary connection, created per login attempt
//! and exclusively owned by that attempt's session.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{domain::UserId, errors::AuthError};

pub type AuthResult<T> = std::result::Result<T, AuthError>;

#[async_trait]
pub trait AuthClient: Send + Sync {
    async fn connect(&self) -> AuthResult<()>;

    /// Ask the platform to deliver a login code; returns the code hash that
    /// must accompany the code when verifying it.
    async fn request_code(&self, phone: &str) -> AuthResult<String>;

    /// `Err(AuthError::SecondFactorRequired)` means the code was accepted but
    /// the account also needs its password.
    async fn verify_code(&self, phone: &str, code_hash: &str, code: &str) -> AuthResult<()>;

    async fn verify_password(&self, password: &str) -> AuthResult<()>;

    /// Export the authenticated connection as a portable session string.
    async fn export_portable_session(&self) -> AuthResult<String>;

    /// Close the connection. Must be safe on a never-connected client.
    async fn disconnect(&self) -> AuthResult<()>;
}

pub trait AuthClientFactory: Send + Sync {
    /// A fresh, not yet connected client for `user_id`'s login attempt.
    fn create(&self, user_id: UserId) -> Arc<dyn AuthClient>;
}
