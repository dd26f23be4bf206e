//! Bearer credential suppliers
//!
//! Token acquisition lives outside this service; these providers only hand
//! out whatever credential is currently valid.

use async_trait::async_trait;
use std::path::PathBuf;

use crate::error::{RecoveryError, Result};

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Return a currently valid bearer token
    async fn access_token(&self) -> Result<String>;
}

/// Fixed token from configuration
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn access_token(&self) -> Result<String> {
        if self.0.is_empty() {
            return Err(RecoveryError::Credentials("empty access token".into()));
        }
        Ok(self.0.clone())
    }
}

/// Token kept in a file that an external refresher rewrites
pub struct TokenFile {
    path: PathBuf,
}

impl TokenFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl CredentialProvider for TokenFile {
    async fn access_token(&self) -> Result<String> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            RecoveryError::Credentials(format!("{}: {}", self.path.display(), e))
        })?;
        let token = content.trim();
        if token.is_empty() {
            return Err(RecoveryError::Credentials(format!(
                "{} is empty",
                self.path.display()
            )));
        }
        Ok(token.to_string())
    }
}
