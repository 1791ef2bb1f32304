//! Registry credential handling
//!
//! A [`RegistryCredential`] only ever leaves this module through
//! [`RegistryCredential::expose`], which the engine calls when building the
//! push request. It has no `Display`, no serde impls, and a redacted `Debug`.

use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Environment variable read when no other token source is given
pub const DEFAULT_TOKEN_ENV: &str = "SITEPACK_REGISTRY_TOKEN";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Registry token variable {0} is not set")]
    MissingEnv(String),

    #[error("Failed to read registry token file {path}: {error}")]
    Unreadable { path: String, error: String },

    #[error("Registry token is empty")]
    Empty,
}

/// Opaque registry token, used once for a push.
#[derive(Clone)]
pub struct RegistryCredential {
    token: String,
}

impl RegistryCredential {
    /// Wraps a token, trimming surrounding whitespace (a trailing newline
    /// from `echo` or a secrets file is common).
    pub fn new(token: impl Into<String>) -> Result<Self, CredentialError> {
        let token = token.into().trim().to_string();
        if token.is_empty() {
            return Err(CredentialError::Empty);
        }
        Ok(Self { token })
    }

    pub fn from_env(var: &str) -> Result<Self, CredentialError> {
        let token =
            std::env::var(var).map_err(|_| CredentialError::MissingEnv(var.to_string()))?;
        Self::new(token)
    }

    pub fn from_file(path: &Path) -> Result<Self, CredentialError> {
        let token = std::fs::read_to_string(path).map_err(|e| CredentialError::Unreadable {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::new(token)
    }

    /// The raw token. Callers must not log or store it.
    pub fn expose(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for RegistryCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RegistryCredential(<redacted>)")
    }
}
