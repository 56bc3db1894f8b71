//! Secrets needed by sinks, supplied on demand.
//!
//! Secrets never live in [`Settings`](crate::Settings) so the effective
//! configuration can be printed or logged safely.

use std::collections::HashMap;

/// Key of the token used by the GitHub sink.
pub const GITHUB_TOKEN: &str = "github_token";

/// Source of decrypted secrets.
pub trait CredentialStore: Send + Sync {
    /// Returns the secret stored under `key`, if any.
    fn secret(&self, key: &str) -> Option<String>;
}

/// Reads secrets from `FREEZE_SECRET_<KEY>` environment variables.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvCredentials;

impl EnvCredentials {
    fn variable(key: &str) -> String {
        format!("FREEZE_SECRET_{}", key.to_ascii_uppercase())
    }
}
impl CredentialStore for EnvCredentials {
    fn secret(&self, key: &str) -> Option<String> {
        std::env::var(Self::variable(key)).ok().filter(|value| !value.is_empty())
    }
}

/// Fixed in-memory secrets.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials(HashMap<String, String>);

impl StaticCredentials {
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }
}
impl CredentialStore for StaticCredentials {
    fn secret(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_variable_name() {
        assert_eq!(EnvCredentials::variable(GITHUB_TOKEN), "FREEZE_SECRET_GITHUB_TOKEN");
    }

    #[test]
    fn test_static_credentials() {
        let store = StaticCredentials::default().with(GITHUB_TOKEN, "t0k3n");
        assert_eq!(store.secret(GITHUB_TOKEN).as_deref(), Some("t0k3n"));
        assert_eq!(store.secret("other"), None);
    }
}
