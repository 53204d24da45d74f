//! # Credentials
//!
//! Narrow read-only access to the driver's bearer token.
//!
//! Session storage and refresh live outside this crate. The pipeline and
//! controller only ask "is there a token right now?" and never drain
//! without one.

use std::sync::{Arc, RwLock};

pub trait CredentialSource: Send + Sync {
    /// The token to send, or `None` when signed out.
    fn current_token(&self) -> Option<String>;
}

/// A fixed token (CLI, tests).
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    token: Option<String>,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        StaticCredentials {
            token: Some(token.into()),
        }
    }

    /// No credential at all.
    pub fn signed_out() -> Self {
        StaticCredentials { token: None }
    }

    /// Reads the token from an environment variable, ignoring empty values.
    pub fn from_env(var: &str) -> Self {
        StaticCredentials {
            token: std::env::var(var).ok().filter(|t| !t.trim().is_empty()),
        }
    }
}

impl CredentialSource for StaticCredentials {
    fn current_token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// A token the host app swaps on sign-in, refresh and sign-out.
#[derive(Debug, Clone, Default)]
pub struct SharedCredentials {
    token: Arc<RwLock<Option<String>>>,
}

impl SharedCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, token: impl Into<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = Some(token.into());
        }
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.token.write() {
            *guard = None;
        }
    }
}

impl CredentialSource for SharedCredentials {
    fn current_token(&self) -> Option<String> {
        self.token.read().ok().and_then(|guard| guard.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_credentials() {
        assert_eq!(StaticCredentials::new("abc").current_token().as_deref(), Some("abc"));
        assert_eq!(StaticCredentials::signed_out().current_token(), None);
    }

    #[test]
    fn test_shared_credentials_follow_sign_in_state() {
        let creds = SharedCredentials::new();
        let view = creds.clone();
        assert_eq!(view.current_token(), None);

        creds.set("t-1");
        assert_eq!(view.current_token().as_deref(), Some("t-1"));

        creds.clear();
        assert_eq!(view.current_token(), None);
    }
}
