use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

const MAX_SESSION_KEY_LEN: usize = 128;

/// Opaque token naming one conversation's checkpoint row.
///
/// Supplied by the calling surface (one per browser tab, CLI invocation, ...)
/// and never derived from message content.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey(pub String);

impl SessionKey {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let trimmed = value.trim();

        if trimmed.is_empty() {
            return Err(DomainError::InvalidSessionKey {
                key: value.clone(),
                reason: "session key must not be empty".to_string(),
            });
        }
        if trimmed.len() > MAX_SESSION_KEY_LEN {
            return Err(DomainError::InvalidSessionKey {
                key: value.clone(),
                reason: format!("session key must be at most {MAX_SESSION_KEY_LEN} characters"),
            });
        }
        let allowed = |ch: char| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | ':');
        if !trimmed.chars().all(allowed) {
            return Err(DomainError::InvalidSessionKey {
                key: value.clone(),
                reason: "session key may only contain ASCII letters, digits, `-`, `_`, `.`, `:`"
                    .to_string(),
            });
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The acting user, supplied by the caller and injected into every model call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    pub user_id: i64,
    pub display_name: String,
}

impl SessionIdentity {
    pub fn new(user_id: i64, display_name: impl Into<String>) -> Self {
        Self { user_id, display_name: display_name.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::SessionKey;
    use crate::errors::DomainError;

    #[test]
    fn session_key_accepts_opaque_tokens() {
        let key = SessionKey::parse("tab-7f3a:2026.10").expect("valid key");
        assert_eq!(key.as_str(), "tab-7f3a:2026.10");
        assert_eq!(key.to_string(), "tab-7f3a:2026.10");
    }

    #[test]
    fn session_key_is_trimmed() {
        let key = SessionKey::parse("  s-1 ").expect("valid key");
        assert_eq!(key.0, "s-1");
    }

    #[test]
    fn session_key_rejects_empty_and_unsafe_values() {
        assert!(matches!(SessionKey::parse("   "), Err(DomainError::InvalidSessionKey { .. })));
        assert!(matches!(
            SessionKey::parse("../etc/passwd"),
            Err(DomainError::InvalidSessionKey { .. })
        ));
        assert!(matches!(
            SessionKey::parse("x".repeat(129)),
            Err(DomainError::InvalidSessionKey { .. })
        ));
    }
}
