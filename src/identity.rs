// src/identity.rs
// User identity detection for default scoping

/// Detected user identity, injected as the `user` scope dimension when the
/// operator has not pinned one via ENGRAM_SCOPE.
#[derive(Debug, Clone)]
pub struct UserIdentity {
    pub identity: String,
    pub source: IdentitySource,
}

/// How the identity was determined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    /// From ENGRAM_USER_ID environment variable
    Environment,
    /// From system username (USER / USERNAME)
    SystemUser,
}

impl UserIdentity {
    /// Detect current user identity using the fallback chain:
    /// 1. ENGRAM_USER_ID environment variable
    /// 2. System username
    pub fn detect() -> Option<Self> {
        Self::from_env().or_else(Self::from_system_user)
    }

    fn from_env() -> Option<Self> {
        let identity = std::env::var("ENGRAM_USER_ID")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())?;
        Some(Self {
            identity,
            source: IdentitySource::Environment,
        })
    }

    fn from_system_user() -> Option<Self> {
        let identity = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())?;
        Some(Self {
            identity,
            source: IdentitySource::SystemUser,
        })
    }
}
