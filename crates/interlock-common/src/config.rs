//! Security configuration for a process taking part in a multiplayer session.
//!
//! Loaded from a JSON file, then optionally overridden from the environment:
//!
//! ```json
//! { "strength": "t4", "shared_secret": "open sesame" }
//! ```

use std::fmt;
use std::fs;
use std::path::Path;

use interlock_core::ProtocolStrength;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable overriding [`SecurityConfig::strength`].
pub const ENV_STRENGTH: &str = "INTERLOCK_STRENGTH";

/// Environment variable overriding [`SecurityConfig::shared_secret`].
pub const ENV_SHARED_SECRET: &str = "INTERLOCK_SHARED_SECRET";

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Strength this process declares to every peer.
    pub strength: ProtocolStrength,
    /// Password shared by all participants of a session.
    pub shared_secret: String,
}

impl SecurityConfig {
    pub fn new(strength: ProtocolStrength, shared_secret: impl Into<String>) -> Self {
        Self {
            strength,
            shared_secret: shared_secret.into(),
        }
    }

    /// Read a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| Error::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), strength = %config.strength, "loaded security config");
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable source.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_STRENGTH) {
            self.strength = value.parse().map_err(|source| Error::Override {
                var: ENV_STRENGTH,
                source,
            })?;
        }
        if let Some(value) = lookup(ENV_SHARED_SECRET) {
            self.shared_secret = value;
        }
        Ok(())
    }

    /// Reject configurations that cannot authenticate.
    pub fn validate(&self) -> Result<()> {
        if self.strength.requires_shared_secret() && self.shared_secret.is_empty() {
            return Err(Error::MissingSecret(self.strength));
        }
        Ok(())
    }
}

impl fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("strength", &self.strength)
            .field("shared_secret", &"<redacted>")
            .finish()
    }
}
