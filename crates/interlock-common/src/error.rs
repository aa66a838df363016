//! Errors raised while assembling a process's security settings.

use std::path::PathBuf;

use interlock_core::{ParseStrengthError, ProtocolStrength};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{var}: {source}")]
    Override {
        var: &'static str,
        #[source]
        source: ParseStrengthError,
    },

    #[error("strength {0} requires a non-empty shared secret")]
    MissingSecret(ProtocolStrength),
}
