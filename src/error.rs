use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;

/// Result type alias used throughout the asset pipeline.
pub type AssetResult<T> = Result<T, AssetError>;

/// Error taxonomy for the asset pipeline core.
#[derive(Debug, Clone)]
pub enum AssetError {
    NotFound {
        path: PathBuf,
    },
    IoError {
        path: Option<PathBuf>,
        reason: String,
    },
    DecodeError {
        path: PathBuf,
        reason: String,
    },
    WrongState {
        id: u64,
        expected: String,
        actual: String,
    },
    WouldCreateCycle {
        asset: u64,
        dependency: u64,
    },
    DependencyMissing {
        asset: u64,
        dependency: u64,
    },
    TooLarge {
        size: u64,
        limit: u64,
    },
    BudgetExceeded {
        requested_bytes: u64,
        remaining_bytes: u64,
    },
    ChecksumMismatch {
        path: PathBuf,
    },
    Cancelled {
        id: u64,
    },
    Timeout {
        operation: String,
        after_ms: u64,
    },
    Internal(String),
}

impl fmt::Display for AssetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetError::NotFound { path } => write!(f, "asset not found: {}", path.display()),
            AssetError::IoError { path, reason } => match path {
                Some(p) => write!(f, "io error on '{}': {}", p.display(), reason),
                None => write!(f, "io error: {}", reason),
            },
            AssetError::DecodeError { path, reason } => {
                write!(f, "failed to decode '{}': {}", path.display(), reason)
            }
            AssetError::WrongState { id, expected, actual } => write!(
                f,
                "asset {} in state {} but expected {}",
                id, actual, expected
            ),
            AssetError::WouldCreateCycle { asset, dependency } => write!(
                f,
                "dependency {} -> {} would create a cycle",
                asset, dependency
            ),
            AssetError::DependencyMissing { asset, dependency } => write!(
                f,
                "asset {} depends on {} which is not registered",
                asset, dependency
            ),
            AssetError::TooLarge { size, limit } => {
                write!(f, "item of {} bytes exceeds budget of {} bytes", size, limit)
            }
            AssetError::BudgetExceeded {
                requested_bytes,
                remaining_bytes,
            } => write!(
                f,
                "streaming budget exceeded: requested {} bytes, {} remaining this frame",
                requested_bytes, remaining_bytes
            ),
            AssetError::ChecksumMismatch { path } => {
                write!(f, "checksum mismatch reading cache entry '{}'", path.display())
            }
            AssetError::Cancelled { id } => write!(f, "request for asset {} was cancelled", id),
            AssetError::Timeout { operation, after_ms } => {
                write!(f, "'{}' timed out after {} ms", operation, after_ms)
            }
            AssetError::Internal(reason) => write!(f, "internal error: {}", reason),
        }
    }
}

impl StdError for AssetError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        None
    }
}

impl From<std::io::Error> for AssetError {
    fn from(err: std::io::Error) -> Self {
        AssetError::IoError {
            path: None,
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for AssetError {
    fn from(err: serde_json::Error) -> Self {
        AssetError::Internal(format!("json error: {}", err))
    }
}

impl From<toml::de::Error> for AssetError {
    fn from(err: toml::de::Error) -> Self {
        AssetError::Internal(format!("toml error: {}", err))
    }
}

impl From<rusqlite::Error> for AssetError {
    fn from(err: rusqlite::Error) -> Self {
        AssetError::IoError {
            path: None,
            reason: format!("sqlite error: {}", err),
        }
    }
}

impl From<r2d2::Error> for AssetError {
    fn from(err: r2d2::Error) -> Self {
        AssetError::IoError {
            path: None,
            reason: format!("connection pool error: {}", err),
        }
    }
}

/// Attaches human-readable context to a failing result at a component boundary.
pub trait ErrorContext<T> {
    fn with_context<F>(self, f: F) -> AssetResult<T>
    where
        F: FnOnce() -> String;

    fn with_path_context(self, path: &std::path::Path) -> AssetResult<T>
    where
        Self: Sized,
    {
        self.with_context(|| path.display().to_string())
    }
}

impl<T> ErrorContext<T> for AssetResult<T> {
    fn with_context<F>(self, f: F) -> AssetResult<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|err| AssetError::Internal(format!("{}: {}", f(), err)))
    }
}

/// Whether a failed operation should be retried, and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    None,
    ExponentialBackoff { max_attempts: u32 },
}

impl AssetError {
    /// Errors the spec marks recoverable-by-retry (ChecksumMismatch, transient IoError).
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            AssetError::ChecksumMismatch { .. } | AssetError::IoError { .. } => {
                RetryPolicy::ExponentialBackoff { max_attempts: 3 }
            }
            _ => RetryPolicy::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_identifying_context() {
        let err = AssetError::WrongState {
            id: 7,
            expected: "Loaded".into(),
            actual: "Unloaded".into(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains('7'));
        assert!(msg.contains("Loaded"));
    }

    #[test]
    fn retry_policy_matches_taxonomy() {
        assert_eq!(
            AssetError::DecodeError {
                path: "x".into(),
                reason: "bad".into()
            }
            .retry_policy(),
            RetryPolicy::None
        );
        assert!(matches!(
            AssetError::ChecksumMismatch { path: "x".into() }.retry_policy(),
            RetryPolicy::ExponentialBackoff { max_attempts: 3 }
        ));
    }

    #[test]
    fn with_context_wraps_message() {
        let result: AssetResult<()> = Err(AssetError::Internal("boom".into()));
        let wrapped = result.with_context(|| "loading asset".into());
        let msg = format!("{}", wrapped.unwrap_err());
        assert!(msg.contains("loading asset"));
        assert!(msg.contains("boom"));
    }
}
