//! Error types for the scheduler crate.

use std::fmt;

/// Errors from beat lifecycle operations.
///
/// The beat only fails hard at boot; everything after that is absorbed
/// (logged, entry excluded, or retried next tick) so a single schedule can
/// never take the scheduler down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeatError {
    /// The initial snapshot could not be loaded.
    LoadFailed { reason: String },
}

impl fmt::Display for BeatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoadFailed { reason } => {
                write!(f, "failed to load schedule snapshot: {reason}")
            }
        }
    }
}

impl std::error::Error for BeatError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_failed_display() {
        let err = BeatError::LoadFailed {
            reason: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("connection refused"));
    }
}
