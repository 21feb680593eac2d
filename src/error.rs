use thiserror::Error;

use crate::tracker::IdentityId;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackError {
    #[error("identity {0} is not registered in the hub")]
    IdentityNotFound(IdentityId),
    #[error("identity {0} is dead and can no longer be updated")]
    IdentityDead(IdentityId),
    #[error("shape mismatch for {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: String,
        got: String,
    },
    #[error("invalid tracker config: {0}")]
    InvalidConfig(String),
    #[error("assignment failed: {0}")]
    Assignment(String),
}

impl TrackError {
    pub(crate) fn shape(what: &'static str, expected: impl ToString, got: impl ToString) -> Self {
        Self::ShapeMismatch {
            what,
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackError>;
