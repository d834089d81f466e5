use super::store::{LimitScope, StoreError};
use thiserror::Error;

/// Outcome of a failed code request or verification. Callers branch on the variant.
#[derive(Debug, Error)]
pub enum CodeError {
    #[error("too many code requests ({0:?} limit)")]
    RateLimited(LimitScope),
    #[error("invalid code")]
    InvalidCode,
    #[error("code already used")]
    AlreadyUsed,
    #[error("too many attempts for this code")]
    TooManyAttempts,
    #[error("code expired")]
    Expired,
    #[error("code storage unavailable")]
    StorageUnavailable,
    #[error("code could not be delivered")]
    DeliveryFailed,
    #[error("failed to hash code")]
    Hashing(#[from] crate::hashing::HashError),
    #[error("code accepted but the follow-up action failed")]
    Action(#[source] anyhow::Error),
}

impl From<StoreError> for CodeError {
    fn from(err: StoreError) -> Self {
        tracing::error!("Code store failure: {err}");
        Self::StorageUnavailable
    }
}
