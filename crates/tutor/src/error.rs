use rudiment_services::ServiceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session creation failed: {0}")]
    SessionCreationFailed(#[source] ServiceError),
    #[error("take finalization failed: {0}")]
    TakeFinalizationFailed(#[source] ServiceError),
    #[error("request was superseded by a newer session action")]
    Superseded,
    #[error("no active session")]
    NoActiveSession,
}
