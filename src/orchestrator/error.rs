use thiserror::Error;
use uuid::Uuid;

use crate::controller::ControllerError;
use crate::resources::ResourceError;

/// Failures surfaced by lifecycle operations. Validation variants are never
/// retried automatically; remote-call variants carry the remote cause and
/// leave the retry decision to the API layer.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Service quota exceeded: {current} of {max} services already active")]
    QuotaExceeded { current: i64, max: i64 },

    #[error("Invalid resource limits: {0}")]
    InvalidResourceLimit(String),

    #[error("Insufficient resources: {0}")]
    InsufficientResources(String),

    #[error("Image not found: {0}")]
    ImageNotFound(Uuid),

    #[error("Image is not ready: {0}")]
    ImageNotReady(String),

    #[error("Image pull failed: {0}")]
    ImagePullFailed(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Invalid service state: {0}")]
    InvalidState(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(Uuid),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Controller(#[from] ControllerError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
