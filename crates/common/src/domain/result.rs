use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Required field absent: {0}")]
    MissingField(String),

    #[error("Illegal event type: {0}")]
    IllegalType(String),

    #[error("Invalid event payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid authentication token")]
    Unauthenticated,

    #[error("Dispensing {requested} exceeds remaining capacity {remaining} of device {device_id}")]
    OverCapacity {
        device_id: String,
        requested: u32,
        remaining: u32,
    },

    #[error("{event_type} is not accepted for device {device_id} in state {state}")]
    InvalidTransition {
        device_id: String,
        event_type: String,
        state: String,
    },

    #[error("Device record was modified concurrently: {0}")]
    VersionConflict(String),

    #[error("Registry operation timed out: {0}")]
    RegistryTimeout(String),

    #[error("Relay unavailable: {0}")]
    RelayUnavailable(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}

impl DomainError {
    /// Short machine-readable name of the error, used in request logs
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::MissingField(_) => "missing_field",
            DomainError::IllegalType(_) => "illegal_type",
            DomainError::InvalidPayload(_) => "invalid_payload",
            DomainError::Unauthenticated => "unauthenticated",
            DomainError::OverCapacity { .. } => "over_capacity",
            DomainError::InvalidTransition { .. } => "invalid_transition",
            DomainError::VersionConflict(_) => "version_conflict",
            DomainError::RegistryTimeout(_) => "registry_timeout",
            DomainError::RelayUnavailable(_) => "relay_unavailable",
            DomainError::ValidationError(_) => "validation_error",
            DomainError::RepositoryError(_) => "repository_error",
        }
    }
}
