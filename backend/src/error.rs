use thiserror::Error;

/// Error taxonomy shared by the registry, the allocator and the reversal engine.
#[derive(Error, Debug)]
pub enum DeskError {
    /// Malformed input: bad ranges, allocation sums that do not add up.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Duplicate codes, overlapping ranges, numbers already issued or referenced.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Operation not legal from the current batch or item state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl DeskError {
    /// Stable code for programmatic handling by callers of the desk.
    pub fn code(&self) -> &'static str {
        match self {
            DeskError::Validation(_) => "VALIDATION_ERROR",
            DeskError::Conflict(_) => "CONFLICT",
            DeskError::NotFound(_) => "NOT_FOUND",
            DeskError::InvalidState(_) => "INVALID_STATE",
            DeskError::Storage(_) => "STORAGE_ERROR",
        }
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, DeskError::Storage(_))
    }
}

pub type DeskResult<T> = Result<T, DeskError>;
