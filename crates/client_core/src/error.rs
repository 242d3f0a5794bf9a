use shared::error::SchemaError;
use thiserror::Error;

use crate::validation::ValidationErrors;

/// Any non-success outcome of a remote list/create/update/delete call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("remote responded with status {0}")]
    Status(u16),
    #[error("unexpected response body: {0}")]
    Decode(String),
    #[error("response does not match the resource schema: {0}")]
    Schema(#[from] SchemaError),
    #[error("remote resource is unavailable")]
    Unavailable,
    #[error("invalid resource url: {0}")]
    InvalidUrl(String),
}

impl RemoteError {
    /// The request never produced an HTTP response.
    pub fn is_transport(&self) -> bool {
        matches!(self, RemoteError::Transport(_) | RemoteError::Unavailable)
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            RemoteError::Status(status.as_u16())
        } else if err.is_decode() {
            RemoteError::Decode(err.to_string())
        } else {
            RemoteError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("record {0} is not in the cache")]
    RecordNotFound(String),
    #[error("record does not match the resource schema: {0}")]
    Invalid(#[from] SchemaError),
    /// The result arrived after the owning store was disposed or its cache
    /// was superseded; it has been discarded.
    #[error("stale result discarded")]
    Stale,
}

impl StoreError {
    pub fn is_stale(&self) -> bool {
        matches!(self, StoreError::Stale)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MutationError {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("destructive action was not confirmed")]
    Declined,
}

impl MutationError {
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            MutationError::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ViewError {
    #[error("view is {0:?}; refresh needs a ready view")]
    NotReady(crate::controller::ViewPhase),
    #[error("view has been unmounted")]
    Unmounted,
    #[error("view is already mounted; use refresh to reload")]
    AlreadyMounted,
    #[error(transparent)]
    Store(#[from] StoreError),
}
