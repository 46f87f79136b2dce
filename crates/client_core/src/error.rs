use shared::{
    error::{ErrorCode, HasErrorCode},
    protocol::PayloadError,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to reach quote endpoint: {0}")]
    Transport(String),
    #[error("quote endpoint returned HTTP {0}")]
    Status(u16),
    #[error("malformed quote payload: {0}")]
    Malformed(String),
    #[error("quote endpoint returned no quotes")]
    Empty,
}

impl From<PayloadError> for FetchError {
    fn from(value: PayloadError) -> Self {
        match value {
            PayloadError::Empty => Self::Empty,
            PayloadError::Malformed(err) => Self::Malformed(err.to_string()),
        }
    }
}

impl HasErrorCode for FetchError {
    fn code(&self) -> ErrorCode {
        match self {
            Self::Transport(_) => ErrorCode::Transport,
            Self::Status(429) => ErrorCode::RateLimited,
            Self::Status(401 | 403) => ErrorCode::Unauthorized,
            Self::Status(_) => ErrorCode::Transport,
            Self::Malformed(_) | Self::Empty => ErrorCode::Validation,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("saved quotes are unavailable until sign-in completes")]
    NotAuthenticated,
    #[error("saved quote storage failed: {0:#}")]
    Backend(#[from] anyhow::Error),
}

impl HasErrorCode for StoreError {
    fn code(&self) -> ErrorCode {
        match self {
            Self::NotAuthenticated => ErrorCode::Unauthorized,
            Self::Backend(_) => ErrorCode::Internal,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing credentials: email and password are required")]
    MissingCredentials,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("an account already exists for {0}")]
    AccountExists(String),
    #[error("authentication backend failed: {0:#}")]
    Backend(#[from] anyhow::Error),
}

impl HasErrorCode for AuthError {
    fn code(&self) -> ErrorCode {
        match self {
            Self::MissingCredentials => ErrorCode::Validation,
            Self::InvalidCredentials => ErrorCode::Unauthorized,
            Self::AccountExists(_) => ErrorCode::Conflict,
            Self::Backend(_) => ErrorCode::Internal,
        }
    }
}
