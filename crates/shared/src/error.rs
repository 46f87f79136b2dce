use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    Conflict,
    NotFound,
    Validation,
    RateLimited,
    Transport,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Errors that can be tagged with a shared [`ErrorCode`].
pub trait HasErrorCode: std::error::Error {
    fn code(&self) -> ErrorCode;

    fn to_api_error(&self) -> ApiError {
        ApiError::new(self.code(), self.to_string())
    }
}
