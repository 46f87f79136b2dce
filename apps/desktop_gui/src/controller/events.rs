//! Backend-to-UI events and error modeling for the quotes window.

use client_core::ControllerState;
use shared::{
    domain::Session,
    error::{ErrorCode, HasErrorCode},
};

pub enum UiEvent {
    Info(String),
    SignInRequired,
    SignedIn(Session),
    Registered { email: String },
    State(Box<ControllerState>),
    Error(UiError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiErrorCategory {
    Auth,
    Transport,
    Validation,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiErrorContext {
    BackendStartup,
    SignIn,
    Register,
    General,
}

#[derive(Debug, Clone)]
pub struct UiError {
    category: UiErrorCategory,
    context: UiErrorContext,
    message: String,
}

impl UiError {
    pub fn from_error(context: UiErrorContext, err: &dyn HasErrorCode) -> Self {
        let api_error = err.to_api_error();
        let category = match api_error.code {
            ErrorCode::Unauthorized => UiErrorCategory::Auth,
            ErrorCode::Validation | ErrorCode::Conflict => UiErrorCategory::Validation,
            ErrorCode::Transport | ErrorCode::RateLimited => UiErrorCategory::Transport,
            ErrorCode::NotFound | ErrorCode::Internal => UiErrorCategory::Unknown,
        };
        Self {
            category,
            context,
            message: api_error.message,
        }
    }

    pub fn from_message(context: UiErrorContext, message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        let category = if lower.contains("unauthorized")
            || lower.contains("invalid credential")
            || lower.contains("sign-in")
        {
            UiErrorCategory::Auth
        } else if lower.contains("invalid")
            || lower.contains("missing")
            || lower.contains("malformed")
        {
            UiErrorCategory::Validation
        } else if lower.contains("timeout")
            || lower.contains("timed out")
            || lower.contains("connection")
            || lower.contains("network")
            || lower.contains("disconnected")
        {
            UiErrorCategory::Transport
        } else {
            UiErrorCategory::Unknown
        };

        Self {
            category,
            context,
            message,
        }
    }

    pub fn requires_reauth(&self) -> bool {
        self.category == UiErrorCategory::Auth
    }

    pub fn category(&self) -> UiErrorCategory {
        self.category
    }

    pub fn context(&self) -> UiErrorContext {
        self.context
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
