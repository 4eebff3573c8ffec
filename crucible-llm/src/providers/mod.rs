//! Generation provider implementations

pub mod ollama;

use crucible_core::GatewayError;

pub(crate) fn unavailable(provider: &str, message: impl Into<String>) -> GatewayError {
    GatewayError::Unavailable {
        provider: provider.to_string(),
        message: message.into(),
    }
}

pub(crate) fn request_failed(provider: &str, status: u16, message: impl Into<String>) -> GatewayError {
    GatewayError::RequestFailed {
        provider: provider.to_string(),
        status,
        message: message.into(),
    }
}

pub(crate) fn invalid_response(provider: &str, reason: impl Into<String>) -> GatewayError {
    GatewayError::InvalidResponse {
        provider: provider.to_string(),
        reason: reason.into(),
    }
}
