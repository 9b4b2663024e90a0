//! Inbound-format-aware error envelopes (spec §6.1, §7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Which wire format the inbound request arrived in; error bodies mirror it
/// (spec §6.1 "Error shapes follow the inbound format").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundFormat {
    Anthropic,
    OpenAi,
}

impl InboundFormat {
    /// `…/chat/completions` is OpenAI; everything else is Anthropic (spec
    /// §4.8 step 2).
    pub fn detect(path: &str) -> Self {
        if path.ends_with("/chat/completions") {
            InboundFormat::OpenAi
        } else {
            InboundFormat::Anthropic
        }
    }
}

/// One of the client-observable error kinds from spec §7.
#[derive(Debug, Clone, Copy)]
pub enum ErrorKind {
    ClientInvalid,
    AuthFailed,
    RateLimited,
    NoCandidate,
    Exhausted,
}

impl ErrorKind {
    fn status(self) -> StatusCode {
        match self {
            ErrorKind::ClientInvalid => StatusCode::BAD_REQUEST,
            ErrorKind::AuthFailed => StatusCode::UNAUTHORIZED,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::NoCandidate => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Exhausted => StatusCode::BAD_GATEWAY,
        }
    }

    fn anthropic_type(self) -> &'static str {
        match self {
            ErrorKind::ClientInvalid => "invalid_request_error",
            ErrorKind::AuthFailed => "authentication_error",
            ErrorKind::RateLimited => "rate_limit_error",
            ErrorKind::NoCandidate => "overloaded_error",
            ErrorKind::Exhausted => "api_error",
        }
    }
}

/// Build the error body in whichever shape `format` calls for (spec §6.1):
/// `{type:"error", error:{type, message}}` for Anthropic,
/// `{error:{message, type, code}}` for OpenAI.
pub fn error_response(format: InboundFormat, kind: ErrorKind, message: impl Into<String>) -> Response {
    let status = kind.status();
    let message = message.into();
    let body = match format {
        InboundFormat::Anthropic => json!({
            "type": "error",
            "error": {"type": kind.anthropic_type(), "message": message},
        }),
        InboundFormat::OpenAi => json!({
            "error": {"message": message, "type": kind.anthropic_type(), "code": status.as_u16()},
        }),
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_openai_format_from_chat_completions_suffix() {
        assert_eq!(InboundFormat::detect("/v1/chat/completions"), InboundFormat::OpenAi);
        assert_eq!(InboundFormat::detect("/v1/messages"), InboundFormat::Anthropic);
    }
}
