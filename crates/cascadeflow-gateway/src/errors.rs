//! Upstream/internal error → on-wire error mapping for both API families.

use axum::http::StatusCode;
use serde_json::{Value, json};

use cascadeflow_core::CascadeError;

/// Which wire dialect the client speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFamily {
    OpenAi,
    Anthropic,
}

/// A fully mapped client-facing error.
#[derive(Debug, Clone)]
pub struct WireError {
    pub status: StatusCode,
    pub error_type: &'static str,
    pub message: String,
}

impl WireError {
    pub fn body(&self, family: ApiFamily) -> Value {
        match family {
            ApiFamily::OpenAi => json!({
                "error": {
                    "message": self.message,
                    "type": self.error_type,
                    "code": null,
                }
            }),
            ApiFamily::Anthropic => json!({
                "error": {
                    "type": self.error_type,
                    "message": self.message,
                }
            }),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error_type: "invalid_request_error",
            message: message.into(),
        }
    }

    /// In-stream error chunk for a stream that already sent headers.
    pub fn to_stream_chunk(&self, id: &str, model: &str) -> Value {
        json!({
            "id": id,
            "object": "chat.completion.chunk",
            "model": model,
            "error": {
                "message": self.message,
                "type": self.error_type,
                "code": self.status.as_u16(),
            },
            "choices": [{"index": 0, "delta": {}, "finish_reason": "error"}],
        })
    }
}

/// Pull the most useful message out of an upstream payload.
fn upstream_message(message: &str, payload: &Option<Value>) -> String {
    if let Some(payload) = payload {
        if let Some(m) = payload["error"]["message"].as_str() {
            return format!("{message}: {m}");
        }
    }
    message.to_string()
}

/// Map an internal error to the client-facing status and error type.
pub fn map_error(err: &CascadeError, family: ApiFamily) -> WireError {
    let openai = family == ApiFamily::OpenAi;
    match err {
        CascadeError::InvalidRequest(m) | CascadeError::Routing(m) => WireError {
            status: StatusCode::BAD_REQUEST,
            error_type: "invalid_request_error",
            message: m.clone(),
        },
        CascadeError::ModelNotFound(m) => WireError {
            status: StatusCode::BAD_REQUEST,
            error_type: "invalid_request_error",
            message: format!("model not found: {m}"),
        },
        CascadeError::Auth(m) => WireError {
            status: StatusCode::UNAUTHORIZED,
            error_type: if openai {
                "invalid_request_error"
            } else {
                "authentication_error"
            },
            message: m.clone(),
        },
        CascadeError::RateLimited { retry_after_secs } => WireError {
            status: StatusCode::TOO_MANY_REQUESTS,
            error_type: if openai {
                "rate_limit_exceeded"
            } else {
                "rate_limit_error"
            },
            message: format!("rate limited, retry after {retry_after_secs}s"),
        },
        CascadeError::Upstream {
            status_code,
            message,
            payload,
        } => map_upstream(*status_code, &upstream_message(message, payload), family),
        CascadeError::Transport(m) => WireError {
            status: StatusCode::BAD_GATEWAY,
            error_type: if openai { "upstream_error" } else { "api_error" },
            message: m.clone(),
        },
        CascadeError::BudgetExceeded { .. } => WireError {
            status: StatusCode::TOO_MANY_REQUESTS,
            error_type: if openai {
                "rate_limit_exceeded"
            } else {
                "rate_limit_error"
            },
            message: err.to_string(),
        },
        other => WireError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error_type: if openai { "server_error" } else { "api_error" },
            message: other.to_string(),
        },
    }
}

/// Map an upstream HTTP status to the client-facing form.
pub fn map_upstream(status_code: u16, message: &str, family: ApiFamily) -> WireError {
    let openai = family == ApiFamily::OpenAi;
    match status_code {
        429 => WireError {
            status: StatusCode::TOO_MANY_REQUESTS,
            error_type: if openai {
                "rate_limit_exceeded"
            } else {
                "rate_limit_error"
            },
            message: message.to_string(),
        },
        529 => WireError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            error_type: if openai {
                "upstream_error"
            } else {
                "overloaded_error"
            },
            message: message.to_string(),
        },
        500..=599 => WireError {
            status: StatusCode::BAD_GATEWAY,
            error_type: if openai { "upstream_error" } else { "api_error" },
            message: message.to_string(),
        },
        _ => WireError {
            status: StatusCode::BAD_GATEWAY,
            error_type: if openai { "upstream_error" } else { "api_error" },
            message: message.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_529_maps_to_503_overloaded() {
        let err = CascadeError::Upstream {
            status_code: 529,
            message: "overloaded".into(),
            payload: None,
        };
        let openai = map_error(&err, ApiFamily::OpenAi);
        assert_eq!(openai.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(openai.error_type, "upstream_error");
        assert!(openai.message.contains("overloaded"));

        let anthropic = map_error(&err, ApiFamily::Anthropic);
        assert_eq!(anthropic.error_type, "overloaded_error");
    }

    #[test]
    fn upstream_5xx_maps_to_502() {
        for status_code in [500u16, 502, 503, 504] {
            let err = CascadeError::Upstream {
                status_code,
                message: "boom".into(),
                payload: None,
            };
            let wire = map_error(&err, ApiFamily::OpenAi);
            assert_eq!(wire.status, StatusCode::BAD_GATEWAY, "status {status_code}");
            assert_eq!(wire.error_type, "upstream_error");
        }
    }

    #[test]
    fn upstream_429_stays_429() {
        let err = CascadeError::Upstream {
            status_code: 429,
            message: "rate limit exceeded".into(),
            payload: None,
        };
        let wire = map_error(&err, ApiFamily::OpenAi);
        assert_eq!(wire.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(wire.error_type, "rate_limit_exceeded");
        assert_eq!(
            map_error(&err, ApiFamily::Anthropic).error_type,
            "rate_limit_error"
        );
    }

    #[test]
    fn unexpected_errors_are_500_server_error() {
        let err = CascadeError::Provider("something broke".into());
        let wire = map_error(&err, ApiFamily::OpenAi);
        assert_eq!(wire.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(wire.error_type, "server_error");
        assert_eq!(map_error(&err, ApiFamily::Anthropic).error_type, "api_error");
    }

    #[test]
    fn payload_message_is_surfaced() {
        let err = CascadeError::Upstream {
            status_code: 503,
            message: "upstream error (503)".into(),
            payload: Some(json!({"error": {"message": "try later"}})),
        };
        let wire = map_error(&err, ApiFamily::OpenAi);
        assert!(wire.message.contains("try later"));
    }

    #[test]
    fn error_bodies_match_family_shapes() {
        let wire = WireError::invalid_request("missing model");
        let openai = wire.body(ApiFamily::OpenAi);
        assert_eq!(openai["error"]["type"], "invalid_request_error");
        assert!(openai["error"]["code"].is_null());

        let anthropic = wire.body(ApiFamily::Anthropic);
        assert_eq!(anthropic["error"]["type"], "invalid_request_error");
        assert_eq!(anthropic["error"]["message"], "missing model");
    }
}
