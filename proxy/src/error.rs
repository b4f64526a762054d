use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use thiserror::Error;

/// Request-scoped failures of the capture pipeline. Storage failures are not
/// represented here: they are logged and never reach the caller.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Invalid JSON request: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Failed to read request body: {0}")]
    Payload(#[from] actix_web::error::PayloadError),

    #[error("Request body exceeds {0} bytes")]
    BodyTooLarge(usize),

    #[error("Invalid HTTP method: {0}")]
    InvalidMethod(String),

    #[error("Failed to parse target URL '{url}': {source}")]
    InvalidUpstreamUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Failed to proxy request: {0}")]
    Upstream(#[source] reqwest::Error),

    #[error("Failed to read upstream response body: {0}")]
    UpstreamBody(#[source] reqwest::Error),

    #[error("Invalid status code from upstream: {0}")]
    UpstreamStatus(u16),
}

impl ResponseError for CaptureError {
    fn status_code(&self) -> StatusCode {
        match self {
            CaptureError::InvalidJson(_)
            | CaptureError::Payload(_)
            | CaptureError::InvalidMethod(_) => StatusCode::BAD_REQUEST,
            CaptureError::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            CaptureError::InvalidUpstreamUrl { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            CaptureError::Upstream(_)
            | CaptureError::UpstreamBody(_)
            | CaptureError::UpstreamStatus(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .content_type("text/plain; charset=utf-8")
            .body(self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_json_is_client_error() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(
            CaptureError::from(err).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn bad_upstream_url_is_server_error() {
        let source = url::Url::parse("not a url").unwrap_err();
        let err = CaptureError::InvalidUpstreamUrl {
            url: "not a url".to_string(),
            source,
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.to_string().contains("not a url"));
    }

    #[test]
    fn oversized_body_is_rejected() {
        assert_eq!(
            CaptureError::BodyTooLarge(16).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn bad_upstream_status_is_gateway_error() {
        assert_eq!(
            CaptureError::UpstreamStatus(1000).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }
}
