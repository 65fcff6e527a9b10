use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use thiserror::Error;
use url::Url;

/// RFC 6749 error taxonomy. Every variant carries the human-readable
/// description that ends up in `error_description` on the wire.
#[derive(Debug, Clone, Error)]
pub enum OAuthError {
    #[error("invalid_request: {0}")]
    InvalidRequest(String),
    #[error("unauthorized_client: {0}")]
    UnauthorizedClient(String),
    #[error("access_denied: {0}")]
    AccessDenied(String),
    #[error("unsupported_response_type: {0}")]
    UnsupportedResponseType(String),
    #[error("invalid_scope: {0}")]
    InvalidScope(String),
    #[error("server_error: {0}")]
    ServerError(String),
    #[error("invalid_client: {0}")]
    InvalidClient(String),
    #[error("invalid_grant: {0}")]
    InvalidGrant(String),
    #[error("unsupported_grant_type: {0}")]
    UnsupportedGrantType(String),
}

impl OAuthError {
    pub fn invalid_request<T: Into<String>>(msg: T) -> Self {
        Self::InvalidRequest(msg.into())
    }
    pub fn unauthorized_client<T: Into<String>>(msg: T) -> Self {
        Self::UnauthorizedClient(msg.into())
    }
    pub fn access_denied<T: Into<String>>(msg: T) -> Self {
        Self::AccessDenied(msg.into())
    }
    pub fn unsupported_response_type<T: Into<String>>(msg: T) -> Self {
        Self::UnsupportedResponseType(msg.into())
    }
    pub fn invalid_scope<T: Into<String>>(msg: T) -> Self {
        Self::InvalidScope(msg.into())
    }
    pub fn server_error<T: Into<String>>(msg: T) -> Self {
        Self::ServerError(msg.into())
    }
    pub fn invalid_client<T: Into<String>>(msg: T) -> Self {
        Self::InvalidClient(msg.into())
    }
    pub fn invalid_grant<T: Into<String>>(msg: T) -> Self {
        Self::InvalidGrant(msg.into())
    }
    pub fn unsupported_grant_type<T: Into<String>>(msg: T) -> Self {
        Self::UnsupportedGrantType(msg.into())
    }

    /// The wire code emitted verbatim in the `error` field.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::UnauthorizedClient(_) => "unauthorized_client",
            Self::AccessDenied(_) => "access_denied",
            Self::UnsupportedResponseType(_) => "unsupported_response_type",
            Self::InvalidScope(_) => "invalid_scope",
            Self::ServerError(_) => "server_error",
            Self::InvalidClient(_) => "invalid_client",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::InvalidRequest(msg)
            | Self::UnauthorizedClient(msg)
            | Self::AccessDenied(msg)
            | Self::UnsupportedResponseType(msg)
            | Self::InvalidScope(msg)
            | Self::ServerError(msg)
            | Self::InvalidClient(msg)
            | Self::InvalidGrant(msg)
            | Self::UnsupportedGrantType(msg) => msg,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::AccessDenied(_) | Self::InvalidClient(_) => StatusCode::UNAUTHORIZED,
            Self::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn body(&self) -> Value {
        json!({
            "error": self.error_code(),
            "error_description": self.description(),
        })
    }

    /// Renders the error as an HTTP 302 back to the client's `redirect_uri`
    /// with `error`, `error_description` and (if the client sent one) `state`
    /// in the query string. Falls back to the JSON form when the target is
    /// not a parseable URL.
    pub fn into_redirect(self, redirect_uri: &str, state: Option<&str>) -> Response {
        let Ok(mut target) = Url::parse(redirect_uri) else {
            return self.into_response();
        };
        {
            let mut pairs = target.query_pairs_mut();
            pairs.append_pair("error", self.error_code());
            pairs.append_pair("error_description", self.description());
            if let Some(state) = state.filter(|s| !s.is_empty()) {
                pairs.append_pair("state", state);
            }
        }
        (StatusCode::FOUND, [(header::LOCATION, target.to_string())]).into_response()
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
