use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};

use crate::server::AppState;

/// Base URL of the request as clients see it: scheme honors
/// `X-Forwarded-Proto` so issuer values survive a TLS-terminating proxy.
pub fn request_base_url(headers: &HeaderMap) -> String {
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    format!("{scheme}://{host}")
}

/// Metadata served at `/.well-known/openid-configuration` (RFC 8414 / OIDC
/// Discovery). The authorization-code surface is omitted entirely when that
/// grant is not allowed.
#[derive(Debug, Serialize)]
struct DiscoveryDocument {
    issuer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    authorization_endpoint: Option<String>,
    token_endpoint: String,
    userinfo_endpoint: String,
    jwks_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_types_supported: Option<Vec<String>>,
    subject_types_supported: Vec<String>,
    id_token_signing_alg_values_supported: Vec<String>,
    scopes_supported: Vec<String>,
    grant_types_supported: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code_challenge_methods_supported: Option<Vec<String>>,
}

pub async fn discovery(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let issuer = request_base_url(&headers);
    let code_flow = state.config.grant_allowed("authorization_code");
    let doc = DiscoveryDocument {
        authorization_endpoint: code_flow.then(|| format!("{issuer}/oauth2/authorize")),
        token_endpoint: format!("{issuer}/oauth2/token"),
        userinfo_endpoint: format!("{issuer}/oauth2/userinfo"),
        jwks_uri: format!("{issuer}/.well-known/jwks.json"),
        response_types_supported: code_flow.then(|| vec!["code".to_string()]),
        subject_types_supported: vec!["public".to_string()],
        id_token_signing_alg_values_supported: vec!["none".to_string()],
        scopes_supported: state.config.supported_scopes.clone(),
        grant_types_supported: state.config.allowed_grant_types.clone(),
        code_challenge_methods_supported: code_flow
            .then(|| vec!["plain".to_string(), "S256".to_string()]),
        issuer,
    };
    Json(doc)
}

/// Empty key set: the ID token uses `alg=none`, so there is nothing for
/// clients to verify against.
pub async fn jwks() -> Json<Value> {
    Json(json!({ "keys": [] }))
}

/// Mock UserInfo: any non-empty bearer token is accepted; the identity is
/// derived from the configured username.
pub async fn userinfo(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match bearer_token(&headers) {
        Some(token) if !token.is_empty() => {
            let username = &state.config.allowed_username;
            Json(json!({
                "sub": username,
                "name": username,
                "email": format!("{username}@example.com"),
            }))
            .into_response()
        }
        _ => (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Bearer")],
            Json(json!({
                "error": "invalid_request",
                "error_description": "a bearer access token is required",
            })),
        )
            .into_response(),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}
