use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Serialize;
use serde_json::json;
use time::OffsetDateTime;

use crate::error::OAuthError;

#[derive(Debug, Serialize)]
struct IdTokenClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    exp: i64,
    iat: i64,
    name: &'a str,
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    nonce: Option<&'a str>,
}

/// Mints an unsigned (`alg=none`) ID token: two base64url-no-padding JSON
/// segments and an empty signature segment. Deliberately insecure; this
/// server exists so client test suites can assert they reject it.
pub fn mint(
    issuer: &str,
    client_id: &str,
    username: &str,
    expiry_seconds: u64,
    nonce: Option<&str>,
) -> Result<String, OAuthError> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let claims = IdTokenClaims {
        iss: issuer,
        sub: username,
        aud: client_id,
        exp: now + expiry_seconds as i64,
        iat: now,
        name: username,
        email: format!("{username}@example.com"),
        nonce,
    };

    let header = serde_json::to_vec(&json!({"alg": "none", "typ": "JWT"}))
        .map_err(|err| OAuthError::server_error(format!("encode id token header: {err}")))?;
    let payload = serde_json::to_vec(&claims)
        .map_err(|err| OAuthError::server_error(format!("encode id token claims: {err}")))?;

    Ok(format!(
        "{}.{}.",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(payload)
    ))
}
