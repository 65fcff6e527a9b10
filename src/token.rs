use axum::{
    Form, Json,
    extract::{State, rejection::FormRejection},
    http::HeaderMap,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::{
    config::Config,
    error::OAuthError,
    idtoken,
    oidc::request_base_url,
    pkce,
    server::AppState,
    store::{CredentialStore, random_token},
};

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    grant_type: Option<String>,
    code: Option<String>,
    redirect_uri: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    code_verifier: Option<String>,
    username: Option<String>,
    password: Option<String>,
    refresh_token: Option<String>,
    scope: Option<String>,
}

fn field(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

/// POST /oauth2/token — the single token endpoint, dispatching on
/// `grant_type`. Only `application/x-www-form-urlencoded` bodies are
/// accepted.
pub async fn token(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Result<Json<Value>, OAuthError> {
    let Ok(Form(request)) = form else {
        return Err(OAuthError::invalid_request("could not parse token request form"));
    };

    let grant_type = field(&request.grant_type);
    if grant_type.is_empty() {
        return Err(OAuthError::unsupported_grant_type("grant_type is required"));
    }
    if !state.config.grant_allowed(grant_type) {
        return Err(OAuthError::unsupported_grant_type(format!(
            "grant_type {grant_type} is not supported"
        )));
    }

    let issuer = request_base_url(&headers);
    match grant_type {
        "authorization_code" => {
            authorization_code_grant(&state.config, &state.store, &issuer, &request).await
        }
        "client_credentials" => client_credentials_grant(&state.config, &request),
        "password" => password_grant(&state.config, &state.store, &issuer, &request).await,
        "refresh_token" => refresh_token_grant(&state.config, &state.store, &issuer, &request).await,
        other => Err(OAuthError::unsupported_grant_type(format!(
            "grant_type {other} is not supported"
        ))),
    }
}

/// Shared client authentication. The secret is mandatory whenever one is
/// configured (confidential client); `require_secret` additionally demands a
/// confidential client regardless of the request.
fn validate_client(
    config: &Config,
    client_id: &str,
    client_secret: &str,
    require_secret: bool,
) -> Result<(), OAuthError> {
    if client_id.is_empty() {
        return Err(OAuthError::invalid_request("client_id is required"));
    }
    if !config.client_id_matches(client_id) {
        return Err(OAuthError::invalid_client(format!(
            "client {client_id} is not allowed"
        )));
    }
    if config.allowed_client_secret.is_empty() {
        if require_secret {
            return Err(OAuthError::invalid_client(
                "this grant requires a confidential client, but none is configured",
            ));
        }
        return Ok(());
    }
    if !config.client_secret_matches(client_secret) {
        return Err(OAuthError::invalid_client("client secret is incorrect"));
    }
    Ok(())
}

fn resolve_scope(config: &Config, requested: &str) -> Result<String, OAuthError> {
    config
        .resolve_scope(requested)
        .map_err(|offending| OAuthError::invalid_scope(format!("scope {offending} is not supported")))
}

fn has_openid(scope: &str) -> bool {
    scope.split_whitespace().any(|s| s == "openid")
}

async fn authorization_code_grant(
    config: &Config,
    store: &CredentialStore,
    issuer: &str,
    request: &TokenRequest,
) -> Result<Json<Value>, OAuthError> {
    let client_id = field(&request.client_id);
    validate_client(config, client_id, field(&request.client_secret), false)?;

    let code = field(&request.code);
    if code.is_empty() {
        return Err(OAuthError::invalid_request("code is required"));
    }
    let redirect_uri = field(&request.redirect_uri);
    if redirect_uri.is_empty() {
        return Err(OAuthError::invalid_request("redirect_uri is required"));
    }

    let Some(auth_code) = store.get_auth_code(code).await else {
        return Err(OAuthError::invalid_grant(
            "authorization code is invalid or expired",
        ));
    };

    if auth_code.redirect_uri != redirect_uri {
        return Err(OAuthError::invalid_grant(
            "redirect_uri does not match the authorization request",
        ));
    }

    if let Some(challenge) = auth_code.code_challenge.as_deref().filter(|c| !c.is_empty()) {
        let verifier = field(&request.code_verifier);
        if verifier.is_empty() {
            return Err(OAuthError::invalid_grant("code_verifier is required"));
        }
        if !pkce::verifier_length_ok(verifier) {
            return Err(OAuthError::invalid_grant(
                "code_verifier must be between 43 and 128 characters",
            ));
        }
        let method = auth_code.code_challenge_method.as_deref().unwrap_or("plain");
        if !pkce::verify(challenge, method, verifier) {
            return Err(OAuthError::invalid_grant("code_verifier does not match"));
        }
    }

    // Single use: consumption happens under the write lock before any token
    // material is minted, so of two concurrent exchanges only one can get
    // here with the code still live.
    if store.take_auth_code(code).await.is_none() {
        return Err(OAuthError::invalid_grant(
            "authorization code is invalid or expired",
        ));
    }

    let access_token = random_token()?;
    let refresh = store
        .create_refresh_token(
            auth_code.username.clone(),
            client_id.to_string(),
            auth_code.scope.clone(),
            auth_code.nonce.clone(),
        )
        .await?;
    let id_token = idtoken::mint(
        issuer,
        client_id,
        &auth_code.username,
        config.token_expiry_seconds,
        auth_code.nonce.as_deref(),
    )?;

    info!(client_id, username = %auth_code.username, "authorization code exchanged");

    Ok(Json(json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": config.token_expiry_seconds,
        "refresh_token": refresh.token,
        "id_token": id_token,
        "scope": auth_code.scope,
    })))
}

/// No user context: the response carries neither `id_token` nor
/// `refresh_token`.
fn client_credentials_grant(
    config: &Config,
    request: &TokenRequest,
) -> Result<Json<Value>, OAuthError> {
    let client_id = field(&request.client_id);
    validate_client(config, client_id, field(&request.client_secret), true)?;
    let scope = resolve_scope(config, field(&request.scope))?;

    let access_token = random_token()?;
    info!(client_id, "client_credentials grant issued");

    Ok(Json(json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": config.token_expiry_seconds,
        "scope": scope,
    })))
}

async fn password_grant(
    config: &Config,
    store: &CredentialStore,
    issuer: &str,
    request: &TokenRequest,
) -> Result<Json<Value>, OAuthError> {
    let client_id = field(&request.client_id);
    validate_client(config, client_id, field(&request.client_secret), false)?;

    let username = field(&request.username);
    let password = field(&request.password);
    if username.is_empty() || password.is_empty() {
        return Err(OAuthError::invalid_request(
            "username and password are required",
        ));
    }
    if !config.credentials_match(username, password) {
        return Err(OAuthError::access_denied("username or password is incorrect"));
    }

    let scope = resolve_scope(config, field(&request.scope))?;

    let access_token = random_token()?;
    let refresh = store
        .create_refresh_token(username.to_string(), client_id.to_string(), scope.clone(), None)
        .await?;

    let mut response = json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": config.token_expiry_seconds,
        "refresh_token": refresh.token,
        "scope": scope,
    });
    if has_openid(&scope) {
        response["id_token"] = Value::String(idtoken::mint(
            issuer,
            client_id,
            username,
            config.token_expiry_seconds,
            None,
        )?);
    }

    info!(client_id, username, "password grant issued");
    Ok(Json(response))
}

/// The stored refresh token is reused rather than rotated; a narrowed scope
/// may be requested but never a wider one.
async fn refresh_token_grant(
    config: &Config,
    store: &CredentialStore,
    issuer: &str,
    request: &TokenRequest,
) -> Result<Json<Value>, OAuthError> {
    let client_id = field(&request.client_id);
    validate_client(config, client_id, field(&request.client_secret), false)?;

    let token = field(&request.refresh_token);
    if token.is_empty() {
        return Err(OAuthError::invalid_request("refresh_token is required"));
    }

    let Some(refresh) = store.get_refresh_token(token).await else {
        return Err(OAuthError::invalid_grant("refresh token is invalid"));
    };
    if refresh.client_id != client_id {
        return Err(OAuthError::invalid_grant(
            "refresh token was issued to a different client",
        ));
    }

    let requested = field(&request.scope);
    let scope = if requested.trim().is_empty() {
        refresh.scope.clone()
    } else {
        let granted: Vec<&str> = refresh.scope.split_whitespace().collect();
        for item in requested.split_whitespace() {
            if !granted.contains(&item) {
                return Err(OAuthError::invalid_scope(format!(
                    "scope {item} exceeds the originally granted scope"
                )));
            }
        }
        requested.trim().to_string()
    };

    let access_token = random_token()?;
    let mut response = json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": config.token_expiry_seconds,
        "refresh_token": refresh.token,
        "scope": scope,
    });
    if has_openid(&scope) {
        response["id_token"] = Value::String(idtoken::mint(
            issuer,
            client_id,
            &refresh.username,
            config.token_expiry_seconds,
            refresh.nonce.as_deref(),
        )?);
    }

    info!(client_id, username = %refresh.username, "refresh grant issued");
    Ok(Json(response))
}
