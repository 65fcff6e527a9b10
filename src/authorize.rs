use axum::{
    Form,
    extract::{
        Query, State,
        rejection::{FormRejection, QueryRejection},
    },
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use html_escape::encode_text;
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use crate::{error::OAuthError, server::AppState};

pub const SESSION_COOKIE: &str = "oauth2_session";

#[derive(Debug, Deserialize)]
pub struct AuthorizeParams {
    client_id: Option<String>,
    redirect_uri: Option<String>,
    response_type: Option<String>,
    scope: Option<String>,
    state: Option<String>,
    nonce: Option<String>,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    username: Option<String>,
    password: Option<String>,
}

fn param(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().filter(|v| !v.is_empty()).map(str::to_string)
}

/// GET /oauth2/authorize — validates the authorization request, opens a
/// session and renders the login form.
///
/// Errors before a usable `redirect_uri` is established come back as JSON;
/// everything after redirects to the client so it can observe the failure.
/// A strict server would refuse to redirect to an unvalidated URI, but this
/// is a test double and observability wins.
pub async fn authorize_form(
    State(state): State<AppState>,
    jar: CookieJar,
    query: Result<Query<AuthorizeParams>, QueryRejection>,
) -> Response {
    let Ok(Query(params)) = query else {
        return OAuthError::invalid_request("could not parse query parameters").into_response();
    };

    let client_id = param(&params.client_id);
    if client_id.is_empty() {
        return OAuthError::invalid_request("client_id is required").into_response();
    }

    let redirect_uri = param(&params.redirect_uri);
    let client_state = params.state.as_deref();

    if !state.config.client_id_matches(client_id) {
        warn!(client_id, "authorization attempt by unknown client");
        return OAuthError::unauthorized_client(format!("client {client_id} is not allowed"))
            .into_redirect(redirect_uri, client_state);
    }

    if redirect_uri.is_empty() {
        return OAuthError::invalid_request("redirect_uri is required").into_response();
    }
    if Url::parse(redirect_uri).is_err() {
        return OAuthError::invalid_request(format!(
            "redirect_uri {redirect_uri} is not a valid URL"
        ))
        .into_response();
    }

    if state.config.validate_redirect_uri && !state.config.redirect_uri_allowed(redirect_uri) {
        return OAuthError::invalid_request(format!(
            "redirect_uri {redirect_uri} does not match any allowed pattern"
        ))
        .into_redirect(redirect_uri, client_state);
    }

    if param(&params.response_type) != "code" {
        return OAuthError::unsupported_response_type("only the code response_type is supported")
            .into_redirect(redirect_uri, client_state);
    }

    let scope = match state.config.resolve_scope(param(&params.scope)) {
        Ok(scope) => scope,
        Err(offending) => {
            return OAuthError::invalid_scope(format!("scope {offending} is not supported"))
                .into_redirect(redirect_uri, client_state);
        }
    };

    let code_challenge = non_empty(&params.code_challenge);
    if state.config.require_pkce && code_challenge.is_none() {
        return OAuthError::invalid_request("code_challenge is required")
            .into_redirect(redirect_uri, client_state);
    }

    let code_challenge_method = match &code_challenge {
        Some(_) => {
            let method = params
                .code_challenge_method
                .as_deref()
                .filter(|m| !m.is_empty())
                .unwrap_or("plain");
            if method != "plain" && method != "S256" {
                return OAuthError::invalid_request(format!(
                    "code_challenge_method {method} is not supported"
                ))
                .into_redirect(redirect_uri, client_state);
            }
            Some(method.to_string())
        }
        None => None,
    };

    let session = match state
        .store
        .create_session(
            non_empty(&params.state),
            redirect_uri.to_string(),
            scope.clone(),
            code_challenge,
            code_challenge_method,
            non_empty(&params.nonce),
        )
        .await
    {
        Ok(session) => session,
        Err(err) => return err.into_response(),
    };

    info!(client_id, scope, "authorization session opened");

    let cookie = Cookie::build((SESSION_COOKIE, session.id.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build();

    (jar.add(cookie), Html(render_login_form(client_id, &scope))).into_response()
}

/// POST /oauth2/authorize — consumes the session cookie and the submitted
/// credentials, mints a single-use authorization code and redirects back to
/// the `redirect_uri` frozen in the session. Nothing is read from query
/// parameters here.
pub async fn authorize_submit(
    State(state): State<AppState>,
    jar: CookieJar,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Response {
    let session_id = jar
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string());
    let session = match session_id {
        Some(id) => state.store.get_session(&id).await,
        None => None,
    };
    let Some(session) = session else {
        return OAuthError::invalid_request("authorization session is missing or expired")
            .into_response();
    };

    let Ok(Form(login)) = form else {
        return OAuthError::invalid_request("could not parse login form").into_response();
    };

    let username = param(&login.username);
    let password = param(&login.password);
    if username.is_empty() || password.is_empty() {
        return OAuthError::invalid_request("username and password are required").into_response();
    }

    if !state.config.credentials_match(username, password) {
        warn!(username, "login rejected");
        return OAuthError::access_denied("username or password is incorrect").into_response();
    }

    // The session is single-use: consume it under the write lock before
    // minting, so concurrent submits with the same cookie get one code.
    let Some(session) = state.store.take_session(&session.id).await else {
        return OAuthError::invalid_request("authorization session is missing or expired")
            .into_response();
    };

    let auth_code = match state
        .store
        .create_auth_code(
            session.redirect_uri.clone(),
            username.to_string(),
            session.scope.clone(),
            session.code_challenge.clone(),
            session.code_challenge_method.clone(),
            session.nonce.clone(),
        )
        .await
    {
        Ok(auth_code) => auth_code,
        Err(err) => return err.into_response(),
    };

    let Ok(mut target) = Url::parse(&session.redirect_uri) else {
        return OAuthError::server_error("session redirect_uri is not a valid URL")
            .into_response();
    };
    {
        let mut pairs = target.query_pairs_mut();
        pairs.append_pair("code", &auth_code.code);
        if let Some(client_state) = session.state.as_deref().filter(|s| !s.is_empty()) {
            pairs.append_pair("state", client_state);
        }
    }

    info!(username, "authorization code issued");

    let removal = Cookie::build(SESSION_COOKIE).path("/").build();
    (
        jar.remove(removal),
        (StatusCode::FOUND, [(header::LOCATION, target.to_string())]),
    )
        .into_response()
}

/// The login form POSTs back to the authorize path; all flow state lives in
/// the session cookie. Reflected values are untrusted and HTML-escaped.
fn render_login_form(client_id: &str, scope: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>Sign in - oidc-mock</title>
  <style>
    body {{ font-family: sans-serif; max-width: 420px; margin: 80px auto; }}
    label {{ display: block; margin-top: 12px; }}
    input {{ width: 100%; padding: 8px; box-sizing: border-box; }}
    button {{ margin-top: 16px; padding: 10px 24px; }}
    .meta {{ color: #555; font-size: 0.9em; }}
  </style>
</head>
<body>
  <h1>Sign in</h1>
  <p class="meta">Client <code>{client_id}</code> is requesting access to: {scope}</p>
  <form method="post" action="/oauth2/authorize">
    <label for="username">Username</label>
    <input type="text" id="username" name="username" autocomplete="username" autofocus>
    <label for="password">Password</label>
    <input type="password" id="password" name="password" autocomplete="current-password">
    <button type="submit">Sign in</button>
  </form>
</body>
</html>"#,
        client_id = encode_text(client_id),
        scope = encode_text(scope),
    )
}
