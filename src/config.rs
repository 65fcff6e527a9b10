use std::env;

use anyhow::{Context, Result};
use subtle::ConstantTimeEq;

/// Immutable per-process configuration for the mock provider.
///
/// Every knob maps to an `AUTH_*` environment variable; [`Config::from_env`]
/// reads them with trim-and-default semantics. Empty `allowed_client_id`
/// means any client id is accepted; empty `allowed_client_secret` means the
/// client is public and no secret is required.
#[derive(Debug, Clone)]
pub struct Config {
    pub allowed_client_id: String,
    pub allowed_client_secret: String,
    pub allowed_username: String,
    pub allowed_password: String,
    pub supported_scopes: Vec<String>,
    pub allowed_grant_types: Vec<String>,
    pub token_expiry_seconds: u64,
    pub session_ttl_seconds: u64,
    pub require_pkce: bool,
    pub validate_redirect_uri: bool,
    pub allowed_redirect_uri_patterns: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            allowed_client_id: String::new(),
            allowed_client_secret: String::new(),
            allowed_username: "mock-user".to_string(),
            allowed_password: "mock-password".to_string(),
            supported_scopes: ["openid", "profile", "email"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            allowed_grant_types: [
                "authorization_code",
                "client_credentials",
                "password",
                "refresh_token",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            token_expiry_seconds: 3600,
            session_ttl_seconds: 300,
            require_pkce: false,
            validate_redirect_uri: false,
            allowed_redirect_uri_patterns: Vec::new(),
        }
    }
}

impl Config {
    /// Loads the configuration from `AUTH_*` environment variables, falling
    /// back to [`Config::default`] for anything unset or empty.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            allowed_client_id: env_or_default("AUTH_ALLOWED_CLIENT_ID", ""),
            allowed_client_secret: env_or_default("AUTH_ALLOWED_CLIENT_SECRET", ""),
            allowed_username: env_or_default("AUTH_ALLOWED_USERNAME", &defaults.allowed_username),
            allowed_password: env_or_default("AUTH_ALLOWED_PASSWORD", &defaults.allowed_password),
            supported_scopes: comma_list("AUTH_SUPPORTED_SCOPES", &defaults.supported_scopes),
            allowed_grant_types: comma_list(
                "AUTH_ALLOWED_GRANT_TYPES",
                &defaults.allowed_grant_types,
            ),
            token_expiry_seconds: seconds_or_default(
                "AUTH_TOKEN_EXPIRY",
                defaults.token_expiry_seconds,
            )?,
            session_ttl_seconds: seconds_or_default(
                "AUTH_CODE_SESSION_TTL",
                defaults.session_ttl_seconds,
            )?,
            require_pkce: bool_flag("AUTH_CODE_REQUIRE_PKCE"),
            validate_redirect_uri: bool_flag("AUTH_CODE_VALIDATE_REDIRECT_URI"),
            allowed_redirect_uri_patterns: comma_list("AUTH_CODE_ALLOWED_REDIRECT_URIS", &[]),
        })
    }

    pub fn grant_allowed(&self, grant_type: &str) -> bool {
        self.allowed_grant_types.iter().any(|g| g == grant_type)
    }

    pub fn scope_supported(&self, scope: &str) -> bool {
        self.supported_scopes.iter().any(|s| s == scope)
    }

    /// Space-joined list of every supported scope, used whenever a request
    /// omits `scope`.
    pub fn default_scope(&self) -> String {
        self.supported_scopes.join(" ")
    }

    /// Resolves the granted scope for a request: empty input yields the full
    /// supported set, otherwise each whitespace-separated token must be
    /// supported. Returns the offending token on failure.
    pub fn resolve_scope(&self, requested: &str) -> std::result::Result<String, String> {
        if requested.trim().is_empty() {
            return Ok(self.default_scope());
        }
        for token in requested.split_whitespace() {
            if !self.scope_supported(token) {
                return Err(token.to_string());
            }
        }
        Ok(requested.trim().to_string())
    }

    /// Matches `redirect_uri` against the configured allowlist. Patterns are
    /// literal matches with two extensions: `:*` accepts any port and a
    /// trailing `/*` accepts any sub-path.
    pub fn redirect_uri_allowed(&self, redirect_uri: &str) -> bool {
        self.allowed_redirect_uri_patterns
            .iter()
            .any(|pattern| pattern_matches(pattern, redirect_uri))
    }

    pub fn client_id_matches(&self, client_id: &str) -> bool {
        self.allowed_client_id.is_empty() || self.allowed_client_id == client_id
    }

    pub fn client_secret_matches(&self, client_secret: &str) -> bool {
        constant_time_eq(&self.allowed_client_secret, client_secret)
    }

    pub fn credentials_match(&self, username: &str, password: &str) -> bool {
        // Evaluate both comparisons so a bad username costs the same as a
        // bad password.
        let user_ok = constant_time_eq(&self.allowed_username, username);
        let pass_ok = constant_time_eq(&self.allowed_password, password);
        user_ok && pass_ok
    }
}

fn constant_time_eq(expected: &str, presented: &str) -> bool {
    bool::from(expected.as_bytes().ct_eq(presented.as_bytes()))
}

/// Returns true when the environment flag is set to a truthy value.
/// Accepted truthy values: 1, true, yes (case-insensitive).
fn bool_flag(name: &str) -> bool {
    env::var(name)
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

/// Reads an environment variable but falls back to a default when missing or
/// empty, trimming whitespace.
fn env_or_default(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn comma_list(name: &str, default: &[String]) -> Vec<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect(),
        _ => default.to_vec(),
    }
}

fn seconds_or_default(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("environment variable {name} must be an integer of seconds")),
        _ => Ok(default),
    }
}

fn pattern_matches(pattern: &str, uri: &str) -> bool {
    let (pattern, any_path) = match pattern.strip_suffix("/*") {
        Some(stripped) => (stripped, true),
        None => (pattern, false),
    };

    if let Some((head, tail)) = pattern.split_once(":*") {
        // Port wildcard: the URI must continue with ':' and at least one
        // digit where the pattern says ':*'.
        let Some(rest) = uri.strip_prefix(head) else {
            return false;
        };
        let Some(rest) = rest.strip_prefix(':') else {
            return false;
        };
        let port_len = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if port_len == 0 {
            return false;
        }
        return tail_matches(tail, &rest[port_len..], any_path);
    }

    tail_matches(pattern, uri, any_path)
}

fn tail_matches(expected: &str, actual: &str, any_path: bool) -> bool {
    if !any_path {
        return expected == actual;
    }
    match actual.strip_prefix(expected) {
        Some("") => true,
        // "http://host/*" must not match "http://hostile"; the remainder has
        // to begin a new path segment.
        Some(rest) => expected.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}
