use std::{collections::HashMap, sync::Arc, time::Duration as StdDuration};

use rand::{RngCore, rngs::OsRng};
use time::{Duration, OffsetDateTime};
use tokio::{sync::RwLock, task::JoinHandle};
use tracing::debug;

use crate::error::OAuthError;

/// In-progress authorization grant, alive between the GET that renders the
/// login form and the POST that consumes the credentials. The `redirect_uri`
/// is frozen here at creation; the POST never re-reads it from the request.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub state: Option<String>,
    pub redirect_uri: String,
    pub scope: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub nonce: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Single-use authorization code minted after a successful credential POST.
#[derive(Debug, Clone)]
pub struct AuthCode {
    pub code: String,
    pub redirect_uri: String,
    pub username: String,
    pub scope: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub nonce: Option<String>,
    pub created_at: OffsetDateTime,
}

/// Long-lived handle for re-minting access tokens, bound to the `client_id`
/// it was issued to.
#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub token: String,
    pub username: String,
    pub client_id: String,
    pub scope: String,
    pub nonce: Option<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Default)]
struct Maps {
    sessions: HashMap<String, Session>,
    auth_codes: HashMap<String, AuthCode>,
    refresh_tokens: HashMap<String, RefreshToken>,
}

/// Concurrency-safe storage for the three short-lived entity kinds. Reads
/// take the shared lock, mutations the exclusive one. Sessions and codes
/// expire after `session_ttl`; refresh tokens live until the store drops or
/// an explicit delete.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    inner: Arc<RwLock<Maps>>,
    session_ttl: Duration,
}

/// 32 bytes from the OS CSPRNG, hex-encoded to 64 characters. Used for
/// session ids, authorization codes, refresh tokens and access tokens alike.
pub fn random_token() -> Result<String, OAuthError> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|err| OAuthError::server_error(format!("random generator failure: {err}")))?;
    Ok(hex::encode(bytes))
}

impl CredentialStore {
    pub fn new(session_ttl_seconds: u64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Maps::default())),
            session_ttl: Duration::seconds(session_ttl_seconds as i64),
        }
    }

    pub async fn create_session(
        &self,
        state: Option<String>,
        redirect_uri: String,
        scope: String,
        code_challenge: Option<String>,
        code_challenge_method: Option<String>,
        nonce: Option<String>,
    ) -> Result<Session, OAuthError> {
        let session = Session {
            id: random_token()?,
            state,
            redirect_uri,
            scope,
            code_challenge,
            code_challenge_method,
            nonce,
            created_at: OffsetDateTime::now_utc(),
        };
        let mut maps = self.inner.write().await;
        maps.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    /// Returns the session, or `None` when it is absent or older than the
    /// session TTL. Expired entries are left for the reaper.
    pub async fn get_session(&self, id: &str) -> Option<Session> {
        let maps = self.inner.read().await;
        maps.sessions
            .get(id)
            .filter(|session| !self.expired(session.created_at))
            .cloned()
    }

    /// Removes and returns the session in one write-lock critical section.
    /// Concurrent submits with the same cookie race for a single winner;
    /// the losers see `None`.
    pub async fn take_session(&self, id: &str) -> Option<Session> {
        let mut maps = self.inner.write().await;
        maps.sessions
            .remove(id)
            .filter(|session| !self.expired(session.created_at))
    }

    pub async fn delete_session(&self, id: &str) {
        self.inner.write().await.sessions.remove(id);
    }

    pub async fn create_auth_code(
        &self,
        redirect_uri: String,
        username: String,
        scope: String,
        code_challenge: Option<String>,
        code_challenge_method: Option<String>,
        nonce: Option<String>,
    ) -> Result<AuthCode, OAuthError> {
        let auth_code = AuthCode {
            code: random_token()?,
            redirect_uri,
            username,
            scope,
            code_challenge,
            code_challenge_method,
            nonce,
            created_at: OffsetDateTime::now_utc(),
        };
        let mut maps = self.inner.write().await;
        maps.auth_codes
            .insert(auth_code.code.clone(), auth_code.clone());
        Ok(auth_code)
    }

    pub async fn get_auth_code(&self, code: &str) -> Option<AuthCode> {
        let maps = self.inner.read().await;
        maps.auth_codes
            .get(code)
            .filter(|auth_code| !self.expired(auth_code.created_at))
            .cloned()
    }

    /// Removes and returns the code under the write lock, so two concurrent
    /// exchanges of the same code cannot both observe it live.
    pub async fn take_auth_code(&self, code: &str) -> Option<AuthCode> {
        let mut maps = self.inner.write().await;
        maps.auth_codes
            .remove(code)
            .filter(|auth_code| !self.expired(auth_code.created_at))
    }

    pub async fn delete_auth_code(&self, code: &str) {
        self.inner.write().await.auth_codes.remove(code);
    }

    pub async fn create_refresh_token(
        &self,
        username: String,
        client_id: String,
        scope: String,
        nonce: Option<String>,
    ) -> Result<RefreshToken, OAuthError> {
        let refresh = RefreshToken {
            token: random_token()?,
            username,
            client_id,
            scope,
            nonce,
            created_at: OffsetDateTime::now_utc(),
        };
        let mut maps = self.inner.write().await;
        maps.refresh_tokens
            .insert(refresh.token.clone(), refresh.clone());
        Ok(refresh)
    }

    pub async fn get_refresh_token(&self, token: &str) -> Option<RefreshToken> {
        self.inner.read().await.refresh_tokens.get(token).cloned()
    }

    pub async fn delete_refresh_token(&self, token: &str) {
        self.inner.write().await.refresh_tokens.remove(token);
    }

    /// Spawns the background reaper: once per minute it evicts sessions and
    /// authorization codes past their TTL. Abort the handle to stop it.
    pub fn spawn_reaper(&self) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(StdDuration::from_secs(60));
            // The first tick fires immediately; skip it so freshly created
            // entries are not scanned right away.
            tick.tick().await;
            loop {
                tick.tick().await;
                store.reap().await;
            }
        })
    }

    async fn reap(&self) {
        let mut maps = self.inner.write().await;
        let before = maps.sessions.len() + maps.auth_codes.len();
        maps.sessions
            .retain(|_, session| !self.expired(session.created_at));
        maps.auth_codes
            .retain(|_, auth_code| !self.expired(auth_code.created_at));
        let evicted = before - maps.sessions.len() - maps.auth_codes.len();
        if evicted > 0 {
            debug!(evicted, "reaper evicted expired entries");
        }
    }

    fn expired(&self, created_at: OffsetDateTime) -> bool {
        OffsetDateTime::now_utc() - created_at > self.session_ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_roundtrip_and_single_delete() {
        let store = CredentialStore::new(300);
        let session = store
            .create_session(
                Some("st".into()),
                "http://cb".into(),
                "openid".into(),
                None,
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(session.id.len(), 64);

        let loaded = store.get_session(&session.id).await.unwrap();
        assert_eq!(loaded.redirect_uri, "http://cb");
        assert_eq!(loaded.state.as_deref(), Some("st"));

        store.delete_session(&session.id).await;
        assert!(store.get_session(&session.id).await.is_none());
        // Idempotent delete.
        store.delete_session(&session.id).await;
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let store = CredentialStore::new(0);
        let code = store
            .create_auth_code(
                "http://cb".into(),
                "alice".into(),
                "openid".into(),
                None,
                None,
                None,
            )
            .await
            .unwrap();
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert!(store.get_auth_code(&code.code).await.is_none());
    }

    #[tokio::test]
    async fn refresh_tokens_survive_session_ttl() {
        let store = CredentialStore::new(0);
        let refresh = store
            .create_refresh_token("alice".into(), "demo".into(), "openid".into(), None)
            .await
            .unwrap();
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        let loaded = store.get_refresh_token(&refresh.token).await.unwrap();
        assert_eq!(loaded.client_id, "demo");
        store.delete_refresh_token(&refresh.token).await;
        assert!(store.get_refresh_token(&refresh.token).await.is_none());
    }

    #[tokio::test]
    async fn reap_drops_expired_sessions_and_codes() {
        let store = CredentialStore::new(0);
        store
            .create_session(None, "http://cb".into(), "openid".into(), None, None, None)
            .await
            .unwrap();
        store
            .create_auth_code(
                "http://cb".into(),
                "alice".into(),
                "openid".into(),
                None,
                None,
                None,
            )
            .await
            .unwrap();
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        store.reap().await;
        let maps = store.inner.read().await;
        assert!(maps.sessions.is_empty());
        assert!(maps.auth_codes.is_empty());
    }

    #[tokio::test]
    async fn concurrent_code_takes_have_one_winner() {
        let store = CredentialStore::new(300);
        let code = store
            .create_auth_code(
                "http://cb".into(),
                "alice".into(),
                "openid".into(),
                None,
                None,
                None,
            )
            .await
            .unwrap();

        // Both exchanges may read the code as live before either consumes
        // it; the take itself must still pick exactly one winner.
        let (seen_a, seen_b) = tokio::join!(
            store.get_auth_code(&code.code),
            store.get_auth_code(&code.code)
        );
        assert!(seen_a.is_some() && seen_b.is_some());

        let (taken_a, taken_b) = tokio::join!(
            store.take_auth_code(&code.code),
            store.take_auth_code(&code.code)
        );
        assert!(taken_a.is_some() ^ taken_b.is_some());
    }

    #[tokio::test]
    async fn concurrent_session_takes_have_one_winner() {
        let store = CredentialStore::new(300);
        let session = store
            .create_session(None, "http://cb".into(), "openid".into(), None, None, None)
            .await
            .unwrap();

        let (taken_a, taken_b) = tokio::join!(
            store.take_session(&session.id),
            store.take_session(&session.id)
        );
        assert!(taken_a.is_some() ^ taken_b.is_some());
        assert!(store.take_session(&session.id).await.is_none());
    }

    #[tokio::test]
    async fn take_honors_ttl() {
        let store = CredentialStore::new(0);
        let code = store
            .create_auth_code(
                "http://cb".into(),
                "alice".into(),
                "openid".into(),
                None,
                None,
                None,
            )
            .await
            .unwrap();
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert!(store.take_auth_code(&code.code).await.is_none());
    }

    #[test]
    fn tokens_are_64_hex_chars() {
        let token = random_token().unwrap();
        assert_eq!(token.len(), 64);
        assert!(token.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(token, random_token().unwrap());
    }
}
