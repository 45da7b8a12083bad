//! Sign-in against the hosted identity provider and the session context.

use crate::session::{SessionCache, SessionError, REFRESH_TOKEN_KEY, USER_KEY};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use visage_time_core::{Role, SessionUser};

const SIGN_IN_URL: &str = "https://identitytoolkit.googleapis.com/v1/accounts:signInWithIdp";
const REFRESH_URL: &str = "https://securetoken.googleapis.com/v1/token";

/// Id token lifetime when the provider does not say.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);
/// Refresh this long before the id token expires.
const REFRESH_MARGIN: Duration = Duration::from_secs(300);
/// Delay before retrying a failed refresh.
const REFRESH_RETRY: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("identity provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("identity provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("malformed cached session: {0}")]
    CorruptSession(#[from] serde_json::Error),
}

/// User returned by the provider after an interactive sign-in.
#[derive(Debug, Clone)]
pub struct ProviderUser {
    pub uid: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_in: Duration,
}

/// Fresh tokens for an existing session.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub uid: String,
    pub id_token: String,
    pub refresh_token: String,
    pub expires_in: Duration,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Complete a popup-style sign-in. `credential` is the token the
    /// external popup flow produced (a Google id token).
    async fn sign_in_with_popup(&self, credential: &str) -> Result<ProviderUser, AuthError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;
}

/// Firebase Authentication via the Identity Toolkit REST API.
pub struct FirebaseIdentity {
    client: reqwest::Client,
    api_key: String,
}

impl FirebaseIdentity {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    local_id: String,
    display_name: Option<String>,
    email: Option<String>,
    id_token: String,
    refresh_token: String,
    expires_in: Option<String>,
}

#[derive(Deserialize)]
struct RefreshResponse {
    user_id: String,
    id_token: String,
    refresh_token: String,
    expires_in: Option<String>,
}

/// Token lifetimes arrive as decimal seconds in a string.
fn lifetime(expires_in: Option<&str>) -> Duration {
    expires_in
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TOKEN_LIFETIME)
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

async fn rejected(response: reqwest::Response) -> AuthError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.error.message)
        .unwrap_or(body);
    AuthError::Rejected { status, message }
}

#[async_trait]
impl IdentityProvider for FirebaseIdentity {
    async fn sign_in_with_popup(&self, credential: &str) -> Result<ProviderUser, AuthError> {
        let body = serde_json::json!({
            "postBody": format!("id_token={credential}&providerId=google.com"),
            "requestUri": "http://localhost",
            "returnIdpCredential": true,
            "returnSecureToken": true,
        });

        let response = self
            .client
            .post(SIGN_IN_URL)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(rejected(response).await);
        }

        let r: SignInResponse = response.json().await?;
        Ok(ProviderUser {
            uid: r.local_id,
            display_name: r.display_name,
            email: r.email,
            id_token: r.id_token,
            refresh_token: r.refresh_token,
            expires_in: lifetime(r.expires_in.as_deref()),
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError> {
        let response = self
            .client
            .post(REFRESH_URL)
            .query(&[("key", self.api_key.as_str())])
            .json(&serde_json::json!({
                "grant_type": "refresh_token",
                "refresh_token": refresh_token,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(rejected(response).await);
        }

        let r: RefreshResponse = response.json().await?;
        Ok(TokenGrant {
            uid: r.user_id,
            id_token: r.id_token,
            refresh_token: r.refresh_token,
            expires_in: lifetime(r.expires_in.as_deref()),
        })
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        // Id tokens are bearer tokens; dropping them locally ends the session.
        Ok(())
    }
}

/// Shared slot holding the current id token for the store client.
#[derive(Clone)]
pub struct TokenSlot(Arc<watch::Sender<Option<String>>>);

impl Default for TokenSlot {
    fn default() -> Self {
        Self(Arc::new(watch::channel(None).0))
    }
}

impl TokenSlot {
    pub fn get(&self) -> Option<String> {
        self.0.borrow().clone()
    }

    pub fn set(&self, token: Option<String>) {
        self.0.send_replace(token);
    }

    /// Fires whenever the token is replaced or cleared.
    pub fn watch(&self) -> watch::Receiver<Option<String>> {
        self.0.subscribe()
    }
}

/// Keep the id token fresh for as long as the session lasts.
async fn keep_token_fresh(
    provider: Arc<dyn IdentityProvider>,
    cache: SessionCache,
    token: TokenSlot,
    mut refresh_token: String,
    expires_in: Duration,
) {
    let mut delay = expires_in.saturating_sub(REFRESH_MARGIN);
    loop {
        tokio::time::sleep(delay).await;
        match provider.refresh(&refresh_token).await {
            Ok(grant) => {
                token.set(Some(grant.id_token));
                if let Err(e) = cache.set(REFRESH_TOKEN_KEY, &grant.refresh_token).await {
                    tracing::warn!(error = %e, "failed to cache refresh token");
                }
                refresh_token = grant.refresh_token;
                delay = grant.expires_in.saturating_sub(REFRESH_MARGIN);
                tracing::debug!(uid = %grant.uid, next_in = ?delay, "id token refreshed");
            }
            Err(e) => {
                tracing::warn!(error = %e, retry_in = ?REFRESH_RETRY, "id token refresh failed");
                delay = REFRESH_RETRY;
            }
        }
    }
}

/// Auth state observed by views and the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthState {
    pub user: Option<SessionUser>,
    /// True until the initial session restore finishes, and during sign-in.
    pub loading: bool,
}

/// Session context: current user, role, and change notifications.
pub struct AuthContext {
    provider: Arc<dyn IdentityProvider>,
    cache: SessionCache,
    admin_emails: Vec<String>,
    token: TokenSlot,
    state: watch::Sender<AuthState>,
    refresher: Mutex<Option<JoinHandle<()>>>,
}

impl AuthContext {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        cache: SessionCache,
        admin_emails: Vec<String>,
        token: TokenSlot,
    ) -> Self {
        let (state, _) = watch::channel(AuthState {
            user: None,
            loading: true,
        });
        Self {
            provider,
            cache,
            admin_emails,
            token,
            state,
            refresher: Mutex::new(None),
        }
    }

    /// Fires on every auth-state change.
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    pub fn current_user(&self) -> Option<SessionUser> {
        self.state.borrow().user.clone()
    }

    pub fn loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn is_admin(&self) -> bool {
        self.state
            .borrow()
            .user
            .as_ref()
            .is_some_and(SessionUser::is_admin)
    }

    fn role_for(&self, email: Option<&str>) -> Role {
        match email {
            Some(e) if self.admin_emails.iter().any(|a| a.eq_ignore_ascii_case(e)) => Role::Admin,
            _ => Role::User,
        }
    }

    fn schedule_refresh(&self, refresh_token: String, expires_in: Duration) {
        let task = tokio::spawn(keep_token_fresh(
            self.provider.clone(),
            self.cache.clone(),
            self.token.clone(),
            refresh_token,
            expires_in,
        ));
        if let Some(previous) = self.refresher.lock().unwrap_or_else(|e| e.into_inner()).replace(task) {
            previous.abort();
        }
    }

    fn cancel_refresh(&self) {
        if let Some(task) = self.refresher.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }

    fn publish(&self, user: Option<SessionUser>, loading: bool) {
        self.state.send_replace(AuthState { user, loading });
    }

    /// Restore a cached session at startup. Any failure leaves the visitor
    /// signed out.
    pub async fn restore(&self) {
        match self.try_restore().await {
            Ok(Some(user)) => {
                tracing::info!(user = %user.id, "session restored");
                self.publish(Some(user), false);
            }
            Ok(None) => self.publish(None, false),
            Err(e) => {
                tracing::warn!(error = %e, "session restore failed; signing out");
                self.clear_local().await;
                self.publish(None, false);
            }
        }
    }

    async fn try_restore(&self) -> Result<Option<SessionUser>, AuthError> {
        let (Some(blob), Some(refresh_token)) = (
            self.cache.get(USER_KEY).await?,
            self.cache.get(REFRESH_TOKEN_KEY).await?,
        ) else {
            return Ok(None);
        };

        let mut user: SessionUser = serde_json::from_str(&blob)?;
        let grant = self.provider.refresh(&refresh_token).await?;
        if grant.uid != user.id {
            tracing::warn!(cached = %user.id, provider = %grant.uid, "cached session belongs to another user");
            return Ok(None);
        }

        // Admin list may have changed since the blob was written.
        user.role = self.role_for(Some(&user.email));
        self.token.set(Some(grant.id_token));
        self.cache.set(REFRESH_TOKEN_KEY, &grant.refresh_token).await?;
        self.cache.set(USER_KEY, &serde_json::to_string(&user)?).await?;
        self.schedule_refresh(grant.refresh_token, grant.expires_in);
        Ok(Some(user))
    }

    pub async fn sign_in_with_popup(&self, credential: &str) -> Result<SessionUser, AuthError> {
        let previous = self.current_user();
        self.publish(previous.clone(), true);

        let result = self.try_sign_in(credential).await;
        match &result {
            Ok(user) => self.publish(Some(user.clone()), false),
            Err(e) => {
                tracing::error!(error = %e, "sign-in failed");
                self.publish(previous, false);
            }
        }
        result
    }

    async fn try_sign_in(&self, credential: &str) -> Result<SessionUser, AuthError> {
        let pu = self.provider.sign_in_with_popup(credential).await?;
        let role = self.role_for(pu.email.as_deref());
        let user = SessionUser::from_provider(pu.uid, pu.display_name, pu.email, role);

        self.token.set(Some(pu.id_token));
        self.cache.set(USER_KEY, &serde_json::to_string(&user)?).await?;
        self.cache.set(REFRESH_TOKEN_KEY, &pu.refresh_token).await?;
        self.schedule_refresh(pu.refresh_token, pu.expires_in);
        tracing::info!(user = %user.id, role = ?user.role, "signed in");
        Ok(user)
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.provider.sign_out().await?;
        self.clear_local().await;
        self.publish(None, false);
        tracing::info!("signed out");
        Ok(())
    }

    async fn clear_local(&self) {
        self.cancel_refresh();
        self.token.set(None);
        for key in [USER_KEY, REFRESH_TOKEN_KEY] {
            if let Err(e) = self.cache.remove(key).await {
                tracing::warn!(key, error = %e, "failed to clear session cache");
            }
        }
    }
}

impl Drop for AuthContext {
    fn drop(&mut self) {
        self.cancel_refresh();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::Instant;

    const LIFETIME: Duration = Duration::from_secs(3600);

    /// Provider that accepts credentials of the form `uid:name:email`.
    /// Issued id tokens expire after an hour.
    #[derive(Default)]
    pub(crate) struct FakeProvider {
        pub fail: AtomicBool,
        issued: Mutex<HashMap<String, Instant>>,
    }

    impl FakeProvider {
        fn issue(&self, id_token: String) -> String {
            self.issued
                .lock()
                .unwrap()
                .insert(id_token.clone(), Instant::now() + LIFETIME);
            id_token
        }

        /// Whether a store would still accept this token.
        pub(crate) fn accepts(&self, id_token: Option<&str>) -> bool {
            id_token
                .and_then(|t| self.issued.lock().unwrap().get(t).copied())
                .is_some_and(|expiry| Instant::now() < expiry)
        }
    }

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        async fn sign_in_with_popup(&self, credential: &str) -> Result<ProviderUser, AuthError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(AuthError::Rejected {
                    status: 400,
                    message: "INVALID_IDP_RESPONSE".into(),
                });
            }
            let mut parts = credential.splitn(3, ':');
            let uid = parts.next().unwrap_or_default().to_string();
            Ok(ProviderUser {
                uid: uid.clone(),
                display_name: parts.next().map(str::to_string),
                email: parts.next().map(str::to_string),
                id_token: self.issue(format!("id-{uid}")),
                refresh_token: format!("refresh-{uid}"),
                expires_in: LIFETIME,
            })
        }

        async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(AuthError::Rejected {
                    status: 400,
                    message: "TOKEN_EXPIRED".into(),
                });
            }
            let uid = refresh_token.trim_start_matches("refresh-").to_string();
            Ok(TokenGrant {
                id_token: self.issue(format!("id2-{uid}")),
                refresh_token: refresh_token.to_string(),
                expires_in: LIFETIME,
                uid,
            })
        }

        async fn sign_out(&self) -> Result<(), AuthError> {
            Ok(())
        }
    }

    pub(crate) async fn context(admins: &[&str]) -> (AuthContext, Arc<FakeProvider>, SessionCache, TokenSlot) {
        let provider = Arc::new(FakeProvider::default());
        let cache = SessionCache::open_in_memory().await.unwrap();
        let token = TokenSlot::default();
        let ctx = AuthContext::new(
            provider.clone(),
            cache.clone(),
            admins.iter().map(|s| s.to_string()).collect(),
            token.clone(),
        );
        (ctx, provider, cache, token)
    }

    #[tokio::test]
    async fn test_starts_loading_until_restore() {
        let (ctx, _, _, _) = context(&[]).await;
        assert!(ctx.loading());
        ctx.restore().await;
        assert!(!ctx.loading());
        assert!(ctx.current_user().is_none());
    }

    #[tokio::test]
    async fn test_sign_in_sets_user_token_and_cache() {
        let (ctx, _, cache, token) = context(&["boss@example.com"]).await;
        ctx.restore().await;
        let mut rx = ctx.subscribe();

        let user = ctx.sign_in_with_popup("u1:Ada:boss@example.com").await.unwrap();
        assert_eq!(user.name, "Ada");
        assert!(ctx.is_admin());
        assert_eq!(token.get().as_deref(), Some("id-u1"));
        assert!(cache.get(USER_KEY).await.unwrap().is_some());
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().user.as_ref().map(|u| u.id.as_str()), Some("u1"));
    }

    #[tokio::test]
    async fn test_standard_role_and_defaults() {
        let (ctx, _, _, _) = context(&["boss@example.com"]).await;
        let user = ctx.sign_in_with_popup("u2").await.unwrap();
        assert_eq!(user.role, Role::User);
        assert_eq!(user.name, "User");
        assert_eq!(user.email, "");
    }

    #[tokio::test]
    async fn test_sign_in_failure_keeps_signed_out() {
        let (ctx, provider, _, token) = context(&[]).await;
        ctx.restore().await;
        provider.fail.store(true, Ordering::SeqCst);
        assert!(ctx.sign_in_with_popup("u1:Ada:a@x.com").await.is_err());
        assert!(ctx.current_user().is_none());
        assert!(!ctx.loading());
        assert!(token.get().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_clears_everything() {
        let (ctx, _, cache, token) = context(&[]).await;
        ctx.sign_in_with_popup("u1:Ada:a@x.com").await.unwrap();
        ctx.sign_out().await.unwrap();
        assert!(ctx.current_user().is_none());
        assert!(token.get().is_none());
        assert_eq!(cache.get(USER_KEY).await.unwrap(), None);
        assert_eq!(cache.get(REFRESH_TOKEN_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_restore_from_cache() {
        let (ctx, provider, cache, _) = context(&["a@x.com"]).await;
        ctx.sign_in_with_popup("u1:Ada:a@x.com").await.unwrap();

        let token = TokenSlot::default();
        let restored = AuthContext::new(provider, cache, vec!["a@x.com".into()], token.clone());
        restored.restore().await;
        assert_eq!(restored.current_user().map(|u| u.id), Some("u1".to_string()));
        assert!(restored.is_admin());
        assert_eq!(token.get().as_deref(), Some("id2-u1"));
    }

    #[tokio::test]
    async fn test_failed_restore_signs_out() {
        let (ctx, provider, cache, _) = context(&[]).await;
        ctx.sign_in_with_popup("u1:Ada:a@x.com").await.unwrap();
        provider.fail.store(true, Ordering::SeqCst);

        let restored = AuthContext::new(provider, cache.clone(), vec![], TokenSlot::default());
        restored.restore().await;
        assert!(restored.current_user().is_none());
        assert!(!restored.loading());
        assert_eq!(cache.get(USER_KEY).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_id_token_refreshed_before_expiry() {
        let (ctx, provider, _, token) = context(&[]).await;
        ctx.sign_in_with_popup("u1:Ada:a@x.com").await.unwrap();
        let mut rotated = token.watch();

        for _ in 0..3 {
            tokio::time::sleep(LIFETIME + Duration::from_secs(60)).await;
            assert!(provider.accepts(token.get().as_deref()));
        }
        assert_eq!(token.get().as_deref(), Some("id2-u1"));
        assert!(rotated.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_retries() {
        let (ctx, provider, _, token) = context(&[]).await;
        ctx.sign_in_with_popup("u1:Ada:a@x.com").await.unwrap();
        provider.fail.store(true, Ordering::SeqCst);

        tokio::time::sleep(LIFETIME - REFRESH_MARGIN + Duration::from_secs(1)).await;
        assert_eq!(token.get().as_deref(), Some("id-u1"));

        provider.fail.store(false, Ordering::SeqCst);
        tokio::time::sleep(REFRESH_RETRY).await;
        assert_eq!(token.get().as_deref(), Some("id2-u1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sign_out_stops_refresh() {
        let (ctx, _, _, token) = context(&[]).await;
        ctx.sign_in_with_popup("u1:Ada:a@x.com").await.unwrap();
        ctx.sign_out().await.unwrap();

        tokio::time::sleep(LIFETIME * 2).await;
        assert!(token.get().is_none());
    }
}
