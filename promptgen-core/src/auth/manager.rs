//! Session manager - login/logout, token refresh and validation
//!
//! `SessionManager` is an explicitly constructed context object. Clones share
//! one session; hand a clone to every collaborator that needs auth.
//!
//! Refresh is single-flight: the first caller installs a shared future in the
//! in-flight slot and every concurrent caller awaits that same future. The
//! future writes the credential store and the in-memory state before it
//! resolves, so nobody waiting on it can observe the old token afterwards.
//!
//! Every login/logout/expire bumps the session epoch. Network results that
//! come back under an older epoch are dropped, which is what keeps a refresh
//! that was in flight during `logout()` from resurrecting the session.

use super::dev_users::DevFallback;
use super::http_client::AuthClient;
use super::storage::{CredentialStore, FileCredentialStore};
use super::types::{
    AuthError, AuthGrant, AuthSession, ChangeReason, Credentials, LoginRequest, RegisterRequest,
    SessionOrigin, SessionSnapshot, SessionStatus, UserProfile,
};
use crate::settings::{RefreshMode, SessionSettings};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

type RefreshFuture = Shared<BoxFuture<'static, Result<Credentials, AuthError>>>;
type Listener = Arc<dyn Fn(&SessionSnapshot) + Send + Sync>;

struct InFlight {
    id: u64,
    future: RefreshFuture,
}

/// In-memory session record.
///
/// `session` may be `Some` while `status` is `Unauthenticated`: that is a
/// restored record whose token has not been confirmed yet.
#[derive(Default)]
struct StateRecord {
    status: SessionStatus,
    session: Option<AuthSession>,
}

impl StateRecord {
    fn snapshot(&self, reason: Option<ChangeReason>) -> SessionSnapshot {
        let user = if self.status.is_authenticated() {
            self.session.as_ref().map(|s| s.user.clone())
        } else {
            None
        };
        SessionSnapshot {
            status: self.status,
            user,
            reason,
        }
    }
}

struct Inner {
    settings: SessionSettings,
    client: AuthClient,
    store: Arc<dyn CredentialStore>,
    dev_fallback: DevFallback,
    state: Mutex<StateRecord>,
    epoch: AtomicU64,
    inflight: Mutex<Option<InFlight>>,
    next_refresh_id: AtomicU64,
    events: watch::Sender<SessionSnapshot>,
    listeners: Mutex<Vec<Listener>>,
}

/// Session manager
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create a manager over `store`. Call [`initialize`](Self::initialize)
    /// once to rehydrate a persisted session.
    pub fn new(
        settings: SessionSettings,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, AuthError> {
        let client = AuthClient::new(&settings)?;
        Ok(Self::with_client(settings, store, client))
    }

    /// Create a manager persisting to the file store described by `settings`
    pub fn with_file_store(settings: SessionSettings) -> Result<Self, AuthError> {
        let store = FileCredentialStore::from_settings(&settings)?;
        Self::new(settings, Arc::new(store))
    }

    pub fn with_client(
        settings: SessionSettings,
        store: Arc<dyn CredentialStore>,
        client: AuthClient,
    ) -> Self {
        let (events, _) = watch::channel(SessionSnapshot::default());
        let dev_fallback = DevFallback::from_settings(&settings.dev_fallback);

        Self {
            inner: Arc::new(Inner {
                settings,
                client,
                store,
                dev_fallback,
                state: Mutex::new(StateRecord::default()),
                epoch: AtomicU64::new(0),
                inflight: Mutex::new(None),
                next_refresh_id: AtomicU64::new(1),
                events,
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.inner.settings
    }

    /// Backend client (shares its connection pool and cookie jar)
    pub fn client(&self) -> &AuthClient {
        &self.inner.client
    }

    /// Current lifecycle state
    pub fn status(&self) -> SessionStatus {
        self.inner.state.lock().status
    }

    /// In-memory check only; never touches the network
    pub fn is_authenticated(&self) -> bool {
        self.status().is_authenticated()
    }

    /// Profile of the signed-in user
    pub fn current_user(&self) -> Option<UserProfile> {
        let record = self.inner.state.lock();
        if !record.status.is_authenticated() {
            return None;
        }
        record.session.as_ref().map(|s| s.user.clone())
    }

    /// Where the current session came from
    pub fn origin(&self) -> Option<SessionOrigin> {
        let record = self.inner.state.lock();
        if !record.status.is_authenticated() {
            return None;
        }
        record.session.as_ref().map(|s| s.origin)
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.events.borrow().clone()
    }

    /// Receiver that observes every state change
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.events.subscribe()
    }

    /// Register a callback invoked after every state change
    pub fn on_change<F>(&self, callback: F)
    where
        F: Fn(&SessionSnapshot) + Send + Sync + 'static,
    {
        self.inner.listeners.lock().push(Arc::new(callback));
    }

    /// Rehydrate from the credential store and confirm the token with the
    /// backend.
    pub async fn initialize(&self) -> SessionStatus {
        info!("Initializing session...");

        let Some(mut session) = self.inner.store.load() else {
            info!("No stored session found");
            if self.inner.settings.refresh_mode == RefreshMode::Cookie {
                debug!("Trying silent refresh from cookie");
                if let Err(e) = Inner::join_or_start_refresh(&self.inner, true).await {
                    debug!("No server-side session to resume: {}", e);
                }
            }
            return self.status();
        };

        if session.origin == SessionOrigin::DevFallback {
            if self.inner.dev_fallback.is_enabled() {
                warn!("Restoring DEVELOPMENT session for {}", session.user.identifier);
                let _ = self.inner.mutate(Some(ChangeReason::Restored), |record| {
                    record.status = SessionStatus::Authenticated;
                    record.session = Some(session);
                    Ok(())
                });
            } else {
                info!("Discarding development session (fallback disabled)");
                let _ = self.inner.store.clear();
            }
            return self.status();
        }

        if self.inner.settings.refresh_mode == RefreshMode::Cookie {
            session.credentials.refresh_token = None;
        }

        let trusted = session.credentials.has_trusted_expiry();
        info!(
            "Found stored session for {} (expires: {:?}, trusted: {})",
            session.user.identifier, session.credentials.expires_at, trusted
        );

        let _ = self.inner.mutate(Some(ChangeReason::Restored), |record| {
            record.status = if trusted {
                SessionStatus::Authenticated
            } else {
                SessionStatus::Unauthenticated
            };
            record.session = Some(session);
            Ok(())
        });

        match self.validate().await {
            Ok(user) => info!("Stored session confirmed for {}", user.identifier),
            Err(e) if e.is_transient() => {
                if trusted {
                    warn!("Could not validate session ({}); keeping it until it expires", e);
                } else {
                    warn!("Could not validate session ({}); starting signed out", e);
                }
            }
            Err(e) => info!("Stored session is no longer valid: {}", e),
        }

        self.status()
    }

    /// Sign in with identifier and password
    pub async fn login(&self, request: &LoginRequest) -> Result<UserProfile, AuthError> {
        info!("Signing in user: {}", request.identifier);
        let epoch = self.inner.begin_authenticating();

        let session = match self.inner.client.login(request).await {
            Ok(grant) => self.inner.session_from_grant(grant, &request.identifier),
            Err(AuthError::NetworkError(msg)) if self.inner.dev_fallback.is_enabled() => {
                warn!("Backend unreachable during sign in: {}", msg);
                match self.inner.dev_fallback.authenticate(request) {
                    Some(session) => session,
                    None => {
                        let err = AuthError::NetworkError(msg);
                        self.inner.fail_authenticating(epoch, &err);
                        return Err(err);
                    }
                }
            }
            Err(e) => {
                error!("Sign in failed: {}", e);
                self.inner.fail_authenticating(epoch, &e);
                return Err(e);
            }
        };

        let user = self
            .inner
            .commit_authenticated(epoch, session, ChangeReason::LoggedIn)?;
        info!("Sign in successful!");
        Ok(user)
    }

    /// Create an account and sign in with it
    pub async fn register(&self, request: &RegisterRequest) -> Result<UserProfile, AuthError> {
        request.check()?;

        info!("Registering account: {}", request.email);
        let epoch = self.inner.begin_authenticating();

        let session = match self.inner.client.register(request).await {
            Ok(grant) => self.inner.session_from_grant(grant, &request.email),
            Err(e) => {
                error!("Registration failed: {}", e);
                self.inner.fail_authenticating(epoch, &e);
                return Err(e);
            }
        };

        let user = self
            .inner
            .commit_authenticated(epoch, session, ChangeReason::Registered)?;
        info!("Registration successful!");
        Ok(user)
    }

    /// Sign out. Local state is cleared first; the backend call is
    /// best effort and its failure is ignored.
    pub async fn logout(&self) {
        info!("Logging out");

        let previous = self.inner.end_session(ChangeReason::LoggedOut);
        let mode = self.inner.settings.refresh_mode;

        let (access_token, refresh_token) = match &previous {
            Some(session) if session.origin == SessionOrigin::DevFallback => {
                info!("Logged out of development session");
                return;
            }
            Some(session) => (
                Some(session.credentials.access_token.clone()),
                match mode {
                    RefreshMode::Token => session.credentials.refresh_token.clone(),
                    RefreshMode::Cookie => None,
                },
            ),
            None if mode == RefreshMode::Cookie => (None, None),
            None => {
                info!("Logged out (no active session)");
                return;
            }
        };

        match self
            .inner
            .client
            .logout(access_token.as_deref(), refresh_token.as_deref())
            .await
        {
            Ok(()) => info!("Logged out successfully"),
            Err(e) => warn!("Backend logout failed (local session already cleared): {}", e),
        }
    }

    /// Refresh the access token.
    ///
    /// Concurrent callers share a single request and all receive its
    /// outcome. On failure the session is cleared. Without an installed
    /// session this is `NotAuthenticated`; only `initialize()` resumes a
    /// server-side cookie session.
    pub async fn refresh(&self) -> Result<Credentials, AuthError> {
        Inner::join_or_start_refresh(&self.inner, false).await
    }

    /// Refresh after a protected call was rejected with `rejected_token`.
    ///
    /// If the credentials were already rotated by another caller, the new
    /// ones are returned without another network round trip.
    pub async fn refresh_after_unauthorized(
        &self,
        rejected_token: &str,
    ) -> Result<Credentials, AuthError> {
        {
            let record = self.inner.state.lock();
            let Some(session) = &record.session else {
                // Signed out while the call was in flight
                debug!("No session to refresh after 401");
                return Err(AuthError::NotAuthenticated);
            };
            if record.status == SessionStatus::Authenticated
                && session.credentials.access_token != rejected_token
            {
                debug!("Credentials already rotated, reusing them");
                return Ok(session.credentials.clone());
            }
        }
        self.refresh().await
    }

    /// Confirm the current token with the backend. A rejected token gets
    /// exactly one refresh attempt.
    pub async fn validate(&self) -> Result<UserProfile, AuthError> {
        let (token, epoch) = {
            let record = self.inner.state.lock();
            match &record.session {
                Some(session) => (
                    session.credentials.access_token.clone(),
                    self.inner.epoch.load(Ordering::SeqCst),
                ),
                None => return Err(AuthError::NotAuthenticated),
            }
        };

        match self.inner.client.validate(&token).await {
            Ok(profile) => self.inner.commit_validated(epoch, &token, profile),
            Err(AuthError::Unauthorized) => {
                info!("Access token rejected, attempting refresh");
                self.refresh().await?;
                self.current_user().ok_or(AuthError::NotAuthenticated)
            }
            Err(e) => Err(e),
        }
    }

    /// Current access token, refreshed first when it is about to expire
    pub async fn access_token(&self) -> Result<String, AuthError> {
        let (credentials, refreshable) = {
            let record = self.inner.state.lock();
            match &record.session {
                Some(session) if record.status.is_authenticated() => (
                    session.credentials.clone(),
                    self.inner.has_refresh_path(session),
                ),
                _ => return Err(AuthError::NotAuthenticated),
            }
        };

        if refreshable && credentials.expires_soon(self.inner.settings.expiry_skew()) {
            info!("Token expiring soon, refreshing proactively...");
            return self.refresh().await.map(|c| c.access_token);
        }

        Ok(credentials.access_token)
    }

    /// Drop the session without user action (e.g. a protected call failed
    /// even after refreshing). Publishes `ChangeReason::Expired`.
    pub fn expire(&self) {
        warn!("Session expired, clearing credentials");
        self.inner.end_session(ChangeReason::Expired);
    }

    /// Like [`expire`](Self::expire), but only while `token` is still the
    /// installed access token. A session replaced in the meantime is kept.
    pub fn expire_token(&self, token: &str) {
        let epoch = {
            let record = self.inner.state.lock();
            match &record.session {
                Some(session) if session.credentials.access_token == token => {
                    self.inner.epoch.load(Ordering::SeqCst)
                }
                _ => return,
            }
        };
        warn!("Session rejected after refresh, clearing credentials");
        self.inner.expire_if_current(epoch);
    }

    /// Cancel any in-flight refresh and stop accepting its result.
    /// Persisted credentials are kept for the next start.
    pub fn shutdown(&self) {
        debug!("Shutting down session manager");
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.inflight.lock().take();
    }
}

impl Inner {
    /// Apply `f` to the state record and publish the result.
    /// Nothing is published when `f` fails.
    fn mutate<R>(
        &self,
        reason: Option<ChangeReason>,
        f: impl FnOnce(&mut StateRecord) -> Result<R, AuthError>,
    ) -> Result<R, AuthError> {
        let (result, snapshot) = {
            let mut record = self.state.lock();
            let result = f(&mut record)?;
            let snapshot = record.snapshot(reason);
            self.events.send_replace(snapshot.clone());
            (result, snapshot)
        };

        let listeners: Vec<Listener> = self.listeners.lock().clone();
        for listener in listeners {
            listener(&snapshot);
        }
        Ok(result)
    }

    fn has_refresh_path(&self, session: &AuthSession) -> bool {
        session.origin == SessionOrigin::Backend
            && (self.settings.refresh_mode == RefreshMode::Cookie
                || session.credentials.refresh_token.is_some())
    }

    fn session_from_grant(&self, grant: AuthGrant, identifier: &str) -> AuthSession {
        let AuthGrant {
            mut credentials,
            user,
        } = grant;
        if self.settings.refresh_mode == RefreshMode::Cookie {
            credentials.refresh_token = None;
        }
        let user = user.unwrap_or_else(|| UserProfile {
            identifier: identifier.to_string(),
            display_name: identifier.to_string(),
            role: super::types::default_role(),
            id: None,
        });
        AuthSession {
            credentials,
            user,
            origin: SessionOrigin::Backend,
        }
    }

    /// Enter `Authenticating`, invalidating whatever came before
    fn begin_authenticating(&self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.inflight.lock().take();
        let _ = self.mutate(None, |record| {
            record.status = SessionStatus::Authenticating;
            record.session = None;
            Ok(())
        });
        epoch
    }

    fn fail_authenticating(&self, epoch: u64, err: &AuthError) {
        debug!("Authentication attempt failed: {}", err);
        let _ = self.mutate(Some(ChangeReason::Failed), |record| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return Err(AuthError::NotAuthenticated);
            }
            if let Err(e) = self.store.clear() {
                warn!("Failed to clear stored session: {}", e);
            }
            record.status = SessionStatus::Unauthenticated;
            record.session = None;
            Ok(())
        });
    }

    /// Persist and install a fresh session from login/register
    fn commit_authenticated(
        &self,
        epoch: u64,
        session: AuthSession,
        reason: ChangeReason,
    ) -> Result<UserProfile, AuthError> {
        let result = self.mutate(Some(reason), |record| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                info!("Sign in superseded by a later session change, discarding");
                return Err(AuthError::NotAuthenticated);
            }
            self.store.save(&session)?;
            let user = session.user.clone();
            record.status = SessionStatus::Authenticated;
            record.session = Some(session);
            Ok(user)
        });

        if let Err(e @ AuthError::StorageError(_)) = &result {
            error!("Failed to persist session: {}", e);
            self.fail_authenticating(epoch, e);
        }
        result
    }

    fn commit_validated(
        &self,
        epoch: u64,
        token: &str,
        profile: Option<UserProfile>,
    ) -> Result<UserProfile, AuthError> {
        self.mutate(Some(ChangeReason::Validated), |record| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return Err(AuthError::NotAuthenticated);
            }
            let Some(session) = record.session.as_mut() else {
                return Err(AuthError::NotAuthenticated);
            };
            if session.credentials.access_token != token {
                // Rotated while validating; the refresh already installed a profile
                return Ok(session.user.clone());
            }
            if let Some(profile) = profile {
                if profile != session.user {
                    session.user = profile;
                    if let Err(e) = self.store.save(session) {
                        warn!("Failed to store validated profile: {}", e);
                    }
                }
            }
            let user = session.user.clone();
            record.status = SessionStatus::Authenticated;
            Ok(user)
        })
    }

    /// Clear memory and store, cancel any refresh. Returns the old session.
    fn end_session(&self, reason: ChangeReason) -> Option<AuthSession> {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.inflight.lock().take();

        self.mutate(Some(reason), |record| {
            if let Err(e) = self.store.clear() {
                warn!("Failed to clear stored session: {}", e);
            }
            record.status = SessionStatus::Unauthenticated;
            Ok(record.session.take())
        })
        .ok()
        .flatten()
    }

    fn join_or_start_refresh(this: &Arc<Self>, resume: bool) -> RefreshFuture {
        let mut slot = this.inflight.lock();
        if let Some(inflight) = slot.as_ref() {
            debug!("Joining in-flight refresh #{}", inflight.id);
            return inflight.future.clone();
        }

        let id = this.next_refresh_id.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(this);
        let future = async move {
            let result = inner.run_refresh(id, resume).await;
            inner.finish_refresh(id);
            result
        }
        .boxed()
        .shared();

        *slot = Some(InFlight {
            id,
            future: future.clone(),
        });
        future
    }

    fn finish_refresh(&self, id: u64) {
        let mut slot = self.inflight.lock();
        if slot.as_ref().map(|f| f.id) == Some(id) {
            slot.take();
        }
    }

    async fn run_refresh(&self, id: u64, resume: bool) -> Result<Credentials, AuthError> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let mode = self.settings.refresh_mode;

        let (path, had_session) = {
            let record = self.state.lock();
            let path = match &record.session {
                Some(session) if !self.has_refresh_path(session) => None,
                Some(session) => Some(session.credentials.refresh_token.clone()),
                // Cookie mode can resume a server-side session we never saw
                None if resume && mode == RefreshMode::Cookie => Some(None),
                None => None,
            };
            (path, record.session.is_some())
        };

        let Some(refresh_token) = path else {
            if !had_session {
                debug!("No session to refresh");
                return Err(AuthError::NotAuthenticated);
            }
            warn!("No refresh path for the current session");
            let _ = self.mutate(None, |record| {
                record.status = SessionStatus::Expired;
                Ok(())
            });
            self.expire_if_current(epoch);
            return Err(AuthError::RefreshRejected);
        };

        let _ = self.mutate(None, |record| {
            if record.status != SessionStatus::Authenticated {
                return Err(AuthError::NotAuthenticated);
            }
            record.status = SessionStatus::Refreshing;
            Ok(())
        });

        info!("Refreshing access token (refresh #{})", id);

        let mut attempt: u32 = 0;
        let result = loop {
            match self.client.refresh(refresh_token.as_deref()).await {
                Ok(grant) => break Ok(grant),
                Err(e) if e.is_transient() && attempt < self.settings.refresh_retries => {
                    let delay = self.settings.refresh_backoff() * (1u32 << attempt.min(16));
                    attempt += 1;
                    warn!(
                        "Token refresh attempt {} failed: {} (retrying in {:?})",
                        attempt, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    if self.epoch.load(Ordering::SeqCst) != epoch {
                        return Err(AuthError::NotAuthenticated);
                    }
                }
                Err(e) => break Err(e),
            }
        };

        let mut grant = match result {
            Ok(grant) => grant,
            Err(e) => {
                warn!("Token refresh failed: {}", e);
                if had_session {
                    self.expire_if_current(epoch);
                }
                return Err(e);
            }
        };

        if mode == RefreshMode::Cookie {
            grant.credentials.refresh_token = None;
        }

        // A cookie-only resume has no profile yet; ask for one
        if grant.user.is_none() && !had_session {
            match self.client.validate(&grant.credentials.access_token).await {
                Ok(profile) => grant.user = profile,
                Err(e) => debug!("Could not fetch profile after refresh: {}", e),
            }
        }

        let committed = self.mutate(Some(ChangeReason::Refreshed), |record| {
            if self.epoch.load(Ordering::SeqCst) != epoch {
                info!("Discarding refresh result: session ended while refreshing");
                return Err(AuthError::NotAuthenticated);
            }

            let previous = record.session.take();
            let user = match (grant.user.clone(), previous.as_ref()) {
                (Some(user), _) => user,
                (None, Some(previous)) => previous.user.clone(),
                (None, None) => {
                    return Err(AuthError::ServerError {
                        status: 200,
                        message: "Refresh response did not identify the user".to_string(),
                    })
                }
            };

            let mut credentials = grant.credentials.clone();
            // Backends that do not rotate refresh tokens omit them on refresh
            if credentials.refresh_token.is_none() && mode == RefreshMode::Token {
                credentials.refresh_token =
                    previous.and_then(|p| p.credentials.refresh_token);
            }

            let session = AuthSession {
                credentials: credentials.clone(),
                user,
                origin: SessionOrigin::Backend,
            };
            if let Err(e) = self.store.save(&session) {
                warn!("Failed to store refreshed session: {}", e);
            }
            record.status = SessionStatus::Authenticated;
            record.session = Some(session);
            Ok(credentials)
        });

        match &committed {
            Ok(_) => info!("Token refreshed successfully"),
            Err(AuthError::ServerError { .. }) => self.expire_if_current(epoch),
            Err(_) => {}
        }
        committed
    }

    /// Terminal refresh failure: clear the session unless it already changed
    fn expire_if_current(&self, epoch: u64) {
        if self
            .epoch
            .compare_exchange(epoch, epoch + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Session changed during refresh, leaving it alone");
            return;
        }

        let _ = self.mutate(Some(ChangeReason::Expired), |record| {
            if let Err(e) = self.store.clear() {
                warn!("Failed to clear stored session: {}", e);
            }
            record.status = SessionStatus::Unauthenticated;
            record.session = None;
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::MemoryCredentialStore;
    use chrono::{Duration, Utc};

    fn make_session(refresh_token: Option<&str>) -> AuthSession {
        AuthSession {
            credentials: Credentials {
                access_token: "abc".to_string(),
                refresh_token: refresh_token.map(str::to_string),
                expires_at: Some(Utc::now() + Duration::hours(1)),
            },
            user: UserProfile {
                identifier: "user@test.com".to_string(),
                display_name: "Test".to_string(),
                role: "user".to_string(),
                id: None,
            },
            origin: SessionOrigin::Backend,
        }
    }

    fn make_manager(store: Arc<MemoryCredentialStore>) -> SessionManager {
        // Nothing listens here; these tests never reach the network
        let settings = SessionSettings::for_api("http://127.0.0.1:9");
        SessionManager::new(settings, store).unwrap()
    }

    fn install(manager: &SessionManager, session: AuthSession) {
        let _ = manager.inner.mutate(Some(ChangeReason::LoggedIn), |record| {
            record.status = SessionStatus::Authenticated;
            record.session = Some(session);
            Ok(())
        });
    }

    #[test]
    fn test_starts_unauthenticated() {
        let manager = make_manager(Arc::new(MemoryCredentialStore::new()));
        assert_eq!(manager.status(), SessionStatus::Unauthenticated);
        assert!(!manager.is_authenticated());
        assert!(manager.current_user().is_none());
    }

    #[test]
    fn test_expire_clears_store_and_publishes() {
        let store = Arc::new(MemoryCredentialStore::with_session(make_session(Some("r"))));
        let manager = make_manager(store.clone());
        install(&manager, make_session(Some("r")));
        let rx = manager.subscribe();
        assert!(manager.is_authenticated());

        manager.expire();

        assert!(!manager.is_authenticated());
        assert!(store.snapshot().is_none());
        let snapshot = rx.borrow().clone();
        assert_eq!(snapshot.reason, Some(ChangeReason::Expired));
        assert!(snapshot.user.is_none());
    }

    #[test]
    fn test_on_change_sees_every_mutation() {
        let manager = make_manager(Arc::new(MemoryCredentialStore::new()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        manager.on_change(move |snapshot| sink.lock().push(snapshot.status));

        install(&manager, make_session(None));
        manager.expire();

        assert_eq!(
            *seen.lock(),
            vec![SessionStatus::Authenticated, SessionStatus::Unauthenticated]
        );
    }

    #[test]
    fn test_refresh_path_rules() {
        let manager = make_manager(Arc::new(MemoryCredentialStore::new()));
        assert!(manager.inner.has_refresh_path(&make_session(Some("r"))));
        assert!(!manager.inner.has_refresh_path(&make_session(None)));

        let mut dev = make_session(Some("r"));
        dev.origin = SessionOrigin::DevFallback;
        assert!(!manager.inner.has_refresh_path(&dev));
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token_expires_session() {
        let store = Arc::new(MemoryCredentialStore::new());
        let manager = make_manager(store.clone());
        install(&manager, make_session(None));

        let result = manager.refresh().await;

        assert_eq!(result, Err(AuthError::RefreshRejected));
        assert!(!manager.is_authenticated());
        assert_eq!(manager.snapshot().reason, Some(ChangeReason::Expired));
    }

    #[tokio::test]
    async fn test_rotated_credentials_skip_refresh() {
        let manager = make_manager(Arc::new(MemoryCredentialStore::new()));
        install(&manager, make_session(Some("r")));

        let creds = manager.refresh_after_unauthorized("stale-token").await.unwrap();
        assert_eq!(creds.access_token, "abc");
    }

    #[tokio::test]
    async fn test_refresh_without_session_is_not_authenticated() {
        let mut settings = SessionSettings::for_api("http://127.0.0.1:9");
        settings.refresh_mode = RefreshMode::Cookie;
        let manager = SessionManager::new(settings, Arc::new(MemoryCredentialStore::new())).unwrap();

        assert_eq!(manager.refresh().await, Err(AuthError::NotAuthenticated));
        assert_eq!(
            manager.refresh_after_unauthorized("abc").await,
            Err(AuthError::NotAuthenticated)
        );
        assert_eq!(manager.status(), SessionStatus::Unauthenticated);
    }

    #[tokio::test]
    async fn test_access_token_requires_session() {
        let manager = make_manager(Arc::new(MemoryCredentialStore::new()));
        assert_eq!(
            manager.access_token().await,
            Err(AuthError::NotAuthenticated)
        );
        install(&manager, make_session(Some("r")));
        assert_eq!(manager.access_token().await.unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_logout_without_session_is_local_only() {
        let store = Arc::new(MemoryCredentialStore::new());
        let manager = make_manager(store);
        manager.logout().await;
        assert_eq!(manager.snapshot().reason, Some(ChangeReason::LoggedOut));
    }

    #[tokio::test]
    async fn test_initialize_discards_dev_session_when_disabled() {
        let mut session = make_session(None);
        session.origin = SessionOrigin::DevFallback;
        let store = Arc::new(MemoryCredentialStore::with_session(session));
        let manager = make_manager(store.clone());

        assert_eq!(manager.initialize().await, SessionStatus::Unauthenticated);
        assert!(store.snapshot().is_none());
    }
}
