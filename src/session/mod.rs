//! Session manager: bearer token ownership and refresh-after-401.
//!
//! # State machine
//!
//! ```text
//!                 sign_in                    first 401, no refresh running
//!   Anonymous ─────────────▶ Authenticated ──────────────────────────────▶ Refreshing
//!       ▲                        ▲                                             │
//!       │                        └──────────── refresh ok (token stored) ──────┤
//!       └─────────────────────────────────── refresh failed (token cleared) ───┘
//! ```
//!
//! Only one refresh runs at a time. A request that hits 401 while a refresh
//! is running joins it and replays (or fails) on its outcome. A request that
//! hits 401 with a token an earlier refresh has already replaced replays with
//! the current token without refreshing again.
//!
//! The replay-once rule itself lives in the orchestrator: a replayed request
//! that gets a second 401 never comes back here.
//!
//! Consumers watch [`SessionManager::subscribe()`]; a transition to
//! [`SessionState::Anonymous`] after a failed refresh is the signal to send
//! the user to the login screen.

mod store;

pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::telemetry;
use crate::{CoachwayError, Result};

/// Obtains a new access token from the backend.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchange the current session for a fresh access token.
    async fn refresh(&self, current: Option<&str>) -> Result<String>;
}

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticated,
    Refreshing,
}

type RefreshOutcome = Shared<BoxFuture<'static, Result<String>>>;

struct Inner {
    token: Option<String>,
    refresh: Option<RefreshOutcome>,
    /// Bumped by sign-in/sign-out so a refresh that outlives them can't
    /// resurrect or overwrite the session.
    generation: u64,
}

impl Inner {
    fn state(&self) -> SessionState {
        match (&self.refresh, &self.token) {
            (Some(_), _) => SessionState::Refreshing,
            (None, Some(_)) => SessionState::Authenticated,
            (None, None) => SessionState::Anonymous,
        }
    }
}

struct SessionCore {
    inner: Mutex<Inner>,
    refresher: Arc<dyn TokenRefresher>,
    store: Arc<dyn TokenStore>,
    state_tx: watch::Sender<SessionState>,
}

impl SessionCore {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: SessionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "session state changed");
        }
    }

    fn persist(&self, token: Option<&str>) {
        let result = match token {
            Some(token) => self.store.save(token),
            None => self.store.clear(),
        };
        if let Err(e) = result {
            warn!(error = %e, "failed to persist session token");
        }
    }

    /// Runs exactly once per refresh cycle, on the refresh task.
    ///
    /// Storage writes and state publication happen under the lock, so they
    /// are ordered with sign-in/sign-out and with each other.
    fn finish_refresh(&self, generation: u64, result: Result<String>) -> Result<String> {
        let mut inner = self.lock();
        inner.refresh = None;

        if inner.generation != generation {
            debug!("session changed during refresh, discarding refresh result");
            self.publish(inner.state());
            return inner.token.clone().ok_or_else(|| {
                CoachwayError::AuthenticationRequired("signed out during refresh".to_string())
            });
        }

        match result {
            Ok(token) => {
                inner.token = Some(token.clone());
                self.persist(Some(&token));
                self.publish(SessionState::Authenticated);
                drop(inner);
                metrics::counter!(telemetry::SESSION_REFRESHES_TOTAL, "status" => "ok")
                    .increment(1);
                info!("session token refreshed");
                Ok(token)
            }
            Err(e) => {
                inner.token = None;
                inner.generation += 1;
                self.persist(None);
                self.publish(SessionState::Anonymous);
                drop(inner);
                metrics::counter!(telemetry::SESSION_REFRESHES_TOTAL, "status" => "error")
                    .increment(1);
                warn!(error = %e, "session refresh failed, login required");
                Err(CoachwayError::AuthenticationRequired(format!(
                    "session refresh failed: {e}"
                )))
            }
        }
    }
}

/// Owns the current access token. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SessionManager {
    shared: Arc<SessionCore>,
}

impl SessionManager {
    /// Create a manager, restoring any token left in `store`.
    pub fn new(refresher: Arc<dyn TokenRefresher>, store: Arc<dyn TokenStore>) -> Self {
        let token = store.load().unwrap_or_else(|e| {
            warn!(error = %e, "failed to restore session token");
            None
        });
        let initial = if token.is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Anonymous
        };
        let (state_tx, _) = watch::channel(initial);

        Self {
            shared: Arc::new(SessionCore {
                inner: Mutex::new(Inner {
                    token,
                    refresh: None,
                    generation: 0,
                }),
                refresher,
                store,
                state_tx,
            }),
        }
    }

    /// Current access token, if signed in.
    pub fn token(&self) -> Option<String> {
        self.shared.lock().token.clone()
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    /// Store a token obtained from a successful login.
    ///
    /// The token is persisted first; if that fails the session is left as
    /// it was.
    pub fn sign_in(&self, token: impl Into<String>) -> Result<()> {
        let token = token.into();
        let mut inner = self.shared.lock();
        self.shared.store.save(&token)?;
        inner.token = Some(token);
        inner.generation += 1;
        self.shared.publish(inner.state());
        drop(inner);
        info!("signed in");
        Ok(())
    }

    /// Forget the token locally and in durable storage.
    ///
    /// If durable storage can't be cleared the session stays signed in.
    pub fn sign_out(&self) -> Result<()> {
        let mut inner = self.shared.lock();
        self.shared.store.clear()?;
        inner.token = None;
        inner.generation += 1;
        self.shared.publish(inner.state());
        drop(inner);
        info!("signed out");
        Ok(())
    }

    /// Resolve a 401 received for a request sent with `stale`.
    ///
    /// Returns the token to replay with, or `AuthenticationRequired` when
    /// there is no session to refresh or the refresh failed. Concurrent
    /// callers share a single refresh.
    pub async fn recover(&self, stale: Option<&str>) -> Result<String> {
        let outcome = {
            let mut inner = self.shared.lock();
            if let Some(running) = &inner.refresh {
                debug!("joining in-flight session refresh");
                running.clone()
            } else {
                let current = match (&inner.token, stale) {
                    (None, _) => {
                        return Err(CoachwayError::AuthenticationRequired(
                            "no active session".to_string(),
                        ));
                    }
                    // Already replaced by a refresh (or sign-in) since the
                    // request went out: replay with what we have now.
                    (Some(current), Some(stale)) if current != stale => {
                        return Ok(current.clone());
                    }
                    (Some(current), None) => return Ok(current.clone()),
                    (Some(current), Some(_)) => current.clone(),
                };

                let shared = Arc::clone(&self.shared);
                let generation = inner.generation;
                let handle = tokio::spawn(async move {
                    let result = shared.refresher.refresh(Some(&current)).await;
                    shared.finish_refresh(generation, result)
                });
                let running = async move {
                    handle.await.unwrap_or_else(|e| {
                        Err(CoachwayError::Internal(format!(
                            "session refresh task failed: {e}"
                        )))
                    })
                }
                .boxed()
                .shared();
                inner.refresh = Some(running.clone());
                // published before the lock is released, so the refresh task
                // can't publish its outcome first
                self.shared.publish(SessionState::Refreshing);
                drop(inner);
                info!("access token rejected, refreshing session");
                running
            }
        };
        outcome.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct CountingRefresher {
        calls: AtomicU32,
        succeed: bool,
    }

    impl CountingRefresher {
        fn new(succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                succeed,
            })
        }
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, current: Option<&str>) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.succeed {
                Ok(format!("{}-r{n}", current.unwrap_or("none")))
            } else {
                Err(CoachwayError::Api {
                    status: 403,
                    message: "refresh token revoked".into(),
                })
            }
        }
    }

    fn manager(refresher: Arc<CountingRefresher>, token: Option<&str>) -> SessionManager {
        let store = match token {
            Some(t) => MemoryTokenStore::with_token(t),
            None => MemoryTokenStore::new(),
        };
        SessionManager::new(refresher, Arc::new(store))
    }

    #[test]
    fn restores_token_from_store() {
        let session = manager(CountingRefresher::new(true), Some("old"));
        assert_eq!(session.token().as_deref(), Some("old"));
        assert_eq!(session.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn anonymous_401_does_not_refresh() {
        let refresher = CountingRefresher::new(true);
        let session = manager(refresher.clone(), None);

        let err = session.recover(None).await.unwrap_err();
        assert!(matches!(err, CoachwayError::AuthenticationRequired(_)));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn successful_refresh_stores_new_token() {
        let refresher = CountingRefresher::new(true);
        let session = manager(refresher.clone(), Some("old"));

        let token = session.recover(Some("old")).await.unwrap();
        assert_eq!(token, "old-r1");
        assert_eq!(session.token().as_deref(), Some("old-r1"));
        assert_eq!(session.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn failed_refresh_clears_token_and_signals_login() {
        let refresher = CountingRefresher::new(false);
        let session = manager(refresher.clone(), Some("old"));
        let mut states = session.subscribe();

        let err = session.recover(Some("old")).await.unwrap_err();
        assert!(err.requires_login());
        assert_eq!(session.token(), None);
        assert_eq!(*states.borrow_and_update(), SessionState::Anonymous);
    }

    #[tokio::test]
    async fn concurrent_401s_share_one_refresh() {
        let refresher = CountingRefresher::new(true);
        let session = manager(refresher.clone(), Some("old"));

        let callers = (0..5).map(|_| {
            let session = session.clone();
            async move { session.recover(Some("old")).await }
        });
        let tokens = futures_util::future::join_all(callers).await;

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert!(tokens.iter().all(|t| matches!(t.as_deref(), Ok("old-r1"))));
    }

    #[tokio::test]
    async fn superseded_token_replays_without_refresh() {
        let refresher = CountingRefresher::new(true);
        let session = manager(refresher.clone(), Some("old"));

        session.recover(Some("old")).await.unwrap();
        // a straggler that was sent with the old token before the refresh
        let token = session.recover(Some("old")).await.unwrap();
        assert_eq!(token, "old-r1");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sign_out_during_refresh_wins() {
        let refresher = CountingRefresher::new(true);
        let session = manager(refresher.clone(), Some("old"));

        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.recover(Some("old")).await })
        };
        tokio::task::yield_now().await;
        session.sign_out().unwrap();

        let result = pending.await.unwrap();
        assert!(result.is_err());
        assert_eq!(session.token(), None);
    }

    struct FailingStore;

    impl TokenStore for FailingStore {
        fn load(&self) -> Result<Option<String>> {
            Ok(Some("kept".to_string()))
        }

        fn save(&self, _token: &str) -> Result<()> {
            Err(CoachwayError::Storage("disk full".into()))
        }

        fn clear(&self) -> Result<()> {
            Err(CoachwayError::Storage("read-only filesystem".into()))
        }
    }

    #[test]
    fn failed_save_leaves_session_untouched() {
        let session = SessionManager::new(CountingRefresher::new(true), Arc::new(FailingStore));
        let states = session.subscribe();

        let err = session.sign_in("replacement").unwrap_err();
        assert!(matches!(err, CoachwayError::Storage(_)));
        assert_eq!(session.token().as_deref(), Some("kept"));
        assert_eq!(session.state(), SessionState::Authenticated);
        assert_eq!(*states.borrow(), SessionState::Authenticated);
    }

    #[test]
    fn failed_clear_keeps_session_signed_in() {
        let session = SessionManager::new(CountingRefresher::new(true), Arc::new(FailingStore));
        let states = session.subscribe();

        let err = session.sign_out().unwrap_err();
        assert!(matches!(err, CoachwayError::Storage(_)));
        assert_eq!(session.token().as_deref(), Some("kept"));
        assert_eq!(session.state(), SessionState::Authenticated);
        assert_eq!(*states.borrow(), SessionState::Authenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_save_does_not_discard_a_running_refresh() {
        let refresher = CountingRefresher::new(true);
        let session = SessionManager::new(refresher.clone(), Arc::new(FailingStore));

        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.recover(Some("kept")).await })
        };
        tokio::task::yield_now().await;
        assert!(session.sign_in("replacement").is_err());

        // generation untouched, so the refresh result still lands
        assert_eq!(pending.await.unwrap().unwrap(), "kept-r1");
        assert_eq!(session.token().as_deref(), Some("kept-r1"));
    }

    struct InstantRefresher;

    #[async_trait]
    impl TokenRefresher for InstantRefresher {
        async fn refresh(&self, current: Option<&str>) -> Result<String> {
            Ok(format!("{}+", current.unwrap_or_default()))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn watched_state_settles_after_fast_refresh() {
        let session = SessionManager::new(
            Arc::new(InstantRefresher),
            Arc::new(MemoryTokenStore::with_token("t")),
        );
        let states = session.subscribe();

        for _ in 0..200 {
            let current = session.token();
            session.recover(current.as_deref()).await.unwrap();
            assert_eq!(*states.borrow(), SessionState::Authenticated);
            assert_eq!(session.state(), SessionState::Authenticated);
        }
    }

    #[tokio::test]
    async fn sign_in_publishes_authenticated() {
        let session = manager(CountingRefresher::new(true), None);
        let states = session.subscribe();
        assert_eq!(*states.borrow(), SessionState::Anonymous);

        session.sign_in("fresh").unwrap();
        assert_eq!(*states.borrow(), SessionState::Authenticated);
        assert_eq!(session.token().as_deref(), Some("fresh"));
    }
}
