/// Session credential and the binding that drives the push connection
use crate::push::{ConnectionManager, TypingIndicators};
use crate::store::Store;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Opaque bearer token identifying the current user.
///
/// Formatting never reveals the token; logs show a short fingerprint instead.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionCredential(String);

impl SessionCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token, for the Authorization header and the push handshake only
    pub fn token(&self) -> &str {
        &self.0
    }

    /// First 8 hex chars of the token's SHA-256
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0.as_bytes());
        digest.iter().take(4).map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Debug for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionCredential({})", self.fingerprint())
    }
}

impl fmt::Display for SessionCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cred:{}", self.fingerprint())
    }
}

/// Single writer of the process-wide credential.
///
/// Readers (the API client, the session binding) hold a [`watch::Receiver`].
/// `logins` counts identity changes (login, logout, reject) but not refreshes.
#[derive(Clone)]
pub struct Session {
    tx: watch::Sender<Option<SessionCredential>>,
    logins: Arc<AtomicU64>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            tx,
            logins: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of identity changes so far
    pub fn logins(&self) -> u64 {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<SessionCredential>> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> Option<SessionCredential> {
        self.tx.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Successful login. Logging in again with the bound token changes nothing.
    pub fn login(&self, token: impl Into<String>) {
        let credential = SessionCredential::new(token);
        if self.current().as_ref() == Some(&credential) {
            return;
        }
        info!("Session established ({})", credential);
        self.logins.fetch_add(1, Ordering::SeqCst);
        self.replace(Some(credential));
    }

    /// Token refresh: same user, new credential value
    pub fn refresh(&self, token: impl Into<String>) {
        let credential = SessionCredential::new(token);
        debug!("Session credential refreshed ({})", credential);
        self.replace(Some(credential));
    }

    pub fn logout(&self) {
        if self.is_authenticated() {
            info!("Session ended");
            self.logins.fetch_add(1, Ordering::SeqCst);
        }
        self.replace(None);
    }

    /// The server rejected `credential` during validation. Clears the session
    /// only if that credential is still the bound one.
    ///
    /// Returns false when the session already moved on, e.g. a validation
    /// started before a logout and a new login.
    pub fn reject(&self, credential: &SessionCredential) -> bool {
        let rejected = self.tx.send_if_modified(|current| {
            if current.as_ref() == Some(credential) {
                *current = None;
                true
            } else {
                false
            }
        });
        if rejected {
            info!("Session credential rejected ({})", credential);
            self.logins.fetch_add(1, Ordering::SeqCst);
        } else {
            debug!("Ignoring rejection of stale credential {}", credential);
        }
        rejected
    }

    fn replace(&self, value: Option<SessionCredential>) {
        // only notify on actual change; re-login with the same token keeps the connection
        self.tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }
}

/// Watches the credential and keeps the connection manager and the caches
/// in line with it.
pub struct SessionBinding {
    handle: JoinHandle<()>,
}

impl SessionBinding {
    pub fn spawn(
        session: &Session,
        connection: ConnectionManager,
        store: Store,
        typing: TypingIndicators,
    ) -> Self {
        let mut rx = session.subscribe();
        let logins = session.logins.clone();
        let handle = tokio::spawn(async move {
            let mut bound: Option<SessionCredential> = None;
            let mut bound_login = logins.load(Ordering::SeqCst);
            loop {
                let current = rx.borrow_and_update().clone();
                let login = logins.load(Ordering::SeqCst);
                if current != bound {
                    // a different user (or none) must never see the previous caches
                    if bound.is_some() && (current.is_none() || login != bound_login) {
                        connection.bind(None).await;
                        connection.fence();
                        store.reset().await;
                        typing.clear().await;
                    }
                    connection.bind(current.clone()).await;
                    bound = current;
                }
                bound_login = login;
                if rx.changed().await.is_err() {
                    break;
                }
            }
            debug!("Session binding stopped");
        });
        Self { handle }
    }

    pub async fn join(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}
