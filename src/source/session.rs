//! Upstream session lifecycle.
//!
//! The session is opaque cookie material. Validity is structural: a session
//! is usable only while it carries the provider's marker cookie. There is no
//! expiry timestamp; a failed fetch invalidates the session instead.

use crate::error::AuthError;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Cookie set returned by a provider login.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    cookies: Vec<(String, String)>,
}

impl Session {
    pub fn from_cookies<I, K, V>(cookies: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            cookies: cookies
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn has_marker(&self, marker: &str) -> bool {
        self.cookies
            .iter()
            .any(|(name, value)| name == marker && !value.is_empty())
    }

    /// Value for a `Cookie` request header.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// A login exchange against the provider.
pub trait Login: Send + Sync {
    fn login(&self) -> impl Future<Output = Result<Session, AuthError>> + Send;
}

/// Owns the provider session and re-authenticates on demand.
///
/// Safe to share between the poll loop and request handlers; the stored
/// session is replaced whole and the lock is never held across a login.
pub struct SessionManager<L> {
    login: L,
    marker: &'static str,
    current: RwLock<Option<Arc<Session>>>,
}

impl<L: Login> SessionManager<L> {
    pub fn new(login: L, marker: &'static str) -> Self {
        Self {
            login,
            marker,
            current: RwLock::new(None),
        }
    }

    /// Return the held session, logging in again if it is absent or lacks
    /// the marker. On failure the stored session stays cleared.
    pub async fn ensure_session(&self) -> Result<Arc<Session>, AuthError> {
        if let Some(session) = self.current.read().await.as_ref() {
            if session.has_marker(self.marker) {
                return Ok(Arc::clone(session));
            }
        }

        self.invalidate().await;
        info!("Logging in to provider");

        match self.login.login().await {
            Ok(session) if session.has_marker(self.marker) => {
                let session = Arc::new(session);
                *self.current.write().await = Some(Arc::clone(&session));
                debug!("Provider session established");
                Ok(session)
            }
            Ok(_) => {
                warn!("Provider login returned no {} cookie", self.marker);
                Err(AuthError::MissingMarker(self.marker))
            }
            Err(e) => {
                warn!("Provider login failed: {}", e);
                Err(e)
            }
        }
    }

    /// Drop the held session so the next call logs in again.
    pub async fn invalidate(&self) {
        *self.current.write().await = None;
    }

    #[cfg(test)]
    pub async fn current(&self) -> Option<Arc<Session>> {
        self.current.read().await.clone()
    }
}
