use dashmap::DashMap;
use sha2::{Digest, Sha256};
use ulid::Ulid;

use crate::model::{Ms, Role};

/// Upper bound on concurrently open sessions.
const MAX_SESSIONS: usize = 100_000;

/// An authenticated caller, bound to one user for the session's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub user_id: Ulid,
    pub role: Role,
    pub opened_at: Ms,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SessionError {
    TooManySessions,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::TooManySessions => write!(f, "too many open sessions"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Open sessions keyed by bearer token. Owned by the application state and
/// passed to handlers explicitly; there is no process-wide current user.
///
/// Sessions are only issued to callers presenting the issuer key. Without a
/// configured key no session can be opened.
pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
    issuer_digest: Option<[u8; 32]>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            issuer_digest: None,
        }
    }

    /// Registry accepting `key` as the issuer credential. An empty key counts
    /// as unset.
    pub fn with_issuer_key(key: Option<&str>) -> Self {
        Self {
            sessions: DashMap::new(),
            issuer_digest: key.filter(|k| !k.is_empty()).map(digest),
        }
    }

    pub fn accepts_issuers(&self) -> bool {
        self.issuer_digest.is_some()
    }

    /// Digests are compared rather than the raw keys, so the comparison time
    /// says nothing about how much of the key matched.
    pub fn verify_issuer(&self, presented: &str) -> bool {
        self.issuer_digest.is_some_and(|expected| expected == digest(presented))
    }

    /// Open a session for a user whose credentials were already verified.
    pub fn open(&self, user_id: Ulid, role: Role, now: Ms) -> Result<Session, SessionError> {
        if self.sessions.len() >= MAX_SESSIONS {
            return Err(SessionError::TooManySessions);
        }
        let session = Session {
            token: Ulid::new().to_string(),
            user_id,
            role,
            opened_at: now,
        };
        self.sessions.insert(session.token.clone(), session.clone());
        metrics::gauge!(crate::observability::SESSIONS_ACTIVE).set(self.sessions.len() as f64);
        tracing::debug!(user = %user_id, "session opened");
        Ok(session)
    }

    /// Close a session. Returns false if the token was not open.
    pub fn close(&self, token: &str) -> bool {
        let closed = self.sessions.remove(token).is_some();
        if closed {
            metrics::gauge!(crate::observability::SESSIONS_ACTIVE).set(self.sessions.len() as f64);
        }
        closed
    }

    pub fn resolve(&self, token: &str) -> Option<Session> {
        self.sessions.get(token).map(|s| s.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn digest(key: &str) -> [u8; 32] {
    Sha256::digest(key.as_bytes()).into()
}
