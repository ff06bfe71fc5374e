use crate::token::SessionToken;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, trace};

/// Tracks which session tokens are held by an in-flight request.
///
/// Locks never wait: a second request for a held token is rejected and the
/// caller is expected to retry. The table mutex is only held for the
/// insert/remove itself, so different tokens never block each other.
#[derive(Clone, Debug, Default)]
pub struct TokenRegistry {
    held: Arc<Mutex<HashSet<SessionToken>>>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh session token
    pub fn issue(&self) -> SessionToken {
        let token = SessionToken::generate();
        info!(%token, "Created token");
        token
    }

    /// Mark `token` as held. Returns false if another request holds it.
    pub fn acquire_lock(&self, token: &SessionToken) -> bool {
        self.held.lock().insert(*token)
    }

    /// Clear the held flag. Releasing an unheld token is a no-op.
    pub fn release_lock(&self, token: &SessionToken) {
        self.held.lock().remove(token);
    }

    pub fn is_locked(&self, token: &SessionToken) -> bool {
        self.held.lock().contains(token)
    }

    /// Scoped form of [`acquire_lock`](Self::acquire_lock): the lock is
    /// released when the returned guard drops, on every exit path.
    pub fn try_lock(&self, token: SessionToken) -> Option<TokenGuard> {
        if !self.acquire_lock(&token) {
            trace!(%token, "Token already locked");
            return None;
        }

        Some(TokenGuard {
            registry: self.clone(),
            token,
        })
    }

    /// Mint a fresh token and lock it in one step
    pub fn issue_locked(&self) -> TokenGuard {
        loop {
            // Only loops if a fresh token collides with a held one
            if let Some(guard) = self.try_lock(self.issue()) {
                return guard;
            }
        }
    }
}

/// Holds a token lock until dropped
#[derive(Debug)]
pub struct TokenGuard {
    registry: TokenRegistry,
    token: SessionToken,
}

impl TokenGuard {
    pub fn token(&self) -> &SessionToken {
        &self.token
    }
}

impl Drop for TokenGuard {
    fn drop(&mut self) {
        self.registry.release_lock(&self.token);
    }
}
