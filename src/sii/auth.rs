use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

/// Stage of the authentication handshake, for failure reporting.
///
/// The session proceeds seed → signed seed → token; a cached token is
/// reused until its validity window elapses, after which the handshake
/// restarts from the seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    /// Requesting the seed.
    Seed,
    /// Signing the seed with the external capability.
    Sign,
    /// Exchanging the signed seed for a token.
    TokenExchange,
}

impl fmt::Display for AuthStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Seed => "seed retrieval",
            Self::Sign => "seed signing",
            Self::TokenExchange => "token exchange",
        })
    }
}

/// A completed authentication handshake for one signing identity.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub seed: String,
    pub signed_seed: String,
    pub token: String,
    /// End of the token's validity window.
    pub expires_at: Instant,
}

impl AuthSession {
    /// Whether the token is still inside its validity window.
    pub fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Process-wide session cache, keyed by signing identity.
///
/// Readers hit a cached token concurrently; a refresh serializes behind
/// the per-identity async mutex so only one handshake is in flight —
/// concurrent callers wait for it and then read the fresh token.
#[derive(Debug, Default)]
pub struct TokenCache {
    slots: StdMutex<HashMap<String, Arc<Mutex<Option<AuthSession>>>>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The session slot for an identity, created empty on first use.
    pub fn slot(&self, identity: &str) -> Arc<Mutex<Option<AuthSession>>> {
        let mut slots = self
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.entry(identity.to_string()).or_default().clone()
    }
}
