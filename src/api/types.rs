//! Shared state for the HTTP API layer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::media::MediaStore;
use crate::xray::inference::InferenceClient;
use crate::xray::orchestrator::DiagnosisPipeline;

/// Shared context for all API routes and middleware.
#[derive(Clone)]
pub struct ApiContext {
    pub config: Arc<AppConfig>,
    pub db: Arc<Mutex<Connection>>,
    pub inference: Arc<dyn InferenceClient>,
    pub media: Arc<dyn MediaStore>,
    pub sessions: Arc<Mutex<SessionStore>>,
}

impl ApiContext {
    pub fn new(
        config: Arc<AppConfig>,
        db: Arc<Mutex<Connection>>,
        inference: Arc<dyn InferenceClient>,
        media: Arc<dyn MediaStore>,
    ) -> Self {
        Self {
            config,
            db,
            inference,
            media,
            sessions: Arc::new(Mutex::new(SessionStore::new())),
        }
    }

    /// Build a pipeline over this context's collaborators.
    pub fn pipeline(&self) -> DiagnosisPipeline {
        DiagnosisPipeline::new(self.db.clone(), self.inference.clone(), self.media.clone())
    }
}

// ═══════════════════════════════════════════════════════════
// Authenticated principal — injected by the auth middleware
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Patient,
    Admin,
}

/// Authenticated caller, injected into request extensions after
/// successful token validation.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: Role,
}

// ═══════════════════════════════════════════════════════════
// Session store
// ═══════════════════════════════════════════════════════════

/// In-memory bearer-session registry, keyed by SHA-256 token hash so raw
/// tokens never sit in process memory longer than a request. Sessions are
/// issued by the authentication subsystem; this is its storage interface.
pub struct SessionStore {
    sessions: HashMap<[u8; 32], Principal>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    pub fn insert(&mut self, token: &str, principal: Principal) {
        self.sessions.insert(hash_token(token), principal);
    }

    pub fn validate(&self, token: &str) -> Option<Principal> {
        self.sessions.get(&hash_token(token)).cloned()
    }

    pub fn revoke(&mut self, token: &str) {
        self.sessions.remove(&hash_token(token));
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash a bearer token string using SHA-256.
pub fn hash_token(token: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().into()
}

/// Generate a random bearer token (URL-safe base64, 32 bytes of entropy).
pub fn generate_token() -> String {
    use base64::Engine;
    let bytes: [u8; 32] = rand::random();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
