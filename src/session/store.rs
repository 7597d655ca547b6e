//! Session persistence.
//!
//! Transcript, profile, and game-mode flag live under separately namespaced
//! keys (`history:{id}`, `profile:{id}`, `mode:{id}`) so each can follow its
//! own retention policy. Every operation fails open: when the backend is
//! unavailable, loads report absent and saves log and return, so the chat
//! flow degrades to per-request behavior instead of erroring.

use super::types::{Profile, Turn};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::config::RedisConfig;

/// Durable per-user conversational state.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the stored transcript, or `None` for a new/expired session.
    async fn load(&self, user_id: &str) -> Option<Vec<Turn>>;

    /// Persist the transcript, refreshing the sliding retention window.
    async fn save(&self, user_id: &str, transcript: &[Turn]);

    /// Load the derived user profile.
    async fn load_profile(&self, user_id: &str) -> Option<Profile>;

    /// Persist the profile, refreshing its retention window.
    async fn save_profile(&self, user_id: &str, profile: &Profile);

    /// Whether the game-mode overlay is active and unexpired.
    async fn mode_active(&self, user_id: &str) -> bool;

    /// Activate the game-mode overlay with a fresh (absolute) TTL.
    async fn activate_mode(&self, user_id: &str);

    /// Explicitly clear the game-mode overlay.
    async fn clear_mode(&self, user_id: &str);
}

fn history_key(user_id: &str) -> String {
    format!("history:{user_id}")
}

fn profile_key(user_id: &str) -> String {
    format!("profile:{user_id}")
}

fn mode_key(user_id: &str) -> String {
    format!("mode:{user_id}")
}

// ============================================================================
// Redis store
// ============================================================================

/// Redis-backed session store.
///
/// Uses a `ConnectionManager` for automatic reconnection; the manager is
/// established lazily so a Redis outage at startup does not prevent the
/// server from serving session-less traffic.
pub struct RedisSessionStore {
    client: redis::Client,
    conn: RwLock<Option<redis::aio::ConnectionManager>>,
    session_ttl: Duration,
    mode_ttl: Duration,
}

impl RedisSessionStore {
    /// Create a store for the given configuration.
    ///
    /// Only fails on an unparseable URL; connectivity problems surface
    /// later as absent loads and skipped saves.
    pub fn new(config: &RedisConfig) -> anyhow::Result<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        Ok(Self {
            client,
            conn: RwLock::new(None),
            session_ttl: Duration::from_secs(config.session_ttl_secs),
            mode_ttl: Duration::from_secs(config.mode_ttl_secs),
        })
    }

    /// Get the shared connection manager, establishing it if needed.
    async fn manager(&self) -> Option<redis::aio::ConnectionManager> {
        if let Some(conn) = self.conn.read().await.as_ref() {
            return Some(conn.clone());
        }

        let mut guard = self.conn.write().await;
        if let Some(conn) = guard.as_ref() {
            return Some(conn.clone());
        }

        match self.client.get_connection_manager().await {
            Ok(conn) => {
                *guard = Some(conn.clone());
                Some(conn)
            }
            Err(e) => {
                tracing::warn!(error = %e, "session store unavailable");
                None
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.manager().await?;
        let raw: Option<String> = match redis::cmd("GET").arg(key).query_async(&mut conn).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, key, "session load failed, treating as absent");
                return None;
            }
        };

        let raw = raw?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                // Corrupt stored state is indistinguishable from absent.
                tracing::warn!(error = %e, key, "discarding corrupt session value");
                None
            }
        }
    }

    async fn set_json<T: serde::Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let Some(mut conn) = self.manager().await else {
            return;
        };

        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(error = %e, key, "failed to encode session value");
                return;
            }
        };

        let result: redis::RedisResult<()> = redis::cmd("SET")
            .arg(key)
            .arg(raw)
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, key, "session save skipped");
        }
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn load(&self, user_id: &str) -> Option<Vec<Turn>> {
        self.get_json(&history_key(user_id)).await
    }

    async fn save(&self, user_id: &str, transcript: &[Turn]) {
        self.set_json(&history_key(user_id), &transcript, self.session_ttl)
            .await;
    }

    async fn load_profile(&self, user_id: &str) -> Option<Profile> {
        self.get_json(&profile_key(user_id)).await
    }

    async fn save_profile(&self, user_id: &str, profile: &Profile) {
        self.set_json(&profile_key(user_id), profile, self.session_ttl)
            .await;
    }

    async fn mode_active(&self, user_id: &str) -> bool {
        let Some(mut conn) = self.manager().await else {
            return false;
        };

        match redis::cmd("EXISTS")
            .arg(mode_key(user_id))
            .query_async::<i64>(&mut conn)
            .await
        {
            Ok(n) => n > 0,
            Err(e) => {
                tracing::warn!(error = %e, "mode check failed, treating as inactive");
                false
            }
        }
    }

    async fn activate_mode(&self, user_id: &str) {
        // Absolute expiry: the TTL is set here and never refreshed by
        // later turns.
        self.set_json(&mode_key(user_id), &true, self.mode_ttl).await;
    }

    async fn clear_mode(&self, user_id: &str) {
        let Some(mut conn) = self.manager().await else {
            return;
        };

        let result: redis::RedisResult<()> = redis::cmd("DEL")
            .arg(mode_key(user_id))
            .query_async(&mut conn)
            .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, "mode clear skipped");
        }
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory session store for tests and local development.
///
/// Honors per-key expiry and can be toggled unavailable to exercise the
/// fail-open paths.
#[derive(Default)]
pub struct MemorySessionStore {
    entries: RwLock<HashMap<String, (String, Option<Instant>)>>,
    session_ttl: Option<Duration>,
    mode_ttl: Option<Duration>,
    unavailable: AtomicBool,
}

impl MemorySessionStore {
    /// Create a store with no expiry (entries live until overwritten).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with explicit TTLs, mirroring the Redis behavior.
    pub fn with_ttls(session_ttl: Duration, mode_ttl: Duration) -> Self {
        Self {
            session_ttl: Some(session_ttl),
            mode_ttl: Some(mode_ttl),
            ..Self::default()
        }
    }

    /// Simulate backend unavailability.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn is_unavailable(&self) -> bool {
        self.unavailable.load(Ordering::SeqCst)
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if self.is_unavailable() {
            return None;
        }

        let entries = self.entries.read().await;
        let (raw, expires) = entries.get(key)?;
        if let Some(deadline) = expires {
            if Instant::now() >= *deadline {
                return None;
            }
        }
        serde_json::from_str(raw).ok()
    }

    async fn set_json<T: serde::Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        if self.is_unavailable() {
            tracing::warn!(key, "session save skipped (store unavailable)");
            return;
        }

        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(error = %e, key, "failed to encode session value");
                return;
            }
        };
        let expires = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.write().await.insert(key.to_string(), (raw, expires));
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, user_id: &str) -> Option<Vec<Turn>> {
        self.get_json(&history_key(user_id)).await
    }

    async fn save(&self, user_id: &str, transcript: &[Turn]) {
        self.set_json(&history_key(user_id), &transcript, self.session_ttl)
            .await;
    }

    async fn load_profile(&self, user_id: &str) -> Option<Profile> {
        self.get_json(&profile_key(user_id)).await
    }

    async fn save_profile(&self, user_id: &str, profile: &Profile) {
        self.set_json(&profile_key(user_id), profile, self.session_ttl)
            .await;
    }

    async fn mode_active(&self, user_id: &str) -> bool {
        self.get_json::<bool>(&mode_key(user_id)).await.unwrap_or(false)
    }

    async fn activate_mode(&self, user_id: &str) {
        self.set_json(&mode_key(user_id), &true, self.mode_ttl).await;
    }

    async fn clear_mode(&self, user_id: &str) {
        if self.is_unavailable() {
            return;
        }
        self.entries.write().await.remove(&mode_key(user_id));
    }
}
