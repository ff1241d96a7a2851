use std::sync::Arc;
use std::time::Instant;

use facegate_core::{EmbeddingMatcher, LivenessSessions};
use zbus::interface;

use crate::config::Config;
use crate::protocol;

pub const BUS_NAME: &str = "org.freedesktop.FaceGate1";
pub const OBJECT_PATH: &str = "/org/freedesktop/FaceGate1";

/// Shared state accessible by D-Bus method handlers.
///
/// The matcher is immutable and the session table locks per session, so
/// handlers share this without an outer lock.
pub struct AppState {
    pub config: Config,
    pub sessions: LivenessSessions,
    pub matcher: EmbeddingMatcher,
    started: Instant,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            sessions: LivenessSessions::new(config.liveness_params()),
            matcher: EmbeddingMatcher::new(config.match_policy()),
            config,
            started: Instant::now(),
        }
    }

    /// Monotonic milliseconds since the daemon started.
    fn now_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// D-Bus interface for the FaceGate verification daemon.
///
/// Bus name: org.freedesktop.FaceGate1
/// Object path: /org/freedesktop/FaceGate1
///
/// Request and response bodies are JSON strings; see [`crate::protocol`].
pub struct FaceGateService {
    pub state: Arc<AppState>,
}

#[interface(name = "org.freedesktop.FaceGate1")]
impl FaceGateService {
    /// Feed one frame's landmarks (or `null` for no face) to a liveness session.
    async fn observe_frame(&self, request: &str) -> zbus::fdo::Result<String> {
        protocol::observe_frame(&self.state.sessions, request, self.state.now_ms()).map_err(|e| {
            tracing::warn!(error = %e, "observe_frame rejected");
            e.into()
        })
    }

    /// Match probe embeddings against a caller-supplied gallery.
    async fn recognize(&self, request: &str) -> zbus::fdo::Result<String> {
        protocol::recognize(&self.state.matcher, request).map_err(|e| {
            tracing::warn!(error = %e, "recognize failed");
            e.into()
        })
    }

    /// Check a new enrollment embedding against existing identities.
    async fn check_duplicate(&self, request: &str) -> zbus::fdo::Result<String> {
        protocol::check_duplicate(&self.state.matcher, request).map_err(|e| {
            tracing::warn!(error = %e, "check_duplicate failed");
            e.into()
        })
    }

    /// Allocate a fresh liveness session and return its key.
    async fn new_session(&self) -> String {
        let key = uuid::Uuid::new_v4().to_string();
        self.state.sessions.open(&key);
        tracing::info!(session = %key, "liveness session created");
        key
    }

    /// Force a session back to waiting for open eyes.
    ///
    /// Returns false if the session does not exist.
    async fn reset_session(&self, session: &str) -> bool {
        let existed = self.state.sessions.reset(session);
        if !existed {
            tracing::warn!(session, "reset_session: unknown session");
        }
        existed
    }

    /// Return daemon status information as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let config = &self.state.config;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "sessions": self.state.sessions.len(),
            "embedding_dim": config.embedding_dim,
            "recognize_threshold": config.recognize_threshold,
            "duplicate_threshold": config.duplicate_threshold,
            "ear_threshold": config.ear_threshold,
            "blink_cooldown_ms": config.blink_cooldown_ms,
        })
        .to_string())
    }
}
