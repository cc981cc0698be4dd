//! Periodic metrics push to connected live-feed clients.
//!
//! Every connection gets its own session: a task with its own timer that
//! fetches a [`MetricsSnapshot`](crate::metrics::MetricsSnapshot) and hands
//! the serialized JSON to a one-slot channel. Sessions are tracked in a
//! [`SessionRegistry`] keyed by connection id, and closing a session cancels
//! its token.
//!
//! # Examples
//!
//! ```
//! use blockdag_lens::feed::SessionRegistry;
//!
//! # tokio_test::block_on(async {
//! let registry = SessionRegistry::new();
//! let token = registry.register("client-1".to_string()).await;
//! assert_eq!(registry.count().await, 1);
//!
//! registry.close("client-1").await;
//! assert!(token.is_cancelled());
//! assert_eq!(registry.count().await, 0);
//! # });
//! ```

use crate::metrics::MetricsAggregator;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Default time between two pushes on one connection.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Live sessions by connection id.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `id` and returns the token that stops its session.
    pub async fn register(&self, id: String) -> CancellationToken {
        let token = CancellationToken::new();
        self.sessions.write().await.insert(id, token.clone());
        token
    }

    /// Cancels and forgets `id`. Returns `false` if it was not registered.
    pub async fn close(&self, id: &str) -> bool {
        match self.sessions.write().await.remove(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Cancels every session, used on shutdown.
    pub async fn close_all(&self) {
        for (_, token) in self.sessions.write().await.drain() {
            token.cancel();
        }
    }
}

/// Spawns per-connection push sessions.
#[derive(Clone)]
pub struct LiveFeed {
    aggregator: MetricsAggregator,
    registry: SessionRegistry,
    interval: Duration,
}

impl LiveFeed {
    pub fn new(aggregator: MetricsAggregator, interval: Duration) -> Self {
        Self {
            aggregator,
            registry: SessionRegistry::new(),
            interval,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Opens a session and returns its id and the payload receiver.
    ///
    /// The first snapshot is pushed right away, then one per interval until
    /// the session is closed or the receiver is dropped.
    pub async fn open_session(&self) -> (String, mpsc::Receiver<String>) {
        let id = uuid::Uuid::new_v4().to_string();
        let token = self.registry.register(id.clone()).await;
        let (tx, rx) = mpsc::channel(1);

        log::info!("Live feed session {} opened", id);
        tokio::spawn(run_session(
            self.aggregator.clone(),
            self.interval,
            token,
            tx,
            id.clone(),
        ));

        (id, rx)
    }

    /// Closes a session opened by [`LiveFeed::open_session`].
    pub async fn close_session(&self, id: &str) {
        if self.registry.close(id).await {
            log::info!("Live feed session {} closed", id);
        }
    }
}

async fn run_session(
    aggregator: MetricsAggregator,
    interval: Duration,
    token: CancellationToken,
    tx: mpsc::Sender<String>,
    id: String,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let snapshot = match aggregator.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::error!("Live feed {}: metrics fetch failed: {}", id, e);
                continue;
            }
        };
        let payload = match serde_json::to_string(&snapshot) {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("Live feed {}: serialization failed: {}", id, e);
                continue;
            }
        };

        match tx.try_send(payload) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::debug!("Live feed {}: client busy, push skipped", id);
            }
            Err(TrySendError::Closed(_)) => break,
        }
    }

    log::debug!("Live feed {} task finished", id);
}
