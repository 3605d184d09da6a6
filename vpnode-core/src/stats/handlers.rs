//! Stats handler chain
//!
//! Handlers receive every parsed traffic counter report. They compose with
//! [`CompositeStatsHandler`] (run all, stop at the first error) and can be
//! throttled with [`SelectiveStatsHandler`].

use crate::error::StatsError;
use crate::stats::SessionStatsKeeper;
use crate::types::{SessionId, SessionStats};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error};

/// Sink for parsed traffic counters
pub trait StatsHandler: Send + Sync {
    fn handle(&self, stats: SessionStats) -> Result<(), StatsError>;
}

impl<F> StatsHandler for F
where
    F: Fn(SessionStats) -> Result<(), StatsError> + Send + Sync,
{
    fn handle(&self, stats: SessionStats) -> Result<(), StatsError> {
        self(stats)
    }
}

/// Runs handlers in order, short-circuiting on the first error
#[derive(Default)]
pub struct CompositeStatsHandler {
    handlers: Vec<Box<dyn StatsHandler>>,
}

impl CompositeStatsHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, handler: impl StatsHandler + 'static) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl StatsHandler for CompositeStatsHandler {
    fn handle(&self, stats: SessionStats) -> Result<(), StatsError> {
        self.handlers
            .iter()
            .try_for_each(|handler| handler.handle(stats))
    }
}

/// Stores every report in a [`SessionStatsKeeper`]
pub struct KeeperStatsHandler {
    keeper: Arc<dyn SessionStatsKeeper>,
}

impl KeeperStatsHandler {
    pub fn new(keeper: Arc<dyn SessionStatsKeeper>) -> Self {
        Self { keeper }
    }
}

impl StatsHandler for KeeperStatsHandler {
    fn handle(&self, stats: SessionStats) -> Result<(), StatsError> {
        self.keeper.save(stats);
        Ok(())
    }
}

/// Forwards at most one report per interval to the wrapped handler
///
/// The first report always passes. Time is read from tokio's clock.
pub struct SelectiveStatsHandler<H> {
    inner: H,
    interval: Duration,
    last_forwarded: Mutex<Option<Instant>>,
}

impl<H: StatsHandler> SelectiveStatsHandler<H> {
    pub fn new(inner: H, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            last_forwarded: Mutex::new(None),
        }
    }
}

impl<H: StatsHandler> StatsHandler for SelectiveStatsHandler<H> {
    fn handle(&self, stats: SessionStats) -> Result<(), StatsError> {
        let now = Instant::now();
        {
            let mut last = self
                .last_forwarded
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(previous) = *last {
                if now.duration_since(previous) < self.interval {
                    return Ok(());
                }
            }
            *last = Some(now);
        }
        self.inner.handle(stats)
    }
}

/// Remote endpoint receiving session stats (billing side)
#[async_trait]
pub trait StatsSender: Send + Sync {
    async fn send_stats(&self, session_id: &SessionId, stats: SessionStats) -> anyhow::Result<()>;
}

/// Hands reports to a [`StatsSender`] without blocking line dispatch
///
/// Must be invoked from within a tokio runtime.
pub struct RemoteStatsHandler {
    session_id: SessionId,
    sender: Arc<dyn StatsSender>,
}

impl RemoteStatsHandler {
    pub fn new(session_id: SessionId, sender: Arc<dyn StatsSender>) -> Self {
        Self { session_id, sender }
    }
}

impl StatsHandler for RemoteStatsHandler {
    fn handle(&self, stats: SessionStats) -> Result<(), StatsError> {
        let sender = Arc::clone(&self.sender);
        let session_id = self.session_id.clone();
        tokio::spawn(async move {
            match sender.send_stats(&session_id, stats).await {
                Ok(()) => debug!(session_id = %session_id, "Session stats sent"),
                Err(e) => error!(
                    session_id = %session_id,
                    "Failed to send session stats to the remote service: {}", e
                ),
            }
        });
        Ok(())
    }
}
