//! Session stats keeper
//!
//! Holds the most recent traffic counters of the active session along with
//! the time it was marked as started.

use crate::types::SessionStats;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Stats store consumed by the bytecount middleware and the API layer
pub trait SessionStatsKeeper: Send + Sync {
    fn save(&self, stats: SessionStats);
    fn retrieve(&self) -> SessionStats;
    fn mark_session_start(&self);
    fn mark_session_end(&self);
    /// Time since session start, zero when no session is running
    fn session_duration(&self) -> Duration;
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Default)]
struct KeeperState {
    stats: SessionStats,
    session_start: Option<DateTime<Utc>>,
}

/// In-memory [`SessionStatsKeeper`]
pub struct StatsKeeper {
    state: Mutex<KeeperState>,
    clock: Clock,
}

impl StatsKeeper {
    pub fn new() -> Self {
        Self::with_clock(Utc::now)
    }

    /// Keeper reading time from the given clock
    pub fn with_clock<C>(clock: C) -> Self
    where
        C: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        Self {
            state: Mutex::new(KeeperState::default()),
            clock: Arc::new(clock),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut KeeperState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}

impl Default for StatsKeeper {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStatsKeeper for StatsKeeper {
    fn save(&self, stats: SessionStats) {
        self.with_state(|state| state.stats = stats);
    }

    fn retrieve(&self) -> SessionStats {
        self.with_state(|state| state.stats)
    }

    fn mark_session_start(&self) {
        let now = (self.clock)();
        self.with_state(|state| state.session_start = Some(now));
    }

    fn mark_session_end(&self) {
        self.with_state(|state| state.session_start = None);
    }

    fn session_duration(&self) -> Duration {
        let now = (self.clock)();
        self.with_state(|state| match state.session_start {
            Some(start) => (now - start).to_std().unwrap_or_default(),
            None => Duration::ZERO,
        })
    }
}
