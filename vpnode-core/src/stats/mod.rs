//! Session traffic statistics
//!
//! The keeper stores the latest counters and the session start time; handlers
//! are the sinks the bytecount middleware pushes parsed counters into.

pub mod handlers;
pub mod keeper;

pub use handlers::{
    CompositeStatsHandler, KeeperStatsHandler, RemoteStatsHandler, SelectiveStatsHandler,
    StatsHandler, StatsSender,
};
pub use keeper::{SessionStatsKeeper, StatsKeeper};
