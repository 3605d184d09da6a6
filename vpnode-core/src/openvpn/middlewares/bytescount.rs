//! Traffic counter middleware

use crate::error::ManagementError;
use crate::openvpn::management::{CommandWriter, Middleware};
use crate::stats::StatsHandler;
use crate::types::SessionStats;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

/// `>BYTECOUNT:<in>,<out>`, numbers checked separately so bad counters still match
static BYTECOUNT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^>BYTECOUNT:(.*),(.*)$").expect("Failed to compile bytecount pattern")
});

/// Polls traffic counters and feeds them to a stats handler chain
pub struct BytescountMiddleware {
    handler: Box<dyn StatsHandler>,
    interval: Duration,
}

impl BytescountMiddleware {
    pub fn new(handler: impl StatsHandler + 'static, interval: Duration) -> Self {
        Self {
            handler: Box::new(handler),
            interval,
        }
    }
}

fn parse_counter(line: &str, value: &str) -> Result<u64, ManagementError> {
    value.trim().parse::<u64>().map_err(|e| ManagementError::Parse {
        line: line.to_string(),
        reason: format!("invalid counter {:?}: {}", value, e),
    })
}

impl Middleware for BytescountMiddleware {
    fn start(&mut self, writer: Arc<dyn CommandWriter>) -> Result<(), ManagementError> {
        writer.write_line(&format!("bytecount {}", self.interval.as_secs()))
    }

    fn stop(&mut self, writer: &dyn CommandWriter) -> Result<(), ManagementError> {
        writer.write_line("bytecount 0")
    }

    fn consume_line(&mut self, line: &str) -> Result<bool, ManagementError> {
        let Some(captures) = BYTECOUNT_LINE.captures(line) else {
            return Ok(false);
        };

        let bytes_received = parse_counter(line, &captures[1])?;
        let bytes_sent = parse_counter(line, &captures[2])?;
        self.handler.handle(SessionStats {
            bytes_sent,
            bytes_received,
        })?;
        Ok(true)
    }
}
