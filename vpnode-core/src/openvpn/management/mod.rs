//! Management channel between the node and the tunnel process
//!
//! The tunnel process connects back to a local listener and exchanges
//! newline-terminated lines with it. Lines starting with `>` are real-time
//! notifications and are fed to every registered [`Middleware`], in
//! registration order. Everything else is a reply to a command we sent.

pub mod listener;

pub use listener::Management;

use crate::error::ManagementError;
use std::sync::Arc;
use tracing::{error, trace, warn};

/// Write side of the management channel
pub trait CommandWriter: Send + Sync {
    /// Queue a single command line (without trailing newline)
    fn write_line(&self, command: &str) -> Result<(), ManagementError>;
}

/// Pluggable participant of the management channel lifecycle
pub trait Middleware: Send {
    /// Called once the process connected; may write setup commands
    fn start(&mut self, writer: Arc<dyn CommandWriter>) -> Result<(), ManagementError>;

    /// Called before the channel goes away; may write teardown commands
    fn stop(&mut self, writer: &dyn CommandWriter) -> Result<(), ManagementError>;

    /// Offer a notification line to this middleware
    ///
    /// Returns `Ok(true)` for lines this middleware owns and `Ok(false)` for
    /// lines it does not recognise. An error means the line was recognised
    /// (and so consumed) but could not be handled.
    fn consume_line(&mut self, line: &str) -> Result<bool, ManagementError>;
}

/// Start every middleware, logging failures without aborting the rest
pub fn start_middlewares(middlewares: &mut [Box<dyn Middleware>], writer: &Arc<dyn CommandWriter>) {
    for middleware in middlewares.iter_mut() {
        if let Err(e) = middleware.start(Arc::clone(writer)) {
            error!("Middleware startup error: {}", e);
        }
    }
}

/// Stop every middleware, logging failures without aborting the rest
pub fn stop_middlewares(middlewares: &mut [Box<dyn Middleware>], writer: &dyn CommandWriter) {
    for middleware in middlewares.iter_mut() {
        if let Err(e) = middleware.stop(writer) {
            warn!("Middleware stop error: {}", e);
        }
    }
}

/// Feed one line to every middleware
///
/// Each middleware sees the line regardless of what the others did with it.
/// Returns whether any middleware consumed it.
pub fn deliver_line(middlewares: &mut [Box<dyn Middleware>], line: &str) -> bool {
    let mut consumed = false;
    for middleware in middlewares.iter_mut() {
        match middleware.consume_line(line) {
            Ok(owned) => consumed |= owned,
            Err(e) => {
                error!("Failed to deliver event {:?}: {}", line, e);
                consumed = true;
            }
        }
    }
    if !consumed {
        trace!("Line not delivered: {}", line);
    }
    consumed
}
