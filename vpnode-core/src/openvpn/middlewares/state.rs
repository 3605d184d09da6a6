//! State reporting middleware

use crate::error::ManagementError;
use crate::openvpn::management::{CommandWriter, Middleware};
use crate::openvpn::state::{ProcessState, StateCallback};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::debug;

/// `>STATE:<timestamp>,<NAME>,...`
static STATE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^>STATE:(\d+),([A-Z_]+)").expect("Failed to compile state pattern")
});

/// Turns state notifications into [`ProcessState`] events
pub struct StateMiddleware {
    subscribers: Vec<StateCallback>,
}

impl StateMiddleware {
    pub fn new(subscriber: StateCallback) -> Self {
        Self {
            subscribers: vec![subscriber],
        }
    }

    /// Register another subscriber; all of them receive every state
    pub fn subscribe(&mut self, subscriber: StateCallback) {
        self.subscribers.push(subscriber);
    }
}

impl Middleware for StateMiddleware {
    fn start(&mut self, writer: Arc<dyn CommandWriter>) -> Result<(), ManagementError> {
        writer.write_line("state on all")
    }

    fn stop(&mut self, writer: &dyn CommandWriter) -> Result<(), ManagementError> {
        writer.write_line("state off")
    }

    fn consume_line(&mut self, line: &str) -> Result<bool, ManagementError> {
        let Some(captures) = STATE_LINE.captures(line) else {
            return Ok(false);
        };

        let state = ProcessState::from_name(&captures[2]);
        debug!("Tunnel process state: {}", state);
        for subscriber in &self.subscribers {
            subscriber(state.clone());
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openvpn::management::testing::RecordingWriter;
    use std::sync::Mutex;

    fn recorder() -> (StateCallback, Arc<Mutex<Vec<ProcessState>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: StateCallback = Arc::new(move |state: ProcessState| sink.lock().unwrap().push(state));
        (callback, seen)
    }

    #[test]
    fn test_start_and_stop_toggle_state_reporting() {
        let (callback, _) = recorder();
        let mut middleware = StateMiddleware::new(callback);
        let writer = Arc::new(RecordingWriter::default());

        middleware.start(writer.clone()).unwrap();
        middleware.stop(writer.as_ref()).unwrap();

        assert_eq!(writer.lines(), vec!["state on all", "state off"]);
    }

    #[test]
    fn test_state_line_is_dispatched_to_all_subscribers() {
        let (first, first_seen) = recorder();
        let (second, second_seen) = recorder();
        let mut middleware = StateMiddleware::new(first);
        middleware.subscribe(second);

        let consumed = middleware
            .consume_line(">STATE:1495493709,AUTH,,,,,,")
            .unwrap();

        assert!(consumed);
        assert_eq!(*first_seen.lock().unwrap(), vec![ProcessState::Authenticating]);
        assert_eq!(*second_seen.lock().unwrap(), vec![ProcessState::Authenticating]);
    }

    #[test]
    fn test_unknown_state_is_forwarded() {
        let (callback, seen) = recorder();
        let mut middleware = StateMiddleware::new(callback);

        assert!(middleware.consume_line(">STATE:1,TCP_CONNECT,,,").unwrap());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ProcessState::Unknown("TCP_CONNECT".to_string())]
        );
    }

    #[test]
    fn test_other_lines_are_not_consumed() {
        let (callback, seen) = recorder();
        let mut middleware = StateMiddleware::new(callback);

        assert!(!middleware.consume_line(">BYTECOUNT:1,2").unwrap());
        assert!(!middleware.consume_line("SUCCESS: real-time state notification set to ON").unwrap());
        assert!(seen.lock().unwrap().is_empty());
    }
}
