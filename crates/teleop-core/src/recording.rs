use crate::error::{Result, TeleopError};
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RecordingLog
// ---------------------------------------------------------------------------

/// One entry per command dispatched while a recording was live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub command: Uuid,
}

#[derive(Default)]
struct Inner {
    /// Pairing code of the connection that owns the recording, if any.
    connection: Option<String>,
    paused: bool,
    entries: Vec<LogEntry>,
}

/// Session recording bookkeeping. At most one recording per process; the
/// dispatch engine logs command ids into it opportunistically, and the idle
/// sweep stops it when its operator vanishes. Audio capture itself happens
/// elsewhere.
#[derive(Default)]
pub struct RecordingLog {
    inner: Mutex<Inner>,
}

impl RecordingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, connection: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("recording log poisoned");
        if let Some(owner) = &inner.connection {
            return Err(TeleopError::RecordingBusy(owner.clone()));
        }
        inner.connection = Some(connection.to_string());
        inner.paused = false;
        inner.entries.clear();
        Ok(())
    }

    pub fn pause(&self, connection: &str) {
        let mut inner = self.inner.lock().expect("recording log poisoned");
        if inner.connection.as_deref() == Some(connection) {
            inner.paused = true;
        }
    }

    pub fn resume(&self, connection: &str) {
        let mut inner = self.inner.lock().expect("recording log poisoned");
        if inner.connection.as_deref() == Some(connection) {
            inner.paused = false;
        }
    }

    /// Stop the recording owned by `connection`. A mismatched or absent
    /// owner is a no-op so the idle sweep can call this unconditionally.
    pub fn stop(&self, connection: &str) {
        let mut inner = self.inner.lock().expect("recording log poisoned");
        if inner.connection.as_deref() == Some(connection) {
            inner.connection = None;
            inner.paused = false;
        }
    }

    pub fn is_recording(&self, connection: &str) -> bool {
        let inner = self.inner.lock().expect("recording log poisoned");
        inner.connection.as_deref() == Some(connection)
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().expect("recording log poisoned").paused
    }

    pub fn log_command(&self, command: Uuid) {
        let mut inner = self.inner.lock().expect("recording log poisoned");
        inner.entries.push(LogEntry {
            at: Utc::now(),
            command,
        });
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.inner
            .lock()
            .expect("recording log poisoned")
            .entries
            .clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_recording_at_a_time() {
        let log = RecordingLog::new();
        log.start("1234").unwrap();
        assert!(log.is_recording("1234"));
        assert!(!log.is_recording("5678"));

        let err = log.start("5678").unwrap_err();
        assert!(matches!(err, TeleopError::RecordingBusy(owner) if owner == "1234"));
    }

    #[test]
    fn pause_and_resume_only_affect_the_owner() {
        let log = RecordingLog::new();
        log.start("1234").unwrap();

        log.pause("5678");
        assert!(!log.is_paused());

        log.pause("1234");
        assert!(log.is_paused());

        log.resume("1234");
        assert!(!log.is_paused());
    }

    #[test]
    fn stop_frees_the_slot() {
        let log = RecordingLog::new();
        log.start("1234").unwrap();
        log.stop("5678");
        assert!(log.is_recording("1234"));

        log.stop("1234");
        assert!(!log.is_recording("1234"));
        log.start("5678").unwrap();
    }

    #[test]
    fn commands_are_logged_in_order() {
        let log = RecordingLog::new();
        log.start("1234").unwrap();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        log.log_command(a);
        log.log_command(b);

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].command, a);
        assert_eq!(entries[1].command, b);
    }
}
