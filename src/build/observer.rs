use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Receives everything a build wants to tell the user.
///
/// Calls may arrive from several threads when units compile in parallel.
pub trait BuildObserver: Send + Sync {
    fn progress(&self, percent: u8, message: &str);
    /// A tool output line, already remapped.
    fn diagnostic(&self, line: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl BuildObserver for NullObserver {
    fn progress(&self, _percent: u8, _message: &str) {}
    fn diagnostic(&self, _line: &str) {}
    fn info(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    Progress(u8, String),
    Diagnostic(String),
    Info(String),
    Warn(String),
}

/// Keeps every event in order.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<BuildEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BuildEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn progress_values(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                BuildEvent::Progress(p, _) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                BuildEvent::Warn(w) => Some(w),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: BuildEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl BuildObserver for RecordingObserver {
    fn progress(&self, percent: u8, message: &str) {
        self.push(BuildEvent::Progress(percent, message.to_string()));
    }

    fn diagnostic(&self, line: &str) {
        self.push(BuildEvent::Diagnostic(line.to_string()));
    }

    fn info(&self, message: &str) {
        self.push(BuildEvent::Info(message.to_string()));
    }

    fn warn(&self, message: &str) {
        self.push(BuildEvent::Warn(message.to_string()));
    }
}

/// Shared flag checked between stages. Running tools are never killed.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_keeps_order() {
        let obs = RecordingObserver::new();
        obs.progress(20, "Compiling sketch");
        obs.warn("careful");
        obs.progress(30, "Compiling libraries");
        assert_eq!(obs.progress_values(), vec![20, 30]);
        assert_eq!(obs.warnings(), vec!["careful"]);
        assert_eq!(obs.events().len(), 3);
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
