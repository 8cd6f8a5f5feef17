//! Operator-facing execution log
//!
//! Every stage writes human-readable lines here as it goes, so the operator
//! sees the cause of a failure even when the structured error is consumed
//! programmatically. Developer diagnostics go through `tracing` instead.

use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// Outcome attached to the last line of a command unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Success,
    Failure,
}

/// Sink for execution log lines
pub trait ExecutionLog: Send + Sync {
    fn log(&self, level: LogLevel, line: &str);

    /// Close the current command unit with its outcome
    fn finish(&self, status: CommandStatus, line: &str) {
        let level = match status {
            CommandStatus::Success => LogLevel::Info,
            CommandStatus::Failure => LogLevel::Error,
        };
        self.log(level, line);
    }

    fn info(&self, line: &str) {
        self.log(LogLevel::Info, line);
    }

    fn warn(&self, line: &str) {
        self.log(LogLevel::Warn, line);
    }

    fn error(&self, line: &str) {
        self.log(LogLevel::Error, line);
    }
}

/// Log that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLog;

impl ExecutionLog for NullLog {
    fn log(&self, _level: LogLevel, _line: &str) {}
}

/// In-memory log for tests and for callers that forward lines later
#[derive(Debug, Default)]
pub struct MemoryLog {
    entries: Mutex<Vec<(LogLevel, String)>>,
    status: Mutex<Option<CommandStatus>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<(LogLevel, String)>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All lines, in order
    pub fn lines(&self) -> Vec<String> {
        self.entries().iter().map(|(_, l)| l.clone()).collect()
    }

    /// Lines logged at a given level
    pub fn lines_at(&self, level: LogLevel) -> Vec<String> {
        self.entries()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, line)| line.clone())
            .collect()
    }

    /// Check if any line contains the given text
    pub fn contains(&self, needle: &str) -> bool {
        self.entries().iter().any(|(_, l)| l.contains(needle))
    }

    /// Last status passed to [`ExecutionLog::finish`]
    pub fn status(&self) -> Option<CommandStatus> {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ExecutionLog for MemoryLog {
    fn log(&self, level: LogLevel, line: &str) {
        self.entries().push((level, line.to_string()));
    }

    fn finish(&self, status: CommandStatus, line: &str) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = Some(status);
        let level = match status {
            CommandStatus::Success => LogLevel::Info,
            CommandStatus::Failure => LogLevel::Error,
        };
        self.log(level, line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_log_records_levels() {
        let log = MemoryLog::new();
        log.info("starting");
        log.warn("careful");
        log.error("boom");

        assert_eq!(log.lines(), vec!["starting", "careful", "boom"]);
        assert_eq!(log.lines_at(LogLevel::Warn), vec!["careful"]);
        assert!(log.contains("boo"));
        assert!(log.status().is_none());
    }

    #[test]
    fn test_memory_log_finish() {
        let log = MemoryLog::new();
        log.finish(CommandStatus::Failure, "Failed.");
        assert_eq!(log.status(), Some(CommandStatus::Failure));
        assert_eq!(log.lines_at(LogLevel::Error), vec!["Failed."]);
    }
}
