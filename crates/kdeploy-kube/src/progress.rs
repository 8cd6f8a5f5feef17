//! Execution log renderers for terminals and CI
//!
//! [`ConsoleLog`] prints the execution log with `console` styles. Command
//! units close with a green `Done.` or a red `Failed.`. [`JsonLog`] prints
//! one JSON object per line for machine consumption.

use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use console::style;
use kdeploy_core::{CommandStatus, ExecutionLog, LogLevel};
use serde::Serialize;

type Sink = Mutex<Box<dyn Write + Send>>;

fn write_line(sink: &Sink, line: &str) {
    let mut out = sink.lock().unwrap_or_else(PoisonError::into_inner);
    let _ = writeln!(out, "{}", line);
}

/// Styled execution log
pub struct ConsoleLog {
    out: Sink,
    start_time: Instant,
    /// Drop info lines, keep warnings and errors
    quiet: bool,
}

impl ConsoleLog {
    /// Log to stderr
    pub fn new() -> Self {
        Self::to_writer(Box::new(io::stderr()))
    }

    pub fn to_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            start_time: Instant::now(),
            quiet: false,
        }
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Section header, e.g. `Fetching manifests`
    pub fn header(&self, title: &str) {
        write_line(&self.out, &format!("\n{}", style(title).white().bold()));
    }

    /// Final line with the elapsed time
    pub fn summary(&self, succeeded: bool) {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        let line = if succeeded {
            format!("{} Deployment succeeded ({:.1}s)", style("✓").green().bold(), elapsed)
        } else {
            format!("{} Deployment failed ({:.1}s)", style("✗").red().bold(), elapsed)
        };
        write_line(&self.out, &line);
    }
}

impl Default for ConsoleLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionLog for ConsoleLog {
    fn log(&self, level: LogLevel, line: &str) {
        let styled = match level {
            LogLevel::Info if self.quiet => return,
            LogLevel::Info => line.to_string(),
            LogLevel::Warn => style(line).yellow().to_string(),
            LogLevel::Error => style(line).red().to_string(),
        };
        write_line(&self.out, &styled);
    }

    fn finish(&self, status: CommandStatus, line: &str) {
        let styled = match status {
            CommandStatus::Success => style(line).green().bold().to_string(),
            CommandStatus::Failure => style(line).red().bold().to_string(),
        };
        write_line(&self.out, &styled);
    }
}

#[derive(Serialize)]
struct JsonEntry<'a> {
    level: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<&'static str>,
    line: &'a str,
}

/// JSON lines execution log for CI/CD integration
pub struct JsonLog {
    out: Sink,
}

impl JsonLog {
    /// Log to stdout
    pub fn new() -> Self {
        Self::to_writer(Box::new(io::stdout()))
    }

    pub fn to_writer(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    fn emit(&self, entry: &JsonEntry<'_>) {
        match serde_json::to_string(entry) {
            Ok(json) => write_line(&self.out, &json),
            Err(e) => tracing::warn!(error = %e, "execution log entry not serializable"),
        }
    }
}

impl Default for JsonLog {
    fn default() -> Self {
        Self::new()
    }
}

fn level_name(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

impl ExecutionLog for JsonLog {
    fn log(&self, level: LogLevel, line: &str) {
        self.emit(&JsonEntry {
            level: level_name(level),
            status: None,
            line,
        });
    }

    fn finish(&self, status: CommandStatus, line: &str) {
        let (level, status) = match status {
            CommandStatus::Success => (LogLevel::Info, "success"),
            CommandStatus::Failure => (LogLevel::Error, "failure"),
        };
        self.emit(&JsonEntry {
            level: level_name(level),
            status: Some(status),
            line,
        });
    }
}
