//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag), one object per line
//! - Quiet mode for scripting (--quiet flag)

use std::fmt::Display;

use chrono::{DateTime, SecondsFormat, TimeZone};
use serde_json::Value;

use resync_core::ConnectionStatus;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print a snapshot received at `at`
    pub fn print_snapshot<Tz>(&self, state: &Value, at: &DateTime<Tz>)
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        if let Some(line) = self.snapshot_line(state, at) {
            println!("{}", line);
        }
    }

    /// Print a connectivity change observed at `at`
    pub fn print_status<Tz>(&self, status: ConnectionStatus, at: &DateTime<Tz>)
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        if let Some(line) = self.status_line(status, at) {
            println!("{}", line);
        }
    }

    fn snapshot_line<Tz>(&self, state: &Value, at: &DateTime<Tz>) -> Option<String>
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        match self.format {
            OutputFormat::Human => Some(format!("[{}] {}", clock(at), state)),
            OutputFormat::Json => Some(
                serde_json::json!({
                    "event": "snapshot",
                    "received_at": at.to_rfc3339_opts(SecondsFormat::Millis, true),
                    "state": state
                })
                .to_string(),
            ),
            OutputFormat::Quiet => Some(state.to_string()),
        }
    }

    fn status_line<Tz>(&self, status: ConnectionStatus, at: &DateTime<Tz>) -> Option<String>
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        match self.format {
            OutputFormat::Human => Some(format!("[{}] ── {} ──", clock(at), status)),
            OutputFormat::Json => Some(
                serde_json::json!({
                    "event": "status",
                    "at": at.to_rfc3339_opts(SecondsFormat::Millis, true),
                    "status": status.as_str(),
                    "connected": status.is_connected()
                })
                .to_string(),
            ),
            OutputFormat::Quiet => None,
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// Wall-clock time with milliseconds
fn clock<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    at.format("%H:%M:%S%.3f").to_string()
}
