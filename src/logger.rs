//! Leveled console logger
//!
//! Small printout manager used by the processor, engine and self-test runner.
//! Every message is forwarded to `tracing` as well, so `RUST_LOG` still sees
//! everything that is filtered out of the console by verbosity.
//!
//! Verbosity: `0` errors only, `1` normal, `2` everything.

use std::io::Write;

use colored::Colorize;
use serde::{Deserialize, Serialize};

/// Message level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Success,
    Test,
    Max,
}

impl LogLevel {
    /// Lowest verbosity at which this level is printed
    fn min_verbosity(self) -> u8 {
        match self {
            LogLevel::Error => 0,
            LogLevel::Warning | LogLevel::Info | LogLevel::Success | LogLevel::Test => 1,
            LogLevel::Max => 2,
        }
    }

    fn symbol(self) -> colored::ColoredString {
        match self {
            LogLevel::Error => "❌ ERROR".red().bold(),
            LogLevel::Warning => "⚠️ WARNING".yellow(),
            LogLevel::Info => "⭐️".normal(),
            LogLevel::Success => "✅".green(),
            LogLevel::Test => "🧪".cyan(),
            LogLevel::Max => "👀".dimmed(),
        }
    }
}

/// Prefix + verbosity printout manager
#[derive(Debug, Clone)]
pub struct Logger {
    prefix: String,
    verbosity: u8,
}

impl Logger {
    pub fn new(prefix: impl Into<String>, verbosity: u8) -> Self {
        Self {
            prefix: prefix.into(),
            verbosity,
        }
    }

    /// Logger that prints nothing (tracing still receives the messages)
    pub fn silent() -> Self {
        Self::new("", 0)
    }

    pub fn verbosity(&self) -> u8 {
        self.verbosity
    }

    /// Same sink, different prefix
    pub fn with_prefix(&self, prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            verbosity: self.verbosity,
        }
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        self.verbosity >= level.min_verbosity()
    }

    /// Log a message. Never fails: a closed stdout/stderr is ignored.
    pub fn log(&self, message: impl AsRef<str>, level: LogLevel) {
        let message = message.as_ref();
        match level {
            LogLevel::Error => tracing::error!(prefix = %self.prefix, "{message}"),
            LogLevel::Warning => tracing::warn!(prefix = %self.prefix, "{message}"),
            LogLevel::Max => tracing::trace!(prefix = %self.prefix, "{message}"),
            _ => tracing::debug!(prefix = %self.prefix, "{message}"),
        }

        if !self.enabled(level) {
            return;
        }

        let line = if self.prefix.is_empty() {
            format!("{} {}", level.symbol(), message)
        } else {
            format!("{} {} {}", self.prefix.cyan(), level.symbol(), message)
        };

        if level == LogLevel::Error {
            let _ = writeln!(std::io::stderr(), "{line}");
        } else {
            let _ = writeln!(std::io::stdout(), "{line}");
        }
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.log(message, LogLevel::Info);
    }

    pub fn success(&self, message: impl AsRef<str>) {
        self.log(message, LogLevel::Success);
    }

    pub fn warning(&self, message: impl AsRef<str>) {
        self.log(message, LogLevel::Warning);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.log(message, LogLevel::Error);
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new("[treeflow]", 1)
    }
}
