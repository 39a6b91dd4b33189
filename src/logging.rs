//! 🪵 Component-tagged logging to stderr
//!
//! Protocol payloads own stdout, so every diagnostic line goes to stderr.
//! The `LOG_LEVEL` environment variable picks the threshold, `LOG_DISABLED`
//! mutes everything, and `LOG_COLOR` / `LOG_EMOJI` toggle line decoration.

use std::env;
use std::fmt;
use std::sync::OnceLock;

/// 🪵 Severity of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Lower rank is more severe; a line passes when its rank fits under
    /// the configured threshold
    fn rank(self) -> u8 {
        match self {
            LogLevel::Error => 0,
            LogLevel::Warn => 1,
            LogLevel::Info => 2,
            LogLevel::Debug => 3,
            LogLevel::Trace => 4,
        }
    }

    fn label(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN ",
            LogLevel::Info => "INFO ",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    fn glyph(self) -> &'static str {
        match self {
            LogLevel::Error => "❌",
            LogLevel::Warn => "⚠️",
            LogLevel::Info => "ℹ️",
            LogLevel::Debug => "🐛",
            LogLevel::Trace => "🔍",
        }
    }

    fn ansi(self) -> &'static str {
        match self {
            LogLevel::Error => "\x1b[31m",
            LogLevel::Warn => "\x1b[33m",
            LogLevel::Info => "\x1b[36m",
            LogLevel::Debug => "\x1b[32m",
            LogLevel::Trace => "\x1b[35m",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label().trim_end())
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

/// 🛠️ Resolved logging configuration
#[derive(Debug)]
pub struct Logger {
    threshold: LogLevel,
    silenced: bool,
    color: bool,
    glyphs: bool,
}

impl Logger {
    fn from_env() -> Self {
        Self {
            threshold: env::var("LOG_LEVEL")
                .ok()
                .as_deref()
                .and_then(LogLevel::parse)
                .unwrap_or(LogLevel::Info),
            silenced: env_flag("LOG_DISABLED", false),
            color: env_flag("LOG_COLOR", false),
            glyphs: env_flag("LOG_EMOJI", true),
        }
    }

    pub fn enabled_for(&self, level: LogLevel) -> bool {
        !self.silenced && level.rank() <= self.threshold.rank()
    }

    pub fn threshold(&self) -> LogLevel {
        self.threshold
    }

    /// Assemble and emit one line. Taking `fmt::Arguments` keeps the
    /// formatting lazy until the level check has passed.
    pub fn write(&self, level: LogLevel, component: &str, message: fmt::Arguments<'_>) {
        if !self.enabled_for(level) {
            return;
        }

        use fmt::Write as _;
        let mut line = String::with_capacity(96);
        let _ = write!(line, "[{}] ", chrono::Utc::now().format("%H:%M:%S%.3f"));
        if self.color {
            let _ = write!(line, "{}[{}]\x1b[0m ", level.ansi(), level.label());
        } else {
            let _ = write!(line, "[{}] ", level.label());
        }
        if self.glyphs {
            let _ = write!(line, "{} ", level.glyph());
        }
        let _ = write!(line, "[{component}] {message}");

        // stderr only; stdout is never ours to write
        eprintln!("{line}");
    }
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

pub fn logger() -> &'static Logger {
    LOGGER.get_or_init(Logger::from_env)
}

/// 🪵 Logging macros for easy use throughout codebase
#[macro_export]
macro_rules! log_error {
    ($component:expr, $($arg:tt)*) => {
        $crate::logging::logger().write(
            $crate::logging::LogLevel::Error,
            $component,
            format_args!($($arg)*),
        )
    };
}

#[macro_export]
macro_rules! log_warn {
    ($component:expr, $($arg:tt)*) => {
        $crate::logging::logger().write(
            $crate::logging::LogLevel::Warn,
            $component,
            format_args!($($arg)*),
        )
    };
}

#[macro_export]
macro_rules! log_info {
    ($component:expr, $($arg:tt)*) => {
        $crate::logging::logger().write(
            $crate::logging::LogLevel::Info,
            $component,
            format_args!($($arg)*),
        )
    };
}

#[macro_export]
macro_rules! log_debug {
    ($component:expr, $($arg:tt)*) => {
        $crate::logging::logger().write(
            $crate::logging::LogLevel::Debug,
            $component,
            format_args!($($arg)*),
        )
    };
}

#[macro_export]
macro_rules! log_trace {
    ($component:expr, $($arg:tt)*) => {
        $crate::logging::logger().write(
            $crate::logging::LogLevel::Trace,
            $component,
            format_args!($($arg)*),
        )
    };
}

/// 🚀 Startup banner
pub fn log_startup(port: u16, tls: bool) {
    let scheme = if tls { "wss" } else { "ws" };
    log_info!("main", "🔀 Switchboard LSP Gateway v{}", env!("CARGO_PKG_VERSION"));
    log_info!("main", "🌐 Listening on {scheme}://0.0.0.0:{port}");
    log_debug!("main", "📊 Log threshold: {}", logger().threshold());
}

/// 🛑 Shutdown banner
pub fn log_shutdown() {
    log_info!("main", "🛑 Gateway shutting down...");
    log_info!("main", "✅ Goodbye!");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_ordering() {
        assert!(LogLevel::Error.rank() < LogLevel::Warn.rank());
        assert!(LogLevel::Warn.rank() < LogLevel::Info.rank());
        assert!(LogLevel::Info.rank() < LogLevel::Debug.rank());
        assert!(LogLevel::Debug.rank() < LogLevel::Trace.rank());
    }

    #[test]
    fn test_parse_accepts_aliases() {
        assert_eq!(LogLevel::parse("warn"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse(" trace "), Some(LogLevel::Trace));
        assert_eq!(LogLevel::parse("loud"), None);
    }

    #[test]
    fn test_threshold_filtering() {
        let logger = Logger {
            threshold: LogLevel::Info,
            silenced: false,
            color: false,
            glyphs: false,
        };
        assert!(logger.enabled_for(LogLevel::Error));
        assert!(logger.enabled_for(LogLevel::Info));
        assert!(!logger.enabled_for(LogLevel::Debug));

        let muted = Logger {
            threshold: LogLevel::Trace,
            silenced: true,
            color: false,
            glyphs: false,
        };
        assert!(!muted.enabled_for(LogLevel::Error));
    }
}
