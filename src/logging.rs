use crate::error::RigError;
use std::io::Write;
use std::sync::{Mutex, OnceLock};

// Process-wide log sink, set once by the binary.
static LOG_SINK: OnceLock<LogSink> = OnceLock::new();

struct LogSink {
    min_level: LogLevel,
    writer: Mutex<Box<dyn Write + Send>>,
}

/// Record severity, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    /// Parses a level name as accepted on the command line.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Initialize the logging system with a JSON-lines writer.
pub fn init_logging(writer: Box<dyn Write + Send>, min_level: LogLevel) {
    let sink = LogSink {
        min_level,
        writer: Mutex::new(writer),
    };
    if LOG_SINK.set(sink).is_err() {
        eprintln!("log sink already initialized, keeping the first one");
    }
}

fn format_record(level: LogLevel, message: &str) -> String {
    serde_json::json!({
        "level": level.as_str(),
        "message": message,
        "timestamp": jiff::Zoned::now().to_string()
    })
    .to_string()
}

/// Emit a log record to the configured sink.
pub fn send_log(level: LogLevel, message: &str) {
    if let Some(sink) = LOG_SINK.get() {
        if level < sink.min_level {
            return;
        }
        let record = format_record(level, message);
        let mut writer = sink
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = writeln!(writer, "{record}") {
            eprintln!("Failed to write log message: {}", e);
        }
    } else {
        eprintln!("[{}] {}", level.as_str().to_uppercase(), message);
    }
}

/// Writes a `RigError` at error level, prefixed by `context` when given.
pub fn log_rig_error(error: &RigError, context: Option<&str>) {
    let message = match context {
        Some(context) => format!("{context}: {error}"),
        None => error.to_string(),
    };

    send_log(LogLevel::Error, &message);
}

/// Formats and sends a debug record.
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::send_log($crate::logging::LogLevel::Debug, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::send_log($crate::logging::LogLevel::Info, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::send_log($crate::logging::LogLevel::Warn, &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::send_log($crate::logging::LogLevel::Error, &format!($($arg)*))
    };
}

/// Logs the error of a failed rig operation and hands the result back.
pub trait ResultExt<T, E> {
    fn log_error(self, context: Option<&str>) -> Self;
}

impl<T> ResultExt<T, RigError> for Result<T, RigError> {
    fn log_error(self, context: Option<&str>) -> Self {
        if let Err(ref error) = self {
            log_rig_error(error, context);
        }
        self
    }
}
