use std::io::IsTerminal;

use crate::logger::{error::LoggerError, format::LoggerFormat};

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub format: LoggerFormat,
    /// `EnvFilter` directive, e.g. `info` or `herd_monitor=debug,info`.
    pub level: String,
    pub with_targets: bool,
    pub use_color: bool,
}

impl LoggerConfig {
    /// Build a config from the textual format and level, as read from the environment.
    pub fn parse(format: &str, level: &str) -> Result<Self, LoggerError> {
        if level.trim().is_empty() {
            return Err(LoggerError::InvalidLogLevel(level.to_string()));
        }
        let format: LoggerFormat = format.parse()?;
        Ok(Self {
            use_color: format == LoggerFormat::Text && std::io::stdout().is_terminal(),
            format,
            level: level.trim().to_string(),
            ..Self::default()
        })
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        let use_color = cfg!(test) || std::io::stdout().is_terminal();
        Self {
            format: LoggerFormat::Text,
            level: "info".to_string(),
            with_targets: true,
            use_color,
        }
    }
}
