use std::{fmt, str::FromStr};

/// Severity of an emitted event.
///
/// Ordered from the most verbose to the most severe. [`Level::Disabled`] is
/// the highest value and means "never emit".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    /// Severity only. Emitting at this level never terminates the process.
    Fatal,
    /// Severity only. Emitting at this level never panics.
    Panic,
    Disabled,
}

impl Level {
    /// Lowercase level name. Example: `warn`
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Fatal => "fatal",
            Level::Panic => "panic",
            Level::Disabled => "disabled",
        }
    }

    /// Three letter code used by the console format. Example: `WRN`
    pub fn code(&self) -> &'static str {
        match self {
            Level::Trace => "TRC",
            Level::Debug => "DBG",
            Level::Info => "INF",
            Level::Warn => "WRN",
            Level::Error => "ERR",
            Level::Fatal => "FTL",
            Level::Panic => "PNC",
            Level::Disabled => "???",
        }
    }

    pub fn is_enabled(&self) -> bool {
        *self != Level::Disabled
    }

    /// Closest `log` facade level. `None` for [`Level::Disabled`].
    pub(crate) fn to_log(self) -> Option<log::Level> {
        match self {
            Level::Trace => Some(log::Level::Trace),
            Level::Debug => Some(log::Level::Debug),
            Level::Info => Some(log::Level::Info),
            Level::Warn => Some(log::Level::Warn),
            Level::Error | Level::Fatal | Level::Panic => Some(log::Level::Error),
            Level::Disabled => None,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a [`Level`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "unknown log level {input:?}: expected one of trace, debug, info, warn, error, fatal, panic, disabled"
)]
pub struct ParseLevelError {
    input: String,
}

impl ParseLevelError {
    /// The rejected input.
    pub fn input(&self) -> &str {
        &self.input
    }
}

impl FromStr for Level {
    type Err = ParseLevelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level = match s.trim().to_ascii_lowercase().as_str() {
            "trace" | "trc" => Level::Trace,
            "debug" | "dbg" => Level::Debug,
            "info" | "inf" => Level::Info,
            "warn" | "warning" | "wrn" => Level::Warn,
            "error" | "err" => Level::Error,
            "fatal" | "ftl" => Level::Fatal,
            "panic" | "pnc" => Level::Panic,
            "disabled" | "off" => Level::Disabled,
            _ => {
                return Err(ParseLevelError {
                    input: s.to_string(),
                });
            }
        };
        Ok(level)
    }
}

/// Parses a level name such as `"debug"` or `"WRN"`.
///
/// ```rust
/// use actix_web_middleware_reqlog::{parse_level, Level};
///
/// assert_eq!(parse_level("warn").unwrap(), Level::Warn);
/// assert!(parse_level("verbose").is_err());
/// ```
pub fn parse_level(s: &str) -> Result<Level, ParseLevelError> {
    s.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        let cases = [
            ("trace", Level::Trace),
            ("debug", Level::Debug),
            ("info", Level::Info),
            ("warn", Level::Warn),
            ("error", Level::Error),
            ("fatal", Level::Fatal),
            ("panic", Level::Panic),
            ("disabled", Level::Disabled),
            ("WARN", Level::Warn),
            (" Info ", Level::Info),
            ("FTL", Level::Fatal),
            ("warning", Level::Warn),
        ];

        for (input, want) in cases {
            assert_eq!(parse_level(input), Ok(want), "input {input:?}");
        }
    }

    #[test]
    fn test_parse_level_rejects_unknown() {
        for input in ["", "verbose", "-1", "inf0"] {
            let err = parse_level(input).unwrap_err();
            assert_eq!(err.input(), input);
            assert!(err.to_string().contains("unknown log level"));
        }
    }

    #[test]
    fn test_level_to_log() {
        assert_eq!(Level::Info.to_log(), Some(log::Level::Info));
        assert_eq!(Level::Fatal.to_log(), Some(log::Level::Error));
        assert_eq!(Level::Panic.to_log(), Some(log::Level::Error));
        assert_eq!(Level::Disabled.to_log(), None);
        assert!(Level::Warn < Level::Error);
        assert!(!Level::Disabled.is_enabled());
    }
}
