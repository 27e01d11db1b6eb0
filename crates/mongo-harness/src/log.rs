//! Server log line parsing.
//!
//! Servers from 4.4 onward write one JSON document per line; older servers
//! write a fixed-field plain-text format. Both are mapped onto [`LogEntry`].

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

/// Plain-text format used before 4.4:
/// `<timestamp> <severity> <component> [<context>] <message>`.
static LEGACY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<timestamp>\S+)\s+(?P<severity>[A-Z]\d?)\s+(?P<component>[A-Z_]+|-)\s+\[(?P<context>[^\]]+)\]\s(?P<message>.*)$",
    )
    .expect("legacy log line pattern is valid")
});

/// Log message severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// `F`
    Fatal,
    /// `E`
    Error,
    /// `W`
    Warning,
    /// `I`
    Info,
    /// `D1`..`D5`; a bare `D` is level 1.
    Debug(u8),
}

impl FromStr for Severity {
    type Err = LogParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "F" => Ok(Self::Fatal),
            "E" => Ok(Self::Error),
            "W" => Ok(Self::Warning),
            "I" => Ok(Self::Info),
            "D" => Ok(Self::Debug(1)),
            other => other
                .strip_prefix('D')
                .and_then(|level| level.parse::<u8>().ok())
                .filter(|level| (1..=5).contains(level))
                .map(Self::Debug)
                .ok_or_else(|| LogParseError::Severity(other.to_string())),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fatal => f.write_str("F"),
            Self::Error => f.write_str("E"),
            Self::Warning => f.write_str("W"),
            Self::Info => f.write_str("I"),
            Self::Debug(level) => write!(f, "D{level}"),
        }
    }
}

/// Failure to recognize a log line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogParseError {
    /// Neither structured JSON nor the legacy layout.
    #[error("unrecognized log line: {0:?}")]
    Unrecognized(String),
    /// Severity token outside the known set.
    #[error("unknown severity {0:?}")]
    Severity(String),
}

/// One parsed server log line.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// Timestamp exactly as printed by the server.
    pub timestamp: String,
    /// Message severity.
    pub severity: Severity,
    /// Subsystem, e.g. `NETWORK` or `CONTROL`.
    pub component: String,
    /// Thread or task name, e.g. `initandlisten`.
    pub context: String,
    /// Structured message id; `None` for legacy lines.
    pub id: Option<u32>,
    /// Free-text message.
    pub message: String,
    /// Structured attributes; `Null` for legacy lines.
    pub attr: Value,
}

#[derive(Deserialize)]
struct StructuredLine {
    t: StructuredTime,
    s: String,
    c: String,
    id: u32,
    ctx: String,
    msg: String,
    #[serde(default)]
    attr: Value,
}

#[derive(Deserialize)]
struct StructuredTime {
    #[serde(rename = "$date")]
    date: String,
}

impl LogEntry {
    /// Parses a single line of server output.
    pub fn parse(line: &str) -> Result<Self, LogParseError> {
        match serde_json::from_str::<StructuredLine>(line) {
            Ok(structured) => Ok(Self {
                timestamp: structured.t.date,
                severity: structured.s.parse()?,
                component: structured.c,
                context: structured.ctx,
                id: Some(structured.id),
                message: structured.msg,
                attr: structured.attr,
            }),
            Err(_) => Self::parse_legacy(line),
        }
    }

    fn parse_legacy(line: &str) -> Result<Self, LogParseError> {
        let caps = LEGACY_LINE
            .captures(line.trim_end())
            .ok_or_else(|| LogParseError::Unrecognized(line.to_string()))?;

        Ok(Self {
            timestamp: caps["timestamp"].to_string(),
            severity: caps["severity"].parse()?,
            component: caps["component"].to_string(),
            context: caps["context"].to_string(),
            id: None,
            message: caps["message"].to_string(),
            attr: Value::Null,
        })
    }

    /// Whether the entry came from a structured (JSON) log line.
    pub fn is_structured(&self) -> bool {
        self.id.is_some()
    }

    /// Returns `attr.<key>`, if present.
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attr.get(key)
    }
}

/// Parses a sequence of raw lines, skipping blanks and ending at the first
/// line that cannot be recognized.
pub fn parse_lines<I, S>(lines: I) -> impl Iterator<Item = LogEntry>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .filter(|line| !line.as_ref().trim().is_empty())
        .map(|line| LogEntry::parse(line.as_ref()))
        .map_while(Result::ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const LISTENING: &str = r#"{"t":{"$date":"2024-05-02T10:11:12.345+00:00"},"s":"I","c":"NETWORK","id":23016,"ctx":"listener","msg":"Waiting for connections","attr":{"port":27017,"ssl":"off"}}"#;

    #[test]
    fn parses_structured_line() {
        let entry = LogEntry::parse(LISTENING).unwrap();

        assert_eq!(entry.timestamp, "2024-05-02T10:11:12.345+00:00");
        assert_eq!(entry.severity, Severity::Info);
        assert_eq!(entry.component, "NETWORK");
        assert_eq!(entry.context, "listener");
        assert_eq!(entry.id, Some(23016));
        assert_eq!(entry.message, "Waiting for connections");
        assert_eq!(entry.attribute("port").and_then(Value::as_u64), Some(27017));
        assert!(entry.is_structured());
    }

    #[test]
    fn structured_line_without_attr() {
        let line = r#"{"t":{"$date":"2024-05-02T10:11:12.345+00:00"},"s":"D2","c":"STORAGE","id":22315,"ctx":"initandlisten","msg":"Opening WiredTiger"}"#;
        let entry = LogEntry::parse(line).unwrap();

        assert_eq!(entry.severity, Severity::Debug(2));
        assert_eq!(entry.attr, Value::Null);
    }

    #[test]
    fn parses_legacy_line() {
        let line = "2019-06-12T13:08:44.113+0200 I NETWORK  [initandlisten] waiting for connections on port 27017";
        let entry = LogEntry::parse(line).unwrap();

        assert_eq!(entry.timestamp, "2019-06-12T13:08:44.113+0200");
        assert_eq!(entry.severity, Severity::Info);
        assert_eq!(entry.component, "NETWORK");
        assert_eq!(entry.context, "initandlisten");
        assert_eq!(entry.id, None);
        assert_eq!(entry.message, "waiting for connections on port 27017");
        assert!(!entry.is_structured());
    }

    #[test]
    fn legacy_line_with_dash_component() {
        let line = "2019-06-12T13:08:44.113+0200 W -        [main] some warning";
        let entry = LogEntry::parse(line).unwrap();

        assert_eq!(entry.severity, Severity::Warning);
        assert_eq!(entry.component, "-");
        assert_eq!(entry.context, "main");
    }

    #[test_case("F", Severity::Fatal)]
    #[test_case("E", Severity::Error)]
    #[test_case("W", Severity::Warning)]
    #[test_case("I", Severity::Info)]
    #[test_case("D", Severity::Debug(1))]
    #[test_case("D5", Severity::Debug(5))]
    fn severity_tokens(token: &str, expected: Severity) {
        assert_eq!(token.parse::<Severity>().unwrap(), expected);
        assert_eq!(expected.to_string().parse::<Severity>().unwrap(), expected);
    }

    #[test_case("X")]
    #[test_case("D9")]
    #[test_case("")]
    fn unknown_severity_is_rejected(token: &str) {
        assert!(token.parse::<Severity>().is_err());
    }

    #[test]
    fn garbage_is_an_error() {
        let err = LogEntry::parse("about to fork child process").unwrap_err();
        assert!(matches!(err, LogParseError::Unrecognized(_)));
    }

    #[test]
    fn json_missing_fields_falls_back_and_fails() {
        assert!(LogEntry::parse(r#"{"msg":"hello"}"#).is_err());
    }

    #[test]
    fn parse_lines_skips_blanks_and_stops_at_garbage() {
        let lines = vec![
            "",
            LISTENING,
            "   ",
            "2019-06-12T13:08:44.113+0200 I CONTROL  [initandlisten] db version v4.0.9",
            "not a log line",
            LISTENING,
        ];

        let entries: Vec<_> = parse_lines(lines).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].component, "CONTROL");
    }
}
