//! Syslog line parser.
//!
//! Accepts RFC 5424 style lines as emitted by log drains, optionally prefixed
//! by an octet count:
//!
//! ```text
//! 302 <45>1 2024-03-01T12:00:00.123+00:00 host app web.1 - sample#load_avg_1m=0.01 ...
//! ```
//!
//! The message part is scanned for `key=value` pairs; values may be quoted.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static HEADER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^(?:\d+\s+)?",
        r"<(?P<pri>\d{1,3})>(?P<ver>\d{0,2})\s+",
        r"(?P<ts>\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2}))\s+",
        r"(?P<host>[\x21-\x7e]{1,255})\s+",
        r"(?P<app>[\x21-\x7e]{1,48})\s+",
        r"(?P<procid>[\x21-\x7e]{1,128})\s*",
        r"(?P<msgid>[\x21-\x7e]{1,32})?\s*",
        r"(?P<msg>.*)$",
    ))
    .unwrap()
});

static PAIR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([^\s="]+)=(?:"([^"]*)"|([^\s]+))"#).unwrap());

const NILVALUE: &str = "-";

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("empty line")]
    Empty,

    #[error("not a syslog line")]
    BadHeader,

    #[error("invalid timestamp '{0}'")]
    BadTimestamp(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub priority: u8,
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub appname: String,
    pub procid: Option<String>,
    pub msgid: Option<String>,
    pub message: String,
    pub pairs: BTreeMap<String, String>,
}

pub fn parse_line(line: &str) -> Result<LogRecord, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let caps = HEADER_RE.captures(line).ok_or(ParseError::BadHeader)?;

    let priority = caps["pri"].parse::<u8>().map_err(|_| ParseError::BadHeader)?;
    let ts = &caps["ts"];
    let timestamp = DateTime::parse_from_rfc3339(ts)
        .map_err(|_| ParseError::BadTimestamp(ts.to_string()))?
        .with_timezone(&Utc);

    let nil_to_none = |s: &str| (s != NILVALUE).then(|| s.to_string());

    let message = caps
        .name("msg")
        .map(|m| strip_structured_data(m.as_str()))
        .unwrap_or_default()
        .to_string();

    Ok(LogRecord {
        priority,
        timestamp,
        hostname: caps["host"].to_string(),
        appname: caps["app"].to_string(),
        procid: nil_to_none(&caps["procid"]),
        msgid: caps.name("msgid").and_then(|m| nil_to_none(m.as_str())),
        pairs: parse_pairs(&message),
        message,
    })
}

/// Extract `key=value` pairs from a message, honoring double quotes.
pub fn parse_pairs(msg: &str) -> BTreeMap<String, String> {
    PAIR_RE
        .captures_iter(msg)
        .filter_map(|c| {
            let key = c.get(1)?.as_str();
            let value = c.get(2).or_else(|| c.get(3))?.as_str();
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

// Drains without structured data sometimes send a bare "- " before the message.
fn strip_structured_data(msg: &str) -> &str {
    msg.strip_prefix("- ").unwrap_or(msg)
}
