//! Decoding of parsed log records into metric points, and the InfluxDB line
//! protocol rendering of those points.

use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use super::parser::LogRecord;

static NUMBER_WITH_UNIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(-?\d+(?:\.\d+)?)([A-Za-z%]*)$").unwrap());

const SAMPLE_PREFIX: &str = "sample#";

#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    pub timestamp: DateTime<Utc>,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, f64>,
}

impl Metric {
    /// Decode a log record. Numeric pairs (optionally suffixed with a unit)
    /// become fields, everything else becomes a tag. Returns `None` when the
    /// record carries no numeric values.
    pub fn from_record(record: &LogRecord) -> Option<Self> {
        let mut tags = BTreeMap::new();
        let mut fields = BTreeMap::new();

        tags.insert("host".to_string(), record.hostname.clone());
        tags.insert("app".to_string(), record.appname.clone());
        if let Some(procid) = &record.procid {
            tags.insert("procid".to_string(), procid.clone());
        }

        for (key, value) in &record.pairs {
            match split_unit(value) {
                Some((number, unit)) => {
                    fields.insert(field_key(key, unit), number);
                }
                None => {
                    tags.insert(key.clone(), value.clone());
                }
            }
        }

        if fields.is_empty() {
            return None;
        }

        Some(Metric {
            name: record.msgid.clone().unwrap_or_else(|| record.appname.clone()),
            timestamp: record.timestamp,
            tags,
            fields,
        })
    }

    /// Append this point as one line of InfluxDB line protocol with
    /// microsecond precision.
    pub fn write_line_protocol(&self, out: &mut String) {
        escape_into(out, &self.name, &[',', ' ']);
        for (k, v) in &self.tags {
            if v.is_empty() {
                continue;
            }
            out.push(',');
            escape_into(out, k, &[',', '=', ' ']);
            out.push('=');
            escape_into(out, v, &[',', '=', ' ']);
        }
        for (i, (k, v)) in self.fields.iter().enumerate() {
            out.push(if i == 0 { ' ' } else { ',' });
            escape_into(out, k, &[',', '=', ' ']);
            let _ = write!(out, "={}", v);
        }
        let _ = writeln!(out, " {}", self.timestamp.timestamp_micros());
    }

    pub fn to_line_protocol(&self) -> String {
        let mut out = String::new();
        self.write_line_protocol(&mut out);
        out
    }
}

fn split_unit(value: &str) -> Option<(f64, &str)> {
    let caps = NUMBER_WITH_UNIT_RE.captures(value)?;
    let number = caps.get(1)?.as_str().parse::<f64>().ok()?;
    let unit = caps.get(2).map(|m| m.as_str()).unwrap_or("");
    Some((number, unit))
}

fn field_key(key: &str, unit: &str) -> String {
    let key = key.strip_prefix(SAMPLE_PREFIX).unwrap_or(key);
    if unit.is_empty() {
        key.to_string()
    } else {
        format!("{}_{}", key, unit.to_lowercase())
    }
}

fn escape_into(out: &mut String, s: &str, special: &[char]) {
    for c in s.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}
