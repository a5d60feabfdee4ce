// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Telemetry points and the InfluxDB line protocol.
//!
//! Collectors report container metrics as line protocol:
//! ```text
//! measurement,tag1=val1,tag2=val2 field1=val1,field2=val2 timestamp_ns
//! ```
//!
//! See: <https://docs.influxdata.com/influxdb/v2/reference/syntax/line-protocol/>

use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Line protocol parse errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {reason}")]
pub struct LineProtocolError {
    pub line: usize,
    pub reason: String,
}

/// A value stored in a point field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    String(String),
    Boolean(bool),
}

impl FieldValue {
    /// Numeric value truncated to an integer, if the field is numeric.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            FieldValue::Float(v) if v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    fn parse(raw: &str) -> Result<Self, String> {
        if let Some(quoted) = raw.strip_prefix('"') {
            let inner = quoted
                .strip_suffix('"')
                .ok_or_else(|| format!("unterminated string {:?}", raw))?;
            return Ok(FieldValue::String(unescape(inner)));
        }

        match raw {
            "t" | "T" | "true" | "True" | "TRUE" => return Ok(FieldValue::Boolean(true)),
            "f" | "F" | "false" | "False" | "FALSE" => return Ok(FieldValue::Boolean(false)),
            _ => {}
        }

        if let Some(int) = raw.strip_suffix('i').or_else(|| raw.strip_suffix('u')) {
            return int
                .parse()
                .map(FieldValue::Integer)
                .map_err(|_| format!("invalid integer {:?}", raw));
        }

        raw.parse()
            .map(FieldValue::Float)
            .map_err(|_| format!("invalid field value {:?}", raw))
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Integer(v) => write!(f, "{}i", v),
            FieldValue::String(v) => {
                write!(f, "\"{}\"", v.replace('\\', "\\\\").replace('"', "\\\""))
            }
            FieldValue::Boolean(v) => write!(f, "{}", v),
        }
    }
}

/// One timestamped measurement.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryPoint {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: DateTime<Utc>,
}

impl TelemetryPoint {
    pub fn new(measurement: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }
}

/// Formats the point as one line of line protocol, without the newline.
impl fmt::Display for TelemetryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", escape(&self.measurement, &[',', ' ']))?;
        for (key, value) in &self.tags {
            write!(
                f,
                ",{}={}",
                escape(key, &[',', '=', ' ']),
                escape(value, &[',', '=', ' '])
            )?;
        }

        for (i, (key, value)) in self.fields.iter().enumerate() {
            let sep = if i == 0 { ' ' } else { ',' };
            write!(f, "{}{}={}", sep, escape(key, &[',', '=', ' ']), value)?;
        }

        match self.timestamp.timestamp_nanos_opt() {
            Some(ns) => write!(f, " {}", ns),
            None => Ok(()),
        }
    }
}

fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Split on `sep` outside escapes and, if `quotes`, outside double quotes.
fn split_unescaped(s: &str, sep: char, quotes: bool) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    let mut quoted = false;

    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' if quotes => quoted = !quoted,
            c if c == sep && !quoted => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}

fn split_pair(s: &str) -> Option<(&str, &str)> {
    match split_unescaped(s, '=', true).as_slice() {
        [key, value] if !key.is_empty() => Some((key, value)),
        _ => None,
    }
}

/// Parse one line. `now` stamps points that carry no timestamp.
pub fn parse_line(
    line: &str,
    line_no: usize,
    now: DateTime<Utc>,
) -> Result<TelemetryPoint, LineProtocolError> {
    let err = |reason: String| LineProtocolError {
        line: line_no,
        reason,
    };

    let sections: Vec<&str> = split_unescaped(line.trim(), ' ', true)
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect();
    let (key, fields, timestamp) = match sections.as_slice() {
        [key, fields] => (*key, *fields, None),
        [key, fields, ts] => (*key, *fields, Some(*ts)),
        _ => return Err(err("expected measurement, fields and optional timestamp".into())),
    };

    let mut key_parts = split_unescaped(key, ',', false).into_iter();
    let measurement = key_parts.next().map(unescape).unwrap_or_default();
    if measurement.is_empty() {
        return Err(err("missing measurement".into()));
    }

    let timestamp = match timestamp {
        Some(raw) => {
            let ns: i64 = raw
                .parse()
                .map_err(|_| err(format!("invalid timestamp {:?}", raw)))?;
            Utc.timestamp_nanos(ns)
        }
        None => now,
    };

    let mut point = TelemetryPoint::new(measurement, timestamp);

    for tag in key_parts {
        let (k, v) = split_pair(tag).ok_or_else(|| err(format!("invalid tag {:?}", tag)))?;
        point.tags.insert(unescape(k), unescape(v));
    }

    for field in split_unescaped(fields, ',', true) {
        let (k, v) = split_pair(field).ok_or_else(|| err(format!("invalid field {:?}", field)))?;
        let value = FieldValue::parse(v).map_err(err)?;
        point.fields.insert(unescape(k), value);
    }

    Ok(point)
}

/// Parse a batch of lines, skipping blank lines and comments.
///
/// Each non-empty line yields its own result so one bad line does not
/// hide the others.
pub fn parse_lines(input: &str) -> Vec<Result<TelemetryPoint, LineProtocolError>> {
    let now = Utc::now();
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(i, line)| parse_line(line, i + 1, now))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(ns: i64) -> DateTime<Utc> {
        Utc.timestamp_nanos(ns)
    }

    #[test]
    fn test_field_value_display() {
        assert_eq!(FieldValue::Float(3.15).to_string(), "3.15");
        assert_eq!(FieldValue::Integer(42).to_string(), "42i");
        assert_eq!(FieldValue::Boolean(true).to_string(), "true");
        assert_eq!(
            FieldValue::String("say \"hi\"".into()).to_string(),
            "\"say \\\"hi\\\"\""
        );
    }

    #[test]
    fn test_as_i64() {
        assert_eq!(FieldValue::Integer(7).as_i64(), Some(7));
        assert_eq!(FieldValue::Float(7.9).as_i64(), Some(7));
        assert_eq!(FieldValue::Float(f64::NAN).as_i64(), None);
        assert_eq!(FieldValue::Boolean(true).as_i64(), None);
    }

    #[test]
    fn test_parse_collector_line() {
        let line = "rx_bytes,container_name=snort-1,host=h1 value=123456i 1700000000000000000";
        let p = parse_line(line, 1, Utc::now()).unwrap();
        assert_eq!(p.measurement, "rx_bytes");
        assert_eq!(p.tag("container_name"), Some("snort-1"));
        assert_eq!(p.tag("host"), Some("h1"));
        assert_eq!(p.field("value"), Some(&FieldValue::Integer(123456)));
        assert_eq!(p.timestamp, ts(1_700_000_000_000_000_000));
    }

    #[test]
    fn test_parse_field_types() {
        let line = r#"m f=1.5,i=-3i,u=4u,b=t,s="a b,c" 1"#;
        let p = parse_line(line, 1, Utc::now()).unwrap();
        assert_eq!(p.field("f"), Some(&FieldValue::Float(1.5)));
        assert_eq!(p.field("i"), Some(&FieldValue::Integer(-3)));
        assert_eq!(p.field("u"), Some(&FieldValue::Integer(4)));
        assert_eq!(p.field("b"), Some(&FieldValue::Boolean(true)));
        assert_eq!(p.field("s"), Some(&FieldValue::String("a b,c".into())));
    }

    #[test]
    fn test_parse_escapes() {
        let line = r"cpu\ usage,container\,name=a\ b value=1 5";
        let p = parse_line(line, 1, Utc::now()).unwrap();
        assert_eq!(p.measurement, "cpu usage");
        assert_eq!(p.tag("container,name"), Some("a b"));
    }

    #[test]
    fn test_missing_timestamp_uses_now() {
        let now = ts(42);
        let p = parse_line("m value=1", 1, now).unwrap();
        assert_eq!(p.timestamp, now);
    }

    #[test]
    fn test_parse_errors() {
        let now = Utc::now();
        assert!(parse_line("justmeasurement", 3, now).is_err());
        assert!(parse_line("m value=1 notatime", 1, now).is_err());
        assert!(parse_line("m value=abc 1", 1, now).is_err());
        assert!(parse_line("m,badtag value=1 1", 1, now).is_err());
        assert!(parse_line(r#"m s="open 1"#, 1, now).is_err());

        let err = parse_line("m", 7, now).unwrap_err();
        assert_eq!(err.line, 7);
    }

    #[test]
    fn test_parse_lines_keeps_good_lines() {
        let input = "# comment\n\nm value=1i 10\nbroken\nm value=2i 20\n";
        let results = parse_lines(input);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert_eq!(results[1].as_ref().unwrap_err().line, 4);
        assert_eq!(results[2].as_ref().unwrap().timestamp, ts(20));
    }

    #[test]
    fn test_display_parses_back() {
        let point = TelemetryPoint::new("tx bytes", ts(1_000))
            .with_tag("container_name", "snort=1")
            .with_field("value", FieldValue::Integer(99));
        let line = point.to_string();
        assert_eq!(line, r"tx\ bytes,container_name=snort\=1 value=99i 1000");
        assert_eq!(parse_line(&line, 1, Utc::now()).unwrap(), point);
    }
}
