//! DogStatsD datagram parser.
//!
//! Accepted record form: `name:value|type[|@sample_rate][|#tag1,tag2,...]`.
//! The `@` and `#` fields may appear in either order. A datagram may carry
//! multiple newline-separated records; a malformed record fails on its own
//! and the rest of the datagram is still processed.

use crate::metrics::{MetricKind, MetricValue, SampleRecord};
use memchr::memchr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("record is not valid UTF-8")]
    InvalidUtf8,
    #[error("empty metric name")]
    EmptyName,
    #[error("missing value")]
    MissingValue,
    #[error("missing type")]
    MissingType,
    #[error("unknown type code {0:?}")]
    UnknownType(String),
    #[error("invalid numeric value {0:?}")]
    InvalidValue(String),
    #[error("sample rate {0:?} outside (0, 1]")]
    InvalidSampleRate(String),
    #[error("unexpected field {0:?}")]
    UnexpectedField(String),
}

/// Parses every newline-separated record in one datagram payload.
///
/// Empty lines (including the trailing one produced by a final `\n`) are
/// skipped rather than reported as errors.
pub fn parse_datagram(buf: &[u8]) -> impl Iterator<Item = Result<SampleRecord, ParseError>> + '_ {
    buf.split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .map(parse_record)
}

/// Parses a single record.
pub fn parse_record(line: &[u8]) -> Result<SampleRecord, ParseError> {
    let colon = memchr(b':', line).ok_or(ParseError::MissingValue)?;
    if colon == 0 {
        return Err(ParseError::EmptyName);
    }
    let name = std::str::from_utf8(&line[..colon]).map_err(|_| ParseError::InvalidUtf8)?;
    let rest = std::str::from_utf8(&line[colon + 1..]).map_err(|_| ParseError::InvalidUtf8)?;

    let mut fields = rest.split('|');
    let raw_value = fields.next().filter(|v| !v.is_empty()).ok_or(ParseError::MissingValue)?;
    let type_code = fields.next().filter(|t| !t.is_empty()).ok_or(ParseError::MissingType)?;

    let kind = match type_code {
        "c" => MetricKind::Counter,
        "g" => MetricKind::Gauge,
        "h" | "ms" => MetricKind::Histogram,
        "s" => MetricKind::Set,
        other => return Err(ParseError::UnknownType(other.to_string())),
    };

    let value = match kind {
        // Set members are opaque strings.
        MetricKind::Set => MetricValue::Text(raw_value.to_string()),
        _ => {
            let v: f64 = raw_value
                .parse()
                .map_err(|_| ParseError::InvalidValue(raw_value.to_string()))?;
            if !v.is_finite() {
                return Err(ParseError::InvalidValue(raw_value.to_string()));
            }
            MetricValue::Number(v)
        }
    };

    let mut sample_rate = 1.0;
    let mut tags = Vec::new();
    for field in fields {
        if let Some(rate) = field.strip_prefix('@') {
            let r: f64 = rate
                .parse()
                .map_err(|_| ParseError::InvalidSampleRate(rate.to_string()))?;
            if !r.is_finite() || r <= 0.0 || r > 1.0 {
                return Err(ParseError::InvalidSampleRate(rate.to_string()));
            }
            sample_rate = r;
        } else if let Some(list) = field.strip_prefix('#') {
            tags = list
                .split(',')
                .filter(|t| !t.is_empty())
                .map(|t| t.to_string())
                .collect();
        } else {
            return Err(ParseError::UnexpectedField(field.to_string()));
        }
    }

    Ok(SampleRecord {
        name: name.to_string(),
        value,
        kind,
        sample_rate,
        tags,
    })
}
