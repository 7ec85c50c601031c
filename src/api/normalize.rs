//! Repairs inconsistent field encodings in server records.
//!
//! The platform sends the same field in different shapes depending on the
//! endpoint: tags as `"a, b"` or `["a", "b"]`, timestamps as
//! `"2026-01-28 10:30 AM UTC"` or RFC 3339, counters as strings, flags as
//! `"true"`, `1` or `"yes"`. Every declared field is coerced to one canonical
//! shape. Values that cannot be coerced are kept as received, and running the
//! normalizer on its own output changes nothing.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::{Number, Value};

use super::types::{Record, Row};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
  /// Comma-delimited string to list of trimmed strings
  List,
  /// Platform timestamp to RFC 3339 UTC
  Timestamp,
  Number,
  Boolean,
}

/// Field name to coercion for every field the platform is known to mangle.
pub const RULES: &[(&str, Coercion)] = &[
  ("tags", Coercion::List),
  ("categories", Coercion::List),
  ("models", Coercion::List),
  ("keywords", Coercion::List),
  ("createdTime", Coercion::Timestamp),
  ("updatedTime", Coercion::Timestamp),
  ("publishedTime", Coercion::Timestamp),
  ("lastModifiedTime", Coercion::Timestamp),
  ("lastActivityTime", Coercion::Timestamp),
  ("viewCount", Coercion::Number),
  ("likeCount", Coercion::Number),
  ("bookmarkCount", Coercion::Number),
  ("commentCount", Coercion::Number),
  ("answerCount", Coercion::Number),
  ("voteCount", Coercion::Number),
  ("score", Coercion::Number),
  ("rating", Coercion::Number),
  ("version", Coercion::Number),
  ("isPublic", Coercion::Boolean),
  ("isFeatured", Coercion::Boolean),
  ("isLiked", Coercion::Boolean),
  ("isBookmarked", Coercion::Boolean),
  ("isAccepted", Coercion::Boolean),
  ("isVerified", Coercion::Boolean),
  ("isDeleted", Coercion::Boolean),
];

pub fn rule_for(field: &str) -> Option<Coercion> {
  RULES
    .iter()
    .find(|(name, _)| *name == field)
    .map(|(_, coercion)| *coercion)
}

/// Return a copy of `record` with every declared field in canonical form.
pub fn normalize(record: &Record) -> Record {
  record
    .iter()
    .map(|(field, value)| {
      let value = match rule_for(field) {
        Some(coercion) => coerce(value, coercion).unwrap_or_else(|| value.clone()),
        None => value.clone(),
      };
      (field.clone(), value)
    })
    .collect()
}

pub fn normalize_row(row: Row) -> Row {
  Row {
    record: normalize(&row.record),
    allowed_actions: row.allowed_actions,
  }
}

/// `None` means the value is left as received.
fn coerce(value: &Value, coercion: Coercion) -> Option<Value> {
  match coercion {
    Coercion::List => to_list(value),
    Coercion::Timestamp => to_timestamp(value),
    Coercion::Number => to_number(value),
    Coercion::Boolean => to_boolean(value),
  }
}

fn to_list(value: &Value) -> Option<Value> {
  match value {
    Value::String(s) => Some(Value::Array(
      s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| Value::String(part.to_string()))
        .collect(),
    )),
    Value::Null => Some(Value::Array(Vec::new())),
    _ => None,
  }
}

/// Formats seen in the wild, tried after stripping a trailing "UTC".
const TIMESTAMP_FORMATS: &[&str] = &[
  "%Y-%m-%d %I:%M %p",
  "%Y-%m-%d %I:%M:%S %p",
  "%Y-%m-%d %H:%M",
  "%Y-%m-%d %H:%M:%S",
  "%Y-%m-%dT%H:%M:%S",
];

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
  let raw = raw.trim();

  if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
    return Some(dt.with_timezone(&Utc));
  }

  let naive = raw
    .strip_suffix("UTC")
    .or_else(|| raw.strip_suffix("Z"))
    .unwrap_or(raw)
    .trim_end();

  TIMESTAMP_FORMATS
    .iter()
    .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
    .map(|dt| dt.and_utc())
}

fn to_timestamp(value: &Value) -> Option<Value> {
  let raw = value.as_str()?;
  let parsed = parse_timestamp(raw)?;
  Some(Value::String(
    parsed.to_rfc3339_opts(SecondsFormat::AutoSi, true),
  ))
}

/// Remove thousands separators. Commas anywhere else (`"1,5"`) make the
/// value unparseable rather than silently changing its magnitude.
fn strip_thousands(raw: &str) -> Option<String> {
  if !raw.contains(',') {
    return Some(raw.to_string());
  }
  let (integer, fraction) = match raw.split_once('.') {
    Some((integer, fraction)) => (integer, Some(fraction)),
    None => (raw, None),
  };
  if fraction.is_some_and(|f| f.contains(',')) {
    return None;
  }

  let digits = integer.strip_prefix('-').unwrap_or(integer);
  let is_digits = |g: &str| g.bytes().all(|b| b.is_ascii_digit());
  let mut groups = digits.split(',');
  let head = groups.next()?;
  let grouped = (1..=3).contains(&head.len())
    && is_digits(head)
    && groups.all(|g| g.len() == 3 && is_digits(g));

  grouped.then(|| raw.replace(',', ""))
}

fn to_number(value: &Value) -> Option<Value> {
  let raw = value.as_str()?;
  let cleaned = strip_thousands(raw.trim())?;

  if let Ok(n) = cleaned.parse::<i64>() {
    return Some(Value::Number(n.into()));
  }
  cleaned
    .parse::<f64>()
    .ok()
    .and_then(Number::from_f64)
    .map(Value::Number)
}

fn to_boolean(value: &Value) -> Option<Value> {
  match value {
    Value::Number(n) => n.as_f64().map(|f| Value::Bool(f != 0.0)),
    Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
      "true" | "t" | "yes" | "y" | "1" | "on" => Some(Value::Bool(true)),
      "false" | "f" | "no" | "n" | "0" | "off" | "" => Some(Value::Bool(false)),
      _ => None,
    },
    _ => None,
  }
}
