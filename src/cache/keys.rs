//! Deterministic query keys.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Key identifying one (query name, parameters) combination.
///
/// Rendered as `<query name>:<sha256 of canonical parameters>` so that
/// prefix invalidation by query name still works while the parameter part
/// stays fixed-length.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey(String);

impl QueryKey {
  /// Build a key from a query name and its already-sanitized parameters.
  pub fn new(query_name: &str, params: &Value) -> Self {
    let mut canonical = String::new();
    write_canonical(params, &mut canonical);

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let digest = hex::encode(hasher.finalize());

    Self(format!("{}:{}", query_name, digest))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn starts_with(&self, prefix: &str) -> bool {
    self.0.starts_with(prefix)
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Serialize JSON with object keys sorted at every level.
fn write_canonical(value: &Value, out: &mut String) {
  match value {
    Value::Object(map) => {
      let mut entries: Vec<(&String, &Value)> = map.iter().collect();
      entries.sort_by(|a, b| a.0.cmp(b.0));

      out.push('{');
      for (i, (key, value)) in entries.into_iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_canonical(value, out);
      }
      out.push('}');
    }
    Value::Array(items) => {
      out.push('[');
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_canonical(item, out);
      }
      out.push(']');
    }
    scalar => out.push_str(&scalar.to_string()),
  }
}
