use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// A single server record, keyed by field name
pub type Record = Map<String, Value>;

/// Query filters as sent on the wire
pub type Filters = Map<String, Value>;

/// One row of a query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
  pub record: Record,
  /// Actions the current user may take on this record, when the server says
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub allowed_actions: Option<Vec<String>>,
}

/// A page of normalized query results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
  pub rows: Vec<Row>,
  pub current_page: u32,
  pub max_pages: u32,
  pub total_rows: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
  #[default]
  Asc,
  Desc,
}

/// Sort instruction for one column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortCriterion {
  pub field: String,
  #[serde(default)]
  pub direction: SortDirection,
}

impl SortCriterion {
  pub fn asc(field: impl Into<String>) -> Self {
    Self {
      field: field.into(),
      direction: SortDirection::Asc,
    }
  }

  pub fn desc(field: impl Into<String>) -> Self {
    Self {
      field: field.into(),
      direction: SortDirection::Desc,
    }
  }
}

/// Parses `field`, `field:asc` or `field:desc`
impl FromStr for SortCriterion {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (field, direction) = match s.split_once(':') {
      Some((field, dir)) => {
        let direction = match dir.trim().to_ascii_lowercase().as_str() {
          "asc" => SortDirection::Asc,
          "desc" => SortDirection::Desc,
          other => return Err(format!("unknown sort direction {:?}", other)),
        };
        (field.trim(), direction)
      }
      None => (s.trim(), SortDirection::Asc),
    };

    if field.is_empty() {
      return Err("sort field must not be empty".to_string());
    }
    Ok(Self {
      field: field.to_string(),
      direction,
    })
  }
}

/// The authenticated user, as reported by the session probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
  #[serde(default)]
  pub id: Value,
  #[serde(default)]
  pub username: String,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(default)]
  pub roles: Vec<String>,
}

impl fmt::Display for User {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.email {
      Some(email) => write!(f, "{} <{}>", self.username, email),
      None => f.write_str(&self.username),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_sort_criterion() {
    assert_eq!(
      "createdTime:desc".parse::<SortCriterion>().unwrap(),
      SortCriterion::desc("createdTime")
    );
    assert_eq!("title".parse::<SortCriterion>().unwrap(), SortCriterion::asc("title"));
    assert!("title:sideways".parse::<SortCriterion>().is_err());
    assert!(":desc".parse::<SortCriterion>().is_err());
  }
}
