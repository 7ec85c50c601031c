//! Serde types matching the platform's wire format.
//!
//! These types are separate from domain types to allow tolerant deserialization
//! while keeping domain types focused on application needs.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::normalize::normalize_row;
use super::types::{Filters, QueryResult, Record, Row, SortCriterion, User};
use crate::error::ApiError;

// ============================================================================
// Envelope shared by every endpoint
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiEnvelope {
  pub success: Option<bool>,
  pub code: Option<String>,
  pub message: Option<String>,
  pub payload: Option<Value>,
}

/// Body of a non-2xx response
#[derive(Debug, Default, Deserialize)]
pub struct ApiErrorBody {
  pub code: Option<String>,
  pub message: Option<String>,
  pub error: Option<String>,
}

impl ApiErrorBody {
  pub fn parse(body: &str) -> Self {
    serde_json::from_str(body).unwrap_or_default()
  }

  pub fn describe(&self, fallback: &str) -> String {
    self
      .message
      .clone()
      .or_else(|| self.error.clone())
      .unwrap_or_else(|| fallback.to_string())
  }
}

// ============================================================================
// Query protocol
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiQueryRequest<'a> {
  pub filters: &'a Filters,
  pub page_num: u32,
  pub num_rows_in_page: u32,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub sort_criteria: Option<&'a [SortCriterion]>,
  pub query_name: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct ApiRow {
  #[serde(default)]
  pub row: Record,
  #[serde(rename = "allowedActions", default)]
  pub allowed_actions: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiQueryPayload {
  pub list: Option<Vec<ApiRow>>,
  #[serde(default, deserialize_with = "lenient_u64")]
  pub current_page: Option<u64>,
  #[serde(default, deserialize_with = "lenient_u64")]
  pub max_pages: Option<u64>,
  #[serde(default, deserialize_with = "lenient_u64")]
  pub num_rows_returned: Option<u64>,
  #[serde(default, deserialize_with = "lenient_u64")]
  pub max_rows: Option<u64>,
  #[serde(default, deserialize_with = "lenient_u64")]
  pub num_rows_in_page: Option<u64>,
  #[serde(default, deserialize_with = "lenient_u64")]
  pub start_row: Option<u64>,
  #[serde(default, deserialize_with = "lenient_u64")]
  pub end_row: Option<u64>,
  #[serde(default)]
  pub column_metadata: Option<Value>,
}

/// Accept counters encoded as numbers, numeric strings, or null.
fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
  D: Deserializer<'de>,
{
  let value = Option::<Value>::deserialize(deserializer)?;
  Ok(match value {
    Some(Value::Number(n)) => n
      .as_u64()
      .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
    Some(Value::String(s)) => s.trim().parse().ok(),
    _ => None,
  })
}

// ============================================================================
// Session endpoints
// ============================================================================

/// The session probe answers either `{payload: {user: {..}}}` or `{payload: {..user..}}`.
pub fn user_from_envelope(body: Value) -> Option<User> {
  let envelope: ApiEnvelope = serde_json::from_value(body).ok()?;
  if envelope.success == Some(false) {
    return None;
  }
  let mut payload = envelope.payload?;
  let nested = payload.get_mut("user").map(Value::take);
  if let Some(user) = nested {
    payload = user;
  }
  if payload.is_null() {
    return None;
  }
  serde_json::from_value(payload).ok()
}

// ============================================================================
// Conversions to domain types
// ============================================================================

/// Validate a query response envelope and convert it into a normalized page.
pub fn into_query_result(
  query_name: &str,
  body: Value,
  page: u32,
  page_size: u32,
) -> Result<QueryResult, ApiError> {
  let invalid = |reason: String| ApiError::InvalidResponse {
    query_name: query_name.to_string(),
    reason,
  };

  let envelope: ApiEnvelope =
    serde_json::from_value(body).map_err(|e| invalid(format!("malformed envelope: {}", e)))?;

  if envelope.success == Some(false) {
    return Err(ApiError::Rejected {
      code: envelope.code.unwrap_or_else(|| "UNKNOWN".to_string()),
      message: envelope.message.unwrap_or_default(),
    });
  }

  let payload = envelope
    .payload
    .ok_or_else(|| invalid("missing payload".to_string()))?;
  let payload: ApiQueryPayload =
    serde_json::from_value(payload).map_err(|e| invalid(format!("malformed payload: {}", e)))?;
  let list = payload
    .list
    .ok_or_else(|| invalid("missing payload.list".to_string()))?;

  let mut rows: Vec<Row> = list
    .into_iter()
    .map(|api_row| {
      normalize_row(Row {
        record: api_row.row,
        allowed_actions: api_row.allowed_actions,
      })
    })
    .collect();

  if rows.len() > page_size as usize {
    tracing::warn!(
      query_name,
      returned = rows.len(),
      page_size,
      "server returned more rows than requested, truncating"
    );
    rows.truncate(page_size as usize);
  }

  let total_rows = payload.max_rows.unwrap_or(rows.len() as u64);
  let max_pages = payload
    .max_pages
    .unwrap_or_else(|| total_rows.div_ceil(page_size.max(1) as u64));
  let max_pages = u32::try_from(max_pages).unwrap_or(u32::MAX);

  let reported_page = payload.current_page.unwrap_or(page as u64);
  let current_page = u32::try_from(reported_page).unwrap_or(u32::MAX).min(max_pages);
  if payload.current_page.is_some() && current_page as u64 != reported_page {
    tracing::warn!(
      query_name,
      reported_page,
      max_pages,
      "current page beyond last page, clamping"
    );
  }

  Ok(QueryResult {
    rows,
    current_page,
    max_pages,
    total_rows,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn envelope(payload: Value) -> Value {
    json!({ "success": true, "code": "OK", "payload": payload })
  }

  #[test]
  fn test_converts_payload() {
    let body = envelope(json!({
      "list": [
        { "row": { "id": 1, "tags": "a, b" }, "allowedActions": ["edit"] },
        { "row": { "id": 2 } }
      ],
      "currentPage": 1,
      "maxPages": 3,
      "numRowsReturned": 2,
      "maxRows": 42,
      "numRowsInPage": 20,
      "startRow": 0,
      "endRow": 2,
      "columnMetadata": []
    }));

    let result = into_query_result("prompt.search", body, 1, 20).unwrap();
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.current_page, 1);
    assert_eq!(result.max_pages, 3);
    assert_eq!(result.total_rows, 42);
    assert_eq!(result.rows[0].allowed_actions, Some(vec!["edit".to_string()]));
    assert_eq!(result.rows[0].record["tags"], json!(["a", "b"]));
    assert_eq!(result.rows[1].allowed_actions, None);
  }

  #[test]
  fn test_string_counters_accepted() {
    let body = envelope(json!({
      "list": [],
      "currentPage": "2",
      "maxPages": "5",
      "maxRows": "90"
    }));
    let result = into_query_result("q", body, 2, 20).unwrap();
    assert_eq!(result.current_page, 2);
    assert_eq!(result.max_pages, 5);
    assert_eq!(result.total_rows, 90);
  }

  #[test]
  fn test_missing_payload_is_invalid_response() {
    let err = into_query_result("q", json!({ "success": true }), 1, 20).unwrap_err();
    assert!(matches!(err, ApiError::InvalidResponse { ref query_name, .. } if query_name == "q"));
  }

  #[test]
  fn test_missing_list_is_invalid_response() {
    let err = into_query_result("q", envelope(json!({ "currentPage": 1 })), 1, 20).unwrap_err();
    assert!(matches!(err, ApiError::InvalidResponse { .. }));
  }

  #[test]
  fn test_unsuccessful_envelope_is_rejected() {
    let body = json!({ "success": false, "code": "QUERY_NOT_FOUND", "message": "no such query" });
    let err = into_query_result("q", body, 1, 20).unwrap_err();
    assert!(matches!(err, ApiError::Rejected { ref code, .. } if code == "QUERY_NOT_FOUND"));
  }

  #[test]
  fn test_page_invariants_enforced() {
    let rows: Vec<Value> = (0..5).map(|i| json!({ "row": { "id": i } })).collect();
    let body = envelope(json!({ "list": rows, "currentPage": 9, "maxPages": 4, "maxRows": 80 }));

    let result = into_query_result("q", body, 1, 3).unwrap();
    assert_eq!(result.rows.len(), 3);
    assert_eq!(result.current_page, 4);
    assert_eq!(result.max_pages, 4);
  }

  #[test]
  fn test_max_pages_derived_from_total() {
    let body = envelope(json!({ "list": [], "maxRows": 41 }));
    let result = into_query_result("q", body, 1, 20).unwrap();
    assert_eq!(result.max_pages, 3);
    assert_eq!(result.current_page, 1);
  }

  #[test]
  fn test_user_from_either_shape() {
    let nested = json!({ "success": true, "payload": { "user": { "id": 7, "username": "ada" } } });
    let flat = json!({ "success": true, "payload": { "id": 7, "username": "ada" } });
    assert_eq!(user_from_envelope(nested).unwrap().username, "ada");
    assert_eq!(user_from_envelope(flat).unwrap().id, json!(7));
    assert!(user_from_envelope(json!({ "success": true, "payload": { "user": null } })).is_none());
  }

  #[test]
  fn test_error_body_description() {
    let body = ApiErrorBody::parse(r#"{"code":"TOKEN_EXPIRED","message":"jwt expired"}"#);
    assert_eq!(body.code.as_deref(), Some("TOKEN_EXPIRED"));
    assert_eq!(body.describe("Unauthorized"), "jwt expired");
    assert_eq!(ApiErrorBody::parse("<html>").describe("Bad Gateway"), "Bad Gateway");
  }
}
