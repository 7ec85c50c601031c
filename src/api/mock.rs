//! Canned responses for offline use.
//!
//! Fixtures use the same inconsistent encodings the live platform sends so
//! mock mode exercises validation and normalization end to end.

use serde_json::{json, Value};

pub const MOCK_TOTAL_ROWS: u64 = 57;

const TAGS: &[&str] = &["python, llm", "rust,async", "writing", " ,sql,, analytics", "vision, ocr"];
const MODELS: &[&str] = &["gpt-4o", "claude", "gemini, claude", "llama"];

/// A query envelope for one page of deterministic rows.
pub fn query_envelope(query_name: &str, page: u32, page_size: u32) -> Value {
  let total = MOCK_TOTAL_ROWS;
  let size = u64::from(page_size.max(1));
  let max_pages = total.div_ceil(size);
  let start = u64::from(page.saturating_sub(1)) * size;
  let end = (start + size).min(total);

  let list: Vec<Value> = (start..end).map(|i| mock_row(query_name, i)).collect();

  json!({
    "success": true,
    "code": "OK",
    "payload": {
      "list": list,
      "currentPage": page.to_string(),
      "maxPages": max_pages,
      "numRowsReturned": end.saturating_sub(start),
      "maxRows": total,
      "numRowsInPage": page_size,
      "startRow": start,
      "endRow": end,
      "columnMetadata": [
        { "name": "title", "type": "string" },
        { "name": "tags", "type": "list" },
        { "name": "createdTime", "type": "timestamp" }
      ]
    }
  })
}

fn mock_row(query_name: &str, i: u64) -> Value {
  let idx = i as usize;
  let hour = 1 + (i % 12);
  let meridiem = if i % 2 == 0 { "AM" } else { "PM" };
  let actions = if i % 3 == 0 {
    json!(["view", "edit", "delete"])
  } else {
    json!(["view"])
  };

  json!({
    "row": {
      "id": i + 1,
      "title": format!("{} #{}", query_name, i + 1),
      "author": format!("user{}", i % 7),
      "tags": TAGS[idx % TAGS.len()],
      "models": MODELS[idx % MODELS.len()],
      "createdTime": format!("2026-01-{:02} {}:{:02} {} UTC", 1 + i % 28, hour, (i * 7) % 60, meridiem),
      "updatedTime": format!("2026-02-{:02}T08:15:00Z", 1 + i % 28),
      "viewCount": format!("{},{:03}", 1 + i % 4, (i * 37) % 1000),
      "likeCount": (i * 3) % 50,
      "rating": format!("{}.{}", 3 + i % 2, i % 10),
      "isPublic": if i % 4 == 0 { json!("false") } else { json!(1) },
      "isFeatured": if i % 5 == 0 { "yes" } else { "no" }
    },
    "allowedActions": actions
  })
}

/// Session probe answer for the offline user.
pub fn current_user_envelope() -> Value {
  json!({
    "success": true,
    "code": "OK",
    "payload": {
      "user": {
        "id": 1,
        "username": "mock",
        "email": "mock@example.com",
        "roles": ["user"]
      }
    }
  })
}
