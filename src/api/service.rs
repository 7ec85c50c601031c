//! Query service: the cached front door to the query protocol.

use serde_json::{json, Value};

use super::api_types::{into_query_result, ApiQueryRequest};
use super::client::{encode_path, RequestClient};
use super::mock;
use super::types::{Filters, QueryResult, SortCriterion};
use crate::cache::{CacheResult, QueryCache, QueryKey};
use crate::config::Config;
use crate::error::{ApiError, Result};

pub const MAX_PAGE_SIZE: u32 = 100;

/// Query client with transparent caching.
///
/// Arguments are validated and filters sanitized before anything else, so
/// logically identical searches share one cache entry and invalid ones never
/// reach the network. Only successful, normalized pages are cached.
#[derive(Clone)]
pub struct QueryService {
  client: RequestClient,
  cache: QueryCache<QueryResult>,
  mock_mode: bool,
}

impl QueryService {
  pub fn new(config: &Config, client: RequestClient) -> Self {
    Self::with_cache(client, QueryCache::new(&config.cache), config.mock_mode)
  }

  pub fn with_cache(client: RequestClient, cache: QueryCache<QueryResult>, mock_mode: bool) -> Self {
    Self {
      client,
      cache,
      mock_mode,
    }
  }

  pub fn cache(&self) -> &QueryCache<QueryResult> {
    &self.cache
  }

  /// Run a query and return one normalized page.
  pub async fn search(
    &self,
    query_name: &str,
    filters: &Filters,
    page: u32,
    page_size: u32,
    sort: Option<&[SortCriterion]>,
  ) -> Result<QueryResult> {
    let result = self.fetch(query_name, filters, page, page_size, sort).await?;
    Ok(result.data)
  }

  /// Like [`search`](Self::search), also reporting where the page came from.
  pub async fn fetch(
    &self,
    query_name: &str,
    filters: &Filters,
    page: u32,
    page_size: u32,
    sort: Option<&[SortCriterion]>,
  ) -> Result<CacheResult<QueryResult>> {
    validate(query_name, page, page_size)?;

    let filters = sanitize_filters(filters);
    let sort = sort.filter(|criteria| !criteria.is_empty());
    let key = QueryKey::new(
      query_name,
      &json!({
        "filters": filters,
        "page": page,
        "pageSize": page_size,
        "sort": sort,
      }),
    );

    if let Some(entry) = self.cache.get(&key) {
      tracing::debug!(query_name, key = %key, "query cache hit");
      return Ok(CacheResult::from_cache(entry.data, entry.inserted_at));
    }
    tracing::debug!(query_name, key = %key, "query cache miss");

    let request = ApiQueryRequest {
      filters: &filters,
      page_num: page,
      num_rows_in_page: page_size,
      sort_criteria: sort,
      query_name,
    };

    let (body, mocked) = if self.mock_mode {
      (mock::query_envelope(query_name, page, page_size), true)
    } else {
      let body = serde_json::to_value(&request)
        .map_err(|e| ApiError::InvalidArgument(format!("unserializable query body: {}", e)))?;
      let path = encode_path(&["q", query_name])?;
      let response = self
        .client
        .post(&path, Some(body), None)
        .await
        .map_err(|e| e.with_query(query_name))?;
      (response, false)
    };

    let result = into_query_result(query_name, body, page, page_size)?;
    tracing::info!(
      query_name,
      rows = result.rows.len(),
      page = result.current_page,
      max_pages = result.max_pages,
      "query fetched"
    );
    self.cache.set(key, result.clone());

    Ok(if mocked {
      CacheResult::mocked(result)
    } else {
      CacheResult::from_network(result)
    })
  }

  /// Drop cached pages of every query whose name starts with `prefix`.
  pub fn invalidate(&self, prefix: &str) -> usize {
    self.cache.invalidate(prefix)
  }

  pub fn clear_cache(&self) {
    self.cache.clear();
  }
}

fn validate(query_name: &str, page: u32, page_size: u32) -> Result<()> {
  if query_name.trim().is_empty() {
    return Err(ApiError::InvalidArgument("query name must not be empty".to_string()));
  }
  if page < 1 {
    return Err(ApiError::InvalidArgument(format!(
      "page must be at least 1, got {} for {}",
      page, query_name
    )));
  }
  if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
    return Err(ApiError::InvalidArgument(format!(
      "page size must be between 1 and {}, got {} for {}",
      MAX_PAGE_SIZE, page_size, query_name
    )));
  }
  Ok(())
}

/// Drop nulls and blank strings, trim the rest, and clean list elements the same way.
pub fn sanitize_filters(filters: &Filters) -> Filters {
  filters
    .iter()
    .filter_map(|(name, value)| sanitize_value(value).map(|value| (name.clone(), value)))
    .collect()
}

fn sanitize_value(value: &Value) -> Option<Value> {
  match value {
    Value::Null => None,
    Value::String(s) => {
      let trimmed = s.trim();
      (!trimmed.is_empty()).then(|| Value::String(trimmed.to_string()))
    }
    Value::Array(items) => Some(Value::Array(
      items.iter().filter_map(sanitize_value).collect(),
    )),
    other => Some(other.clone()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheSource;
  use crate::config::RetryConfig;
  use httpmock::prelude::*;

  fn filters(value: Value) -> Filters {
    match value {
      Value::Object(map) => map,
      _ => panic!("filters must be an object"),
    }
  }

  fn page_envelope(rows: Value) -> Value {
    json!({
      "success": true,
      "code": "OK",
      "payload": {
        "list": rows,
        "currentPage": 1,
        "maxPages": 1,
        "numRowsReturned": 1,
        "maxRows": 1,
        "numRowsInPage": 20,
        "startRow": 0,
        "endRow": 1,
        "columnMetadata": []
      }
    })
  }

  fn service_for(server: &MockServer) -> QueryService {
    let config = Config {
      retry: RetryConfig {
        max_attempts: 1,
        base_delay_ms: 1,
      },
      ..Config::for_base_url(server.base_url())
    };
    let client = RequestClient::new(&config).unwrap();
    QueryService::new(&config, client)
  }

  #[test]
  fn test_sanitize_scenario() {
    let out = sanitize_filters(&filters(json!({ "tags": [" python ", ""] })));
    assert_eq!(Value::Object(out), json!({ "tags": ["python"] }));
  }

  #[test]
  fn test_sanitize_drops_nulls_and_blanks() {
    let out = sanitize_filters(&filters(json!({
      "author": null,
      "q": "   ",
      "title": "  rust ",
      "models": ["gpt", null, " claude "],
      "minScore": 3,
      "featured": false
    })));
    assert_eq!(
      Value::Object(out),
      json!({ "title": "rust", "models": ["gpt", "claude"], "minScore": 3, "featured": false })
    );
  }

  #[test]
  fn test_key_ignores_order_and_null_keys() {
    let a = sanitize_filters(&filters(json!({ "tags": ["python"], "author": "ada", "q": null })));
    let b = sanitize_filters(&filters(json!({ "author": " ada", "tags": ["python", null] })));
    let key = |f: &Filters| QueryKey::new("prompt.search", &json!({ "filters": f, "page": 1 }));
    assert_eq!(key(&a), key(&b));
  }

  #[test]
  fn test_validation() {
    assert!(matches!(validate("", 1, 20), Err(ApiError::InvalidArgument(_))));
    assert!(matches!(validate("  ", 1, 20), Err(ApiError::InvalidArgument(_))));
    assert!(matches!(validate("q", 0, 20), Err(ApiError::InvalidArgument(_))));
    assert!(matches!(validate("q", 1, 0), Err(ApiError::InvalidArgument(_))));
    assert!(matches!(validate("q", 1, 101), Err(ApiError::InvalidArgument(_))));
    assert!(validate("q", 1, 1).is_ok());
    assert!(validate("q", 1, 100).is_ok());
  }

  #[tokio::test]
  async fn test_invalid_arguments_never_reach_network() {
    let server = MockServer::start_async().await;
    let mock = server
      .mock_async(|when, then| {
        when.method(POST);
        then.status(200).json_body(page_envelope(json!([])));
      })
      .await;
    let service = service_for(&server);
    let none = Filters::new();

    for (page, size) in [(0, 20), (1, 0), (1, 101)] {
      let err = service.search("q", &none, page, size, None).await.unwrap_err();
      assert!(matches!(err, ApiError::InvalidArgument(_)));
    }
    assert_eq!(mock.hits_async().await, 0);
    assert!(service.cache().is_empty());
  }

  #[tokio::test]
  async fn test_sanitized_body_transmitted() {
    let server = MockServer::start_async().await;
    let mock = server
      .mock_async(|when, then| {
        when.method(POST).path("/q/prompt.searchDetailed").json_body(json!({
          "filters": { "tags": ["python"] },
          "pageNum": 1,
          "numRowsInPage": 20,
          "queryName": "prompt.searchDetailed"
        }));
        then
          .status(200)
          .json_body(page_envelope(json!([{ "row": { "id": 1, "tags": "python" } }])));
      })
      .await;

    let service = service_for(&server);
    let result = service
      .search(
        "prompt.searchDetailed",
        &filters(json!({ "tags": [" python ", ""] })),
        1,
        20,
        None,
      )
      .await
      .unwrap();

    assert_eq!(mock.hits_async().await, 1);
    assert_eq!(result.rows[0].record["tags"], json!(["python"]));
  }

  #[tokio::test]
  async fn test_identical_searches_hit_network_once() {
    let server = MockServer::start_async().await;
    let mock = server
      .mock_async(|when, then| {
        when.method(POST).path("/q/prompt.search");
        then
          .status(200)
          .json_body(page_envelope(json!([{ "row": { "id": 1, "createdTime": "2026-01-28 10:30 AM UTC" } }])));
      })
      .await;

    let service = service_for(&server);
    let sort = [SortCriterion::desc("createdTime")];
    let first = service
      .fetch("prompt.search", &filters(json!({ "q": "rust", "x": null })), 1, 20, Some(&sort))
      .await
      .unwrap();
    let second = service
      .fetch("prompt.search", &filters(json!({ "q": " rust " })), 1, 20, Some(&sort))
      .await
      .unwrap();

    assert_eq!(mock.hits_async().await, 1);
    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(second.source, CacheSource::Cache);
    assert_eq!(first.data, second.data);
    assert_eq!(second.data.rows[0].record["createdTime"], json!("2026-01-28T10:30:00Z"));
  }

  #[tokio::test]
  async fn test_invalidate_forces_refetch() {
    let server = MockServer::start_async().await;
    let mock = server
      .mock_async(|when, then| {
        when.method(POST).path("/q/prompt.search");
        then.status(200).json_body(page_envelope(json!([])));
      })
      .await;

    let service = service_for(&server);
    let none = Filters::new();
    service.search("prompt.search", &none, 1, 20, None).await.unwrap();
    assert_eq!(service.invalidate("prompt."), 1);
    service.search("prompt.search", &none, 1, 20, None).await.unwrap();

    assert_eq!(mock.hits_async().await, 2);
  }

  #[tokio::test]
  async fn test_malformed_envelope_not_cached() {
    let server = MockServer::start_async().await;
    let mock = server
      .mock_async(|when, then| {
        when.method(POST).path("/q/prompt.search");
        then.status(200).json_body(json!({ "success": true, "code": "OK" }));
      })
      .await;

    let service = service_for(&server);
    let none = Filters::new();
    for _ in 0..2 {
      let err = service.search("prompt.search", &none, 1, 20, None).await.unwrap_err();
      assert!(matches!(err, ApiError::InvalidResponse { .. }));
    }
    // Never retried, never cached
    assert_eq!(mock.hits_async().await, 2);
    assert!(service.cache().is_empty());
  }

  #[tokio::test]
  async fn test_http_failure_carries_query_name_and_status() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.method(POST).path("/q/prompt.search");
        then.status(502);
      })
      .await;

    let service = service_for(&server);
    let err = service
      .search("prompt.search", &Filters::new(), 1, 20, None)
      .await
      .unwrap_err();

    assert_eq!(err.status(), Some(502));
    assert!(matches!(err, ApiError::Query { ref query_name, .. } if query_name == "prompt.search"));
    assert!(service.cache().is_empty());
  }

  #[tokio::test]
  async fn test_mock_mode_skips_network() {
    let config = Config {
      mock_mode: true,
      ..Config::default()
    };
    let client = RequestClient::new(&config).unwrap();
    let service = QueryService::new(&config, client);

    let first = service
      .fetch("prompt.search", &Filters::new(), 1, 5, None)
      .await
      .unwrap();
    assert_eq!(first.source, CacheSource::Mock);
    assert_eq!(first.data.rows.len(), 5);
    assert!(first.data.rows[0].record["tags"].is_array());

    let second = service
      .fetch("prompt.search", &Filters::new(), 1, 5, None)
      .await
      .unwrap();
    assert_eq!(second.source, CacheSource::Cache);
  }
}
