use futures::future::BoxFuture;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::api_types::ApiErrorBody;
use super::retry::{retry, RetryOverride, RetryPolicy};
use super::session::{Renewer, SessionCoordinator, SessionState};
use crate::config::{Config, SecurityConfig};
use crate::error::{ApiError, RenewalError, Result};

/// Error code in a 401 body that marks a lapsed session, as opposed to a plain
/// permission failure.
pub const SESSION_EXPIRED_CODE: &str = "TOKEN_EXPIRED";

pub const REFRESH_PATH: &str = "/api/auth/refresh-token";

/// An outbound call. Immutable once handed to the client.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub path: String,
  pub body: Option<Value>,
  /// Replaces the client's per-attempt timeout
  pub timeout: Option<Duration>,
  pub retry: Option<RetryOverride>,
}

impl Request {
  pub fn new(method: Method, path: impl Into<String>) -> Self {
    Self {
      method,
      path: path.into(),
      body: None,
      timeout: None,
      retry: None,
    }
  }

  pub fn with_body(mut self, body: Value) -> Self {
    self.body = Some(body);
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  pub fn with_retry(mut self, retry: RetryOverride) -> Self {
    self.retry = Some(retry);
    self
  }
}

/// Connection details shared by regular calls and the renewal call.
struct Transport {
  http: reqwest::Client,
  jar: Arc<Jar>,
  base_url: Url,
  security: SecurityConfig,
  tenant_id: String,
}

impl Transport {
  fn url(&self, path: &str) -> Result<Url> {
    let joined = format!(
      "{}/{}",
      self.base_url.as_str().trim_end_matches('/'),
      path.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|e| ApiError::Config(format!("invalid request URL {}: {}", joined, e)))
  }

  /// Forgery-protection token from the cookie jar.
  fn csrf_token(&self, url: &Url) -> Option<String> {
    let header = self.jar.cookies(url)?;
    let cookies = header.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
      let (name, value) = pair.trim().split_once('=')?;
      (name == self.security.csrf_cookie).then(|| value.to_string())
    })
  }

  /// Request builder with the security headers attached.
  fn request(&self, method: Method, url: Url) -> RequestBuilder {
    let token = self.csrf_token(&url);
    let mut builder = self
      .http
      .request(method, url)
      .header(self.security.tenant_header.as_str(), self.tenant_id.as_str());
    if let Some(token) = token {
      builder = builder.header(self.security.csrf_header.as_str(), token);
    }
    builder
  }
}

/// Calls `POST /api/auth/refresh-token` directly, outside retry and renewal.
struct RefreshTokenRenewer {
  transport: Arc<Transport>,
}

impl Renewer for RefreshTokenRenewer {
  fn renew(&self) -> BoxFuture<'_, Result<(), RenewalError>> {
    Box::pin(async move {
      let url = self
        .transport
        .url(REFRESH_PATH)
        .map_err(|e| RenewalError::new(None, e.to_string()))?;

      let response = self
        .transport
        .request(Method::POST, url)
        .send()
        .await
        .map_err(|e| RenewalError::new(None, format!("refresh request failed: {}", e)))?;

      let status = response.status();
      if status.is_success() {
        return Ok(());
      }

      let text = response.text().await.unwrap_or_default();
      let body = ApiErrorBody::parse(&text);
      Err(RenewalError::new(
        Some(status.as_u16()),
        body.describe(status.canonical_reason().unwrap_or("session renewal failed")),
      ))
    })
  }
}

/// HTTP client for the platform API.
///
/// Every call gets the security headers, is retried under the resolved
/// retry policy, and goes through session renewal at most once when the
/// server reports an expired session. Clones share one connection pool,
/// cookie jar, and renewal coordinator.
#[derive(Clone)]
pub struct RequestClient {
  transport: Arc<Transport>,
  coordinator: Arc<SessionCoordinator>,
  session: SessionState,
  default_policy: RetryPolicy,
}

impl RequestClient {
  pub fn new(config: &Config) -> Result<Self> {
    Self::with_session(config, SessionState::new())
  }

  pub fn with_session(config: &Config, session: SessionState) -> Result<Self> {
    let base_url = config.base_url()?;
    let jar = Arc::new(Jar::default());

    let http = reqwest::Client::builder()
      .cookie_provider(Arc::clone(&jar))
      .timeout(config.timeout())
      .build()
      .map_err(|e| ApiError::Config(format!("failed to build HTTP client: {}", e)))?;

    let transport = Arc::new(Transport {
      http,
      jar,
      base_url,
      security: config.security.clone(),
      tenant_id: config.tenant_id.clone(),
    });

    let renewer = Arc::new(RefreshTokenRenewer {
      transport: Arc::clone(&transport),
    });
    let coordinator = Arc::new(SessionCoordinator::new(renewer, Arc::new(session.clone())));

    Ok(Self {
      transport,
      coordinator,
      session,
      default_policy: RetryPolicy::from_config(&config.retry),
    })
  }

  pub fn session(&self) -> &SessionState {
    &self.session
  }

  /// Cookie storage backing the forgery-protection token.
  pub fn cookie_jar(&self) -> &Jar {
    &self.transport.jar
  }

  pub fn base_url(&self) -> &Url {
    &self.transport.base_url
  }

  pub async fn get(&self, path: &str, retry: Option<RetryOverride>) -> Result<Value> {
    self.send(with_override(Request::new(Method::GET, path), retry)).await
  }

  pub async fn post(
    &self,
    path: &str,
    body: Option<Value>,
    retry: Option<RetryOverride>,
  ) -> Result<Value> {
    self
      .send(with_override(with_body(Request::new(Method::POST, path), body), retry))
      .await
  }

  pub async fn put(
    &self,
    path: &str,
    body: Option<Value>,
    retry: Option<RetryOverride>,
  ) -> Result<Value> {
    self
      .send(with_override(with_body(Request::new(Method::PUT, path), body), retry))
      .await
  }

  pub async fn patch(
    &self,
    path: &str,
    body: Option<Value>,
    retry: Option<RetryOverride>,
  ) -> Result<Value> {
    self
      .send(with_override(with_body(Request::new(Method::PATCH, path), body), retry))
      .await
  }

  pub async fn delete(&self, path: &str, retry: Option<RetryOverride>) -> Result<Value> {
    self
      .send(with_override(Request::new(Method::DELETE, path), retry))
      .await
  }

  /// Issue `request` with retries and session renewal.
  pub async fn send(&self, request: Request) -> Result<Value> {
    let policy = match &request.retry {
      Some(overrides) => self.default_policy.merge(overrides),
      None => self.default_policy.clone(),
    };

    // Set once this request has been through renewal; a second expiry is final
    let renewed = AtomicBool::new(false);
    let renewed = &renewed;
    let request = &request;

    retry(&policy, move |_attempt| async move {
      match self.send_once(request).await {
        Err(ApiError::SessionExpired { path }) if !renewed.swap(true, Ordering::SeqCst) => {
          tracing::debug!(path = %path, "session expired, entering renewal");
          self.coordinator.renew().await?;
          self.send_once(request).await
        }
        other => other,
      }
    })
    .await
  }

  /// A single attempt, without retry or renewal.
  async fn send_once(&self, request: &Request) -> Result<Value> {
    let url = self.transport.url(&request.path)?;
    let mut builder = self.transport.request(request.method.clone(), url);
    if let Some(timeout) = request.timeout {
      builder = builder.timeout(timeout);
    }
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let network = |source| ApiError::Network {
      path: request.path.clone(),
      source,
    };

    let response = builder.send().await.map_err(|source| {
      if source.is_builder() {
        ApiError::Config(format!("cannot build request for {}: {}", request.path, source))
      } else {
        network(source)
      }
    })?;
    let status = response.status();
    let text = response.text().await.map_err(network)?;

    if status.is_success() {
      if text.trim().is_empty() {
        return Ok(Value::Null);
      }
      return serde_json::from_str(&text).map_err(|source| ApiError::Decode {
        path: request.path.clone(),
        source,
      });
    }

    let body = ApiErrorBody::parse(&text);
    if status == StatusCode::UNAUTHORIZED && body.code.as_deref() == Some(SESSION_EXPIRED_CODE) {
      return Err(ApiError::SessionExpired {
        path: request.path.clone(),
      });
    }

    Err(ApiError::Status {
      method: request.method.to_string(),
      path: request.path.clone(),
      status: status.as_u16(),
      message: body.describe(status.canonical_reason().unwrap_or("request failed")),
      code: body.code,
    })
  }
}

/// Absolute path built from `segments`, each percent-encoded so that `/`,
/// `?` and `#` stay inside their segment.
pub fn encode_path(segments: &[&str]) -> Result<String> {
  let mut url = Url::parse("http://localhost/")
    .map_err(|e| ApiError::Config(format!("path encoding failed: {}", e)))?;
  url
    .path_segments_mut()
    .map_err(|_| ApiError::Config("path encoding failed".to_string()))?
    .clear()
    .extend(segments);
  Ok(url.path().to_string())
}

fn with_body(request: Request, body: Option<Value>) -> Request {
  match body {
    Some(body) => request.with_body(body),
    None => request,
  }
}

fn with_override(request: Request, retry: Option<RetryOverride>) -> Request {
  match retry {
    Some(retry) => request.with_retry(retry),
    None => request,
  }
}
