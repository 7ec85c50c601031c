use super::api_types::user_from_envelope;
use super::client::RequestClient;
use super::mock;
use super::retry::RetryOverride;
use super::session::SessionStore;
use super::types::{QueryResult, User};
use crate::cache::QueryCache;
use crate::error::{ApiError, Result};

pub const ME_PATH: &str = "/api/auth/me";
pub const LOGOUT_PATH: &str = "/api/auth/logout";

/// Session probe and logout on top of the shared request client.
#[derive(Clone)]
pub struct AuthApi {
  client: RequestClient,
  cache: QueryCache<QueryResult>,
  mock_mode: bool,
}

impl AuthApi {
  /// `cache` should be the same cache the query service uses, so logout
  /// drops pages fetched under the old session.
  pub fn new(client: RequestClient, cache: QueryCache<QueryResult>, mock_mode: bool) -> Self {
    Self {
      client,
      cache,
      mock_mode,
    }
  }

  /// Ask the server who the session belongs to. `None` when not logged in.
  pub async fn me(&self) -> Result<Option<User>> {
    let body = if self.mock_mode {
      mock::current_user_envelope()
    } else {
      match self.client.get(ME_PATH, None).await {
        Ok(body) => body,
        Err(e) if is_unauthenticated(&e) => {
          tracing::debug!(error = %e, "no active session");
          self.client.session().clear();
          return Ok(None);
        }
        Err(e) => return Err(e),
      }
    };

    let user = user_from_envelope(body);
    self.client.session().set_user(user.clone());
    Ok(user)
  }

  /// End the session. Local state is cleared whatever the server answers;
  /// a server error is still reported after clearing.
  pub async fn logout(&self) -> Result<()> {
    let outcome = if self.mock_mode {
      Ok(())
    } else {
      self
        .client
        .post(LOGOUT_PATH, None, Some(RetryOverride::attempts(0)))
        .await
        .map(|_| ())
    };

    self.client.session().clear();
    self.cache.clear();

    match outcome {
      Err(e) if is_unauthenticated(&e) => {
        tracing::debug!(error = %e, "logout without an active session");
        Ok(())
      }
      Err(e) => {
        tracing::warn!(error = %e, "logout request failed, local session cleared");
        Err(e)
      }
      Ok(()) => {
        tracing::info!("logged out");
        Ok(())
      }
    }
  }
}

fn is_unauthenticated(e: &ApiError) -> bool {
  matches!(
    e,
    ApiError::SessionExpired { .. } | ApiError::Authentication(_)
  ) || matches!(e.status(), Some(401) | Some(403))
}
