//! Client for the platform's HTTP API.
//!
//! - `client`: shared request client with security headers, retry and session renewal
//! - `service`: cached query protocol
//! - `auth`: session probe and logout
//! - `normalize`: repairs inconsistent field encodings in returned records

pub mod api_types;
pub mod auth;
pub mod client;
mod mock;
pub mod normalize;
pub mod retry;
pub mod service;
pub mod session;
pub mod types;

pub use auth::AuthApi;
pub use client::{Request, RequestClient};
pub use retry::{RetryOverride, RetryPolicy};
pub use service::QueryService;
pub use session::{SessionCoordinator, SessionState, SessionStore};
pub use types::{Filters, QueryResult, Record, Row, SortCriterion, SortDirection, User};
