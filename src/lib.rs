pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;

pub use error::{ApiError, Result};
