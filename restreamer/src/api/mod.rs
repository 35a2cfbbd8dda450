//! HTTP API surface.

pub mod error;
pub mod models;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use server::{ApiServerConfig, AppState, build_router, run_server};
