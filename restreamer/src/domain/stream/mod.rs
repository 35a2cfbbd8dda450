//! Stream domain model.

mod entity;
mod state;

pub use entity::{Stream, generate_api_key};
pub use state::StreamState;
