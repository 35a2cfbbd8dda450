//! Database repositories.

pub mod stream;

pub use stream::{SqlxStreamRepository, StreamRepository};
