//! Stream lifecycle management.

mod locks;
mod stream_manager;

pub use locks::StreamLocks;
pub use stream_manager::{DestinationUpdate, StreamManager};
