//! Domain entities and state machines.

pub mod destination;
pub mod stream;

pub use destination::{Destination, DestinationState, Platform};
pub use stream::{Stream, StreamState, generate_api_key};
