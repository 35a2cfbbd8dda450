//! Database models.

mod destination;
mod stream;

pub use destination::DestinationDbModel;
pub use stream::StreamDbModel;
