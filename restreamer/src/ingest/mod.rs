//! Ingest session gateway and publisher session tracking.

mod gateway;
mod path;
mod session;

pub use gateway::{Admission, IngestGateway, PlayDecision, SessionHooks};
pub use path::extract_routing_key;
pub use session::{NoopSessionTerminator, SessionRegistry, SessionTerminator};
