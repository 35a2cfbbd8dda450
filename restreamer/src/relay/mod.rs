//! Relay process supervision.

mod command;
mod launcher;
mod supervisor;

pub use command::build_relay_args;
pub use launcher::{FfmpegLauncher, RelayChild, RelayLauncher};
pub use supervisor::{RelayKey, RelayStatus, RelaySupervisor};
