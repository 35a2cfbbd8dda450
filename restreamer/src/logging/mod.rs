//! Logging initialization.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "restreamer=info,sqlx=warn";

/// Initialize the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise
/// [`DEFAULT_LOG_FILTER`].
pub fn init() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
