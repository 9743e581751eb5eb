//! Merge rules: defaults, override order, conflict handling.

use crate::events::DEFAULT_EVENT_CAPACITY;
use config::builder::DefaultState;
use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
///
/// Later sources override earlier ones key by key; tables merge rather than replace.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("events.capacity", DEFAULT_EVENT_CAPACITY as i64)?
        .set_default("events.replay_status_on_subscribe", true)?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stdout")
}
