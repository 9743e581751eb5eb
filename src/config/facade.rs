//! Config loading entry point.

use super::merge::merge_policy;
use super::sources::{environment, explicit_file, global_file};
use super::CoordinatorConfig;
use crate::error::CoordinatorError;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration: defaults, global file, `path` (if given), then environment.
    ///
    /// The result is validated before it is returned.
    pub fn load(path: Option<&Path>) -> Result<CoordinatorConfig, CoordinatorError> {
        let mut builder = merge_policy::builder_with_defaults()?;
        builder = global_file::add_to_builder(builder)?;
        if let Some(path) = path {
            builder = explicit_file::add_to_builder(builder, path)?;
        }
        builder = environment::add_to_builder(builder);

        let config: CoordinatorConfig = builder.build()?.try_deserialize()?;
        Self::validated(config)
    }

    /// Load a single file over the defaults, ignoring global file and environment.
    pub fn load_from_file(path: &Path) -> Result<CoordinatorConfig, CoordinatorError> {
        let builder = explicit_file::add_to_builder(merge_policy::builder_with_defaults()?, path)?;
        let config: CoordinatorConfig = builder.build()?.try_deserialize()?;
        Self::validated(config)
    }

    /// Path of the global config file, if a home or XDG config directory is known.
    pub fn global_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }

    fn validated(config: CoordinatorConfig) -> Result<CoordinatorConfig, CoordinatorError> {
        config.validate().map_err(|errors| {
            let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            CoordinatorError::Config(format!(
                "Configuration validation failed:\n{}",
                error_msgs.join("\n")
            ))
        })?;
        debug!(
            event_capacity = config.events.capacity,
            replay_status = config.events.replay_status_on_subscribe,
            wait_timeout_ms = ?config.queue.wait_timeout_ms,
            "Loaded coordinator configuration"
        );
        Ok(config)
    }
}
