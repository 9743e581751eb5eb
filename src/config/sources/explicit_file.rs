//! Explicit config file source, passed by the embedding application.

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;
use config::File;
use std::path::Path;

/// Add `path` as a required source; a missing file is an error.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    path: &Path,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::Message(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }
    Ok(builder.add_source(File::from(path).required(true)))
}
