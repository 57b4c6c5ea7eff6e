//! Configuration management
//!
//! The switch file names the ports and the stage chain; each stage may
//! point at its own file. Relative stage paths are taken from the switch
//! file's directory.

mod types;
mod validation;

pub use types::*;
pub use validation::{validate, ValidationResult};

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Load the switch configuration, resolving stage file paths
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    let mut config = parse(&content)?;

    let base = path.parent().unwrap_or_else(|| Path::new(""));
    for stage in &mut config.control_process {
        if let Some(file) = stage.config_file.as_mut() {
            if file.is_relative() {
                *file = base.join(&*file);
            }
        }
    }

    Ok(config)
}

/// Parse a switch configuration from TOML text
pub fn parse(content: &str) -> Result<Config> {
    toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
}

/// Load a stage file
pub fn load_stage<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

/// Load a stage file if one is configured, else start from the default
pub fn load_stage_or_default<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    match path {
        Some(path) => load_stage(path),
        None => Ok(T::default()),
    }
}
