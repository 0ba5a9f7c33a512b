use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use scope_core::ScopeConfig;

use crate::output::print_json;

/// Used when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "scopehub.yaml";

/// Load the config from `path`, or from `scopehub.yaml` in the working
/// directory. A missing file means defaults.
pub fn load(path: Option<&Path>) -> Result<ScopeConfig> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    ScopeConfig::load(&path).with_context(|| format!("loading config from {}", path.display()))
}

/// Print the effective configuration.
pub fn run(path: Option<&Path>, json: bool) -> Result<()> {
    let config = load(path)?;
    if json {
        print_json(&config)
    } else {
        print!("{}", serde_yaml::to_string(&config)?);
        Ok(())
    }
}
