//! Filesystem bootstrap run before the logger opens its file.

use std::{fs, path::Path};

use anyhow::{Context, Result};

use crate::config::Config;

/// Create the data and log directories, including missing parents.
///
/// # Errors
///
/// Returns an error naming the directory that could not be created.
pub fn bootstrap_filesystem(cfg: &Config) -> Result<()> {
    for (what, dir) in [("data", &cfg.data_dir), ("log", &cfg.log_dir)] {
        fs::create_dir_all(Path::new(dir))
            .with_context(|| format!("failed to create {what} directory {dir}"))?;
    }
    Ok(())
}
