//! Show and update the CLI config file

use anyhow::Result;

use crate::config::Config;
use crate::output::{print_json, print_success};

pub fn show(config: &Config) -> Result<()> {
    print_json(config)
}

/// Merge `changes` into the stored config and save it
pub fn set(mut current: Config, changes: Config) -> Result<()> {
    current.merge(changes);
    let path = current.save()?;
    print_success(&format!("Saved {}", path.display()));
    Ok(())
}
