//! Command implementations.

pub mod build;
pub mod image;

use anyhow::Context;
use tdfs_cache::{StorePaths, Stores};

/// Open the process-wide stores under `$HOME/.2dfs`, creating the
/// directories on first use.
pub fn open_stores() -> anyhow::Result<(StorePaths, Stores)> {
    let paths = StorePaths::default_home().context("could not determine a home directory")?;
    let stores = Stores::open(&paths)?;
    Ok((paths, stores))
}
