use anyhow::{Context, Result};
use herald::prelude::*;
use std::path::PathBuf;

pub async fn execute(config: Option<PathBuf>) -> Result<()> {
    let config = Config::load(config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config).context("Failed to initialize logging")?;

    Server::new(config)?.serve().await?;

    Ok(())
}
