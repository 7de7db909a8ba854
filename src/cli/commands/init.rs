//! Initialize command.

use console::style;

use crate::cli::helpers::{open_initialized_repository, open_initialized_ticket_repository};
use crate::config::{Config, Settings};
use crate::stages::StageKind;

/// Initialize the data directory, stage working directories and both source tables.
pub async fn cmd_init(settings: &Settings, config: &Config) -> anyhow::Result<()> {
    open_initialized_repository(settings).await?;
    open_initialized_ticket_repository(settings).await?;

    for stage in StageKind::ALL {
        println!(
            "  {} {} workdir: {}",
            style("✓").green(),
            stage,
            settings.workdir(stage).display()
        );
    }

    if config.source_path.is_none() {
        println!(
            "{} No printrelay config file found; using defaults",
            style("!").yellow()
        );
    }

    println!(
        "{} Initialized printrelay in {}",
        style("✓").green(),
        settings.data_dir.display()
    );

    Ok(())
}
