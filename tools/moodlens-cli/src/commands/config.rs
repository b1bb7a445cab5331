//! Print (and optionally save) the effective configuration.

use anyhow::Context;
use moodlens_common::{config_file_path, AppConfig};

pub fn run(config: &AppConfig, save: bool) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);

    if save {
        config
            .save()
            .with_context(|| format!("Failed to write {}", config_file_path().display()))?;
        eprintln!("Saved to {}", config_file_path().display());
    }
    Ok(())
}
