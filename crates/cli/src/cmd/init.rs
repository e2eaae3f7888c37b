//! Write a starter respawn.toml

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use respawn_core::{SupervisorConfig, CONFIG_FILE_NAME};

pub fn run(force: bool) -> Result<()> {
    let path = std::env::current_dir()
        .context("Failed to get current directory")?
        .join(CONFIG_FILE_NAME);

    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }

    let contents = SupervisorConfig::default().to_toml()?;
    std::fs::write(&path, contents)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!("{} {}", "Wrote".green(), path.display());
    println!();
    println!("Next steps:");
    println!("  - Edit [server] and [watch] to match your project");
    println!("  - Run 'respawn check' to validate it");
    println!("  - Run 'respawn run' to start supervising");
    Ok(())
}
