//! Validate and show the resolved configuration

use anyhow::{Context, Result};
use cli_lib::load_config;
use owo_colors::OwoColorize;
use std::path::PathBuf;

pub fn run(config_path: Option<PathBuf>) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    let config = load_config(config_path.as_deref(), &cwd)?;

    if let Err(e) = config.validate() {
        println!("{} {}", "✗".red(), e);
        anyhow::bail!("Configuration is invalid");
    }

    let executable = config.resolve_command()?;

    println!("{}", "Configuration OK".green().bold());
    println!();
    println!("Command:     {} {}", executable.display().cyan(), config.server.args.join(" "));
    println!("Working dir: {}", config.server.working_dir.display());
    println!("Port:        {}", config.server.port.to_string().cyan());
    for dir in &config.watch.dirs {
        println!("Watching:    {}", dir.display());
    }
    if !config.watch.extensions.is_empty() {
        println!("Extensions:  {}", config.watch.extensions.join(", "));
    }
    println!();
    println!("{}", config.to_toml()?.dimmed());

    Ok(())
}
