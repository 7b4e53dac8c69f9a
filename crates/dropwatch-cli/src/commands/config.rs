//! Config command handler.

use std::path::PathBuf;

use dropwatch_core::config::Config;

use super::load_config;

/// Arguments for the config command
#[derive(clap::Parser)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: ConfigAction,

    /// Configuration file to use instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

/// Config subcommands
#[derive(clap::Subcommand)]
pub enum ConfigAction {
    /// Show all configuration
    Show,

    /// Show the configuration file path
    Path,

    /// Reset to defaults
    Reset,
}

/// Run the config command
pub fn run(args: &ConfigArgs) -> anyhow::Result<()> {
    let path = args.config.clone().unwrap_or_else(Config::config_path);

    match args.action {
        ConfigAction::Show => {
            let config = load_config(Some(&path))?;
            print!("{}", render(&config)?);
        }
        ConfigAction::Path => {
            println!("{}", path.display());
        }
        ConfigAction::Reset => {
            Config::default().save_to(&path)?;
            println!("Configuration reset to defaults: {}", path.display());
        }
    }

    Ok(())
}

fn render(config: &Config) -> anyhow::Result<String> {
    Ok(toml::to_string_pretty(config)?)
}
