use anyhow::{Context, Result};
use asrpool::app::{list_audio_devices, run_listen};
use asrpool::cli::{Cli, Commands, ConfigAction, ListenArgs};
use asrpool::config::Config;
use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    match cli.command {
        None => {
            let config = load_config(cli.config.as_deref())?;
            run_listen(config, ListenArgs::default(), cli.quiet)?;
        }
        Some(Commands::Listen(args)) => {
            let config = load_config(cli.config.as_deref())?;
            run_listen(config, args, cli.quiet)?;
        }
        Some(Commands::Devices) => {
            list_audio_devices()?;
        }
        Some(Commands::Config { action }) => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "asrpool",
                &mut std::io::stdout(),
            );
        }
    }

    Ok(())
}

/// `RUST_LOG` wins; otherwise -q gives warn, -v debug, -vv trace.
fn init_logging(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("asrpool={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose > 1)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config), which must exist
/// 2. Default config path (~/.config/asrpool/config.toml)
/// 3. Built-in defaults
///
/// Environment variable overrides are applied last.
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load_or_default(&Config::default_path())?,
    };
    Ok(config.with_env_overrides())
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            let path = custom_path
                .map(Path::to_path_buf)
                .unwrap_or_else(Config::default_path);
            if path.exists() {
                println!("{}", path.display().green());
            } else {
                println!("{} {}", path.display(), "(not created)".dimmed());
            }
        }
    }
    Ok(())
}
