mod cli;
mod commands;
mod config;
mod engine;
mod loader;
mod paths;
mod progress;
mod runner;
mod ui;
mod version;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;

use config::Overrides;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub overrides: Overrides,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        overrides: Overrides {
            profile: cli.profile,
            host_url: cli.host_url,
            api_key: cli.api_key,
        },
    };

    match cli.command {
        Command::Plan(args) => commands::apply::plan(&ctx, args),
        Command::Apply(args) => commands::apply::apply(&ctx, args),
        Command::Destroy(args) => commands::apply::destroy(&ctx, args),
        Command::Get(args) => commands::get::run(&ctx, args),
        Command::Config(cmd) => commands::config::run(&ctx, cmd),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "elabctl", &mut io::stdout());
            Ok(())
        }
    }
}
