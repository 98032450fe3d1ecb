mod capture;
mod find;
mod functions;

use std::path::PathBuf;

use crate::{
    config::FinderConfig,
    finder::HandlerRegistry,
    local_logger::{FINDER_U8_COLOR_CODE, init_local_logger},
    prelude::*,
};
use clap::{
    Parser, Subcommand,
    builder::{Styles, styling},
};

fn create_styles() -> Styles {
    styling::Styles::styled()
        .header(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .usage(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .literal(styling::Ansi256Color(FINDER_U8_COLOR_CODE).on_default() | styling::Effects::BOLD)
        .placeholder(styling::AnsiColor::Cyan.on_default())
}

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Find the threads of a hung process that wait on locks, and who holds them",
    styles = create_styles()
)]
pub struct Cli {
    /// Path to the configuration file
    /// If not provided, ~/.config/deadlock-finder/config.yaml is used when it exists
    #[arg(long, env = "DEADLOCK_FINDER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Print debug logs to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Diagnose every thread of a process, or of a recorded dump
    Find(find::FindArgs),
    /// Stop a process and record its threads into a dump file
    Capture(capture::CaptureArgs),
    /// List the functions recognized as blocking
    Functions,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_local_logger(cli.verbose)?;

    let config = FinderConfig::load(cli.config.as_deref())?;
    let registry = HandlerRegistry::from_config(&config);

    match cli.command {
        Commands::Find(args) => find::run(args, registry)?,
        Commands::Capture(args) => capture::run(args, &registry)?,
        Commands::Functions => functions::run(&registry),
    }
    Ok(())
}
