//! lode - package manager and build orchestrator CLI

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use lode_cli::{cmd, Cli, Commands};

fn main() -> Result<()> {
    // Initialize logging; RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Build { force, threads } => cmd::build::run(force, threads),
        Commands::Test { force, threads } => cmd::test::run(force, threads),
        Commands::Clean => cmd::clean::run(),
        Commands::Add {
            name,
            constraint,
            visibility,
        } => cmd::add::run(&name, constraint, &visibility),
        Commands::Update => cmd::update::run(),
        Commands::Generate { format, output } => cmd::generate::run(&format, output),
        Commands::Which { name } => cmd::which::run(&name),
        Commands::Ls => cmd::ls::run(),
        Commands::Manifest => cmd::manifest::run(),
        Commands::Graph { dot } => cmd::graph::run(dot),
        Commands::Tool => cmd::tool::run(),
        Commands::Init { name } => cmd::init::run(name),
    }
}
