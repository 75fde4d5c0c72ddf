//! lode - command line interface
//!
//! Subcommand definitions and the thin glue between the terminal and
//! `lode-core`. All real work happens in the core crate; this layer loads
//! the project, picks the resolve path, and renders events.

pub mod cmd;
pub mod project;
pub mod report;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "lode",
    version,
    about = "Package manager and build orchestrator for C projects"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve dependencies and build the project's binaries
    Build {
        /// Rebuild everything regardless of what changed
        #[arg(long)]
        force: bool,
        /// Worker threads for the build phase (0 = one per CPU)
        #[arg(long, default_value_t = 0)]
        threads: usize,
    },
    /// Build and run the project's test targets
    Test {
        #[arg(long)]
        force: bool,
        #[arg(long, default_value_t = 0)]
        threads: usize,
    },
    /// Remove build state (.lode directory)
    Clean,
    /// Add a dependency to lode.toml
    Add {
        /// Package name
        name: String,
        /// Version constraint (defaults to caret around the newest version)
        constraint: Option<String>,
        /// Dependency visibility: public, test, or build
        #[arg(long, default_value = "public")]
        visibility: String,
    },
    /// Discard the lock file and re-resolve from scratch
    Update,
    /// Write compiler flags for external build systems
    Generate {
        /// Output dialect: shell, make, cmake, or pkg-config
        #[arg(long, default_value = "shell")]
        format: String,
        /// Where to write the fragment (defaults into .lode/)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the source directory of a resolved dependency
    Which {
        /// Package name
        name: String,
    },
    /// List the resolved dependency set
    Ls,
    /// Print the project manifest as lode sees it
    Manifest,
    /// Dump the build graph
    Graph {
        /// Emit Graphviz DOT instead of a text tree
        #[arg(long)]
        dot: bool,
    },
    /// Report discovered toolchain executables
    Tool,
    /// Create a new lode.toml in the current directory
    Init {
        /// Package name (defaults to the directory name)
        name: Option<String>,
    },
}
