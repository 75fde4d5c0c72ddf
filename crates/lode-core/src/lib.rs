//! lode - package manager and build orchestrator for C projects
//!
//! # Overview
//!
//! Lode resolves semantic-version constraints across a dependency graph,
//! fetches each dependency's source via git, and builds everything through
//! an incremental file/command DAG executed by a bounded worker pool.
//!
//! # Architecture
//!
//! - **Resolver**: one depth-first constraint-collection pass over the
//!   dependency tree, then an intersection/selection pass picking the
//!   newest version every requester admits. A lock file (`lode.lock`)
//!   makes the choice sticky across runs.
//! - **Build graph**: a bipartite DAG of file and command nodes; dirty
//!   computation marks the minimal stale subset, and the executor drains it
//!   concurrently with per-command failure isolation.
//! - **Events**: the core emits structured [`events::Event`] values; the
//!   CLI decides how to render them.
//!
//! # Directory layout
//!
//! ```text
//! ~/.lode/
//! └── cache/      # Package sources by name (git checkouts)
//! <project>/.lode/
//! ├── build/      # Per-package build directories
//! ├── stamps/     # Phase completion stamps
//! ├── bin/        # Built target binaries
//! └── fingerprints.json
//! ```

pub mod builder;
pub mod dirty;
pub mod events;
pub mod executor;
pub mod generate;
pub mod graph;
pub mod lockfile;
pub mod manifest;
pub mod package;
pub mod registry;
pub mod resolver;
pub mod types;
pub mod version;

// Re-exports for convenience
pub use package::Package;
pub use resolver::{resolve, resolve_from_lock, Resolution};
pub use types::PackageName;
pub use version::{Range, Version};

use std::path::PathBuf;

/// Returns the lode home directory, or None if the user's home cannot be
/// resolved. `LODE_HOME` overrides the default `~/.lode`.
pub fn try_lode_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("LODE_HOME") {
        return Some(PathBuf::from(val));
    }
    dirs::home_dir().map(|h| h.join(".lode"))
}

/// Returns the canonical lode home directory (`~/.lode`).
///
/// # Panics
/// Panics if the home directory cannot be determined.
pub fn lode_home() -> PathBuf {
    try_lode_home().expect("Could not determine home directory")
}

/// Source checkout cache: ~/.lode/cache
pub fn cache_path() -> PathBuf {
    lode_home().join("cache")
}
