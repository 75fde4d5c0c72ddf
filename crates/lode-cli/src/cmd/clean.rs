//! `lode clean`

use std::fs;

use anyhow::{Context, Result};

use lode_core::events::Event;

use crate::project::Project;
use crate::report;

pub fn run() -> Result<()> {
    let project = Project::load()?;
    let state = project.paths.state.clone();

    if state.exists() {
        fs::remove_dir_all(&state)
            .with_context(|| format!("failed to remove {}", state.display()))?;
    }

    project.events.push(Event::Clean { path: state });
    report::render(&project.events);
    Ok(())
}
