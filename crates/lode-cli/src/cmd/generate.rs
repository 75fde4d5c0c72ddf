//! `lode generate`

use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, Result};

use lode_core::events::Event;
use lode_core::generate::{generate, GenFormat};

use crate::project::Project;
use crate::report;

pub fn run(format: &str, output: Option<PathBuf>) -> Result<()> {
    let format: GenFormat = format.parse().map_err(|e: String| anyhow!(e))?;

    let mut project = Project::load()?;
    let resolution = match project.resolve() {
        Ok(resolution) => resolution,
        Err(err) => {
            report::render(&project.events);
            return Err(err);
        }
    };

    let content = generate(&project.package, &resolution, &project.paths, format);
    let path = output.unwrap_or_else(|| project.paths.state.join(format.file_name()));
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, content)?;

    project.events.push(Event::Generate { path });
    report::render(&project.events);
    Ok(())
}
