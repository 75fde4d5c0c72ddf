//! `lode which`

use anyhow::{anyhow, Result};

use crate::project::Project;
use crate::report;

pub fn run(name: &str) -> Result<()> {
    let mut project = Project::load()?;
    let resolution = match project.resolve() {
        Ok(resolution) => resolution,
        Err(err) => {
            report::render(&project.events);
            return Err(err);
        }
    };

    let resolved = resolution
        .get(name)
        .ok_or_else(|| anyhow!("'{name}' is not part of the resolved dependency set"))?;
    println!("{}", project.paths.source_dir(&resolved.package).display());
    Ok(())
}
