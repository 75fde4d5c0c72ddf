//! `lode update`
//!
//! Discards the lock file and re-resolves through the solver, picking up
//! any newer versions the constraints admit.

use anyhow::Result;

use crate::project::Project;
use crate::report;

pub fn run() -> Result<()> {
    let mut project = Project::load()?;

    let resolution = match project.resolve_fresh() {
        Ok(resolution) => resolution,
        Err(err) => {
            report::render(&project.events);
            return Err(err);
        }
    };

    report::render(&project.events);
    tracing::info!(
        "re-resolved {} packages; lock file updated",
        resolution.len()
    );
    Ok(())
}
