//! `lode test`

use std::sync::Arc;

use anyhow::{bail, Result};

use lode_core::builder::{BuildOptions, Builder};

use crate::project::Project;
use crate::report;

pub fn run(force: bool, threads: usize) -> Result<()> {
    let mut project = Project::load()?;

    let resolution = match project.resolve() {
        Ok(resolution) => resolution,
        Err(err) => {
            report::render(&project.events);
            return Err(err);
        }
    };

    let options = BuildOptions {
        force,
        threads,
        include_tests: true,
    };
    let builder = Builder::new(
        &project.package,
        &resolution,
        Arc::clone(&project.events),
        project.paths.clone(),
        options,
    );
    let outcome = builder.run_tests()?;

    report::render(&project.events);
    if !report::render_outcome(&outcome) {
        bail!("tests failed");
    }
    Ok(())
}
