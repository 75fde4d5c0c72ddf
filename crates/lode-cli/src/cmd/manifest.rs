//! `lode manifest`

use anyhow::{anyhow, Result};

use lode_core::manifest::{Manifest, MANIFEST_NAME};

use crate::project::Project;

/// Print the manifest as lode parsed it (normalized TOML).
pub fn run() -> Result<()> {
    let project = Project::load()?;
    let manifest = Manifest::from_file(&project.dir.join(MANIFEST_NAME))?;
    let rendered = manifest.to_toml().map_err(|e| anyhow!(e))?;
    println!("{rendered}");
    Ok(())
}
