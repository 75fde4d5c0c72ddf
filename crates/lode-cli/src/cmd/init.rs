//! `lode init`

use std::fs;

use anyhow::{bail, Context, Result};

use lode_core::manifest::MANIFEST_NAME;

pub fn run(name: Option<String>) -> Result<()> {
    let dir = std::env::current_dir().context("cannot determine working directory")?;
    let path = dir.join(MANIFEST_NAME);
    if path.exists() {
        bail!("{MANIFEST_NAME} already exists in {}", dir.display());
    }

    let name = name.unwrap_or_else(|| {
        dir.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "package".to_string())
    });

    let template = format!(
        r#"[package]
name = "{name}"
version = "0.1.0"

[deps]

[[bin]]
name = "{name}"
sources = ["src/main.c"]
"#
    );
    fs::write(&path, template).with_context(|| format!("failed to write {}", path.display()))?;

    tracing::info!("created {}", path.display());
    Ok(())
}
