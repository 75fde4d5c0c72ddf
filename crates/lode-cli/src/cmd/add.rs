//! `lode add`
//!
//! Edits `lode.toml` in place, preserving the file's formatting and
//! comments. With no constraint given, pins a caret range around the newest
//! version the registries know.

use std::fs;

use anyhow::{anyhow, bail, Context, Result};
use toml_edit::DocumentMut;

use lode_core::manifest::MANIFEST_NAME;
use lode_core::types::PackageName;
use lode_core::version::Range;

use crate::project::Project;

pub fn run(name: &str, constraint: Option<String>, visibility: &str) -> Result<()> {
    if !matches!(visibility, "public" | "test" | "build") {
        bail!("visibility must be public, test, or build (got '{visibility}')");
    }

    let mut project = Project::load()?;
    let pkg_name = PackageName::new(name);

    let constraint = match constraint {
        Some(c) => {
            // validate before writing anything
            Range::parse(&c).with_context(|| format!("invalid constraint '{c}'"))?;
            c
        }
        None => {
            let package = project
                .store
                .ensure_index(&pkg_name)?
                .ok_or_else(|| anyhow!("'{name}' was not found on any registry search path"))?;
            let latest = package
                .latest()
                .ok_or_else(|| anyhow!("{name} has no known versions"))?;
            format!("^{}", latest.version)
        }
    };

    let manifest_path = project.dir.join(MANIFEST_NAME);
    let content = fs::read_to_string(&manifest_path)?;
    let edited = upsert_dep(&content, name, &constraint, visibility)
        .with_context(|| format!("failed to edit {}", manifest_path.display()))?;
    fs::write(&manifest_path, edited)?;

    // the lock no longer matches the manifest; next resolve re-solves
    let lock_path = project.lock_path();
    if lock_path.is_file() {
        fs::remove_file(&lock_path)?;
    }

    tracing::info!("added {name} = \"{constraint}\"");
    Ok(())
}

/// Insert or replace a `[deps]` entry, leaving the rest of the document
/// untouched (formatting and comments included).
fn upsert_dep(content: &str, name: &str, constraint: &str, visibility: &str) -> Result<String> {
    let mut doc: DocumentMut = content.parse()?;

    if visibility == "public" {
        doc["deps"][name] = toml_edit::value(constraint);
    } else {
        let mut dep = toml_edit::InlineTable::new();
        dep.insert("version", constraint.into());
        dep.insert("visibility", visibility.into());
        doc["deps"][name] = toml_edit::value(dep);
    }

    Ok(doc.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"# project manifest
[package]
name = "app"
version = "0.1.0"

[deps]
zlib = "^1.2" # keep me
"#;

    #[test]
    fn test_upsert_preserves_comments() {
        let edited = upsert_dep(MANIFEST, "argparse", "^0.15.0", "public").unwrap();
        assert!(edited.contains("# project manifest"));
        assert!(edited.contains("# keep me"));
        assert!(edited.contains("argparse = \"^0.15.0\""));
    }

    #[test]
    fn test_upsert_replaces_existing() {
        let edited = upsert_dep(MANIFEST, "zlib", "^1.3.0", "public").unwrap();
        assert!(edited.contains("zlib = \"^1.3.0\""));
        assert!(!edited.contains("\"^1.2\""));
    }

    #[test]
    fn test_upsert_non_public_uses_inline_table() {
        let edited = upsert_dep(MANIFEST, "check", "^0.15.0", "test").unwrap();
        assert!(edited.contains("version = \"^0.15.0\""));
        assert!(edited.contains("visibility = \"test\""));
    }

    #[test]
    fn test_upsert_creates_deps_table() {
        let bare = "[package]\nname = \"app\"\nversion = \"0.1.0\"\n";
        let edited = upsert_dep(bare, "zlib", "^1.2.0", "public").unwrap();
        assert!(edited.contains("zlib = \"^1.2.0\""));
    }
}
