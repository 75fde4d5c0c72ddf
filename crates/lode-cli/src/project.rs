//! Project loading and resolution glue
//!
//! Loads `lode.toml` from the working directory, wires up registries, and
//! picks the resolve path: lock-driven whenever `lode.lock` exists, solver
//! otherwise (writing a fresh lock on success).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use lode_core::builder::ProjectPaths;
use lode_core::events::EventBuffer;
use lode_core::lockfile::{Lockfile, LOCK_NAME};
use lode_core::manifest::{Manifest, MANIFEST_NAME};
use lode_core::package::PackageKind;
use lode_core::registry::PackageStore;
use lode_core::resolver::{resolve, resolve_from_lock, Resolution};
use lode_core::Package;

/// Everything a subcommand needs about the current project.
pub struct Project {
    pub dir: PathBuf,
    pub package: Package,
    pub store: PackageStore,
    pub paths: ProjectPaths,
    pub events: Arc<EventBuffer>,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("dir", &self.dir)
            .field("package", &self.package.name)
            .finish_non_exhaustive()
    }
}

impl Project {
    /// Load the project from the current working directory.
    pub fn load() -> Result<Self> {
        let dir = std::env::current_dir().context("cannot determine working directory")?;
        Self::load_from(dir)
    }

    /// Load the project rooted at `dir`.
    pub fn load_from(dir: PathBuf) -> Result<Self> {
        let manifest_path = dir.join(MANIFEST_NAME);
        let manifest = Manifest::from_file(&manifest_path).with_context(|| {
            format!(
                "no {MANIFEST_NAME} found at {} (run `lode init` to create one)",
                dir.display()
            )
        })?;

        let mut store = PackageStore::new();
        for (name, location) in &manifest.registries {
            let location = if location.is_absolute() {
                location.clone()
            } else {
                dir.join(location)
            };
            store.add_registry(name, location);
        }

        let package = manifest
            .into_package(&dir, PackageKind::File)
            .context("invalid manifest")?;

        let paths = ProjectPaths::new(&dir, lode_core::cache_path());

        Ok(Self {
            dir,
            package,
            store,
            paths,
            events: Arc::new(EventBuffer::new()),
        })
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(LOCK_NAME)
    }

    /// Resolve the dependency set: from the lock file when present, through
    /// the solver otherwise. A solver resolution is persisted back to the
    /// lock so the next run skips solving.
    pub fn resolve(&mut self) -> Result<Resolution> {
        let lock_path = self.lock_path();

        if lock_path.is_file() {
            let lock = Lockfile::load(&lock_path)
                .with_context(|| format!("failed to read {}", lock_path.display()))?;
            let resolution =
                resolve_from_lock(&mut self.store, &self.package, &lock, &self.events)?;
            return Ok(resolution);
        }

        let resolution = resolve(&mut self.store, &self.package, &self.events)?;
        let lock = Lockfile::from_resolution(&resolution, &self.package);
        lock.save(&lock_path)
            .with_context(|| format!("failed to write {}", lock_path.display()))?;
        tracing::debug!("wrote {}", lock_path.display());
        Ok(resolution)
    }

    /// Resolve through the solver unconditionally, replacing any lock file.
    pub fn resolve_fresh(&mut self) -> Result<Resolution> {
        let lock_path = self.lock_path();
        if lock_path.is_file() {
            std::fs::remove_file(&lock_path)
                .with_context(|| format!("failed to remove {}", lock_path.display()))?;
        }
        self.resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_core::version::Version;
    use std::fs;

    fn fixture() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();

        let registry = dir.path().join("registry");
        let zlib = registry.join("zlib");
        fs::create_dir_all(&zlib).unwrap();
        fs::write(
            zlib.join(MANIFEST_NAME),
            r#"
[package]
name = "zlib"
version = "1.3.0"

[versions]
"1.2.0" = "aaa"
"1.3.0" = "bbb"
"#,
        )
        .unwrap();

        let project_dir = dir.path().join("app");
        fs::create_dir_all(&project_dir).unwrap();
        fs::write(
            project_dir.join(MANIFEST_NAME),
            r#"
[package]
name = "app"
version = "0.1.0"

[deps]
zlib = "^1.2"

[registries]
core = "../registry"
"#,
        )
        .unwrap();

        (dir, project_dir)
    }

    #[test]
    fn test_first_resolve_writes_lock_then_reuses_it() {
        let (_dir, project_dir) = fixture();

        let mut project = Project::load_from(project_dir.clone()).unwrap();
        let resolution = project.resolve().unwrap();
        assert_eq!(
            resolution.get("zlib").unwrap().version,
            Version::new(1, 3, 0)
        );
        assert!(project_dir.join(LOCK_NAME).is_file());

        // second load resolves from the lock, not the solver
        let mut project = Project::load_from(project_dir).unwrap();
        let resolution = project.resolve().unwrap();
        assert_eq!(
            resolution.get("zlib").unwrap().version,
            Version::new(1, 3, 0)
        );
        let events = project.events.drain();
        assert!(events.iter().any(|e| matches!(
            e,
            lode_core::events::Event::Resolve {
                strategy: lode_core::events::ResolveStrategy::LockFile
            }
        )));
    }

    #[test]
    fn test_missing_manifest_is_a_clear_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Project::load_from(dir.path().to_path_buf()).unwrap_err();
        assert!(err.to_string().contains("lode.toml"));
    }
}
