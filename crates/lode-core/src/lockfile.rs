//! Lock file (`lode.lock`) for deterministic, solver-free re-resolution
//!
//! Written after every successful solver run that didn't itself start from a
//! lock file; read back on later runs so resolution can skip constraint
//! collection entirely until the lock is explicitly invalidated (`update`).

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::package::{Package, PackageKind, Visibility};
use crate::resolver::Resolution;
use crate::types::PackageName;
use crate::version::Version;

/// The lock file name next to `lode.toml`.
pub const LOCK_NAME: &str = "lode.lock";

#[derive(Error, Debug)]
pub enum LockfileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Whether the root manifest asked for the package directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportKind {
    Explicit,
    Transitive,
}

/// One resolved package pinned by the lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockEntry {
    pub name: PackageName,
    pub version: Version,
    pub commit: String,
    pub kind: PackageKind,
    pub visibility: Visibility,
    pub import: ImportKind,
    #[serde(default)]
    pub deps: Vec<PackageName>,
    /// Reverse edges, reconstructed from `deps` at load time.
    #[serde(skip)]
    pub dependents: Vec<PackageName>,
}

/// Persisted resolver output.
#[derive(Debug, Clone, Default)]
pub struct Lockfile {
    /// Tool version that wrote the lock.
    pub version: String,
    pub system_deps: Vec<String>,
    pub entries: BTreeMap<PackageName, LockEntry>,
}

/// On-disk shape: a `[lock]` metadata block and repeated `[[dep]]` blocks.
#[derive(Debug, Serialize, Deserialize)]
struct LockDoc {
    lock: LockMeta,
    #[serde(default)]
    dep: Vec<LockEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LockMeta {
    version: String,
    #[serde(default)]
    system_deps: Vec<String>,
}

impl Lockfile {
    /// Build a lock from a successful resolution.
    pub fn from_resolution(resolution: &Resolution, root: &Package) -> Self {
        let mut entries = BTreeMap::new();

        for (name, resolved) in &resolution.packages {
            let commit = resolved
                .package
                .version_meta(resolved.version)
                .map(|meta| meta.commit.clone())
                .unwrap_or_default();

            let direct = root.deps.get(name.as_str());
            let entry = LockEntry {
                name: name.clone(),
                version: resolved.version,
                commit,
                kind: resolved.kind,
                visibility: direct.map_or(Visibility::Public, |req| req.visibility),
                import: if direct.is_some() {
                    ImportKind::Explicit
                } else {
                    ImportKind::Transitive
                },
                deps: resolved.package.deps.keys().cloned().collect(),
                dependents: Vec::new(),
            };
            entries.insert(name.clone(), entry);
        }

        let mut lock = Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            system_deps: resolution.system_deps.clone(),
            entries,
        };
        lock.link_dependents();
        lock
    }

    /// Load a lock file.
    pub fn load(path: &Path) -> Result<Self, LockfileError> {
        let content = fs::read_to_string(path)?;
        let doc: LockDoc = toml::from_str(&content)?;

        let mut lock = Self {
            version: doc.lock.version,
            system_deps: doc.lock.system_deps,
            entries: doc
                .dep
                .into_iter()
                .map(|entry| (entry.name.clone(), entry))
                .collect(),
        };
        lock.link_dependents();
        Ok(lock)
    }

    /// Save the lock file.
    pub fn save(&self, path: &Path) -> Result<(), LockfileError> {
        let doc = LockDoc {
            lock: LockMeta {
                version: self.version.clone(),
                system_deps: self.system_deps.clone(),
            },
            dep: self.entries.values().cloned().collect(),
        };
        fs::write(path, toml::to_string_pretty(&doc)?)?;
        Ok(())
    }

    /// Now that every entry exists, fill in the reverse references.
    fn link_dependents(&mut self) {
        let edges: Vec<(PackageName, PackageName)> = self
            .entries
            .values()
            .flat_map(|entry| {
                entry
                    .deps
                    .iter()
                    .map(|dep| (dep.clone(), entry.name.clone()))
            })
            .collect();

        for (dep, dependent) in edges {
            if let Some(entry) = self.entries.get_mut(&dep) {
                entry.dependents.push(dependent);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBuffer;
    use crate::package::Visibility;
    use crate::registry::PackageStore;
    use crate::resolver::resolve;
    use crate::version::Range;

    fn fixture() -> (Resolution, Package) {
        let mut store = PackageStore::new();

        let mut dep = Package::new("dep");
        dep.add_version(Version::new(1, 2, 0), "aaa");
        dep.add_version(Version::new(1, 3, 0), "bbb");
        store.insert(dep);

        let mut mid = Package::new("mid");
        mid.add_version(Version::new(2, 0, 0), "ccc");
        mid.add_dep("dep", Range::parse("^1.2").unwrap(), Visibility::Public);
        store.insert(mid);

        let mut root = Package::new("root");
        root.add_version(Version::new(0, 1, 0), "");
        root.add_dep("mid", Range::parse("^2.0").unwrap(), Visibility::Test);

        let events = EventBuffer::new();
        let resolution = resolve(&mut store, &root, &events).unwrap();
        (resolution, root)
    }

    #[test]
    fn test_from_resolution_marks_imports() {
        let (resolution, root) = fixture();
        let lock = Lockfile::from_resolution(&resolution, &root);

        let mid = lock.entries.get("mid").unwrap();
        assert_eq!(mid.import, ImportKind::Explicit);
        assert_eq!(mid.visibility, Visibility::Test);

        let dep = lock.entries.get("dep").unwrap();
        assert_eq!(dep.import, ImportKind::Transitive);
        assert_eq!(dep.visibility, Visibility::Public);
        assert_eq!(dep.version, Version::new(1, 3, 0));
        assert_eq!(dep.commit, "bbb");
    }

    #[test]
    fn test_dependents_linked() {
        let (resolution, root) = fixture();
        let lock = Lockfile::from_resolution(&resolution, &root);

        let dep = lock.entries.get("dep").unwrap();
        assert_eq!(dep.dependents, vec![PackageName::new("mid")]);
    }

    #[test]
    fn test_round_trip() {
        let (resolution, root) = fixture();
        let lock = Lockfile::from_resolution(&resolution, &root);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LOCK_NAME);
        lock.save(&path).unwrap();

        let loaded = Lockfile::load(&path).unwrap();
        assert_eq!(loaded.entries.len(), 2);
        assert_eq!(
            loaded.entries.get("dep").unwrap().version,
            Version::new(1, 3, 0)
        );
        // reverse edges are rebuilt, not persisted
        assert_eq!(
            loaded.entries.get("dep").unwrap().dependents,
            vec![PackageName::new("mid")]
        );
    }
}
