//! Registry search paths and the package store
//!
//! The store is the single owner of loaded packages: a package is loaded on
//! first reference, cached by name for the process lifetime, and handed out
//! as `Arc<Package>` snapshots. It replaces any notion of process-global
//! state; everything that needs package lookup takes a `&mut PackageStore`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::manifest::{self, ManifestError, MANIFEST_NAME};
use crate::package::{Package, PackageKind};
use crate::types::PackageName;

/// A named registry: a directory whose subdirectories are packages.
#[derive(Debug, Clone)]
pub struct Registry {
    pub name: String,
    pub location: PathBuf,
}

/// Loads and caches packages from registries and local paths.
#[derive(Debug, Default)]
pub struct PackageStore {
    registries: Vec<Registry>,
    cache: HashMap<PackageName, Arc<Package>>,
}

impl PackageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_registry(&mut self, name: &str, location: impl Into<PathBuf>) {
        self.registries.push(Registry {
            name: name.to_string(),
            location: location.into(),
        });
    }

    pub fn registries(&self) -> &[Registry] {
        &self.registries
    }

    /// The locations searched for index packages, for error messages.
    pub fn search_paths(&self) -> Vec<PathBuf> {
        self.registries.iter().map(|r| r.location.clone()).collect()
    }

    /// Insert an already-built package (the root package, or fixtures in
    /// tests). Returns the cached handle.
    pub fn insert(&mut self, package: Package) -> Arc<Package> {
        let handle = Arc::new(package);
        self.cache.insert(handle.name.clone(), Arc::clone(&handle));
        handle
    }

    /// A previously loaded package, if any.
    pub fn get(&self, name: &PackageName) -> Option<Arc<Package>> {
        self.cache.get(name).cloned()
    }

    /// Load (or fetch from cache) an index package by name, searching every
    /// registry in order. `Ok(None)` means the name exists on no search
    /// path; the caller owns turning that into its error taxonomy.
    pub fn ensure_index(
        &mut self,
        name: &PackageName,
    ) -> Result<Option<Arc<Package>>, ManifestError> {
        if let Some(cached) = self.cache.get(name) {
            return Ok(Some(Arc::clone(cached)));
        }

        for registry in &self.registries {
            let dir = registry.location.join(name.as_str());
            if !dir.join(MANIFEST_NAME).is_file() {
                continue;
            }
            tracing::debug!("loading {} from registry '{}'", name, registry.name);
            let package = manifest::load_package_dir(&dir, PackageKind::Index)?;
            let handle = Arc::new(package);
            self.cache.insert(name.clone(), Arc::clone(&handle));
            return Ok(Some(handle));
        }

        Ok(None)
    }

    /// Load (or fetch from cache) a local package rooted at `path`.
    pub fn ensure_file(
        &mut self,
        name: &PackageName,
        path: &Path,
    ) -> Result<Option<Arc<Package>>, ManifestError> {
        if let Some(cached) = self.cache.get(name) {
            return Ok(Some(Arc::clone(cached)));
        }

        if !path.join(MANIFEST_NAME).is_file() {
            return Ok(None);
        }

        tracing::debug!("loading {} from {}", name, path.display());
        let package = manifest::load_package_dir(path, PackageKind::File)?;
        let handle = Arc::new(package);
        self.cache.insert(name.clone(), Arc::clone(&handle));
        Ok(Some(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_registry_lookup_and_cache() {
        let dir = tempfile::tempdir().unwrap();
        let pkg_dir = dir.path().join("zlib");
        fs::create_dir_all(&pkg_dir).unwrap();
        fs::write(
            pkg_dir.join(MANIFEST_NAME),
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

        let mut store = PackageStore::new();
        store.add_registry("core", dir.path());

        let name = PackageName::new("zlib");
        let pkg = store.ensure_index(&name).unwrap().expect("found");
        assert_eq!(pkg.versions.len(), 2);

        // second lookup hits the cache and returns the same snapshot
        let again = store.ensure_index(&name).unwrap().expect("cached");
        assert!(Arc::ptr_eq(&pkg, &again));
    }

    #[test]
    fn test_unknown_package_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PackageStore::new();
        store.add_registry("core", dir.path());

        let missing = store.ensure_index(&PackageName::new("nope")).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_registries_searched_in_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        for (root, version) in [(&first, "1.0.0"), (&second, "2.0.0")] {
            let pkg_dir = root.path().join("dup");
            fs::create_dir_all(&pkg_dir).unwrap();
            fs::write(
                pkg_dir.join(MANIFEST_NAME),
                format!(
                    "[package]\nname = \"dup\"\nversion = \"{version}\"\n"
                ),
            )
            .unwrap();
        }

        let mut store = PackageStore::new();
        store.add_registry("first", first.path());
        store.add_registry("second", second.path());

        let pkg = store
            .ensure_index(&PackageName::new("dup"))
            .unwrap()
            .expect("found");
        assert_eq!(pkg.versions[0].version.to_string(), "1.0.0");
    }
}
