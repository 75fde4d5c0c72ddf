//! In-memory package model
//!
//! A [`Package`] is built once per resolution run by the manifest loader (or
//! synthesized in tests), cached by name for the process lifetime, and never
//! mutated afterwards. The resolver and graph builder only consume it.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::PackageName;
use crate::version::{Range, Version};

/// Who may link against a dependency or target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Usable by consumers of the package.
    #[default]
    Public,
    /// Only visible to the package's own tests.
    Test,
    /// Only usable while compiling the package's own build logic.
    Build,
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Visibility::Public => "public",
            Visibility::Test => "test",
            Visibility::Build => "build",
        };
        write!(f, "{s}")
    }
}

/// Where a package comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    /// Known to a registry; resolved by semver range.
    Index,
    /// A fixed local path with exactly one version.
    File,
}

impl std::fmt::Display for PackageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PackageKind::Index => "index",
            PackageKind::File => "file",
        };
        write!(f, "{s}")
    }
}

/// What a dependency request asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestSource {
    /// A semver range resolved against the registry's version list.
    Index(Range),
    /// A local path; the package there exposes exactly one version.
    File(PathBuf),
    /// No constraint written. The resolver pins a caret range around the
    /// newest known version at collection time.
    Latest,
}

/// One declared dependency edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepRequest {
    pub name: PackageName,
    pub source: RequestSource,
    pub visibility: Visibility,
}

impl DepRequest {
    pub fn kind(&self) -> PackageKind {
        match self.source {
            RequestSource::Index(_) | RequestSource::Latest => PackageKind::Index,
            RequestSource::File(_) => PackageKind::File,
        }
    }

    /// The literal constraint as written, used in resolver error messages.
    pub fn constraint(&self) -> String {
        match &self.source {
            RequestSource::Index(range) => range.to_string(),
            RequestSource::File(path) => format!("file://{}", path.display()),
            RequestSource::Latest => "latest".to_string(),
        }
    }
}

/// A known version and its source-control identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMeta {
    pub version: Version,
    pub commit: String,
}

/// Build target kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Bin,
    Test,
}

/// A binary or test target declared by a package.
#[derive(Debug, Clone)]
pub struct Target {
    pub name: String,
    pub kind: TargetKind,
    pub sources: Vec<PathBuf>,
    pub includes: Vec<PathBuf>,
    pub defines: Vec<String>,
    pub visibility: Visibility,
}

/// Library sources a package contributes to its consumers.
#[derive(Debug, Clone, Default)]
pub struct Lib {
    pub sources: Vec<PathBuf>,
    pub includes: Vec<PathBuf>,
    pub defines: Vec<String>,
}

/// A package: identity, known versions, dependency requests, targets.
#[derive(Debug, Clone)]
pub struct Package {
    pub name: PackageName,
    pub kind: PackageKind,
    /// Source repository URL, cloned by the sync phase for index packages.
    pub repo: String,
    /// Known versions with metadata, ascending. Snapshot taken at load time;
    /// the resolver's range indices refer into this list.
    pub versions: Vec<VersionMeta>,
    /// Declared dependencies, keyed by name. A `BTreeMap` so iteration (and
    /// therefore constraint collection and event order) is deterministic.
    pub deps: BTreeMap<PackageName, DepRequest>,
    /// External, unmanaged libraries linked by name (`m`, `pthread`, ...).
    pub system_deps: Vec<String>,
    pub lib: Lib,
    pub targets: Vec<Target>,
    /// Directory the package was loaded from.
    pub root: PathBuf,
}

impl Package {
    pub fn new(name: &str) -> Self {
        Self {
            name: PackageName::new(name),
            kind: PackageKind::Index,
            repo: String::new(),
            versions: Vec::new(),
            deps: BTreeMap::new(),
            system_deps: Vec::new(),
            lib: Lib::default(),
            targets: Vec::new(),
            root: PathBuf::new(),
        }
    }

    /// Register a known version. The list is kept ascending.
    pub fn add_version(&mut self, version: Version, commit: &str) {
        self.versions.push(VersionMeta {
            version,
            commit: commit.to_string(),
        });
        self.versions.sort_by_key(|m| m.version);
    }

    /// Declare a dependency on `name` constrained by `range`.
    pub fn add_dep(&mut self, name: &str, range: Range, visibility: Visibility) {
        self.deps.insert(
            PackageName::new(name),
            DepRequest {
                name: PackageName::new(name),
                source: RequestSource::Index(range),
                visibility,
            },
        );
    }

    /// Declare a dependency with no constraint; resolves to the newest
    /// known version at collection time.
    pub fn add_dep_latest(&mut self, name: &str, visibility: Visibility) {
        self.deps.insert(
            PackageName::new(name),
            DepRequest {
                name: PackageName::new(name),
                source: RequestSource::Latest,
                visibility,
            },
        );
    }

    /// Declare a dependency on a local package directory.
    pub fn add_dep_file(&mut self, name: &str, path: impl Into<PathBuf>, visibility: Visibility) {
        self.deps.insert(
            PackageName::new(name),
            DepRequest {
                name: PackageName::new(name),
                source: RequestSource::File(path.into()),
                visibility,
            },
        );
    }

    pub fn add_system_dep(&mut self, name: &str) {
        if !self.system_deps.iter().any(|d| d == name) {
            self.system_deps.push(name.to_string());
        }
    }

    /// The newest known version, if any.
    pub fn latest(&self) -> Option<&VersionMeta> {
        self.versions.last()
    }

    /// Metadata for a specific version.
    pub fn version_meta(&self, version: Version) -> Option<&VersionMeta> {
        self.versions.iter().find(|m| m.version == version)
    }

    /// Targets of the given kind.
    pub fn targets_of(&self, kind: TargetKind) -> impl Iterator<Item = &Target> {
        self.targets.iter().filter(move |t| t.kind == kind)
    }
}

/// Whether a dependency with visibility `dep` may be linked into a target of
/// kind `target`. `public` edges link everywhere; `test` edges only into
/// test targets; `build` edges never into targets (they exist for build
/// logic only).
pub fn visibility_linked(target: TargetKind, dep: Visibility) -> bool {
    match dep {
        Visibility::Public => true,
        Visibility::Test => target == TargetKind::Test,
        Visibility::Build => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_kept_ascending() {
        let mut pkg = Package::new("zlib");
        pkg.add_version(Version::new(1, 3, 0), "c3");
        pkg.add_version(Version::new(1, 2, 0), "c1");
        pkg.add_version(Version::new(1, 2, 11), "c2");

        let versions: Vec<_> = pkg.versions.iter().map(|m| m.version).collect();
        assert_eq!(
            versions,
            vec![
                Version::new(1, 2, 0),
                Version::new(1, 2, 11),
                Version::new(1, 3, 0)
            ]
        );
        assert_eq!(pkg.latest().unwrap().commit, "c3");
    }

    #[test]
    fn test_system_deps_deduplicated() {
        let mut pkg = Package::new("curl");
        pkg.add_system_dep("m");
        pkg.add_system_dep("pthread");
        pkg.add_system_dep("m");
        assert_eq!(pkg.system_deps, vec!["m", "pthread"]);
    }

    #[test]
    fn test_visibility_linking() {
        assert!(visibility_linked(TargetKind::Bin, Visibility::Public));
        assert!(visibility_linked(TargetKind::Test, Visibility::Public));
        assert!(!visibility_linked(TargetKind::Bin, Visibility::Test));
        assert!(visibility_linked(TargetKind::Test, Visibility::Test));
        assert!(!visibility_linked(TargetKind::Bin, Visibility::Build));
        assert!(!visibility_linked(TargetKind::Test, Visibility::Build));
    }

    #[test]
    fn test_dep_constraint_display() {
        let mut pkg = Package::new("app");
        pkg.add_dep("zlib", Range::parse("^1.2.0").unwrap(), Visibility::Public);
        let req = pkg.deps.get("zlib").unwrap();
        assert_eq!(req.constraint(), "^1.2.0");
        assert_eq!(req.kind(), PackageKind::Index);
    }
}
