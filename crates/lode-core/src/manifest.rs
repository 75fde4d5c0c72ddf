//! TOML manifest parsing (`lode.toml`)
//!
//! The manifest is the only place package metadata is parsed from disk; the
//! resolver and graph builder consume the [`Package`] this module produces
//! and never touch TOML themselves.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::package::{Lib, Package, PackageKind, Target, TargetKind, Visibility};
use crate::types::PackageName;
use crate::version::{Range, Version, VersionError};

/// The manifest file name looked for in package directories.
pub const MANIFEST_NAME: &str = "lode.toml";

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Malformed constraint strings are configuration defects; they abort
    /// the run rather than being skipped.
    #[error(transparent)]
    Version(#[from] VersionError),
}

/// A dependency as written in the manifest: either a bare constraint string
/// or a detailed table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawDep {
    Constraint(String),
    Detailed {
        #[serde(default)]
        version: Option<String>,
        #[serde(default)]
        path: Option<PathBuf>,
        #[serde(default)]
        visibility: Visibility,
    },
}

/// `[package]` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestPackage {
    pub name: PackageName,
    pub version: String,
    /// Source repository URL, cloned by the sync phase.
    #[serde(default)]
    pub repo: String,
}

/// `[lib]` block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawLib {
    #[serde(default)]
    pub sources: Vec<PathBuf>,
    #[serde(default)]
    pub includes: Vec<PathBuf>,
    #[serde(default)]
    pub defines: Vec<String>,
}

/// `[[bin]]` / `[[test]]` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTarget {
    pub name: String,
    #[serde(default)]
    pub sources: Vec<PathBuf>,
    #[serde(default)]
    pub includes: Vec<PathBuf>,
    #[serde(default)]
    pub defines: Vec<String>,
    #[serde(default)]
    pub visibility: Visibility,
}

/// A parsed `lode.toml`, still close to the file's shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub package: ManifestPackage,

    #[serde(default)]
    pub deps: BTreeMap<String, RawDep>,

    #[serde(default)]
    pub system_deps: Vec<String>,

    #[serde(default)]
    pub lib: Option<RawLib>,

    #[serde(default)]
    pub bin: Vec<RawTarget>,

    #[serde(default)]
    pub test: Vec<RawTarget>,

    /// Registry version table: `"X.Y.Z" = "<commit>"`, ascending.
    #[serde(default)]
    pub versions: BTreeMap<String, String>,

    /// Registry search locations, `name = path`. Only meaningful in the
    /// root manifest.
    #[serde(default)]
    pub registries: BTreeMap<String, PathBuf>,
}

impl Manifest {
    /// Parse a manifest from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ManifestError> {
        Ok(toml::from_str(content)?)
    }

    /// Parse a manifest from a file.
    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Serialize back to TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Lower the manifest into the in-memory package model.
    ///
    /// `root` is the directory the manifest was loaded from; `kind` is how
    /// the package was reached (registry index or local file path).
    pub fn into_package(self, root: &Path, kind: PackageKind) -> Result<Package, ManifestError> {
        let mut pkg = Package::new(&self.package.name);
        pkg.kind = kind;
        pkg.repo = self.package.repo.clone();
        pkg.root = root.to_path_buf();

        if self.versions.is_empty() {
            // Workspace and local packages expose exactly their own version.
            let version = Version::parse(&self.package.version)?;
            pkg.add_version(version, "");
        } else {
            for (version, commit) in &self.versions {
                pkg.add_version(Version::parse(version)?, commit);
            }
        }

        for (name, raw) in self.deps {
            let (constraint, path, visibility) = match raw {
                RawDep::Constraint(s) => (Some(s), None, Visibility::Public),
                RawDep::Detailed {
                    version,
                    path,
                    visibility,
                } => (version, path, visibility),
            };

            if let Some(path) = path {
                pkg.add_dep_file(&name, root.join(path), visibility);
                continue;
            }

            match constraint.as_deref() {
                None | Some("") => pkg.add_dep_latest(&name, visibility),
                Some(s) if s.starts_with("file://") => {
                    let path = root.join(s.trim_start_matches("file://"));
                    pkg.add_dep_file(&name, path, visibility);
                }
                Some(s) => pkg.add_dep(&name, Range::parse(s)?, visibility),
            }
        }

        for dep in &self.system_deps {
            pkg.add_system_dep(dep);
        }

        if let Some(lib) = self.lib {
            pkg.lib = Lib {
                sources: lib.sources,
                includes: lib.includes,
                defines: lib.defines,
            };
        }

        for raw in self.bin {
            pkg.targets.push(lower_target(raw, TargetKind::Bin));
        }
        for raw in self.test {
            pkg.targets.push(lower_target(raw, TargetKind::Test));
        }

        Ok(pkg)
    }
}

fn lower_target(raw: RawTarget, kind: TargetKind) -> Target {
    Target {
        name: raw.name,
        kind,
        sources: raw.sources,
        includes: raw.includes,
        defines: raw.defines,
        visibility: raw.visibility,
    }
}

/// Load the package rooted at `dir` (expects `dir/lode.toml`).
pub fn load_package_dir(dir: &Path, kind: PackageKind) -> Result<Package, ManifestError> {
    let manifest = Manifest::from_file(&dir.join(MANIFEST_NAME))?;
    manifest.into_package(dir, kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::RequestSource;

    const EXAMPLE: &str = r#"
system_deps = ["m", "pthread"]

[package]
name = "hashview"
version = "0.3.0"

[deps]
zlib = "^1.2"
argparse = { version = "~0.15", visibility = "test" }
sibling = { path = "../sibling" }
newest = ""

[lib]
sources = ["src/hashview.c"]
includes = ["include"]

[[bin]]
name = "hashview"
sources = ["src/main.c"]

[[test]]
name = "unit"
sources = ["tests/unit.c"]
visibility = "test"

[versions]
"0.1.0" = "a1b2c3"
"0.2.0" = "d4e5f6"
"#;

    #[test]
    fn test_parse_and_lower() {
        let manifest = Manifest::parse(EXAMPLE).unwrap();
        let pkg = manifest
            .into_package(Path::new("/tmp/hashview"), PackageKind::Index)
            .unwrap();

        assert_eq!(pkg.name, "hashview");
        assert_eq!(pkg.versions.len(), 2);
        assert_eq!(pkg.deps.len(), 4);
        assert_eq!(pkg.system_deps, vec!["m", "pthread"]);
        assert_eq!(pkg.targets.len(), 2);

        let zlib = pkg.deps.get("zlib").unwrap();
        assert!(matches!(zlib.source, RequestSource::Index(_)));
        assert_eq!(zlib.visibility, Visibility::Public);

        let argparse = pkg.deps.get("argparse").unwrap();
        assert_eq!(argparse.visibility, Visibility::Test);

        let sibling = pkg.deps.get("sibling").unwrap();
        assert!(matches!(sibling.source, RequestSource::File(_)));

        let newest = pkg.deps.get("newest").unwrap();
        assert!(matches!(newest.source, RequestSource::Latest));
    }

    #[test]
    fn test_versions_table_ascending() {
        let manifest = Manifest::parse(EXAMPLE).unwrap();
        let pkg = manifest
            .into_package(Path::new("/tmp/hashview"), PackageKind::Index)
            .unwrap();
        assert!(pkg.versions[0].version < pkg.versions[1].version);
        assert_eq!(pkg.versions[0].commit, "a1b2c3");
    }

    #[test]
    fn test_no_versions_table_uses_own_version() {
        let manifest = Manifest::parse(
            r#"
[package]
name = "app"
version = "1.0.0"
"#,
        )
        .unwrap();
        let pkg = manifest
            .into_package(Path::new("/tmp/app"), PackageKind::File)
            .unwrap();
        assert_eq!(pkg.versions.len(), 1);
        assert_eq!(pkg.versions[0].version, Version::new(1, 0, 0));
    }

    #[test]
    fn test_malformed_toml_is_an_error() {
        assert!(Manifest::parse("not toml {{{").is_err());
    }

    #[test]
    fn test_malformed_constraint_is_fatal() {
        let manifest = Manifest::parse(
            r#"
[package]
name = "app"
version = "1.0.0"

[deps]
zlib = "^not-a-version"
"#,
        )
        .unwrap();
        let result = manifest.into_package(Path::new("/tmp/app"), PackageKind::File);
        assert!(matches!(result, Err(ManifestError::Version(_))));
    }
}
