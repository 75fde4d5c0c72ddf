//! Compiler-flag generation
//!
//! Emits the include/lib/define flags an external build system needs to
//! consume a lode-built dependency tree, in one of several formats: a shell
//! fragment, a Makefile fragment, a CMake script, or a pkg-config file.

use std::path::PathBuf;

use crate::builder::ProjectPaths;
use crate::package::Package;
use crate::resolver::Resolution;

/// Output dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenFormat {
    Shell,
    Make,
    CMake,
    PkgConfig,
}

impl GenFormat {
    /// Conventional file name for the generated fragment.
    pub fn file_name(self) -> &'static str {
        match self {
            GenFormat::Shell => "lode.sh",
            GenFormat::Make => "lode.mk",
            GenFormat::CMake => "lode.cmake",
            GenFormat::PkgConfig => "lode.pc",
        }
    }
}

impl std::str::FromStr for GenFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shell" | "sh" => Ok(GenFormat::Shell),
            "make" => Ok(GenFormat::Make),
            "cmake" => Ok(GenFormat::CMake),
            "pkg-config" | "pkgconfig" | "pc" => Ok(GenFormat::PkgConfig),
            other => Err(format!("unknown generator format: '{other}'")),
        }
    }
}

/// The flag sets shared by every dialect.
#[derive(Debug, Default)]
struct Entries {
    includes: Vec<PathBuf>,
    lib_dirs: Vec<PathBuf>,
    libs: Vec<String>,
    system_libs: Vec<String>,
    defines: Vec<String>,
}

fn collect(root: &Package, resolution: &Resolution, paths: &ProjectPaths) -> Entries {
    let mut entries = Entries::default();

    for (name, resolved) in &resolution.packages {
        let source_dir = paths.source_dir(&resolved.package);
        for include in &resolved.package.lib.includes {
            entries.includes.push(source_dir.join(include));
        }
        for define in &resolved.package.lib.defines {
            entries.defines.push(define.clone());
        }
        entries.lib_dirs.push(paths.build_dir(name));
        entries.libs.push(name.to_string());
    }

    for include in &root.lib.includes {
        entries.includes.push(paths.root.join(include));
    }
    entries.system_libs.clone_from(&resolution.system_deps);

    entries
}

fn cflags(entries: &Entries) -> String {
    let mut parts = Vec::new();
    for include in &entries.includes {
        parts.push(format!("-I{}", include.display()));
    }
    for define in &entries.defines {
        parts.push(format!("-D{define}"));
    }
    parts.join(" ")
}

fn ldflags(entries: &Entries) -> String {
    let mut parts = Vec::new();
    for dir in &entries.lib_dirs {
        parts.push(format!("-L{}", dir.display()));
    }
    for lib in entries.libs.iter().chain(entries.system_libs.iter()) {
        parts.push(format!("-l{lib}"));
    }
    parts.join(" ")
}

/// Render the flag fragment for `format`.
pub fn generate(
    root: &Package,
    resolution: &Resolution,
    paths: &ProjectPaths,
    format: GenFormat,
) -> String {
    let entries = collect(root, resolution, paths);
    let cflags = cflags(&entries);
    let ldflags = ldflags(&entries);

    match format {
        GenFormat::Shell => format!(
            "export LODE_CFLAGS=\"{cflags}\"\nexport LODE_LDFLAGS=\"{ldflags}\"\n"
        ),
        GenFormat::Make => format!(
            "LODE_CFLAGS := {cflags}\nLODE_LDFLAGS := {ldflags}\n"
        ),
        GenFormat::CMake => format!(
            "set(LODE_CFLAGS \"{cflags}\")\nset(LODE_LDFLAGS \"{ldflags}\")\n"
        ),
        GenFormat::PkgConfig => format!(
            "Name: {name}\nDescription: dependencies resolved by lode\nVersion: {version}\nCflags: {cflags}\nLibs: {ldflags}\n",
            name = root.name,
            version = root
                .versions
                .last()
                .map_or_else(|| "0.0.0".to_string(), |m| m.version.to_string()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::PackageKind;
    use crate::resolver::Resolved;
    use crate::types::PackageName;
    use crate::version::Version;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn fixture() -> (Package, Resolution, ProjectPaths) {
        let mut zlib = Package::new("zlib");
        zlib.add_version(Version::new(1, 3, 0), "abc");
        zlib.lib.includes.push(PathBuf::from("include"));
        zlib.lib.defines.push("ZLIB_CONST".to_string());

        let mut root = Package::new("app");
        root.add_version(Version::new(0, 1, 0), "");

        let mut packages = BTreeMap::new();
        packages.insert(
            PackageName::new("zlib"),
            Resolved {
                package: Arc::new(zlib),
                version: Version::new(1, 3, 0),
                kind: PackageKind::Index,
            },
        );
        let resolution = Resolution {
            packages,
            system_deps: vec!["m".to_string()],
        };
        let paths = ProjectPaths::new("/proj", "/cache");
        (root, resolution, paths)
    }

    #[test]
    fn test_shell_fragment() {
        let (root, resolution, paths) = fixture();
        let out = generate(&root, &resolution, &paths, GenFormat::Shell);
        assert!(out.contains("export LODE_CFLAGS="));
        assert!(out.contains("-I/cache/zlib/include"));
        assert!(out.contains("-DZLIB_CONST"));
        assert!(out.contains("-lzlib"));
        assert!(out.contains("-lm"));
    }

    #[test]
    fn test_make_fragment() {
        let (root, resolution, paths) = fixture();
        let out = generate(&root, &resolution, &paths, GenFormat::Make);
        assert!(out.starts_with("LODE_CFLAGS :="));
    }

    #[test]
    fn test_pkg_config_carries_package_identity() {
        let (root, resolution, paths) = fixture();
        let out = generate(&root, &resolution, &paths, GenFormat::PkgConfig);
        assert!(out.contains("Name: app"));
        assert!(out.contains("Version: 0.1.0"));
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("shell".parse::<GenFormat>().unwrap(), GenFormat::Shell);
        assert_eq!("pc".parse::<GenFormat>().unwrap(), GenFormat::PkgConfig);
        assert!("weird".parse::<GenFormat>().is_err());
    }
}
