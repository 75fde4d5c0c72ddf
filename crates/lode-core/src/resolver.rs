//! Dependency resolution
//!
//! Two paths produce a [`Resolution`]:
//!
//! - [`resolve`] — the solver. One depth-first pass collects, for every
//!   referenced package, the index range of its sorted version list each
//!   requester admits; a selection pass then intersects the ranges and picks
//!   the highest admissible version ("as new as globally permitted").
//! - [`resolve_from_lock`] — trusts lock file entries verbatim: no range
//!   recomputation, no cycle check. The default whenever a lock exists.
//!
//! Cycle detection is on-path only (a three-color walk collapsed to a
//! "visiting" set), so diamond dependencies are legal and true cycles fail
//! fast naming the offending package.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use thiserror::Error;

use crate::events::{Event, EventBuffer, ResolveStrategy};
use crate::lockfile::Lockfile;
use crate::manifest::ManifestError;
use crate::package::{DepRequest, Package, PackageKind, RequestSource};
use crate::registry::PackageStore;
use crate::types::PackageName;
use crate::version::{Range, Version};

#[derive(Error, Debug)]
pub enum ResolveError {
    /// The intersection of every collected range is empty for `package`.
    #[error(
        "{package} cannot be resolved:\n  {low_requester} requires {low_constraint}\n  {high_requester} requires {high_constraint}"
    )]
    Conflict {
        package: PackageName,
        low_requester: PackageName,
        low_constraint: String,
        high_requester: PackageName,
        high_constraint: String,
    },

    /// A package is reachable from itself via declared dependencies.
    #[error("circular dependency involving package: {name}")]
    CircularDependency { name: PackageName },

    /// A requested name exists on no registry search path.
    #[error("{requester} requires {name}, which was not found on any registry search path")]
    UnknownPackage {
        requester: PackageName,
        name: PackageName,
    },

    /// A referenced package declares no versions at all.
    #[error("{name} has no known versions")]
    NoVersions { name: PackageName },

    /// A constraint admits none of the package's known versions.
    #[error("no version of {package} satisfies {constraint} (required by {requester})")]
    NoSatisfyingVersion {
        package: PackageName,
        requester: PackageName,
        constraint: String,
    },

    /// A local (file) dependency must expose exactly one version.
    #[error("local dependency {name} has {count} versions")]
    LocalPackageVersions { name: PackageName, count: usize },

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// A package name bound to one concrete version for the duration of a build.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub package: Arc<Package>,
    pub version: Version,
    pub kind: PackageKind,
}

/// The resolver's output: one concrete version per referenced package, plus
/// the union of system dependencies.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub packages: BTreeMap<PackageName, Resolved>,
    pub system_deps: Vec<String>,
}

impl Resolution {
    pub fn get(&self, name: &str) -> Option<&Resolved> {
        self.packages.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }
}

/// A requester's admissible index range into a package's version list.
#[derive(Debug, Clone)]
struct CollectedRange {
    /// Lowest index satisfying the request's low bound, if any does.
    low: Option<usize>,
    /// Highest index satisfying the request's high bound, if any does.
    high: Option<usize>,
    requester: PackageName,
    constraint: String,
    kind: PackageKind,
}

#[derive(Debug, Default)]
struct CollectState {
    ranges: BTreeMap<PackageName, Vec<CollectedRange>>,
    /// Packages on the current DFS path. Entries are removed on the way
    /// back up, so diamonds don't trip the cycle check.
    visiting: HashSet<PackageName>,
    system_deps: Vec<String>,
}

/// Solve version constraints for `root`'s whole dependency tree.
pub fn resolve(
    store: &mut PackageStore,
    root: &Package,
    events: &EventBuffer,
) -> Result<Resolution, ResolveError> {
    events.push(Event::Resolve {
        strategy: ResolveStrategy::Solver,
    });

    let mut state = CollectState::default();
    collect_constraints(store, root, &mut state, events)?;

    let mut packages = BTreeMap::new();
    for (name, ranges) in &state.ranges {
        if ranges.is_empty() {
            continue;
        }

        let mut low = 0usize;
        let mut high = usize::MAX;
        let mut low_src = &ranges[0];
        let mut high_src = &ranges[0];

        for range in ranges {
            let (Some(lo), Some(hi)) = (range.low, range.high) else {
                return Err(ResolveError::NoSatisfyingVersion {
                    package: name.clone(),
                    requester: range.requester.clone(),
                    constraint: range.constraint.clone(),
                });
            };
            if lo >= low {
                low = lo;
                low_src = range;
            }
            if hi <= high {
                high = hi;
                high_src = range;
            }
        }

        if low > high {
            events.push(Event::ResolveConflict {
                package: name.clone(),
                low_requester: low_src.requester.clone(),
                low_constraint: low_src.constraint.clone(),
                high_requester: high_src.requester.clone(),
                high_constraint: high_src.constraint.clone(),
            });
            return Err(ResolveError::Conflict {
                package: name.clone(),
                low_requester: low_src.requester.clone(),
                low_constraint: low_src.constraint.clone(),
                high_requester: high_src.requester.clone(),
                high_constraint: high_src.constraint.clone(),
            });
        }

        let package = store
            .get(name)
            .ok_or_else(|| ResolveError::UnknownPackage {
                requester: high_src.requester.clone(),
                name: name.clone(),
            })?;
        let version = package.versions[high].version;

        tracing::debug!("resolved {} -> {}", name, version);
        packages.insert(
            name.clone(),
            Resolved {
                package,
                version,
                kind: high_src.kind,
            },
        );
    }

    Ok(Resolution {
        packages,
        system_deps: state.system_deps,
    })
}

/// Post-order DFS: children are fully processed before the parent records
/// its constraint against them.
fn collect_constraints(
    store: &mut PackageStore,
    package: &Package,
    state: &mut CollectState,
    events: &EventBuffer,
) -> Result<(), ResolveError> {
    if state.visiting.contains(&package.name) {
        events.push(Event::CircularDependency {
            package: package.name.clone(),
        });
        return Err(ResolveError::CircularDependency {
            name: package.name.clone(),
        });
    }

    for sys_dep in &package.system_deps {
        if !state.system_deps.iter().any(|d| d == sys_dep) {
            state.system_deps.push(sys_dep.clone());
        }
    }

    state.visiting.insert(package.name.clone());

    for request in package.deps.values() {
        let dep = ensure_target(store, &package.name, request)?;

        collect_constraints(store, &dep, state, events)?;

        let collected = collect_range(&package.name, request, &dep)?;
        state
            .ranges
            .entry(dep.name.clone())
            .or_default()
            .push(collected);
    }

    state.visiting.remove(&package.name);

    Ok(())
}

/// Load the package a request points at, distinguishing "unknown name" from
/// load failures.
fn ensure_target(
    store: &mut PackageStore,
    requester: &PackageName,
    request: &DepRequest,
) -> Result<Arc<Package>, ResolveError> {
    let found = match &request.source {
        RequestSource::File(path) => store.ensure_file(&request.name, path)?,
        RequestSource::Index(_) | RequestSource::Latest => store.ensure_index(&request.name)?,
    };

    found.ok_or_else(|| ResolveError::UnknownPackage {
        requester: requester.clone(),
        name: request.name.clone(),
    })
}

/// Compute the admissible index window of `dep`'s version list for one
/// request.
fn collect_range(
    requester: &PackageName,
    request: &DepRequest,
    dep: &Package,
) -> Result<CollectedRange, ResolveError> {
    match &request.source {
        RequestSource::File(_) => {
            // Local packages expose exactly one version; the window is
            // pinned to it.
            if dep.versions.len() != 1 {
                return Err(ResolveError::LocalPackageVersions {
                    name: dep.name.clone(),
                    count: dep.versions.len(),
                });
            }
            Ok(CollectedRange {
                low: Some(0),
                high: Some(0),
                requester: requester.clone(),
                constraint: request.constraint(),
                kind: PackageKind::File,
            })
        }
        RequestSource::Index(range) => Ok(scan_versions(requester, *range, dep)),
        RequestSource::Latest => {
            let latest = dep.latest().ok_or_else(|| ResolveError::NoVersions {
                name: dep.name.clone(),
            })?;
            let range = Range::caret_around(latest.version);
            Ok(scan_versions(requester, range, dep))
        }
    }
}

fn scan_versions(requester: &PackageName, range: Range, dep: &Package) -> CollectedRange {
    let mut low = None;
    let mut high = None;

    for (idx, meta) in dep.versions.iter().enumerate() {
        if low.is_none() && range.low.admits(meta.version) {
            low = Some(idx);
        }
        if range.high.admits(meta.version) {
            high = Some(idx);
        }
    }

    CollectedRange {
        low,
        high,
        requester: requester.clone(),
        constraint: range.to_string(),
        kind: PackageKind::Index,
    }
}

/// Rebuild a [`Resolution`] from a lock file, trusting entries verbatim.
///
/// Index entries are loaded by name; file entries are matched back to the
/// declaring request's path (the lock records no paths). No constraint or
/// cycle validation happens here: the lock file was validated when written.
pub fn resolve_from_lock(
    store: &mut PackageStore,
    root: &Package,
    lock: &Lockfile,
    events: &EventBuffer,
) -> Result<Resolution, ResolveError> {
    events.push(Event::Resolve {
        strategy: ResolveStrategy::LockFile,
    });

    let mut packages = BTreeMap::new();

    // Index entries first so file entries can be matched against any
    // locked package's declared requests below.
    for (name, entry) in &lock.entries {
        if entry.kind != PackageKind::Index {
            continue;
        }
        let requester = lock_requester(entry, root);
        let package =
            store
                .ensure_index(name)?
                .ok_or_else(|| ResolveError::UnknownPackage {
                    requester,
                    name: name.clone(),
                })?;
        packages.insert(
            name.clone(),
            Resolved {
                package,
                version: entry.version,
                kind: entry.kind,
            },
        );
    }

    for (name, entry) in &lock.entries {
        if entry.kind != PackageKind::File {
            continue;
        }
        let requester = lock_requester(entry, root);
        let path = find_file_request(root, &packages, name).ok_or_else(|| {
            ResolveError::UnknownPackage {
                requester: requester.clone(),
                name: name.clone(),
            }
        })?;
        let package =
            store
                .ensure_file(name, &path)?
                .ok_or_else(|| ResolveError::UnknownPackage {
                    requester,
                    name: name.clone(),
                })?;
        packages.insert(
            name.clone(),
            Resolved {
                package,
                version: entry.version,
                kind: entry.kind,
            },
        );
    }

    Ok(Resolution {
        packages,
        system_deps: lock.system_deps.clone(),
    })
}

fn lock_requester(entry: &crate::lockfile::LockEntry, root: &Package) -> PackageName {
    entry
        .dependents
        .first()
        .cloned()
        .unwrap_or_else(|| root.name.clone())
}

/// Find the file path some locked package (or the root) declared for `name`.
fn find_file_request(
    root: &Package,
    packages: &BTreeMap<PackageName, Resolved>,
    name: &PackageName,
) -> Option<std::path::PathBuf> {
    let from_requests = |pkg: &Package| {
        pkg.deps.get(name.as_str()).and_then(|req| match &req.source {
            RequestSource::File(path) => Some(path.clone()),
            _ => None,
        })
    };

    from_requests(root).or_else(|| {
        packages
            .values()
            .find_map(|resolved| from_requests(&resolved.package))
    })
}
