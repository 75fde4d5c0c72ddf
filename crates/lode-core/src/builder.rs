//! Build orchestration
//!
//! Turns a [`Resolution`] into executable phases. Each phase builds its own
//! graph, computes dirty state, and runs one executor to completion before
//! the next phase starts:
//!
//! 1. **sync** — clone/fetch/checkout each index package's repository
//!    (always forced dirty; a small fixed pool since the work is I/O bound)
//! 2. **configure** — prepare per-package build directories, stamping each
//! 3. **build** — compile dependency libraries, then the root's targets,
//!    with cross-package ordering enforced through stamp-file edges
//!
//! Commands shell out to `git` and the C compiler; the graph and executor
//! are agnostic to that.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::dirty::{compute_dirty, compute_forced_dirty, FingerprintDb};
use crate::events::{Event, EventBuffer};
use crate::executor::{ExecReport, Executor, ExecutorConfig};
use crate::graph::{BuildGraph, FileKind, NodeId};
use crate::package::{visibility_linked, Package, PackageKind, Target, TargetKind, Visibility};
use crate::resolver::Resolution;
use crate::types::PackageName;
use crate::version::Version;

/// Fixed pool size for the fetch phase.
const SYNC_THREADS: usize = 3;

/// Knobs for one build invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Mark everything dirty regardless of fingerprints.
    pub force: bool,
    /// Worker threads for the build phase. 0 means one per CPU.
    pub threads: usize,
    /// Also build (and wire test-visibility deps into) test targets.
    pub include_tests: bool,
}

impl BuildOptions {
    fn build_threads(self) -> usize {
        if self.threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.threads
        }
    }
}

/// Where a project keeps its build state.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    /// The project directory (where `lode.toml` lives).
    pub root: PathBuf,
    /// Per-project state directory (`<root>/.lode`).
    pub state: PathBuf,
    /// Where index package sources are checked out.
    pub cache: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>, cache: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state = root.join(".lode");
        Self {
            root,
            state,
            cache: cache.into(),
        }
    }

    pub fn build_dir(&self, package: &PackageName) -> PathBuf {
        self.state.join("build").join(package.as_str())
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.state.join("bin")
    }

    pub fn stamp(&self, package: &PackageName, phase: &str) -> PathBuf {
        self.state
            .join("stamps")
            .join(format!("{package}.{phase}"))
    }

    pub fn fingerprints(&self) -> PathBuf {
        self.state.join("fingerprints.json")
    }

    /// Where a resolved package's sources live: local packages in place,
    /// index packages under the cache.
    pub fn source_dir(&self, package: &Package) -> PathBuf {
        match package.kind {
            PackageKind::File => package.root.clone(),
            PackageKind::Index => self.cache.join(package.name.as_str()),
        }
    }
}

/// Outcome of one phase.
#[derive(Debug)]
pub struct PhaseReport {
    pub phase: &'static str,
    pub report: ExecReport,
}

/// Outcome of a whole build invocation.
#[derive(Debug, Default)]
pub struct BuildOutcome {
    pub phases: Vec<PhaseReport>,
}

impl BuildOutcome {
    pub fn ok(&self) -> bool {
        self.phases.iter().all(|p| p.report.ok())
    }
}

/// Orchestrates the sync/configure/build phases for one resolution.
pub struct Builder<'a> {
    root: &'a Package,
    resolution: &'a Resolution,
    events: Arc<EventBuffer>,
    paths: ProjectPaths,
    options: BuildOptions,
    cc: PathBuf,
}

impl std::fmt::Debug for Builder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("root", &self.root.name)
            .field("packages", &self.resolution.len())
            .field("cc", &self.cc)
            .finish_non_exhaustive()
    }
}

impl<'a> Builder<'a> {
    pub fn new(
        root: &'a Package,
        resolution: &'a Resolution,
        events: Arc<EventBuffer>,
        paths: ProjectPaths,
        options: BuildOptions,
    ) -> Self {
        let cc = discover_cc();
        Self {
            root,
            resolution,
            events,
            paths,
            options,
            cc,
        }
    }

    /// Run every phase in order. A later phase never starts until the prior
    /// phase's executor has joined; a failing phase stops the pipeline.
    pub fn run(&self) -> Result<BuildOutcome> {
        let mut outcome = BuildOutcome::default();
        let mut db = FingerprintDb::load(&self.paths.fingerprints());

        let sync = self.sync_graph();
        if sync.command_ids().count() > 0 {
            self.events.push(Event::Fetch);
            let report = run_sync_phase(sync);
            let ok = report.report.ok();
            outcome.phases.push(report);
            if !ok {
                return Ok(outcome);
            }
        }

        for (phase, graph, threads) in [
            ("configure", self.configure_graph()?, 1),
            ("build", self.build_graph()?, self.options.build_threads()),
        ] {
            let graph = Arc::new(graph);
            let dirty = if self.options.force {
                compute_forced_dirty(&graph)
            } else {
                compute_dirty(&graph, &db)
            };

            let mut executor = Executor::new(Arc::clone(&graph), &dirty, ExecutorConfig {
                num_threads: threads,
            });
            executor.run();
            let report = executor.join();
            let ok = report.ok();

            if let Some(stuck) = &report.deadlock {
                self.events.push(Event::GraphDeadlock {
                    phase,
                    stuck: stuck.clone(),
                });
            }
            if ok {
                self.events.push(Event::PhasePassed { phase });
                db.record(&graph);
                db.save(&self.paths.fingerprints())
                    .context("failed to write fingerprint database")?;
            }

            outcome.phases.push(PhaseReport { phase, report });
            if !ok {
                return Ok(outcome);
            }
        }

        if outcome.ok() {
            self.events.push(Event::BuildPassed);
        }
        Ok(outcome)
    }

    /// Build the test targets, then run each produced binary.
    pub fn run_tests(&self) -> Result<BuildOutcome> {
        let mut outcome = self.run()?;
        if !outcome.ok() {
            return Ok(outcome);
        }

        let graph = Arc::new(self.test_graph());
        let dirty = compute_forced_dirty(&graph); // tests always re-run
        let count = dirty.command_count();

        let mut executor = Executor::new(Arc::clone(&graph), &dirty, ExecutorConfig {
            num_threads: self.options.build_threads(),
        });
        executor.run();
        let report = executor.join();

        if let Some(stuck) = &report.deadlock {
            self.events.push(Event::GraphDeadlock {
                phase: "test",
                stuck: stuck.clone(),
            });
        }
        if report.ok() {
            self.events.push(Event::TestsPassed { count });
        }
        outcome.phases.push(PhaseReport {
            phase: "test",
            report,
        });
        Ok(outcome)
    }

    /// One sync command per index package. Local packages are already on
    /// disk.
    pub fn sync_graph(&self) -> BuildGraph {
        let mut graph = BuildGraph::new();

        for (name, resolved) in &self.resolution.packages {
            if resolved.kind != PackageKind::Index {
                continue;
            }

            let meta = resolved.package.version_meta(resolved.version);
            let commit = meta.map(|m| m.commit.clone()).unwrap_or_default();
            let repo_dir = self.paths.source_dir(&resolved.package);
            let repo_url = resolved.package.repo.clone();
            let events = Arc::clone(&self.events);
            let package = name.clone();
            let version = resolved.version;

            let event_tag = format!("sync ({name})");
            let cmd = graph.add_command(Box::new(move || {
                let result = sync_repo(&repo_dir, &repo_url, &commit, &package, version, &events);
                if let Err(err) = &result {
                    events.push(Event::CommandFailed {
                        tag: event_tag.clone(),
                        error: format!("{err:#}"),
                    });
                }
                result
            }));
            graph.set_tag(cmd, format!("sync ({name})"));
            graph.set_package(cmd, name);
        }

        graph
    }

    /// One configure command per package (and the root), each stamping its
    /// completion; the root waits on every dependency stamp, and packages
    /// wait on the stamps of their own resolved dependencies.
    pub fn configure_graph(&self) -> Result<BuildGraph> {
        let mut graph = BuildGraph::new();
        let mut commands: BTreeMap<PackageName, NodeId> = BTreeMap::new();

        for resolved in self.resolution.packages.values() {
            let cmd = self.add_configure_command(&mut graph, &resolved.package)?;
            commands.insert(resolved.package.name.clone(), cmd);
        }
        let root_cmd = self.add_configure_command(&mut graph, self.root)?;

        for name in self.resolution.packages.keys() {
            let stamp = graph.add_file(self.paths.stamp(name, "configured"));
            graph.add_input(root_cmd, stamp);
        }

        for resolved in self.resolution.packages.values() {
            let Some(&consumer) = commands.get(&resolved.package.name) else {
                continue;
            };
            for dep_name in resolved.package.deps.keys() {
                if self.resolution.packages.contains_key(dep_name) {
                    let stamp = graph.add_file(self.paths.stamp(dep_name, "configured"));
                    graph.add_input(consumer, stamp);
                }
            }
        }

        Ok(graph)
    }

    fn add_configure_command(&self, graph: &mut BuildGraph, package: &Package) -> Result<NodeId> {
        let build_dir = self.paths.build_dir(&package.name);
        let stamp = self.paths.stamp(&package.name, "configured");
        let version = package
            .versions
            .last()
            .map_or_else(|| "0.0.0".to_string(), |m| m.version.to_string());
        let descriptor = format!("{} {}", package.name, version);

        let cmd = graph.add_command(Box::new(move || {
            fs::create_dir_all(&build_dir)
                .with_context(|| format!("failed to create {}", build_dir.display()))?;
            write_stamp(&stamp, &descriptor)
        }));
        graph.set_tag(cmd, format!("configure ({})", package.name));
        graph.set_package(cmd, &package.name);

        let stamp_node = graph.add_file(self.paths.stamp(&package.name, "configured"));
        graph.set_file_kind(stamp_node, FileKind::Stamp);
        graph.set_package(stamp_node, &package.name);
        graph.add_output(cmd, stamp_node);
        Ok(cmd)
    }

    /// The build-phase graph: one library command per dependency package,
    /// then one command per requested root target. Cross-package ordering
    /// flows through build stamps.
    pub fn build_graph(&self) -> Result<BuildGraph> {
        let mut graph = BuildGraph::new();

        for resolved in self.resolution.packages.values() {
            self.add_lib_command(&mut graph, &resolved.package)?;
        }

        for target in &self.root.targets {
            if target.kind == TargetKind::Test && !self.options.include_tests {
                continue;
            }
            self.add_target_command(&mut graph, target)?;
        }

        Ok(graph)
    }

    /// Compile a dependency package's library sources into a static
    /// archive, stamping completion for downstream consumers.
    fn add_lib_command(&self, graph: &mut BuildGraph, package: &Package) -> Result<NodeId> {
        let source_dir = self.paths.source_dir(package);
        let build_dir = self.paths.build_dir(&package.name);
        let archive = build_dir.join(format!("lib{}.a", package.name));
        let stamp = self.paths.stamp(&package.name, "built");

        let job = CompileJob {
            cc: self.cc.clone(),
            sources: package
                .lib
                .sources
                .iter()
                .map(|s| source_dir.join(s))
                .collect(),
            includes: package
                .lib
                .includes
                .iter()
                .map(|i| source_dir.join(i))
                .collect(),
            defines: package.lib.defines.clone(),
            lib_dirs: Vec::new(),
            libs: Vec::new(),
            system_libs: Vec::new(),
        };

        let tag = format!("build ({})", package.name);
        let events = Arc::clone(&self.events);
        let stamp_for_cmd = stamp.clone();
        let archive_for_cmd = archive.clone();
        let event_tag = tag.clone();

        let cmd = graph.add_command(Box::new(move || {
            let result = job.archive(&archive_for_cmd).and_then(|()| {
                write_stamp(&stamp_for_cmd, "built")
            });
            match &result {
                Ok(()) => events.push(Event::CommandPassed {
                    tag: event_tag.clone(),
                }),
                Err(err) => events.push(Event::CommandFailed {
                    tag: event_tag.clone(),
                    error: format!("{err:#}"),
                }),
            }
            result
        }));
        graph.set_tag(cmd, tag);
        graph.set_package(cmd, &package.name);

        // sources in, archive and stamp out; header-only packages produce
        // just the stamp
        for source in &package.lib.sources {
            let node = graph.add_file(source_dir.join(source));
            graph.set_package(node, &package.name);
            graph.add_input(cmd, node);
        }
        if !package.lib.sources.is_empty() {
            let archive_node = graph.add_file(&archive);
            graph.set_file_kind(archive_node, FileKind::Artifact);
            graph.set_package(archive_node, &package.name);
            graph.add_output(cmd, archive_node);
        }

        let stamp_node = graph.add_file(&stamp);
        graph.set_file_kind(stamp_node, FileKind::Stamp);
        graph.set_package(stamp_node, &package.name);
        graph.add_output(cmd, stamp_node);

        // wait on this package's own (public) dependencies
        for (dep_name, request) in &package.deps {
            if request.visibility == Visibility::Public
                && self.resolution.packages.contains_key(dep_name)
            {
                let dep_stamp = graph.add_file(self.paths.stamp(dep_name, "built"));
                graph.set_file_kind(dep_stamp, FileKind::Stamp);
                graph.add_input(cmd, dep_stamp);
            }
        }

        Ok(cmd)
    }

    /// Compile and link one root target against the resolved set.
    fn add_target_command(&self, graph: &mut BuildGraph, target: &Target) -> Result<NodeId> {
        let output = self.paths.bin_dir().join(&target.name);

        let mut job = CompileJob {
            cc: self.cc.clone(),
            sources: target
                .sources
                .iter()
                .map(|s| self.paths.root.join(s))
                .collect(),
            includes: target
                .includes
                .iter()
                .map(|i| self.paths.root.join(i))
                .collect(),
            defines: target.defines.clone(),
            lib_dirs: Vec::new(),
            libs: Vec::new(),
            system_libs: self.resolution.system_deps.clone(),
        };

        // visibility governs which dependency edges are legal for this
        // target kind
        for (dep_name, request) in &self.root.deps {
            if !visibility_linked(target.kind, request.visibility) {
                continue;
            }
            let Some(resolved) = self.resolution.packages.get(dep_name) else {
                continue;
            };
            let source_dir = self.paths.source_dir(&resolved.package);
            for include in &resolved.package.lib.includes {
                job.includes.push(source_dir.join(include));
            }
            if !resolved.package.lib.sources.is_empty() {
                job.lib_dirs.push(self.paths.build_dir(dep_name));
                job.libs.push(dep_name.to_string());
            }
        }

        let tag = format!("{}::{}", self.root.name, target.name);
        let events = Arc::clone(&self.events);
        let event_tag = tag.clone();
        let job_output = output.clone();

        let cmd = graph.add_command(Box::new(move || {
            let result = job.link(&job_output);
            match &result {
                Ok(()) => events.push(Event::CommandPassed {
                    tag: event_tag.clone(),
                }),
                Err(err) => events.push(Event::CommandFailed {
                    tag: event_tag.clone(),
                    error: format!("{err:#}"),
                }),
            }
            result
        }));
        graph.set_tag(cmd, tag);
        graph.set_package(cmd, &self.root.name);

        for source in &target.sources {
            let node = graph.add_file(self.paths.root.join(source));
            graph.set_package(node, &self.root.name);
            graph.add_input(cmd, node);
        }
        for (dep_name, request) in &self.root.deps {
            if visibility_linked(target.kind, request.visibility)
                && self.resolution.packages.contains_key(dep_name)
            {
                let dep_stamp = graph.add_file(self.paths.stamp(dep_name, "built"));
                graph.set_file_kind(dep_stamp, FileKind::Stamp);
                graph.add_input(cmd, dep_stamp);
            }
        }

        let output_node = graph.add_file(&output);
        graph.set_file_kind(output_node, FileKind::Artifact);
        graph.set_package(output_node, &self.root.name);
        graph.add_output(cmd, output_node);

        Ok(cmd)
    }

    /// One command per test target, running the binary the build phase
    /// produced.
    fn test_graph(&self) -> BuildGraph {
        let mut graph = BuildGraph::new();

        for target in self.root.targets_of(TargetKind::Test) {
            let binary = self.paths.bin_dir().join(&target.name);
            let name = target.name.clone();
            let events = Arc::clone(&self.events);

            let cmd = graph.add_command(Box::new(move || {
                let status = Command::new(&binary)
                    .status()
                    .with_context(|| format!("failed to run test '{name}'"))?;
                if status.success() {
                    events.push(Event::TestPassed { name: name.clone() });
                    Ok(())
                } else {
                    let error = format!("exit code {:?}", status.code());
                    events.push(Event::TestFailed {
                        name: name.clone(),
                        error: error.clone(),
                    });
                    bail!("test '{name}' failed: {error}")
                }
            }));
            graph.set_tag(cmd, format!("test ({})", target.name));
            graph.set_package(cmd, &self.root.name);

            let binary_node = graph.add_file(self.paths.bin_dir().join(&target.name));
            graph.add_input(cmd, binary_node);
        }

        graph
    }

}

/// Sync always runs everything: freshness is the point of the phase.
fn run_sync_phase(graph: BuildGraph) -> PhaseReport {
    let graph = Arc::new(graph);
    let dirty = compute_forced_dirty(&graph);
    let mut executor = Executor::new(graph, &dirty, ExecutorConfig {
        num_threads: SYNC_THREADS,
    });
    executor.run();
    PhaseReport {
        phase: "sync",
        report: executor.join(),
    }
}

/// Find a C compiler, preferring `cc`. Falling back to the bare name defers
/// the failure to the first command that actually needs it.
fn discover_cc() -> PathBuf {
    for candidate in ["cc", "clang", "gcc"] {
        if let Ok(path) = which::which(candidate) {
            return path;
        }
    }
    tracing::warn!("no C compiler found on PATH; builds will fail at compile time");
    PathBuf::from("cc")
}

/// A single compiler invocation, captured by a command closure.
struct CompileJob {
    cc: PathBuf,
    sources: Vec<PathBuf>,
    includes: Vec<PathBuf>,
    defines: Vec<String>,
    lib_dirs: Vec<PathBuf>,
    libs: Vec<String>,
    system_libs: Vec<String>,
}

impl CompileJob {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.cc);
        for include in &self.includes {
            cmd.arg("-I").arg(include);
        }
        for define in &self.defines {
            cmd.arg(format!("-D{define}"));
        }
        cmd
    }

    /// Compile sources and archive them into a static library.
    fn archive(&self, archive: &Path) -> Result<()> {
        if self.sources.is_empty() {
            // header-only package: nothing to compile, the stamp suffices
            if let Some(parent) = archive.parent() {
                fs::create_dir_all(parent)?;
            }
            return Ok(());
        }

        let build_dir = archive.parent().context("archive path has no parent")?;
        fs::create_dir_all(build_dir)?;

        let mut objects = Vec::new();
        for source in &self.sources {
            let object = build_dir.join(
                source
                    .file_stem()
                    .context("source file has no stem")?
                    .to_string_lossy()
                    .to_string()
                    + ".o",
            );
            let mut cmd = self.command();
            cmd.arg("-c").arg(source).arg("-o").arg(&object);
            run_tool(cmd)?;
            objects.push(object);
        }

        let mut ar = Command::new("ar");
        ar.arg("rcs").arg(archive).args(&objects);
        run_tool(ar)
    }

    /// Compile and link sources into an executable.
    fn link(&self, output: &Path) -> Result<()> {
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut cmd = self.command();
        cmd.args(&self.sources);
        cmd.arg("-o").arg(output);
        for dir in &self.lib_dirs {
            cmd.arg("-L").arg(dir);
        }
        for lib in &self.libs {
            cmd.arg(format!("-l{lib}"));
        }
        for lib in &self.system_libs {
            cmd.arg(format!("-l{lib}"));
        }
        run_tool(cmd)
    }
}

/// Run a toolchain subprocess, folding a nonzero exit into an error
/// carrying stderr.
fn run_tool(mut cmd: Command) -> Result<()> {
    let output = cmd
        .output()
        .with_context(|| format!("failed to execute {:?}", cmd.get_program()))?;
    if !output.status.success() {
        bail!(
            "{:?} exited with {}: {}",
            cmd.get_program(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// Clone/fetch a package's repository and check out the pinned commit.
fn sync_repo(
    repo_dir: &Path,
    repo_url: &str,
    commit: &str,
    package: &PackageName,
    version: Version,
    events: &EventBuffer,
) -> Result<()> {
    if !repo_dir.join(".git").exists() {
        if repo_url.is_empty() {
            bail!("package {package} has no repository url to clone from");
        }
        if let Some(parent) = repo_dir.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut clone = Command::new("git");
        clone.arg("clone").arg("--quiet").arg(repo_url).arg(repo_dir);
        run_tool(clone)?;
    } else {
        let mut fetch = Command::new("git");
        fetch.arg("-C").arg(repo_dir).args(["fetch", "--quiet"]);
        run_tool(fetch)?;
    }

    if !commit.is_empty() {
        let mut checkout = Command::new("git");
        checkout
            .arg("-C")
            .arg(repo_dir)
            .args(["checkout", "--quiet", commit]);
        run_tool(checkout)?;
        events.push(Event::Checkout {
            package: package.clone(),
            version,
            commit: commit.to_string(),
        });
    }

    events.push(Event::Sync {
        package: package.clone(),
    });
    Ok(())
}

fn write_stamp(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
