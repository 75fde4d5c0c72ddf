//! Dirty computation
//!
//! Compares the graph's current on-disk state against the fingerprint
//! database from the previous run and marks the minimal subset of commands
//! that must re-run. The dirty set is the only thing the executor needs
//! beyond the graph: a command outside it is skipped and its outputs are
//! treated as already valid.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};

use crate::graph::{BuildGraph, Node, NodeId};

/// Content digest of a file, hex-encoded. `None` if the file is unreadable.
pub fn fingerprint(path: &Path) -> Option<String> {
    let bytes = fs::read(path).ok()?;
    Some(blake3::hash(&bytes).to_hex().to_string())
}

/// Per-file fingerprint history persisted between runs
/// (`.lode/fingerprints.json`).
#[derive(Debug, Default)]
pub struct FingerprintDb {
    entries: HashMap<PathBuf, String>,
}

impl FingerprintDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the database, or start empty if it doesn't exist or doesn't
    /// parse (either way the next run treats everything as dirty).
    pub fn load(path: &Path) -> Self {
        let entries = fs::read_to_string(path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default();
        Self { entries }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.entries)
            .expect("fingerprint map serializes to JSON");
        fs::write(path, content)
    }

    pub fn get(&self, path: &Path) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, digest: String) {
        self.entries.insert(path.into(), digest);
    }

    /// Re-fingerprint every file node that exists on disk. Called after a
    /// phase joins cleanly so the next run sees it as up to date.
    pub fn record(&mut self, graph: &BuildGraph) {
        for id in graph.file_ids() {
            let file = graph.file(id);
            if let Some(digest) = fingerprint(&file.path) {
                self.entries.insert(file.path.clone(), digest);
            }
        }
    }
}

/// The set of commands that must re-run (plus the file staleness that
/// induced it). Derived data, recomputed every invocation.
#[derive(Debug, Default)]
pub struct DirtySet {
    commands: HashSet<NodeId>,
    files: HashSet<NodeId>,
}

impl DirtySet {
    /// Mark a single command dirty. Callers composing their own dirty set
    /// (rather than computing one) use this.
    pub fn insert_command(&mut self, id: NodeId) {
        self.commands.insert(id);
    }

    pub fn is_command_dirty(&self, id: NodeId) -> bool {
        self.commands.contains(&id)
    }

    pub fn is_file_dirty(&self, id: NodeId) -> bool {
        self.files.contains(&id)
    }

    pub fn commands(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.commands.iter().copied()
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }
}

/// Incremental mode: a file is dirty if missing or its digest changed since
/// the recorded run; a command is dirty if any input is dirty or any output
/// is missing or dirty; dirtiness propagates forward through the DAG.
pub fn compute_dirty(graph: &BuildGraph, db: &FingerprintDb) -> DirtySet {
    let mut dirty = DirtySet::default();

    for id in graph.file_ids() {
        let file = graph.file(id);
        let stale = match fingerprint(&file.path) {
            Some(digest) => db.get(&file.path) != Some(digest.as_str()),
            None => true,
        };
        if stale {
            dirty.files.insert(id);
        }
    }

    let mut queue = VecDeque::new();
    for id in graph.command_ids() {
        let command = graph.command(id);
        let stale = command
            .inputs
            .iter()
            .chain(command.outputs.iter())
            .any(|&file| dirty.files.contains(&file));
        if stale {
            dirty.commands.insert(id);
            queue.push_back(id);
        }
    }

    // forward propagation: a dirty command rewrites its outputs, which
    // makes every transitive consumer dirty too
    while let Some(id) = queue.pop_front() {
        for &output in &graph.command(id).outputs {
            dirty.files.insert(output);
            for &consumer in &graph.file(output).consumers {
                if dirty.commands.insert(consumer) {
                    queue.push_back(consumer);
                }
            }
        }
    }

    tracing::debug!(
        "dirty: {} of {} commands",
        dirty.commands.len(),
        graph.command_ids().count()
    );
    dirty
}

/// Force mode: every command is dirty regardless of fingerprints.
pub fn compute_forced_dirty(graph: &BuildGraph) -> DirtySet {
    let mut dirty = DirtySet::default();
    for id in graph.ids() {
        match graph.node(id) {
            Node::Command(_) => {
                dirty.commands.insert(id);
            }
            Node::File(file) => {
                // produced files will be rewritten; sources stay clean
                if file.producer.is_some() {
                    dirty.files.insert(id);
                }
            }
        }
    }
    dirty
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CommandFn;
    use std::fs;

    fn noop() -> CommandFn {
        Box::new(|| Ok(()))
    }

    /// Two-stage chain plus an independent command:
    ///   a.c -> [cc a] -> a.o -> [link] -> app
    ///   b.c -> [cc b] -> b.o
    struct Fixture {
        graph: BuildGraph,
        a_c: std::path::PathBuf,
        cc_a: NodeId,
        link: NodeId,
        cc_b: NodeId,
    }

    fn fixture(dir: &Path) -> Fixture {
        let a_c = dir.join("a.c");
        let b_c = dir.join("b.c");
        let a_o = dir.join("a.o");
        let b_o = dir.join("b.o");
        let app = dir.join("app");
        fs::write(&a_c, "int a;").unwrap();
        fs::write(&b_c, "int b;").unwrap();
        fs::write(&a_o, "obj a").unwrap();
        fs::write(&b_o, "obj b").unwrap();
        fs::write(&app, "bin").unwrap();

        let mut graph = BuildGraph::new();
        let a_c_node = graph.add_file(&a_c);
        let b_c_node = graph.add_file(&b_c);
        let a_o_node = graph.add_file(&a_o);
        let b_o_node = graph.add_file(&b_o);
        let app_node = graph.add_file(&app);

        let cc_a = graph.add_command(noop());
        graph.add_input(cc_a, a_c_node);
        graph.add_output(cc_a, a_o_node);

        let cc_b = graph.add_command(noop());
        graph.add_input(cc_b, b_c_node);
        graph.add_output(cc_b, b_o_node);

        let link = graph.add_command(noop());
        graph.add_input(link, a_o_node);
        graph.add_output(link, app_node);

        Fixture {
            graph,
            a_c,
            cc_a,
            link,
            cc_b,
        }
    }

    fn recorded_db(graph: &BuildGraph) -> FingerprintDb {
        let mut db = FingerprintDb::new();
        db.record(graph);
        db
    }

    #[test]
    fn test_clean_tree_has_no_dirty_commands() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture(dir.path());
        let db = recorded_db(&fx.graph);

        let dirty = compute_dirty(&fx.graph, &db);
        assert_eq!(dirty.command_count(), 0);
    }

    #[test]
    fn test_leaf_change_marks_transitive_consumers_only() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture(dir.path());
        let db = recorded_db(&fx.graph);

        fs::write(&fx.a_c, "int a_changed;").unwrap();

        let dirty = compute_dirty(&fx.graph, &db);
        assert!(dirty.is_command_dirty(fx.cc_a));
        assert!(dirty.is_command_dirty(fx.link));
        assert!(!dirty.is_command_dirty(fx.cc_b));
        assert_eq!(dirty.command_count(), 2);
    }

    #[test]
    fn test_missing_output_marks_its_command() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture(dir.path());
        let db = recorded_db(&fx.graph);

        fs::remove_file(dir.path().join("b.o")).unwrap();

        let dirty = compute_dirty(&fx.graph, &db);
        assert!(dirty.is_command_dirty(fx.cc_b));
        assert!(!dirty.is_command_dirty(fx.cc_a));
    }

    #[test]
    fn test_first_run_without_db_is_all_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture(dir.path());

        let dirty = compute_dirty(&fx.graph, &FingerprintDb::new());
        assert_eq!(dirty.command_count(), 3);
    }

    #[test]
    fn test_forced_dirty_marks_every_command() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture(dir.path());

        let dirty = compute_forced_dirty(&fx.graph);
        assert_eq!(dirty.command_count(), 3);
        assert!(dirty.is_command_dirty(fx.cc_a));
        assert!(dirty.is_command_dirty(fx.cc_b));
        assert!(dirty.is_command_dirty(fx.link));
    }

    #[test]
    fn test_db_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let fx = fixture(dir.path());
        let mut db = recorded_db(&fx.graph);
        db.insert(dir.path().join("extra"), "deadbeef".to_string());

        let db_path = dir.path().join(".lode/fingerprints.json");
        db.save(&db_path).unwrap();

        let loaded = FingerprintDb::load(&db_path);
        assert_eq!(
            loaded.get(&dir.path().join("extra")),
            Some("deadbeef")
        );
        let dirty = compute_dirty(&fx.graph, &loaded);
        assert_eq!(dirty.command_count(), 0);
    }
}
