//! The build graph
//!
//! A bipartite DAG of *file* nodes and *command* nodes sharing one dense id
//! space. Commands declare input and output files; files remember their
//! producer and consumers. Construction is append-only; nothing checks for
//! cycles here — a cycle surfaces as an executor deadlock at schedule time,
//! which is reported, never silently hung on.
//!
//! Command payloads are boxed closures capturing whatever state they need;
//! the graph neither knows nor cares whether a command invokes a compiler,
//! runs a fetch, or executes user build logic.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::types::PackageName;

/// The fixed calling convention of every command: no arguments (state is
/// captured), `Ok` or an error that the executor records.
pub type CommandFn = Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Dense handle into a graph's node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Display class of a file node. Does not affect execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileKind {
    #[default]
    Source,
    /// Sentinel output marking "this unit of work completed".
    Stamp,
    Artifact,
}

/// A file on disk (or a stamp standing in for one).
#[derive(Debug)]
pub struct FileNode {
    pub path: PathBuf,
    pub kind: FileKind,
    pub package: Option<PackageName>,
    /// The command producing this file, if any. At most one.
    pub producer: Option<NodeId>,
    /// Commands consuming this file.
    pub consumers: Vec<NodeId>,
}

/// A unit of work with declared file inputs and outputs.
pub struct CommandNode {
    pub tag: String,
    pub package: Option<PackageName>,
    pub inputs: Vec<NodeId>,
    pub outputs: Vec<NodeId>,
    run: CommandFn,
}

impl std::fmt::Debug for CommandNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandNode")
            .field("tag", &self.tag)
            .field("package", &self.package)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum Node {
    File(FileNode),
    Command(CommandNode),
}

/// Append-only bipartite DAG. One graph per executor phase.
#[derive(Debug, Default)]
pub struct BuildGraph {
    nodes: Vec<Node>,
    /// Path index making [`BuildGraph::add_file`] idempotent: the graph
    /// never holds two file nodes for one path.
    paths: HashMap<PathBuf, NodeId>,
}

impl BuildGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).expect("graph node count exceeds u32"));
        self.nodes.push(node);
        id
    }

    /// Add a file node, or return the existing id if `path` was added
    /// before.
    pub fn add_file(&mut self, path: impl AsRef<Path>) -> NodeId {
        let path = path.as_ref();
        if let Some(&id) = self.paths.get(path) {
            return id;
        }
        let id = self.push(Node::File(FileNode {
            path: path.to_path_buf(),
            kind: FileKind::default(),
            package: None,
            producer: None,
            consumers: Vec::new(),
        }));
        self.paths.insert(path.to_path_buf(), id);
        id
    }

    /// Add a command node with its captured work.
    pub fn add_command(&mut self, run: CommandFn) -> NodeId {
        self.push(Node::Command(CommandNode {
            tag: String::new(),
            package: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            run,
        }))
    }

    /// Declare that `command` reads `file`.
    pub fn add_input(&mut self, command: NodeId, file: NodeId) {
        self.command_mut(command).inputs.push(file);
        self.file_mut(file).consumers.push(command);
    }

    /// Declare that `command` writes `file`.
    pub fn add_output(&mut self, command: NodeId, file: NodeId) {
        self.command_mut(command).outputs.push(file);
        self.file_mut(file).producer = Some(command);
    }

    /// Display label for a command. No effect on execution.
    pub fn set_tag(&mut self, command: NodeId, tag: impl Into<String>) {
        self.command_mut(command).tag = tag.into();
    }

    /// Display class for a file. No effect on execution.
    pub fn set_file_kind(&mut self, file: NodeId, kind: FileKind) {
        self.file_mut(file).kind = kind;
    }

    /// Owning package of a node. No effect on execution.
    pub fn set_package(&mut self, node: NodeId, package: &PackageName) {
        match &mut self.nodes[node.index()] {
            Node::File(file) => file.package = Some(package.clone()),
            Node::Command(command) => command.package = Some(package.clone()),
        }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// The file node behind `id`.
    ///
    /// # Panics
    /// Panics if `id` is a command node.
    pub fn file(&self, id: NodeId) -> &FileNode {
        match self.node(id) {
            Node::File(file) => file,
            Node::Command(_) => panic!("node {id:?} is a command, not a file"),
        }
    }

    /// The command node behind `id`.
    ///
    /// # Panics
    /// Panics if `id` is a file node.
    pub fn command(&self, id: NodeId) -> &CommandNode {
        match self.node(id) {
            Node::Command(command) => command,
            Node::File(_) => panic!("node {id:?} is a file, not a command"),
        }
    }

    fn file_mut(&mut self, id: NodeId) -> &mut FileNode {
        match &mut self.nodes[id.index()] {
            Node::File(file) => file,
            Node::Command(_) => panic!("node {id:?} is a command, not a file"),
        }
    }

    fn command_mut(&mut self, id: NodeId) -> &mut CommandNode {
        match &mut self.nodes[id.index()] {
            Node::Command(command) => command,
            Node::File(_) => panic!("node {id:?} is a file, not a command"),
        }
    }

    /// Run a command's captured work synchronously.
    pub fn run_command(&self, id: NodeId) -> anyhow::Result<()> {
        (self.command(id).run)()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(|i| NodeId(i as u32))
    }

    pub fn command_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.ids()
            .filter(|&id| matches!(self.node(id), Node::Command(_)))
    }

    pub fn file_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.ids()
            .filter(|&id| matches!(self.node(id), Node::File(_)))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> CommandFn {
        Box::new(|| Ok(()))
    }

    #[test]
    fn test_add_file_is_idempotent() {
        let mut graph = BuildGraph::new();
        let a = graph.add_file("src/main.c");
        let b = graph.add_file("src/main.c");
        assert_eq!(a, b);

        let file_count = graph.file_ids().count();
        assert_eq!(file_count, 1);
    }

    #[test]
    fn test_edges_recorded_both_ways() {
        let mut graph = BuildGraph::new();
        let src = graph.add_file("a.c");
        let obj = graph.add_file("a.o");
        let cmd = graph.add_command(noop());
        graph.set_tag(cmd, "cc a.c");
        graph.add_input(cmd, src);
        graph.add_output(cmd, obj);

        assert_eq!(graph.command(cmd).inputs, vec![src]);
        assert_eq!(graph.command(cmd).outputs, vec![obj]);
        assert_eq!(graph.file(src).consumers, vec![cmd]);
        assert_eq!(graph.file(obj).producer, Some(cmd));
    }

    #[test]
    fn test_metadata_does_not_affect_edges() {
        let mut graph = BuildGraph::new();
        let stamp = graph.add_file(".lode/stamps/zlib.stamp");
        graph.set_file_kind(stamp, FileKind::Stamp);
        let cmd = graph.add_command(noop());
        graph.set_package(cmd, &PackageName::new("zlib"));

        assert_eq!(graph.file(stamp).kind, FileKind::Stamp);
        assert_eq!(
            graph.command(cmd).package.as_ref().unwrap().as_str(),
            "zlib"
        );
        assert!(graph.command(cmd).inputs.is_empty());
    }

    #[test]
    fn test_run_command_invokes_closure() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);

        let mut graph = BuildGraph::new();
        let cmd = graph.add_command(Box::new(move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }));

        graph.run_command(cmd).unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }
}
