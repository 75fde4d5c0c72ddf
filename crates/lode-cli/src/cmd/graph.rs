//! `lode graph`
//!
//! Dumps the build-phase graph: a text tree by default, Graphviz DOT with
//! `--dot`. Nothing is executed.

use std::sync::Arc;

use anyhow::Result;

use lode_core::builder::{BuildOptions, Builder};
use lode_core::graph::{BuildGraph, Node};

use crate::project::Project;
use crate::report;

pub fn run(dot: bool) -> Result<()> {
    let mut project = Project::load()?;
    let resolution = match project.resolve() {
        Ok(resolution) => resolution,
        Err(err) => {
            report::render(&project.events);
            return Err(err);
        }
    };

    let options = BuildOptions {
        include_tests: true,
        ..BuildOptions::default()
    };
    let builder = Builder::new(
        &project.package,
        &resolution,
        Arc::clone(&project.events),
        project.paths.clone(),
        options,
    );
    let graph = builder.build_graph()?;

    if dot {
        print!("{}", render_dot(&graph));
    } else {
        print!("{}", render_tree(&graph));
    }
    Ok(())
}

fn render_tree(graph: &BuildGraph) -> String {
    let mut out = String::new();
    for id in graph.command_ids() {
        let command = graph.command(id);
        out.push_str(&format!("{}\n", command.tag));
        for &input in &command.inputs {
            out.push_str(&format!("  <- {}\n", graph.file(input).path.display()));
        }
        for &output in &command.outputs {
            out.push_str(&format!("  -> {}\n", graph.file(output).path.display()));
        }
    }
    out
}

fn render_dot(graph: &BuildGraph) -> String {
    let mut out = String::from("digraph build {\n  rankdir=LR;\n");
    for id in graph.ids() {
        match graph.node(id) {
            Node::Command(command) => {
                out.push_str(&format!(
                    "  n{} [shape=box, label=\"{}\"];\n",
                    id.index(),
                    command.tag
                ));
            }
            Node::File(file) => {
                let name = file
                    .path
                    .file_name()
                    .map_or_else(|| file.path.display().to_string(), |n| {
                        n.to_string_lossy().into_owned()
                    });
                out.push_str(&format!(
                    "  n{} [shape=ellipse, label=\"{}\"];\n",
                    id.index(),
                    name
                ));
            }
        }
    }
    for id in graph.command_ids() {
        let command = graph.command(id);
        for &input in &command.inputs {
            out.push_str(&format!("  n{} -> n{};\n", input.index(), id.index()));
        }
        for &output in &command.outputs {
            out.push_str(&format!("  n{} -> n{};\n", id.index(), output.index()));
        }
    }
    out.push_str("}\n");
    out
}
