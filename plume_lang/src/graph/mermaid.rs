//! Mermaid rendering of a [`FlowGraph`], for debugging rewrites.

use std::fmt::Write;

use itertools::Itertools;
use slotmap::Key;

use super::ops::DeferredOp;
use super::FlowGraph;

/// Escapes a string for use in a mermaid node label.
pub fn escape_mermaid(string: &str) -> String {
    string
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('#', "&num;")
        .replace('(', "&#40;")
        .replace(')', "&#41;")
        .replace('|', "&#124;")
}

fn op_class(op: &DeferredOp) -> &'static str {
    match op {
        DeferredOp::ParallelDo { .. } | DeferredOp::MultipleParallelDo { .. } => "transformClass",
        DeferredOp::GroupByKey { .. } => "shuffleClass",
        DeferredOp::Flatten { .. } => "unionClass",
        DeferredOp::OneToOne { .. } => "passthroughClass",
    }
}

fn op_label(op: &DeferredOp) -> String {
    match op {
        DeferredOp::ParallelDo { f, .. } => format!("{}({})", op.kind(), f.label()),
        DeferredOp::MultipleParallelDo { dests, .. } => format!(
            "multiple_parallel_do({})",
            dests.iter().map(|(f, _)| f.label()).join(", ")
        ),
        _ => op.kind().to_owned(),
    }
}

/// Renders the whole graph as a mermaid flowchart. Collections are
/// rectangles (double-walled when materialized), ops are rounded.
pub fn render_mermaid(graph: &FlowGraph) -> String {
    let mut out = String::new();
    write_mermaid(graph, &mut out).expect("writing to a String cannot fail");
    out
}

/// Writes the mermaid flowchart into `out`.
pub fn write_mermaid(graph: &FlowGraph, out: &mut impl Write) -> std::fmt::Result {
    writeln!(out, "graph TD")?;
    writeln!(
        out,
        "classDef collectionClass fill:#8dd3c7,stroke:#86c8bd,text-align:left"
    )?;
    writeln!(
        out,
        "classDef transformClass fill:#ffffb3,stroke:#f5f5a8,text-align:left"
    )?;
    writeln!(
        out,
        "classDef shuffleClass fill:#fb8072,stroke:#ee796b,text-align:left"
    )?;
    writeln!(
        out,
        "classDef unionClass fill:#bebada,stroke:#b5b1cf,text-align:left"
    )?;
    writeln!(
        out,
        "classDef passthroughClass fill:#b3de69,stroke:#aad362,text-align:left"
    )?;

    for (id, collection) in graph.collections() {
        let key = id.data().as_ffi();
        let label = match collection.name() {
            Some(name) => escape_mermaid(name),
            None => format!("c{key}"),
        };
        let (lb, rb) = if collection.is_materialized() {
            ("[[", "]]")
        } else {
            ("[", "]")
        };
        writeln!(
            out,
            "c{key}{lb}\"{label}: {}\"{rb}:::collectionClass",
            escape_mermaid(collection.elem_type().name())
        )?;
    }

    for (id, op) in graph.ops() {
        let key = id.data().as_ffi();
        writeln!(
            out,
            "o{key}(\"{}\"):::{}",
            escape_mermaid(&op_label(op)),
            op_class(op)
        )?;
        for origin in op.origins() {
            writeln!(out, "c{}-->o{key}", origin.data().as_ffi())?;
        }
        for dest in op.dests() {
            writeln!(out, "o{key}-->c{}", dest.data().as_ffi())?;
        }
    }
    Ok(())
}
