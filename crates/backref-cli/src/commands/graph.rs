//! Graph export handlers

use anyhow::Result;

use backref_core::Query;

use crate::output::{Output, OutputFormat};

/// Export the link graph
///
/// Human output is Graphviz dot; `--json` gives nodes and edges.
pub fn export(query: &Query, output: &Output) -> Result<()> {
    let graph = query.graph()?;

    match output.format {
        OutputFormat::Json => output.json(&graph)?,
        OutputFormat::Quiet => {
            for edge in &graph.edges {
                println!("{}\t{}", edge.source.display(), edge.target.display());
            }
        }
        OutputFormat::Human => {
            println!("digraph backref {{");
            for node in &graph.nodes {
                println!(
                    "  {:?} [label={:?}];",
                    node.identity.display().to_string(),
                    node.title
                );
            }
            for edge in &graph.edges {
                println!(
                    "  {:?} -> {:?};",
                    edge.source.display().to_string(),
                    edge.target.display().to_string()
                );
            }
            println!("}}");
        }
    }
    Ok(())
}

/// List links whose target is not indexed
pub fn dangling(query: &Query, output: &Output) -> Result<()> {
    output.print_dangling(&query.dangling_links()?)
}
