//! Executes a user-supplied DAG of external processes connected by kernel
//! pipes, fanning a single producer out to multiple consumers via
//! `tee(2)`/`splice(2)` with a safe reclamation discipline so the shared
//! producer buffer never grows unbounded.
//!
//! The core does not buffer, transform, or inspect byte stream contents; it
//! performs no flow control beyond kernel pipe buffers, does not retry
//! failed processes, and keeps no state across a crash or restart.

pub mod error;
pub mod graph;
mod launcher;
mod parser;
mod pipe;
mod reactor;
mod stats;
mod supervisor;
mod util;

pub use error::{EngineError, LaunchError, ParseError};
pub use graph::{Edge, Graph, Node, NodeKind};
pub use parser::{graph_from_document, load_graph, EdgeDocument, NodeDocument, PipelineDocument};
pub use reactor::ReactorConfig;

/// Runs a validated graph to completion: launches every node's child
/// process and drives the splice/tee reactor until every node has
/// terminated or an interrupt is received.
pub fn run(graph: Graph, config: ReactorConfig) -> Result<(), EngineError> {
    reactor::run(graph, config)
}
