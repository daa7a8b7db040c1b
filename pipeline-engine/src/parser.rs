//! Pipeline description parser (§6): turns the serialized JSON document into
//! a validated [`Graph`]. An ambient collaborator in the distilled spec's
//! scope, implemented here the way the teacher validates its own config
//! structures (`LinuxSandbox`/`JailOptions`) — reject malformed input
//! eagerly, before any process is spawned.

use crate::{
    error::ParseError,
    graph::{Graph, NodeKind},
};
use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize, Debug)]
pub struct PipelineDocument {
    pub nodes: Vec<NodeDocument>,
    pub edges: Vec<EdgeDocument>,
}

#[derive(Deserialize, Debug)]
pub struct NodeDocument {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub subtype: Option<String>,
    pub cmd: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct EdgeDocument {
    pub id: String,
    pub from: String,
    pub to: String,
}

/// Reads and parses a pipeline description file, then converts it into a
/// validated [`Graph`]. Fatal at startup: no loop is ever started on a
/// parse failure (§7).
pub fn load_graph(path: &Path) -> Result<Graph, ParseError> {
    let text = std::fs::read_to_string(path).map_err(|cause| ParseError::Io {
        path: path.to_path_buf(),
        cause,
    })?;
    let doc: PipelineDocument = serde_json::from_str(&text)?;
    graph_from_document(doc)
}

/// Converts an already-deserialized document into a validated [`Graph`].
/// Split out from [`load_graph`] so tests can exercise the validation logic
/// without touching the filesystem.
pub fn graph_from_document(doc: PipelineDocument) -> Result<Graph, ParseError> {
    let raw_nodes = doc
        .nodes
        .into_iter()
        .map(|n| {
            (
                n.id,
                NodeKind::parse(&n.kind),
                n.subtype,
                n.cmd,
                n.name,
            )
        })
        .collect();
    let raw_edges = doc
        .edges
        .into_iter()
        .map(|e| (e.id, e.from, e.to))
        .collect();
    Graph::new(raw_nodes, raw_edges)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(json: &str) -> PipelineDocument {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parses_linear_pipeline() {
        let d = doc(
            r#"{
                "nodes": [
                    {"id": "a", "type": "exec", "cmd": "echo abcde"},
                    {"id": "b", "type": "exec", "cmd": "cat"}
                ],
                "edges": [
                    {"id": "e1", "from": "a", "to": "b"}
                ]
            }"#,
        );
        let graph = graph_from_document(d).unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 1);
    }

    #[test]
    fn unknown_kind_degrades_to_exec() {
        let d = doc(
            r#"{
                "nodes": [{"id": "a", "type": "mystery", "cmd": "true"}],
                "edges": []
            }"#,
        );
        let graph = graph_from_document(d).unwrap();
        assert_eq!(graph.nodes[0].kind, NodeKind::Exec);
    }

    #[test]
    fn splits_port_labels_in_from_and_to() {
        let d = doc(
            r#"{
                "nodes": [
                    {"id": "a", "type": "exec", "cmd": "true"},
                    {"id": "b", "type": "exec", "cmd": "true"}
                ],
                "edges": [{"id": "e1", "from": "a:out", "to": "b:in"}]
            }"#,
        );
        let graph = graph_from_document(d).unwrap();
        let e = graph.edge_by_id("e1").unwrap();
        assert_eq!(e.from_port.as_deref(), Some("out"));
        assert_eq!(e.to_port.as_deref(), Some("in"));
    }

    #[test]
    fn rejects_cycle_in_document() {
        let d = doc(
            r#"{
                "nodes": [
                    {"id": "a", "type": "exec", "cmd": "true"},
                    {"id": "b", "type": "exec", "cmd": "true"}
                ],
                "edges": [
                    {"id": "e1", "from": "a", "to": "b"},
                    {"id": "e2", "from": "b", "to": "a"}
                ]
            }"#,
        );
        let err = graph_from_document(d).unwrap_err();
        assert!(matches!(err, ParseError::Cyclic));
    }

    #[test]
    fn rejects_missing_required_field() {
        let result: Result<PipelineDocument, _> = serde_json::from_str(
            r#"{"nodes": [{"id": "a", "type": "exec"}], "edges": []}"#,
        );
        assert!(result.is_err());
    }
}
