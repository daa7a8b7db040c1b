//! The pipeline graph: nodes, edges, and the pipes that connect them.
//!
//! Edges and nodes live in separate arenas and refer to each other only by
//! string id (resolved to a `usize` index once at construction time). Pipes
//! live in their own arenas too (`edge_pipes`, `output_streams`), indexed in
//! parallel with `edges`/`nodes` respectively, rather than being owned
//! directly by `Node` — a `Pipe` is conceptually shared between a source and
//! a destination node, and giving it one unambiguous owner (the `Graph`)
//! avoids owning pointers running in both directions across that cycle of
//! references (design note in §9).

use crate::{
    error::{LaunchError, ParseError},
    pipe::Pipe,
    util::Pid,
};
use std::collections::HashMap;

/// The kind of external process a node represents.
///
/// Only `Exec` is interpreted by the core launcher; the other variants are
/// convenience sugar resolved to a `cmd` string at launch time (see
/// `launcher::resolve_command`). Unknown kinds in the source document
/// degrade to `Exec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Exec,
    ReadFile,
    WriteFile,
    Sink,
}

impl NodeKind {
    pub(crate) fn parse(raw: &str) -> NodeKind {
        match raw {
            "read-file" => NodeKind::ReadFile,
            "write-file" => NodeKind::WriteFile,
            "sink" => NodeKind::Sink,
            _ => NodeKind::Exec,
        }
    }
}

/// One external process in the pipeline.
#[derive(Debug)]
pub struct Node {
    pub id: String,
    pub kind: NodeKind,
    pub subtype: Option<String>,
    pub cmd: String,
    pub name: Option<String>,

    /// Indices, into `Graph::edges`, of edges whose `to` is this node, in
    /// document order. Only `inbound_edges[0]` is ever wired to the child's
    /// stdin (Open Question #2); the rest are advisory.
    pub(crate) inbound_edges: Vec<usize>,
    /// Indices, into `Graph::edges`, of edges whose `from` is this node.
    pub(crate) outbound_edges: Vec<usize>,

    pub pid: Option<Pid>,
    pub terminated: bool,
}

impl Node {
    /// Whether this node is a fan-out source (more than one outbound edge).
    pub fn is_fanout(&self) -> bool {
        self.outbound_edges.len() > 1
    }

    pub fn stdin_edge(&self) -> Option<usize> {
        self.inbound_edges.first().copied()
    }
}

/// A directed byte stream from one node's stdout to another's stdin.
#[derive(Debug)]
pub struct Edge {
    pub id: String,
    pub from_node: String,
    pub from_port: Option<String>,
    pub to_node: String,
    pub to_port: Option<String>,
    pub bytes_transported: u64,

    pub(crate) from_index: usize,
    pub(crate) to_index: usize,
}

/// The pipeline DAG: nodes, edges, their pipes, and lookup tables keyed by
/// id and pid.
pub struct Graph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    /// One consumer-facing pipe per edge, parallel to `edges`. Populated by
    /// `wire_pipes`; empty (`None` entries) before that runs.
    pub(crate) edge_pipes: Vec<Option<Pipe>>,
    /// The node output stream for each node, parallel to `nodes`. `None`
    /// for a node with no outbound edges, or before `wire_pipes` runs.
    pub(crate) output_streams: Vec<Option<Pipe>>,
    node_by_id: HashMap<String, usize>,
    edge_by_id: HashMap<String, usize>,
}

impl Graph {
    /// Builds a graph from already-resolved node and edge records.
    ///
    /// All invariants (id uniqueness, resolvable endpoints, no self-loops,
    /// acyclicity) are checked before anything is returned: construction is
    /// all-or-nothing, so there is nothing to leak on a partial failure.
    pub(crate) fn new(
        raw_nodes: Vec<(String, NodeKind, Option<String>, String, Option<String>)>,
        raw_edges: Vec<(String, String, String)>,
    ) -> Result<Graph, ParseError> {
        let mut node_by_id = HashMap::with_capacity(raw_nodes.len());
        let mut nodes = Vec::with_capacity(raw_nodes.len());
        for (id, kind, subtype, cmd, name) in raw_nodes {
            if node_by_id.contains_key(&id) {
                return Err(ParseError::DuplicateNodeId(id));
            }
            node_by_id.insert(id.clone(), nodes.len());
            nodes.push(Node {
                id,
                kind,
                subtype,
                cmd,
                name,
                inbound_edges: Vec::new(),
                outbound_edges: Vec::new(),
                pid: None,
                terminated: false,
            });
        }

        let mut edge_by_id = HashMap::with_capacity(raw_edges.len());
        let mut edges = Vec::with_capacity(raw_edges.len());
        for (id, from, to) in raw_edges {
            if edge_by_id.contains_key(&id) {
                return Err(ParseError::DuplicateEdgeId(id));
            }
            let (from_node, from_port) = split_port(&from);
            let (to_node, to_port) = split_port(&to);
            let from_index = *node_by_id
                .get(&from_node)
                .ok_or_else(|| ParseError::UnknownNode {
                    edge: id.clone(),
                    node: from_node.clone(),
                })?;
            let to_index = *node_by_id
                .get(&to_node)
                .ok_or_else(|| ParseError::UnknownNode {
                    edge: id.clone(),
                    node: to_node.clone(),
                })?;
            if from_node == to_node {
                return Err(ParseError::SelfLoop(id));
            }

            edge_by_id.insert(id.clone(), edges.len());
            edges.push(Edge {
                id,
                from_node,
                from_port,
                to_node,
                to_port,
                bytes_transported: 0,
                from_index,
                to_index,
            });
        }

        for (edge_index, edge) in edges.iter().enumerate() {
            nodes[edge.from_index].outbound_edges.push(edge_index);
            nodes[edge.to_index].inbound_edges.push(edge_index);
        }

        let edge_pipes = (0..edges.len()).map(|_| None).collect();
        let output_streams = (0..nodes.len()).map(|_| None).collect();

        let graph = Graph {
            nodes,
            edges,
            edge_pipes,
            output_streams,
            node_by_id,
            edge_by_id,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Creates every pipe named in §4.2: a node-output-stream pipe for each
    /// node with ≥1 outbound edge, and one consumer-facing pipe per edge.
    /// Must run after `Graph::new` succeeds and before `launcher::launch_all`.
    pub(crate) fn wire_pipes(&mut self) -> Result<(), LaunchError> {
        for idx in 0..self.nodes.len() {
            if !self.nodes[idx].outbound_edges.is_empty() {
                let node_id = self.nodes[idx].id.clone();
                let pipe = Pipe::new(None).map_err(|cause| LaunchError::OutputStream {
                    node: node_id,
                    cause,
                })?;
                self.output_streams[idx] = Some(pipe);
            }
        }
        for edge_idx in 0..self.edges.len() {
            let edge_id = self.edges[edge_idx].id.clone();
            let pipe = Pipe::new(Some(edge_id.clone())).map_err(|cause| LaunchError::Pipe {
                edge: edge_id,
                cause,
            })?;
            self.edge_pipes[edge_idx] = Some(pipe);
        }
        Ok(())
    }

    pub fn node_by_id(&self, id: &str) -> Option<&Node> {
        self.node_by_id.get(id).map(|&idx| &self.nodes[idx])
    }

    pub fn node_by_id_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.node_by_id
            .get(id)
            .copied()
            .map(move |idx| &mut self.nodes[idx])
    }

    /// Linear scan by child pid; acceptable given graph sizes are small.
    pub fn node_by_pid(&self, pid: Pid) -> Option<&Node> {
        self.nodes.iter().find(|n| n.pid == Some(pid))
    }

    pub fn node_index_by_pid(&self, pid: Pid) -> Option<usize> {
        self.nodes.iter().position(|n| n.pid == Some(pid))
    }

    pub fn edge_by_id(&self, id: &str) -> Option<&Edge> {
        self.edge_by_id.get(id).map(|&idx| &self.edges[idx])
    }

    pub fn edge_index_by_id(&self, id: &str) -> Option<usize> {
        self.edge_by_id.get(id).copied()
    }

    pub fn source_of(&self, edge: &Edge) -> &Node {
        &self.nodes[edge.from_index]
    }

    pub fn destination_of(&self, edge: &Edge) -> &Node {
        &self.nodes[edge.to_index]
    }

    fn check_acyclic(&self) -> Result<(), ParseError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];

        fn visit(graph: &Graph, idx: usize, marks: &mut [Mark]) -> Result<(), ParseError> {
            match marks[idx] {
                Mark::Done => return Ok(()),
                Mark::InProgress => return Err(ParseError::Cyclic),
                Mark::Unvisited => {}
            }
            marks[idx] = Mark::InProgress;
            for &edge_idx in &graph.nodes[idx].outbound_edges {
                let next = graph.edges[edge_idx].to_index;
                visit(graph, next, marks)?;
            }
            marks[idx] = Mark::Done;
            Ok(())
        }

        for idx in 0..self.nodes.len() {
            visit(self, idx, &mut marks)?;
        }
        Ok(())
    }
}

/// Splits `nodeId` or `nodeId:portLabel` on the first colon.
fn split_port(raw: &str) -> (String, Option<String>) {
    match raw.split_once(':') {
        Some((node, port)) => (node.to_string(), Some(port.to_string())),
        None => (raw.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> (String, NodeKind, Option<String>, String, Option<String>) {
        (id.to_string(), NodeKind::Exec, None, "cat".to_string(), None)
    }

    fn edge(id: &str, from: &str, to: &str) -> (String, String, String) {
        (id.to_string(), from.to_string(), to.to_string())
    }

    #[test]
    fn builds_linear_graph() {
        let graph = Graph::new(vec![node("a"), node("b")], vec![edge("e1", "a", "b")]).unwrap();
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.node_by_id("a").unwrap().outbound_edges, vec![0]);
        assert_eq!(graph.node_by_id("b").unwrap().inbound_edges, vec![0]);
    }

    #[test]
    fn rejects_duplicate_node_id() {
        let err = Graph::new(vec![node("a"), node("a")], vec![]).unwrap_err();
        assert!(matches!(err, ParseError::DuplicateNodeId(id) if id == "a"));
    }

    #[test]
    fn rejects_duplicate_edge_id() {
        let err = Graph::new(
            vec![node("a"), node("b"), node("c")],
            vec![edge("e1", "a", "b"), edge("e1", "b", "c")],
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::DuplicateEdgeId(id) if id == "e1"));
    }

    #[test]
    fn rejects_unknown_endpoint() {
        let err = Graph::new(vec![node("a")], vec![edge("e1", "a", "ghost")]).unwrap_err();
        assert!(matches!(err, ParseError::UnknownNode { .. }));
    }

    #[test]
    fn rejects_self_loop() {
        let err = Graph::new(vec![node("a")], vec![edge("e1", "a", "a")]).unwrap_err();
        assert!(matches!(err, ParseError::SelfLoop(id) if id == "e1"));
    }

    #[test]
    fn rejects_cycle() {
        let err = Graph::new(
            vec![node("a"), node("b"), node("c")],
            vec![
                edge("e1", "a", "b"),
                edge("e2", "b", "c"),
                edge("e3", "c", "a"),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, ParseError::Cyclic));
    }

    #[test]
    fn fanout_detection() {
        let graph = Graph::new(
            vec![node("a"), node("b"), node("c")],
            vec![edge("e1", "a", "b"), edge("e2", "a", "c")],
        )
        .unwrap();
        assert!(graph.node_by_id("a").unwrap().is_fanout());
        assert!(!graph.node_by_id("b").unwrap().is_fanout());
    }

    #[test]
    fn splits_port_labels() {
        let graph = Graph::new(
            vec![node("a"), node("b")],
            vec![edge("e1", "a:out", "b:in")],
        )
        .unwrap();
        let e = graph.edge_by_id("e1").unwrap();
        assert_eq!(e.from_port.as_deref(), Some("out"));
        assert_eq!(e.to_port.as_deref(), Some("in"));
    }

    #[test]
    fn wire_pipes_creates_output_stream_only_for_sources() {
        let mut graph = Graph::new(
            vec![node("a"), node("b"), node("c")],
            vec![edge("e1", "a", "b"), edge("e2", "a", "c")],
        )
        .unwrap();
        graph.wire_pipes().unwrap();
        assert!(graph.output_streams[0].is_some());
        assert!(graph.output_streams[1].is_none());
        assert!(graph.edge_pipes[0].is_some());
        assert!(graph.edge_pipes[1].is_some());
    }
}
