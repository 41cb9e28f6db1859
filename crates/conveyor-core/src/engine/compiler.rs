//! Definition validation and executable plan construction.
//!
//! Uses `petgraph` to model the node/edge graph. Compilation is pure: it
//! validates structure, picks the entry point, and produces a `CompiledPlan`
//! the executor walks -- it never touches the run store, so a malformed
//! definition fails before any run row exists.

use std::collections::HashMap;

use conveyor_types::flow::{FlowDefinition, NodeConfig, NodeDefinition};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Structural validation failures. All are raised synchronously from
/// `compile`, before any run exists.
#[derive(Debug, Error)]
pub enum CompileError {
    /// Two nodes share an id.
    #[error("duplicate node id: '{0}'")]
    DuplicateNode(String),

    /// An edge endpoint references a node that was never declared.
    #[error("edge {from} -> {target} references undeclared node '{missing}'")]
    DanglingEdge {
        from: String,
        target: String,
        missing: String,
    },

    /// More than one start node was declared.
    #[error("definition declares {0} start nodes; at most one is allowed")]
    MultipleStartNodes(usize),

    /// A non-condition node has more than one outgoing edge. The engine
    /// walks one node at a time; only conditions branch.
    #[error("node '{node}' has {count} outgoing edges; only condition nodes may branch")]
    FanOut { node: String, count: usize },

    /// An end node has outgoing edges.
    #[error("end node '{0}' must not have outgoing edges")]
    EndWithOutgoing(String),

    /// A condition branch names a node that is not one of its successors.
    #[error("condition '{node}' branch targets '{branch}', which is not an outgoing edge target")]
    BranchNotSuccessor { node: String, branch: String },

    /// The graph contains a cycle.
    #[error("cycle detected involving node '{0}'")]
    Cycle(String),
}

// ---------------------------------------------------------------------------
// Compiled plan
// ---------------------------------------------------------------------------

/// An executable plan: validated nodes plus outgoing adjacency and a chosen
/// entry point.
#[derive(Debug, Clone)]
pub struct CompiledPlan {
    entry: Option<String>,
    nodes: HashMap<String, NodeDefinition>,
    outgoing: HashMap<String, Vec<String>>,
}

impl CompiledPlan {
    /// The node the walk starts from. `None` for an empty definition, which
    /// compiles to a trivial plan whose runs complete immediately.
    pub fn entry(&self) -> Option<&str> {
        self.entry.as_deref()
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&NodeDefinition> {
        self.nodes.get(id)
    }

    /// The single successor of a linear (non-condition) node, if any.
    pub fn successor(&self, id: &str) -> Option<&str> {
        self.outgoing
            .get(id)
            .and_then(|targets| targets.first())
            .map(String::as_str)
    }

    /// All outgoing edge targets of a node.
    pub fn successors(&self, id: &str) -> &[String] {
        self.outgoing
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Validate a definition and build its executable plan.
///
/// Checks, in order: unique node ids, edge endpoints referencing declared
/// nodes, at most one start node, per-kind outgoing-edge arity, condition
/// branch targets being actual successors, and acyclicity.
///
/// Entry selection: the start node if one is declared, otherwise the first
/// declared node. A definition without a start node is valid.
pub fn compile(definition: &FlowDefinition) -> Result<CompiledPlan, CompileError> {
    // Unique node ids
    let mut nodes: HashMap<String, NodeDefinition> = HashMap::new();
    for node in &definition.nodes {
        if nodes.insert(node.id.clone(), node.clone()).is_some() {
            return Err(CompileError::DuplicateNode(node.id.clone()));
        }
    }

    // Edge endpoints must be declared
    let mut outgoing: HashMap<String, Vec<String>> = HashMap::new();
    for edge in &definition.edges {
        for endpoint in [&edge.source, &edge.target] {
            if !nodes.contains_key(endpoint) {
                return Err(CompileError::DanglingEdge {
                    from: edge.source.clone(),
                    target: edge.target.clone(),
                    missing: endpoint.clone(),
                });
            }
        }
        outgoing
            .entry(edge.source.clone())
            .or_default()
            .push(edge.target.clone());
    }

    // Per-kind outgoing arity and branch targets
    for node in &definition.nodes {
        let targets = outgoing.get(&node.id).map(Vec::as_slice).unwrap_or_default();
        match &node.config {
            NodeConfig::Start {} | NodeConfig::Task { .. } => {
                if targets.len() > 1 {
                    return Err(CompileError::FanOut {
                        node: node.id.clone(),
                        count: targets.len(),
                    });
                }
            }
            NodeConfig::End {} => {
                if !targets.is_empty() {
                    return Err(CompileError::EndWithOutgoing(node.id.clone()));
                }
            }
            NodeConfig::Condition { on_true, on_false, .. } => {
                for branch in [on_true, on_false].into_iter().flatten() {
                    if !targets.iter().any(|t| t == branch) {
                        return Err(CompileError::BranchNotSuccessor {
                            node: node.id.clone(),
                            branch: branch.clone(),
                        });
                    }
                }
            }
        }
    }

    // Cycle detection via toposort
    let mut graph = DiGraph::<&str, ()>::new();
    let mut indices = HashMap::new();
    for node in &definition.nodes {
        indices.insert(node.id.as_str(), graph.add_node(node.id.as_str()));
    }
    for edge in &definition.edges {
        graph.add_edge(indices[edge.source.as_str()], indices[edge.target.as_str()], ());
    }
    toposort(&graph, None).map_err(|cycle| {
        CompileError::Cycle(graph[cycle.node_id()].to_string())
    })?;

    // Entry: the start node if declared, else the first declared node
    let start_ids: Vec<&str> = definition
        .nodes
        .iter()
        .filter(|n| matches!(n.config, NodeConfig::Start {}))
        .map(|n| n.id.as_str())
        .collect();
    let entry = match start_ids.as_slice() {
        [] => definition.nodes.first().map(|n| n.id.clone()),
        [only] => Some(only.to_string()),
        many => return Err(CompileError::MultipleStartNodes(many.len())),
    };

    Ok(CompiledPlan { entry, nodes, outgoing })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
