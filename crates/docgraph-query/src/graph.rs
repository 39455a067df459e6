//! Pattern graph of a MATCH clause
//!
//! Nodes, edges and edge attributes live in arenas owned by [`MatchGraph`]
//! and refer to each other by index. A forward edge and its synthesized
//! reverse counterpart point at the same [`EdgeAttributes`] slot, so a
//! predicate or property added through either alias is seen by both.

use crate::ast::{BooleanExpr, Literal};
use crate::script::{NodeScript, ReverseCheck};
use docgraph_core::{Direction, PropertyName};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Index of a node in the graph arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub usize);

/// Index of an edge in the graph arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EdgeId(pub usize);

/// Index of a shared predicate/property record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AttributesId(pub usize);

/// One queried vertex alias
#[derive(Debug, Clone)]
pub struct MatchNode {
    pub alias: String,

    /// Edges leaving this node whose sink is part of the pattern
    pub neighbors: Vec<EdgeId>,

    /// Synthesized reverse edges leaving this node
    pub reverse_neighbors: Vec<EdgeId>,

    /// Edges leaving this node with no sink in the pattern
    pub dangling_edges: Vec<EdgeId>,

    pub predicates: Vec<BooleanExpr>,

    /// Required properties, deduplicated, in order of first reference
    pub properties: Vec<PropertyName>,

    pub script: Option<NodeScript>,

    /// Joins decoded by this node's script, checked against earlier
    /// nodes when this one is traversed to
    pub reverse_checks: Vec<ReverseCheck>,

    /// Bound by an enclosing query rather than fetched by this one
    pub is_from_outer_context: bool,
}

impl MatchNode {
    fn new(alias: &str, properties: Vec<PropertyName>) -> Self {
        Self {
            alias: alias.to_string(),
            neighbors: Vec::new(),
            reverse_neighbors: Vec::new(),
            dangling_edges: Vec::new(),
            predicates: Vec::new(),
            properties,
            script: None,
            reverse_checks: Vec::new(),
            is_from_outer_context: false,
        }
    }

    /// Add a required property, returning false if it was already present
    pub fn add_property(&mut self, property: PropertyName) -> bool {
        if self.properties.contains(&property) {
            return false;
        }
        self.properties.push(property);
        true
    }
}

/// Predicates and required properties of an edge
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EdgeAttributes {
    pub predicates: Vec<BooleanExpr>,
    pub properties: Vec<PropertyName>,
}

impl EdgeAttributes {
    pub fn add_property(&mut self, property: PropertyName) -> bool {
        if self.properties.contains(&property) {
            return false;
        }
        self.properties.push(property);
        true
    }
}

/// Single hop or variable-length edge
#[derive(Debug, Clone, PartialEq)]
pub enum EdgeKind {
    Single,
    Path {
        min_length: u32,
        max_length: u32,
        /// Per-hop equality filters on edge attributes
        attribute_values: Vec<(String, Literal)>,
    },
}

/// One traversed relationship of the pattern
#[derive(Debug, Clone)]
pub struct MatchEdge {
    pub alias: String,
    pub label: String,
    pub source: NodeId,
    pub sink: Option<NodeId>,

    /// Adjacency list(s) of the source to decode: forward, reverse or both
    pub edge_type: Direction,

    /// Synthesized counterpart of a forward edge
    pub is_reversed: bool,

    pub attributes: AttributesId,
    pub kind: EdgeKind,

    /// The forward edge of a reverse edge and vice versa
    pub counterpart: Option<EdgeId>,

    pub is_from_outer_context: bool,
}

impl MatchEdge {
    pub fn is_path(&self) -> bool {
        matches!(self.kind, EdgeKind::Path { .. })
    }

    pub fn is_dangling(&self) -> bool {
        self.sink.is_none()
    }
}

/// How an edge is enumerated at the node it is materialized on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Materialization {
    /// Joined inside the node's fetch script
    Eager,
    /// Decoded from the node's adjacency list in the operator pipeline
    Deferred,
}

/// One step of a traversal chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalStep {
    pub source: NodeId,
    pub edge: Option<EdgeId>,
    pub sink: Option<NodeId>,

    /// Edges into already-bound nodes, joined in the sink's script
    pub backward_matching: Vec<EdgeId>,

    /// Edges decoded after this step and checked against a bound sink
    pub forward_matching: Vec<EdgeId>,
}

impl TraversalStep {
    pub fn start(source: NodeId) -> Self {
        Self {
            source,
            edge: None,
            sink: None,
            backward_matching: Vec::new(),
            forward_matching: Vec::new(),
        }
    }

    pub fn traverse(source: NodeId, edge: EdgeId, sink: NodeId) -> Self {
        Self {
            edge: Some(edge),
            sink: Some(sink),
            ..Self::start(source)
        }
    }
}

/// A maximal connected sub-pattern
#[derive(Debug, Clone, Default)]
pub struct ConnectedComponent {
    pub nodes: BTreeMap<String, NodeId>,

    /// Forward and dangling edges by alias
    pub edges: BTreeMap<String, EdgeId>,

    /// Nodes that end a MATCH path
    pub tails: BTreeSet<NodeId>,

    pub traversal_chain: Vec<TraversalStep>,
    pub materialized_edges: BTreeMap<NodeId, Vec<(EdgeId, Materialization)>>,
}

impl ConnectedComponent {
    pub fn is_tail(&self, node: NodeId) -> bool {
        self.tails.contains(&node)
    }

    /// Edges joined inside the given node's fetch script
    pub fn eager_edges(&self, node: NodeId) -> Vec<EdgeId> {
        self.materialized_edges
            .get(&node)
            .map(|edges| {
                edges
                    .iter()
                    .filter(|(_, how)| *how == Materialization::Eager)
                    .map(|(edge, _)| *edge)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn materialize(&mut self, node: NodeId, edge: EdgeId, how: Materialization) {
        let edges = self.materialized_edges.entry(node).or_default();
        if !edges.iter().any(|(e, _)| *e == edge) {
            edges.push((edge, how));
        }
    }
}

/// The complete pattern of a query block
#[derive(Debug, Clone, Default)]
pub struct MatchGraph {
    pub nodes: Vec<MatchNode>,
    pub edges: Vec<MatchEdge>,
    pub attributes: Vec<EdgeAttributes>,
    pub components: Vec<ConnectedComponent>,

    /// Reverse edge of every single-hop forward edge, by alias
    pub reversed_edges: HashMap<String, EdgeId>,

    /// Edge aliases declared under each label
    pub edge_labels: BTreeMap<String, Vec<String>>,

    node_index: HashMap<String, NodeId>,
    edge_index: HashMap<String, EdgeId>,
}

impl MatchGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the node for an alias
    pub(crate) fn get_or_add_node(
        &mut self,
        alias: &str,
        default_properties: &[PropertyName],
    ) -> NodeId {
        if let Some(&id) = self.node_index.get(alias) {
            return id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes
            .push(MatchNode::new(alias, default_properties.to_vec()));
        self.node_index.insert(alias.to_string(), id);
        id
    }

    pub(crate) fn add_attributes(&mut self, attributes: EdgeAttributes) -> AttributesId {
        let id = AttributesId(self.attributes.len());
        self.attributes.push(attributes);
        id
    }

    /// Append an edge; forward edges are indexed by alias
    pub(crate) fn add_edge(&mut self, edge: MatchEdge) -> EdgeId {
        let id = EdgeId(self.edges.len());
        if !edge.is_reversed {
            self.edge_index.insert(edge.alias.clone(), id);
        }
        self.edges.push(edge);
        id
    }

    pub fn node(&self, id: NodeId) -> &MatchNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut MatchNode {
        &mut self.nodes[id.0]
    }

    pub fn edge(&self, id: EdgeId) -> &MatchEdge {
        &self.edges[id.0]
    }

    pub fn edge_mut(&mut self, id: EdgeId) -> &mut MatchEdge {
        &mut self.edges[id.0]
    }

    pub fn edge_attributes(&self, id: EdgeId) -> &EdgeAttributes {
        &self.attributes[self.edges[id.0].attributes.0]
    }

    pub fn edge_attributes_mut(&mut self, id: EdgeId) -> &mut EdgeAttributes {
        let slot = self.edges[id.0].attributes.0;
        &mut self.attributes[slot]
    }

    pub fn node_id(&self, alias: &str) -> Option<NodeId> {
        self.node_index.get(alias).copied()
    }

    /// Forward (or dangling) edge declared under an alias
    pub fn edge_id(&self, alias: &str) -> Option<EdgeId> {
        self.edge_index.get(alias).copied()
    }

    pub fn reverse_of(&self, alias: &str) -> Option<EdgeId> {
        self.reversed_edges.get(alias).copied()
    }

    pub fn contains_alias(&self, alias: &str) -> bool {
        self.node_index.contains_key(alias) || self.edge_index.contains_key(alias)
    }

    /// Resolve an edge label used in place of an alias.
    /// Only labels declared by exactly one edge are resolvable.
    pub fn resolve_label(&self, label: &str) -> Option<&str> {
        match self.edge_labels.get(label) {
            Some(aliases) if aliases.len() == 1 => Some(aliases[0].as_str()),
            _ => None,
        }
    }

    /// Node aliases in creation order
    pub fn node_aliases(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.alias.as_str())
    }

    /// Add a required property to a node or edge alias
    pub fn require_property(&mut self, alias: &str, property: PropertyName) -> bool {
        if let Some(node) = self.node_id(alias) {
            return self.node_mut(node).add_property(property);
        }
        if let Some(edge) = self.edge_id(alias) {
            return self.edge_attributes_mut(edge).add_property(property);
        }
        false
    }

    /// Attach a single-table predicate to a node or edge alias
    pub fn attach_predicate(&mut self, alias: &str, predicate: BooleanExpr) -> bool {
        if let Some(node) = self.node_id(alias) {
            self.node_mut(node).predicates.push(predicate);
            return true;
        }
        if let Some(edge) = self.edge_id(alias) {
            self.edge_attributes_mut(edge).predicates.push(predicate);
            return true;
        }
        false
    }

    pub fn component_of(&self, node: NodeId) -> Option<usize> {
        let alias = &self.node(node).alias;
        self.components
            .iter()
            .position(|c| c.nodes.contains_key(alias))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(alias: &str, source: NodeId, sink: NodeId, attributes: AttributesId) -> MatchEdge {
        MatchEdge {
            alias: alias.to_string(),
            label: "knows".to_string(),
            source,
            sink: Some(sink),
            edge_type: Direction::Outgoing,
            is_reversed: false,
            attributes,
            kind: EdgeKind::Single,
            counterpart: None,
            is_from_outer_context: false,
        }
    }

    #[test]
    fn test_get_or_add_node_is_idempotent() {
        let mut graph = MatchGraph::new();
        let defaults = vec![PropertyName::named("id")];
        let a = graph.get_or_add_node("a", &defaults);
        let again = graph.get_or_add_node("a", &defaults);
        assert_eq!(a, again);
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.node(a).properties, defaults);
    }

    #[test]
    fn test_shared_attributes_between_counterparts() {
        let mut graph = MatchGraph::new();
        let a = graph.get_or_add_node("a", &[]);
        let b = graph.get_or_add_node("b", &[]);
        let attrs = graph.add_attributes(EdgeAttributes::default());
        let forward = graph.add_edge(edge("e", a, b, attrs));
        let mut reverse = edge("e", b, a, attrs);
        reverse.is_reversed = true;
        let reverse = graph.add_edge(reverse);

        assert!(graph.require_property("e", PropertyName::named("weight")));
        assert!(!graph.require_property("e", PropertyName::named("weight")));
        assert_eq!(
            graph.edge_attributes(reverse).properties,
            vec![PropertyName::named("weight")]
        );
        assert_eq!(graph.edge_id("e"), Some(forward));
    }

    #[test]
    fn test_resolve_label_requires_single_alias() {
        let mut graph = MatchGraph::new();
        graph
            .edge_labels
            .insert("knows".to_string(), vec!["a_knows_b".to_string()]);
        graph.edge_labels.insert(
            "likes".to_string(),
            vec!["a_likes_b".to_string(), "b_likes_c".to_string()],
        );

        assert_eq!(graph.resolve_label("knows"), Some("a_knows_b"));
        assert_eq!(graph.resolve_label("likes"), None);
        assert_eq!(graph.resolve_label("missing"), None);
    }

    #[test]
    fn test_materialize_deduplicates() {
        let mut component = ConnectedComponent::default();
        component.materialize(NodeId(0), EdgeId(1), Materialization::Eager);
        component.materialize(NodeId(0), EdgeId(1), Materialization::Deferred);
        component.materialize(NodeId(0), EdgeId(2), Materialization::Deferred);

        assert_eq!(component.eager_edges(NodeId(0)), vec![EdgeId(1)]);
        assert_eq!(component.materialized_edges[&NodeId(0)].len(), 2);
    }
}
