//! Traversal-order selection
//!
//! Chooses, per connected component, the order in which nodes are fetched
//! and the edge used to reach each one. The search is a depth-first walk
//! with explicit visit states; every choice is ordered by alias so the same
//! query always yields the same chain.
//!
//! Edges left out of the spanning walk (cycles, parallel edges, self loops,
//! variable-length edges that could not be walked) are attached to the step
//! that binds their later endpoint:
//!
//! - backward matching: the later endpoint is the edge's source and is
//!   reached by a traversal. The edge is joined inside that node's fetch
//!   script and checked against the sink's id, already in the record.
//! - forward matching: everything else. The edge is decoded from its
//!   source in the pipeline and filtered on `_sink = sink.id`.

use crate::config::CompilerConfig;
use crate::graph::{EdgeId, EdgeKind, Materialization, MatchGraph, NodeId, TraversalStep};
use docgraph_core::Direction;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Unvisited,
    InProgress,
    Done,
}

pub struct TraversalOptimizer<'a> {
    config: &'a CompilerConfig,
}

impl<'a> TraversalOptimizer<'a> {
    pub fn new(config: &'a CompilerConfig) -> Self {
        Self { config }
    }

    /// Optimize every component of the graph
    pub fn optimize_all(&self, graph: &mut MatchGraph) {
        for idx in 0..graph.components.len() {
            self.optimize(graph, idx);
        }
    }

    /// Compute the traversal chain and edge materialization of one component
    pub fn optimize(&self, graph: &mut MatchGraph, component: usize) {
        let roots = self.root_candidates(graph, component);

        let mut state: HashMap<NodeId, VisitState> = roots
            .iter()
            .map(|&node| (node, VisitState::Unvisited))
            .collect();
        let mut chain: Vec<TraversalStep> = Vec::new();
        let mut tree_edges: BTreeSet<String> = BTreeSet::new();

        // A node reachable only over a variable-length edge pointing at it
        // cannot be walked to; it starts a new sub-chain instead.
        for &root in &roots {
            if state.get(&root) == Some(&VisitState::Unvisited) {
                chain.push(TraversalStep::start(root));
                Self::visit(graph, root, &mut state, &mut chain, &mut tree_edges);
            }
        }

        let mut materializations = Vec::new();
        for step in &chain {
            if let Some(edge_id) = step.edge {
                let edge = graph.edge(edge_id);
                if !edge.is_from_outer_context {
                    materializations.push((edge.source, edge_id, Materialization::Deferred));
                }
            }
        }

        let mut position: HashMap<NodeId, (usize, u8)> = HashMap::new();
        for (idx, step) in chain.iter().enumerate() {
            position.entry(step.source).or_insert((idx, 0));
            if let Some(sink) = step.sink {
                position.entry(sink).or_insert((idx, 1));
            }
        }

        let component_edges: Vec<(String, EdgeId)> = graph.components[component]
            .edges
            .iter()
            .map(|(alias, &edge)| (alias.clone(), edge))
            .collect();

        for (alias, edge_id) in component_edges {
            if tree_edges.contains(&alias) {
                continue;
            }
            let edge = graph.edge(edge_id);
            let materialize = !edge.is_from_outer_context;

            let Some(sink) = edge.sink else {
                if materialize {
                    materializations.push((edge.source, edge_id, Materialization::Deferred));
                }
                continue;
            };

            let (Some(&source_pos), Some(&sink_pos)) =
                (position.get(&edge.source), position.get(&sink))
            else {
                continue;
            };
            let later = source_pos.max(sink_pos);
            let step = &mut chain[later.0];

            let eager = self.config.eager_backward_matching
                && materialize
                && edge.kind == EdgeKind::Single
                && edge.edge_type != Direction::Both
                && source_pos > sink_pos
                && source_pos.1 == 1
                && !graph.node(edge.source).is_from_outer_context;

            if eager {
                step.backward_matching.push(edge_id);
                materializations.push((edge.source, edge_id, Materialization::Eager));
            } else {
                step.forward_matching.push(edge_id);
                if materialize {
                    materializations.push((edge.source, edge_id, Materialization::Deferred));
                }
            }
        }

        debug!(
            component,
            chain = %Self::describe(graph, &chain),
            "chose traversal order"
        );

        let component = &mut graph.components[component];
        component.traversal_chain = chain;
        component.materialized_edges.clear();
        for (node, edge, how) in materializations {
            component.materialize(node, edge, how);
        }
    }

    /// Component nodes ordered by preference as a traversal root: bound by
    /// an outer query, then most predicates, then path heads before tails,
    /// then alias.
    fn root_candidates(&self, graph: &MatchGraph, component: usize) -> Vec<NodeId> {
        let component = &graph.components[component];
        let mut nodes: Vec<NodeId> = component.nodes.values().copied().collect();
        nodes.sort_by_key(|&id| {
            let node = graph.node(id);
            (
                !node.is_from_outer_context,
                Reverse(node.predicates.len()),
                component.is_tail(id),
                node.alias.clone(),
            )
        });
        nodes
    }

    fn visit(
        graph: &MatchGraph,
        node: NodeId,
        state: &mut HashMap<NodeId, VisitState>,
        chain: &mut Vec<TraversalStep>,
        tree_edges: &mut BTreeSet<String>,
    ) {
        state.insert(node, VisitState::InProgress);

        let current = graph.node(node);
        let by_alias = |edges: &[EdgeId]| {
            let mut edges = edges.to_vec();
            edges.sort_by(|a, b| graph.edge(*a).alias.cmp(&graph.edge(*b).alias));
            edges
        };
        let mut candidates = by_alias(current.neighbors.as_slice());
        candidates.extend(by_alias(current.reverse_neighbors.as_slice()));

        for edge_id in candidates {
            let edge = graph.edge(edge_id);
            let Some(sink) = edge.sink else {
                continue;
            };
            if state.get(&sink) != Some(&VisitState::Unvisited) {
                continue;
            }
            if tree_edges.contains(&edge.alias) {
                continue;
            }

            tree_edges.insert(edge.alias.clone());
            let step = TraversalStep::traverse(node, edge_id, sink);
            match chain.last_mut() {
                Some(last) if *last == TraversalStep::start(node) => *last = step,
                _ => chain.push(step),
            }
            Self::visit(graph, sink, state, chain, tree_edges);
        }

        state.insert(node, VisitState::Done);
    }

    fn describe(graph: &MatchGraph, chain: &[TraversalStep]) -> String {
        chain
            .iter()
            .map(|step| {
                let source = &graph.node(step.source).alias;
                match (step.edge, step.sink) {
                    (Some(edge), Some(sink)) => format!(
                        "({} -{}-> {})",
                        source,
                        graph.edge(edge).alias,
                        graph.node(sink).alias
                    ),
                    _ => format!("({})", source),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}
