//! Pattern graph construction
//!
//! Walks the MATCH paths of a query block left to right, creating nodes on
//! first reference, linking edges to their sinks and synthesizing a reverse
//! edge for every single-hop edge. Aliases are then partitioned into
//! connected components with a union-find.

use crate::ast::{EdgePattern, SelectQueryBlock, TableReference};
use crate::config::CompilerConfig;
use crate::graph::{
    ConnectedComponent, EdgeAttributes, EdgeKind, MatchEdge, MatchGraph, NodeId,
};
use crate::union_find::UnionFind;
use docgraph_core::{Direction, Error, Result, TableGraphType};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Output of the builder
#[derive(Debug, Clone)]
pub struct BuiltPattern {
    pub graph: MatchGraph,

    /// FROM aliases that name vertex tables, in declaration order
    pub vertex_aliases: Vec<String>,

    /// Derived tables, variables and table functions, in FROM order
    pub non_vertex_refs: Vec<TableReference>,
}

pub struct GraphBuilder<'a> {
    config: &'a CompilerConfig,

    /// Aliases bound by enclosing queries
    outer: &'a BTreeMap<String, TableGraphType>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(config: &'a CompilerConfig, outer: &'a BTreeMap<String, TableGraphType>) -> Self {
        Self { config, outer }
    }

    pub fn build(&self, block: &SelectQueryBlock) -> Result<BuiltPattern> {
        let mut declared = BTreeSet::new();
        let mut vertex_aliases = Vec::new();
        let mut non_vertex_refs = Vec::new();

        for table_ref in &block.from {
            let alias = table_ref.alias();
            if !declared.insert(alias.to_string()) {
                return Err(Error::DuplicateAlias(alias.to_string()));
            }
            if table_ref.is_vertex_table() {
                vertex_aliases.push(alias.to_string());
            } else {
                non_vertex_refs.push(table_ref.clone());
            }
        }

        let mut graph = MatchGraph::new();
        let mut union_find = UnionFind::new();
        let mut tails = BTreeSet::new();

        if let Some(match_clause) = &block.match_clause {
            for path in &match_clause.paths {
                for (i, step) in path.steps.iter().enumerate() {
                    let source = self.resolve_node(&mut graph, &vertex_aliases, &step.node)?;
                    union_find.add(&step.node);

                    let next = path
                        .steps
                        .get(i + 1)
                        .map(|s| s.node.as_str())
                        .or(path.tail.as_deref());
                    let sink = match next {
                        Some(alias) => Some(self.resolve_node(&mut graph, &vertex_aliases, alias)?),
                        None => None,
                    };

                    let edge_type = match (step.edge.direction, path.is_reversed) {
                        (Direction::Both, _) => Direction::Both,
                        (Direction::Outgoing, false) | (Direction::Incoming, true) => {
                            Direction::Outgoing
                        }
                        (Direction::Outgoing, true) | (Direction::Incoming, false) => {
                            Direction::Incoming
                        }
                    };
                    self.add_edge(
                        &mut graph,
                        &declared,
                        &step.edge,
                        source,
                        sink,
                        edge_type,
                    )?;

                    if let Some(next) = next {
                        union_find.union(&step.node, next);
                    }
                }

                if let Some(tail) = &path.tail {
                    let id = self.resolve_node(&mut graph, &vertex_aliases, tail)?;
                    union_find.add(tail);
                    tails.insert(id);
                }
            }
        }

        // FROM aliases outside every path become isolated nodes.
        let node_defaults = self.config.fields.default_node_properties();
        for alias in &vertex_aliases {
            graph.get_or_add_node(alias, &node_defaults);
            union_find.add(alias);
        }

        self.assign_components(&mut graph, &mut union_find, &tails);

        debug!(
            components = graph.components.len(),
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "built pattern graph"
        );

        Ok(BuiltPattern {
            graph,
            vertex_aliases,
            non_vertex_refs,
        })
    }

    /// Get or create a MATCH endpoint, binding it locally or to the outer context
    fn resolve_node(
        &self,
        graph: &mut MatchGraph,
        vertex_aliases: &[String],
        alias: &str,
    ) -> Result<NodeId> {
        let node_defaults = self.config.fields.default_node_properties();
        if vertex_aliases.iter().any(|a| a == alias) {
            return Ok(graph.get_or_add_node(alias, &node_defaults));
        }
        if self.outer.get(alias) == Some(&TableGraphType::Vertex) {
            let id = graph.get_or_add_node(alias, &node_defaults);
            graph.node_mut(id).is_from_outer_context = true;
            return Ok(id);
        }
        Err(Error::UnresolvedTable(alias.to_string()))
    }

    fn add_edge(
        &self,
        graph: &mut MatchGraph,
        declared: &BTreeSet<String>,
        pattern: &EdgePattern,
        source: NodeId,
        sink: Option<NodeId>,
        edge_type: Direction,
    ) -> Result<()> {
        let source_alias = graph.node(source).alias.clone();
        let sink_alias = sink.map(|s| graph.node(s).alias.clone());
        let alias = self.edge_alias(graph, declared, pattern, &source_alias, sink_alias.as_deref())?;
        let is_from_outer_context =
            pattern.alias.is_some() && self.outer.get(&alias) == Some(&TableGraphType::Edge);

        graph
            .edge_labels
            .entry(pattern.label.clone())
            .or_default()
            .push(alias.clone());

        let attributes = graph.add_attributes(EdgeAttributes {
            predicates: Vec::new(),
            properties: self.config.fields.default_edge_properties(),
        });
        let kind = if pattern.is_single_hop() {
            EdgeKind::Single
        } else {
            EdgeKind::Path {
                min_length: pattern.min_length,
                max_length: pattern.max_length,
                attribute_values: pattern.attribute_values.clone(),
            }
        };
        let single = kind == EdgeKind::Single;

        let forward = graph.add_edge(MatchEdge {
            alias: alias.clone(),
            label: pattern.label.clone(),
            source,
            sink,
            edge_type,
            is_reversed: false,
            attributes,
            kind,
            counterpart: None,
            is_from_outer_context,
        });

        let Some(sink) = sink else {
            graph.node_mut(source).dangling_edges.push(forward);
            return Ok(());
        };
        graph.node_mut(source).neighbors.push(forward);

        if single {
            let reverse = graph.add_edge(MatchEdge {
                alias: alias.clone(),
                label: pattern.label.clone(),
                source: sink,
                sink: Some(source),
                edge_type: edge_type.reverse(),
                is_reversed: true,
                attributes,
                kind: EdgeKind::Single,
                counterpart: Some(forward),
                is_from_outer_context,
            });
            graph.edge_mut(forward).counterpart = Some(reverse);
            graph.node_mut(sink).reverse_neighbors.push(reverse);
            graph.reversed_edges.insert(alias, reverse);
        }
        Ok(())
    }

    fn edge_alias(
        &self,
        graph: &MatchGraph,
        declared: &BTreeSet<String>,
        pattern: &EdgePattern,
        source: &str,
        next: Option<&str>,
    ) -> Result<String> {
        let taken = |alias: &str| graph.contains_alias(alias) || declared.contains(alias);

        if let Some(alias) = &pattern.alias {
            if taken(alias) {
                return Err(Error::DuplicateAlias(alias.clone()));
            }
            return Ok(alias.clone());
        }

        let base = match next {
            Some(next) => format!("{}_{}_{}", source, pattern.label, next),
            None => format!("{}_{}", source, pattern.label),
        };
        let mut candidate = base.clone();
        let mut suffix = 1;
        while taken(&candidate) || self.outer.contains_key(&candidate) {
            candidate = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        Ok(candidate)
    }

    fn assign_components(
        &self,
        graph: &mut MatchGraph,
        union_find: &mut UnionFind,
        tails: &BTreeSet<NodeId>,
    ) {
        let mut by_root: HashMap<String, usize> = HashMap::new();
        let mut components: Vec<ConnectedComponent> = Vec::new();

        for (idx, node) in graph.nodes.iter().enumerate() {
            let id = NodeId(idx);
            let root = union_find
                .find(&node.alias)
                .map(str::to_string)
                .unwrap_or_else(|| node.alias.clone());
            let slot = *by_root.entry(root).or_insert_with(|| {
                components.push(ConnectedComponent::default());
                components.len() - 1
            });

            let component = &mut components[slot];
            component.nodes.insert(node.alias.clone(), id);
            if tails.contains(&id) {
                component.tails.insert(id);
            }
            for &edge in node.neighbors.iter().chain(&node.dangling_edges) {
                component
                    .edges
                    .insert(graph.edges[edge.0].alias.clone(), edge);
            }
        }

        graph.components = components;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_query;

    fn build(query: &str) -> Result<BuiltPattern> {
        let config = CompilerConfig::default();
        let outer = BTreeMap::new();
        GraphBuilder::new(&config, &outer).build(&parse_query(query)?)
    }

    #[test]
    fn test_single_edge_pattern() {
        let built = build("SELECT b.name FROM node a, node b MATCH a-[knows]->b").unwrap();
        let graph = &built.graph;

        assert_eq!(graph.components.len(), 1);
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 2);

        let a = graph.node_id("a").unwrap();
        let b = graph.node_id("b").unwrap();
        assert_eq!(graph.node(a).neighbors.len(), 1);
        assert_eq!(graph.node(b).reverse_neighbors.len(), 1);

        let forward = graph.edge_id("a_knows_b").unwrap();
        assert_eq!(graph.edge(forward).edge_type, Direction::Outgoing);
        assert_eq!(graph.components[0].edges.len(), 1);
    }

    #[test]
    fn test_reverse_edge_symmetry() {
        let built = build(
            "SELECT a.id FROM node a, node b, node c MATCH a-[knows]->b-[likes AS l]->c, c-[road*1..2]->a",
        )
        .unwrap();
        let graph = &built.graph;

        for (idx, edge) in graph.edges.iter().enumerate() {
            if edge.is_reversed || edge.is_path() {
                continue;
            }
            let reverses: Vec<_> = graph
                .edges
                .iter()
                .filter(|e| e.is_reversed && e.alias == edge.alias)
                .collect();
            assert_eq!(reverses.len(), 1);
            let reverse = reverses[0];
            assert_eq!(reverse.source, edge.sink.unwrap());
            assert_eq!(reverse.sink, Some(edge.source));
            assert_eq!(reverse.attributes, edge.attributes);
            assert_eq!(reverse.counterpart, Some(crate::graph::EdgeId(idx)));
        }

        let road = graph.edge_id("c_road_a").unwrap();
        assert!(graph.edge(road).counterpart.is_none());
        assert!(graph.reverse_of("c_road_a").is_none());
    }

    #[test]
    fn test_dangling_edge() {
        let built = build("SELECT a.id FROM node a MATCH a-[knows]->").unwrap();
        let graph = &built.graph;
        let a = graph.node_id("a").unwrap();

        assert_eq!(graph.node(a).dangling_edges.len(), 1);
        assert!(graph.node(a).neighbors.is_empty());
        assert!(graph.reversed_edges.is_empty());
        let edge = graph.edge_id("a_knows").unwrap();
        assert!(graph.edge(edge).is_dangling());
        assert!(graph.components[0].edges.contains_key("a_knows"));
    }

    #[test]
    fn test_disconnected_aliases() {
        let built = build("SELECT a.id FROM node a, node b").unwrap();
        assert_eq!(built.graph.components.len(), 2);
        assert!(built.graph.components.iter().all(|c| c.nodes.len() == 1));
    }

    #[test]
    fn test_unresolved_endpoint() {
        let err = build("SELECT a.id FROM node a MATCH a-[knows]->x").unwrap_err();
        assert!(matches!(err, Error::UnresolvedTable(alias) if alias == "x"));
    }

    #[test]
    fn test_duplicate_aliases() {
        assert!(matches!(
            build("SELECT a.id FROM node a, node a"),
            Err(Error::DuplicateAlias(_))
        ));
        assert!(matches!(
            build("SELECT a.id FROM node a, node b MATCH a-[knows AS b]->a"),
            Err(Error::DuplicateAlias(_))
        ));
    }

    #[test]
    fn test_synthesized_aliases_are_unique() {
        let built =
            build("SELECT a.id FROM node a, node b MATCH a-[knows]->b, a-[knows]->b").unwrap();
        let aliases = &built.graph.edge_labels["knows"];
        assert_eq!(aliases, &vec!["a_knows_b".to_string(), "a_knows_b_1".to_string()]);
    }

    #[test]
    fn test_incoming_edges() {
        let built = build("SELECT a.id FROM node a, node b MATCH a<-[created]-b").unwrap();
        let graph = &built.graph;
        let edge = graph.edge_id("a_created_b").unwrap();
        assert_eq!(graph.edge(edge).edge_type, Direction::Incoming);
        let reverse = graph.reverse_of("a_created_b").unwrap();
        assert_eq!(graph.edge(reverse).edge_type, Direction::Outgoing);
    }

    #[test]
    fn test_outer_context_binding() {
        let config = CompilerConfig::default();
        let mut outer = BTreeMap::new();
        outer.insert("a".to_string(), TableGraphType::Vertex);

        let block = parse_query("SELECT b.name FROM node b MATCH a-[knows]->b").unwrap();
        let built = GraphBuilder::new(&config, &outer).build(&block).unwrap();
        let a = built.graph.node_id("a").unwrap();
        let b = built.graph.node_id("b").unwrap();
        assert!(built.graph.node(a).is_from_outer_context);
        assert!(!built.graph.node(b).is_from_outer_context);
    }

    #[test]
    fn test_non_vertex_refs_are_collected() {
        let built = build("SELECT a.id FROM node a, @people p, values(a.name) AS v").unwrap();
        assert_eq!(built.vertex_aliases, vec!["a".to_string()]);
        assert_eq!(built.non_vertex_refs.len(), 2);
        assert_eq!(built.graph.nodes.len(), 1);
    }

    #[test]
    fn test_tails_are_marked() {
        let built = build("SELECT a.id FROM node a, node b MATCH a-[knows]->b").unwrap();
        let component = &built.graph.components[0];
        let b = built.graph.node_id("b").unwrap();
        assert!(component.is_tail(b));
        assert!(!component.is_tail(built.graph.node_id("a").unwrap()));
    }
}
