//! Per-node document-store scripts
//!
//! Every fetched pattern node gets one script: the node's required
//! properties, joined with the edges that are materialized eagerly at the
//! node, filtered by the node's and those edges' predicates.
//!
//! ```text
//! SELECT b.id, b.name, e._sink AS e__sink, e._ID AS e__ID FROM Node b JOIN e IN b._edge WHERE ...
//! ```

use crate::config::CompilerConfig;
use crate::graph::{EdgeId, Materialization, MatchGraph, NodeId};
use docgraph_core::{ColumnGraphType, Error, PropertyName, Result, TableGraphType};
use serde::Serialize;
use tracing::{debug, trace};

/// One column of a script's output record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptColumn {
    /// Node or edge alias owning the column
    pub table: String,
    pub property: PropertyName,

    /// Field name in the returned document
    pub output: String,

    pub column_type: ColumnGraphType,
}

/// Generated fetch script of one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeScript {
    pub alias: String,
    pub select_clause: String,
    pub join_clause: String,
    pub where_clause: Option<String>,

    /// Output columns in record order
    pub columns: Vec<ScriptColumn>,

    pub text: String,
}

impl NodeScript {
    /// Position of a column in the script's output record
    pub fn column_index(&self, table: &str, property: &PropertyName) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.table == table && &c.property == property)
    }
}

/// A join decoded inside a node's script: once that node has been
/// fetched, the sink pointer of `edge` (at `adjacency_field` in the script
/// record) must equal the id of the already bound `target` node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReverseCheck {
    pub edge: String,
    pub target: String,
    pub adjacency_field: usize,
}

pub struct ScriptGenerator<'a> {
    config: &'a CompilerConfig,
}

impl<'a> ScriptGenerator<'a> {
    pub fn new(config: &'a CompilerConfig) -> Self {
        Self { config }
    }

    /// Generate scripts for every fetched node of the graph.
    /// Components must have been optimized.
    pub fn generate_all(&self, graph: &mut MatchGraph) -> Result<()> {
        for component in 0..graph.components.len() {
            self.require_adjacency_fields(graph, component);

            let materialized = graph.components[component].materialized_edges.clone();
            let nodes: Vec<NodeId> = graph.components[component].nodes.values().copied().collect();

            for node in nodes {
                if graph.node(node).is_from_outer_context {
                    continue;
                }
                let eager: Vec<EdgeId> = materialized
                    .get(&node)
                    .map(|edges| {
                        edges
                            .iter()
                            .filter(|(_, how)| *how == Materialization::Eager)
                            .map(|(edge, _)| *edge)
                            .collect()
                    })
                    .unwrap_or_default();

                let script = self.node_script(graph, node, &eager)?;
                trace!(alias = %script.alias, script = %script.text, "generated node script");

                let mut checks = Vec::with_capacity(eager.len());
                for &edge_id in &eager {
                    let edge = graph.edge(edge_id);
                    let sink = edge.sink.ok_or_else(|| {
                        Error::Internal(format!("eager edge {} has no sink", edge.alias))
                    })?;
                    let sink_field = PropertyName::named(&self.config.fields.sink);
                    let adjacency_field =
                        script.column_index(&edge.alias, &sink_field).ok_or_else(|| {
                            Error::Internal(format!(
                                "script of {} does not project {}.{}",
                                script.alias, edge.alias, sink_field
                            ))
                        })?;
                    checks.push(ReverseCheck {
                        edge: edge.alias.clone(),
                        target: graph.node(sink).alias.clone(),
                        adjacency_field,
                    });
                }

                let node = graph.node_mut(node);
                node.reverse_checks = checks;
                node.script = Some(script);
            }
        }
        debug!(nodes = graph.nodes.len(), "generated node scripts");
        Ok(())
    }

    /// Deferred edges are decoded from their source's adjacency list, so
    /// the list has to be fetched with the source.
    fn require_adjacency_fields(&self, graph: &mut MatchGraph, component: usize) {
        let deferred: Vec<(NodeId, EdgeId)> = graph.components[component]
            .materialized_edges
            .iter()
            .flat_map(|(node, edges)| {
                edges
                    .iter()
                    .filter(|(_, how)| *how == Materialization::Deferred)
                    .map(move |(edge, _)| (*node, *edge))
            })
            .collect();

        for (node, edge) in deferred {
            let edge_type = graph.edge(edge).edge_type;
            for field in self.config.fields.adjacency_fields(edge_type) {
                graph
                    .node_mut(node)
                    .add_property(PropertyName::named(field));
            }
        }
    }

    /// Script of one node joined with the given eagerly materialized edges
    pub fn node_script(
        &self,
        graph: &MatchGraph,
        node_id: NodeId,
        eager: &[EdgeId],
    ) -> Result<NodeScript> {
        let fields = &self.config.fields;
        let node = graph.node(node_id);
        let alias = node.alias.as_str();

        let mut select = Vec::new();
        let mut columns = Vec::new();
        for property in &node.properties {
            let (projection, output) = match property {
                PropertyName::Named(name) => (format!("{}.{}", alias, name), name.clone()),
                PropertyName::All => (alias.to_string(), alias.to_string()),
            };
            select.push(projection);
            columns.push(ScriptColumn {
                table: alias.to_string(),
                property: property.clone(),
                output,
                column_type: fields.column_type(TableGraphType::Vertex, property),
            });
        }

        let mut joins = Vec::new();
        let mut predicates: Vec<String> = node.predicates.iter().map(|p| p.to_string()).collect();

        for &edge_id in eager {
            let edge = graph.edge(edge_id);
            let adjacency = fields
                .adjacency_fields(edge.edge_type)
                .first()
                .copied()
                .ok_or_else(|| {
                    Error::Internal(format!("edge {} has no adjacency list", edge.alias))
                })?;
            joins.push(format!("JOIN {} IN {}.{}", edge.alias, alias, adjacency));

            let attributes = graph.edge_attributes(edge_id);
            for property in &attributes.properties {
                let (projection, output) = match property {
                    PropertyName::Named(name) => {
                        let output = format!("{}_{}", edge.alias, name);
                        (format!("{}.{} AS {}", edge.alias, name, output), output)
                    }
                    PropertyName::All => (
                        format!("{} AS {}", edge.alias, edge.alias),
                        edge.alias.clone(),
                    ),
                };
                select.push(projection);
                columns.push(ScriptColumn {
                    table: edge.alias.clone(),
                    property: property.clone(),
                    output,
                    column_type: fields.column_type(TableGraphType::Edge, property),
                });
            }
            predicates.extend(attributes.predicates.iter().map(|p| p.to_string()));
        }

        let select_clause = format!("SELECT {}", select.join(", "));
        let join_clause = joins.join(" ");
        let where_clause = match predicates.len() {
            0 => None,
            1 => predicates.pop(),
            _ => Some(
                predicates
                    .iter()
                    .map(|p| format!("({})", p))
                    .collect::<Vec<_>>()
                    .join(" AND "),
            ),
        };

        let mut text = format!("{} FROM {} {}", select_clause, self.config.node_collection, alias);
        if !join_clause.is_empty() {
            text.push(' ');
            text.push_str(&join_clause);
        }
        if let Some(condition) = &where_clause {
            text.push_str(" WHERE ");
            text.push_str(condition);
        }

        Ok(NodeScript {
            alias: alias.to_string(),
            select_clause,
            join_clause,
            where_clause,
            columns,
            text,
        })
    }

    /// Script fetching vertices by id for vertex-producing table functions;
    /// the runtime restricts it to the ids found in the pipeline
    pub fn vertex_lookup(&self, alias: &str, properties: &[PropertyName]) -> NodeScript {
        let fields = &self.config.fields;
        let mut all = fields.default_node_properties();
        for property in properties {
            if !all.contains(property) {
                all.push(property.clone());
            }
        }

        let columns: Vec<ScriptColumn> = all
            .iter()
            .map(|property| ScriptColumn {
                table: alias.to_string(),
                property: property.clone(),
                output: match property {
                    PropertyName::Named(name) => name.clone(),
                    PropertyName::All => alias.to_string(),
                },
                column_type: fields.column_type(TableGraphType::Vertex, property),
            })
            .collect();

        let select = all
            .iter()
            .map(|property| match property {
                PropertyName::Named(name) => format!("{}.{}", alias, name),
                PropertyName::All => alias.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ");
        let select_clause = format!("SELECT {}", select);
        let text = format!("{} FROM {} {}", select_clause, self.config.node_collection, alias);

        NodeScript {
            alias: alias.to_string(),
            select_clause,
            join_clause: String::new(),
            where_clause: None,
            columns,
            text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::classifier::Classifier;
    use crate::optimizer::TraversalOptimizer;
    use crate::parser::parse_query;
    use std::collections::BTreeMap;

    fn generated_with(query: &str, config: &CompilerConfig) -> MatchGraph {
        let outer = BTreeMap::new();
        let block = parse_query(query).unwrap();
        let built = GraphBuilder::new(config, &outer).build(&block).unwrap();
        let mut graph = built.graph;
        Classifier::new(&mut graph, &config.fields, &outer, &built.non_vertex_refs)
            .classify(&block, &built.non_vertex_refs)
            .unwrap();
        TraversalOptimizer::new(config).optimize_all(&mut graph);
        ScriptGenerator::new(config).generate_all(&mut graph).unwrap();
        graph
    }

    fn script_of<'g>(graph: &'g MatchGraph, alias: &str) -> &'g NodeScript {
        graph
            .node(graph.node_id(alias).unwrap())
            .script
            .as_ref()
            .unwrap()
    }

    #[test]
    fn test_scripts_for_single_edge() {
        let graph = generated_with(
            "SELECT b.name FROM node a, node b MATCH a-[knows]->b WHERE a.name = 'marko'",
            &CompilerConfig::default(),
        );

        let a = script_of(&graph, "a");
        assert_eq!(
            a.text,
            "SELECT a.id, a.name, a._edge FROM Node a WHERE a.name = 'marko'"
        );
        assert_eq!(a.columns[2].column_type, ColumnGraphType::AdjacencyList);

        let b = script_of(&graph, "b");
        assert_eq!(b.text, "SELECT b.id, b.name FROM Node b");
        assert_eq!(b.where_clause, None);
        assert!(b.join_clause.is_empty());
    }

    #[test]
    fn test_wildcard_property_requests_whole_document() {
        let graph = generated_with("SELECT a FROM node a", &CompilerConfig::default());
        let a = script_of(&graph, "a");
        assert_eq!(a.select_clause, "SELECT a.id, a");
        assert_eq!(a.columns[1].property, PropertyName::All);
        assert_eq!(a.columns[1].column_type, ColumnGraphType::VertexObject);
    }

    #[test]
    fn test_multiple_predicates_are_parenthesized() {
        let graph = generated_with(
            "SELECT a.id FROM node a WHERE a.x = 1 AND (a.y = 2 OR a.z = 3)",
            &CompilerConfig::default(),
        );
        let a = script_of(&graph, "a");
        assert_eq!(
            a.where_clause.as_deref(),
            Some("(a.x = 1) AND (a.y = 2 OR a.z = 3)")
        );
    }

    #[test]
    fn test_eager_backward_edge_is_joined() {
        let graph = generated_with(
            "SELECT a.id FROM node a, node b MATCH a-[x]->b, b-[y]->a WHERE y.weight > 2",
            &CompilerConfig::default(),
        );

        let b = script_of(&graph, "b");
        assert_eq!(b.join_clause, "JOIN b_y_a IN b._edge");
        assert!(b.select_clause.contains("b_y_a._sink AS b_y_a__sink"));
        assert!(b.select_clause.contains("b_y_a.weight AS b_y_a_weight"));
        assert_eq!(b.where_clause.as_deref(), Some("b_y_a.weight > 2"));

        let sink_index = b
            .column_index("b_y_a", &PropertyName::named("_sink"))
            .unwrap();
        assert_eq!(
            graph.node(graph.node_id("b").unwrap()).reverse_checks,
            vec![ReverseCheck {
                edge: "b_y_a".to_string(),
                target: "a".to_string(),
                adjacency_field: sink_index,
            }]
        );
        assert!(graph.node(graph.node_id("a").unwrap()).reverse_checks.is_empty());
        // b's own edge is joined, not decoded: no adjacency list fetched for it.
        assert!(!b.select_clause.contains("b._edge"));
    }

    #[test]
    fn test_lazy_mode_fetches_adjacency_list() {
        let config = CompilerConfig::default().lazy_backward_matching();
        let graph = generated_with(
            "SELECT a.id FROM node a, node b MATCH a-[x]->b, b-[y]->a",
            &config,
        );
        let b = script_of(&graph, "b");
        assert!(b.join_clause.is_empty());
        assert_eq!(b.select_clause, "SELECT b.id, b._edge");
    }

    #[test]
    fn test_incoming_edge_uses_reverse_list() {
        let graph = generated_with(
            "SELECT a.id FROM node a, node b MATCH a-[knows]->b WHERE b.name = 'josh'",
            &CompilerConfig::default(),
        );
        let b = script_of(&graph, "b");
        assert_eq!(
            b.text,
            "SELECT b.id, b.name, b._reverse_edge FROM Node b WHERE b.name = 'josh'"
        );
    }

    #[test]
    fn test_custom_collection_and_fields() {
        let mut config = CompilerConfig::default().node_collection("Vertices");
        config.fields.id = "vid".to_string();
        let graph = generated_with("SELECT a.vid FROM node a", &config);
        assert_eq!(script_of(&graph, "a").text, "SELECT a.vid FROM Vertices a");
    }

    #[test]
    fn test_vertex_lookup() {
        let config = CompilerConfig::default();
        let script = ScriptGenerator::new(&config)
            .vertex_lookup("v", &[PropertyName::named("name"), PropertyName::named("id")]);
        assert_eq!(script.text, "SELECT v.id, v.name FROM Node v");
        assert_eq!(script.columns.len(), 2);
    }
}
