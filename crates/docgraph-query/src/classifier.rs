//! Predicate and projection classification
//!
//! Splits the WHERE clause into conjuncts and routes each one: a conjunct
//! touching a single pattern node or edge is attached to it, anything else
//! is kept pending until every alias it touches has been bound by the
//! operator chain. Every column referenced anywhere in the block is added
//! to the required properties of its node or edge so the generated scripts
//! fetch it.
//!
//! Column references come out canonical: edge labels are replaced by the
//! alias they resolve to and a bare alias becomes `alias.*`.

use crate::ast::*;
use crate::config::DocumentFields;
use crate::graph::MatchGraph;
use docgraph_core::{Direction, Error, PropertyName, Result, TableGraphType};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, trace};

/// A predicate waiting for all of its tables to be bound
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPredicate {
    pub predicate: BooleanExpr,
    pub tables: BTreeSet<String>,
}

/// Classifier output, with all column references canonicalized
#[derive(Debug, Clone, Default)]
pub struct ClassifiedQuery {
    pub pending: Vec<PendingPredicate>,

    /// Predicates on a single derived table, variable or table function
    pub table_predicates: BTreeMap<String, Vec<BooleanExpr>>,

    pub select: Vec<SelectElement>,
    pub order_by: Vec<OrderByElement>,
    pub non_vertex_refs: Vec<TableReference>,
}

type Accessed = BTreeMap<String, Vec<PropertyName>>;

fn record(accessed: &mut Accessed, table: &str, column: &PropertyName) {
    let columns = accessed.entry(table.to_string()).or_default();
    if !columns.contains(column) {
        columns.push(column.clone());
    }
}

/// Split a boolean expression on its top-level ANDs
pub fn split_conjuncts(expr: &BooleanExpr) -> Vec<BooleanExpr> {
    match expr {
        BooleanExpr::And(left, right) => {
            let mut conjuncts = split_conjuncts(left);
            conjuncts.extend(split_conjuncts(right));
            conjuncts
        }
        other => vec![other.clone()],
    }
}

pub struct Classifier<'a> {
    graph: &'a mut MatchGraph,
    fields: &'a DocumentFields,

    /// Aliases bound by enclosing queries
    outer: &'a BTreeMap<String, TableGraphType>,

    /// Non-vertex FROM aliases of this block
    local_tables: BTreeSet<String>,
}

impl<'a> Classifier<'a> {
    pub fn new(
        graph: &'a mut MatchGraph,
        fields: &'a DocumentFields,
        outer: &'a BTreeMap<String, TableGraphType>,
        non_vertex_refs: &[TableReference],
    ) -> Self {
        let local_tables = non_vertex_refs
            .iter()
            .map(|r| r.alias().to_string())
            .collect();
        Self {
            graph,
            fields,
            outer,
            local_tables,
        }
    }

    pub fn classify(
        &mut self,
        block: &SelectQueryBlock,
        non_vertex_refs: &[TableReference],
    ) -> Result<ClassifiedQuery> {
        let mut classified = ClassifiedQuery::default();

        let conjuncts = block
            .where_clause
            .as_ref()
            .map(split_conjuncts)
            .unwrap_or_default();

        for conjunct in &conjuncts {
            let mut accessed = Accessed::new();
            let predicate = self.canonical_boolean(conjunct, &mut accessed)?;
            self.merge_properties(&accessed);

            // The store cannot evaluate nested graph queries, so a conjunct
            // holding one always runs as a filter over bound records.
            let nested = predicate.contains_subquery();

            if accessed.len() == 1 {
                let alias = accessed.keys().next().cloned().unwrap_or_default();
                if !nested && self.is_local_pattern_alias(&alias) {
                    trace!(alias = %alias, predicate = %predicate, "attached predicate");
                    self.graph.attach_predicate(&alias, predicate);
                    continue;
                }
                if self.local_tables.contains(&alias) {
                    trace!(alias = %alias, predicate = %predicate, "attached table predicate");
                    classified
                        .table_predicates
                        .entry(alias)
                        .or_default()
                        .push(predicate);
                    continue;
                }
            }

            if accessed.len() > 1 && !nested {
                if let BooleanExpr::Comparison { left, right, .. } = &predicate {
                    if left.as_column().is_none() && right.as_column().is_none() {
                        return Err(Error::CrossDocumentPredicate(predicate.to_string()));
                    }
                }
            }

            trace!(predicate = %predicate, tables = accessed.len(), "deferred predicate");
            classified.pending.push(PendingPredicate {
                predicate,
                tables: accessed.into_keys().collect(),
            });
        }

        for element in &block.select {
            let element = match element {
                SelectElement::Star => SelectElement::Star,
                SelectElement::Scalar { expr, alias } => {
                    let mut accessed = Accessed::new();
                    let expr = self.canonical_scalar(expr, &mut accessed)?;
                    self.merge_properties(&accessed);
                    SelectElement::Scalar {
                        expr,
                        alias: alias.clone(),
                    }
                }
            };
            classified.select.push(element);
        }

        for item in &block.order_by {
            let mut accessed = Accessed::new();
            let expr = self.canonical_scalar(&item.expr, &mut accessed)?;
            self.merge_properties(&accessed);
            classified.order_by.push(OrderByElement {
                expr,
                order: item.order,
            });
        }

        for table_ref in non_vertex_refs {
            let mut accessed = Accessed::new();
            let table_ref = match table_ref {
                TableReference::Function { function, alias } => {
                    let args = function
                        .args
                        .iter()
                        .map(|arg| self.canonical_scalar(arg, &mut accessed))
                        .collect::<Result<Vec<_>>>()?;
                    TableReference::Function {
                        function: TableFunction {
                            name: function.name.clone(),
                            args,
                        },
                        alias: alias.clone(),
                    }
                }
                TableReference::Derived { query, .. } => {
                    self.collect_outer_references(query, &mut accessed);
                    table_ref.clone()
                }
                other => other.clone(),
            };
            self.merge_properties(&accessed);
            classified.non_vertex_refs.push(table_ref);
        }

        debug!(
            pending = classified.pending.len(),
            table_predicates = classified.table_predicates.len(),
            "classified predicates"
        );
        Ok(classified)
    }

    /// Node or edge of this block's pattern that the block fetches itself
    fn is_local_pattern_alias(&self, alias: &str) -> bool {
        if let Some(node) = self.graph.node_id(alias) {
            return !self.graph.node(node).is_from_outer_context;
        }
        if let Some(edge) = self.graph.edge_id(alias) {
            return !self.graph.edge(edge).is_from_outer_context;
        }
        false
    }

    fn is_known(&self, alias: &str) -> bool {
        self.graph.contains_alias(alias)
            || self.local_tables.contains(alias)
            || self.outer.contains_key(alias)
    }

    fn resolve_table(&self, name: &str) -> Result<String> {
        if self.is_known(name) {
            return Ok(name.to_string());
        }
        if let Some(alias) = self.graph.resolve_label(name) {
            return Ok(alias.to_string());
        }
        Err(Error::UnresolvedTable(name.to_string()))
    }

    fn canonical_column(&self, column: &ColumnRef) -> Result<ColumnRef> {
        match (&column.table, &column.column) {
            (Some(table), _) => Ok(ColumnRef {
                table: Some(self.resolve_table(table)?),
                column: column.column.clone(),
            }),
            (None, PropertyName::Named(name)) => match self.resolve_table(name) {
                Ok(alias) => Ok(ColumnRef {
                    table: Some(alias),
                    column: PropertyName::All,
                }),
                Err(_) => Err(Error::UnboundColumn {
                    table: String::new(),
                    column: name.clone(),
                }),
            },
            (None, PropertyName::All) => Err(Error::UnboundColumn {
                table: String::new(),
                column: "*".to_string(),
            }),
        }
    }

    fn canonical_scalar(&self, expr: &ScalarExpr, accessed: &mut Accessed) -> Result<ScalarExpr> {
        Ok(match expr {
            ScalarExpr::Column(column) => {
                let column = self.canonical_column(column)?;
                if let Some(table) = &column.table {
                    record(accessed, table, &column.column);
                }
                ScalarExpr::Column(column)
            }
            ScalarExpr::Literal(lit) => ScalarExpr::Literal(lit.clone()),
            ScalarExpr::Binary { left, op, right } => ScalarExpr::Binary {
                left: Box::new(self.canonical_scalar(left, accessed)?),
                op: *op,
                right: Box::new(self.canonical_scalar(right, accessed)?),
            },
            ScalarExpr::FunctionCall { name, args } => ScalarExpr::FunctionCall {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|arg| self.canonical_scalar(arg, accessed))
                    .collect::<Result<Vec<_>>>()?,
            },
            ScalarExpr::Subquery(query) => {
                self.collect_outer_references(query, accessed);
                ScalarExpr::Subquery(query.clone())
            }
        })
    }

    fn canonical_boolean(
        &self,
        expr: &BooleanExpr,
        accessed: &mut Accessed,
    ) -> Result<BooleanExpr> {
        Ok(match expr {
            BooleanExpr::Comparison { left, op, right } => BooleanExpr::Comparison {
                left: self.canonical_scalar(left, accessed)?,
                op: *op,
                right: self.canonical_scalar(right, accessed)?,
            },
            BooleanExpr::IsNull { expr, negated } => BooleanExpr::IsNull {
                expr: self.canonical_scalar(expr, accessed)?,
                negated: *negated,
            },
            BooleanExpr::And(left, right) => BooleanExpr::And(
                Box::new(self.canonical_boolean(left, accessed)?),
                Box::new(self.canonical_boolean(right, accessed)?),
            ),
            BooleanExpr::Or(left, right) => BooleanExpr::Or(
                Box::new(self.canonical_boolean(left, accessed)?),
                Box::new(self.canonical_boolean(right, accessed)?),
            ),
            BooleanExpr::Not(inner) => {
                BooleanExpr::Not(Box::new(self.canonical_boolean(inner, accessed)?))
            }
        })
    }

    /// Record columns of this block's aliases used inside a sub-query.
    /// Names the sub-query declares itself, or that are unknown here, are
    /// left to the sub-query's own compilation.
    fn collect_outer_references(&self, query: &SelectQueryBlock, accessed: &mut Accessed) {
        let shadowed: BTreeSet<&str> = query.from.iter().map(|r| r.alias()).collect();
        let visible = |table: &str| !shadowed.contains(table) && self.is_known(table);

        let mut scalars: Vec<&ScalarExpr> = Vec::new();
        let mut predicates: Vec<&BooleanExpr> = query.where_clause.iter().collect();
        for element in &query.select {
            if let SelectElement::Scalar { expr, .. } = element {
                scalars.push(expr);
            }
        }
        scalars.extend(query.order_by.iter().map(|item| &item.expr));

        for table_ref in &query.from {
            match table_ref {
                TableReference::Function { function, .. } => scalars.extend(&function.args),
                TableReference::Derived { query, .. } => {
                    self.collect_outer_references(query, accessed)
                }
                _ => {}
            }
        }

        while let Some(predicate) = predicates.pop() {
            match predicate {
                BooleanExpr::Comparison { left, right, .. } => {
                    scalars.push(left);
                    scalars.push(right);
                }
                BooleanExpr::IsNull { expr, .. } => scalars.push(expr),
                BooleanExpr::And(left, right) | BooleanExpr::Or(left, right) => {
                    predicates.push(left);
                    predicates.push(right);
                }
                BooleanExpr::Not(inner) => predicates.push(inner),
            }
        }

        while let Some(scalar) = scalars.pop() {
            match scalar {
                ScalarExpr::Column(ColumnRef {
                    table: Some(table),
                    column,
                }) if visible(table.as_str()) => record(accessed, table, column),
                ScalarExpr::Column(ColumnRef {
                    table: None,
                    column: PropertyName::Named(name),
                }) if visible(name.as_str()) => record(accessed, name, &PropertyName::All),
                ScalarExpr::Binary { left, right, .. } => {
                    scalars.push(left);
                    scalars.push(right);
                }
                ScalarExpr::FunctionCall { args, .. } => scalars.extend(args),
                ScalarExpr::Subquery(inner) => self.collect_outer_references(inner, accessed),
                _ => {}
            }
        }

        // Outer endpoints of the sub-query's pattern are read from this
        // block's records: their id and the adjacency list of every edge
        // that may be walked away from them.
        if let Some(match_clause) = &query.match_clause {
            for path in &match_clause.paths {
                for (i, step) in path.steps.iter().enumerate() {
                    let edge_type = match (step.edge.direction, path.is_reversed) {
                        (Direction::Both, _) => Direction::Both,
                        (Direction::Outgoing, false) | (Direction::Incoming, true) => {
                            Direction::Outgoing
                        }
                        _ => Direction::Incoming,
                    };
                    // Only single hops can be walked from their sink
                    let sink = path
                        .steps
                        .get(i + 1)
                        .map(|next| &next.node)
                        .or(path.tail.as_ref())
                        .filter(|_| step.edge.is_single_hop());

                    let endpoints = std::iter::once((&step.node, edge_type))
                        .chain(sink.map(|sink| (sink, edge_type.reverse())));
                    for (node, walked) in endpoints {
                        if !visible(node.as_str()) {
                            continue;
                        }
                        record(accessed, node, &PropertyName::named(&self.fields.id));
                        for field in self.fields.adjacency_fields(walked) {
                            record(accessed, node, &PropertyName::named(field));
                        }
                    }
                }
                if let Some(tail) = &path.tail {
                    if visible(tail.as_str()) {
                        record(accessed, tail, &PropertyName::named(&self.fields.id));
                    }
                }
            }
        }
    }

    fn merge_properties(&mut self, accessed: &Accessed) {
        for (alias, columns) in accessed {
            for column in columns {
                self.graph.require_property(alias, column.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::config::CompilerConfig;
    use crate::parser::parse_query;

    fn classify_with_outer(
        query: &str,
        outer: BTreeMap<String, TableGraphType>,
    ) -> Result<(MatchGraph, ClassifiedQuery)> {
        let config = CompilerConfig::default();
        let block = parse_query(query)?;
        let built = GraphBuilder::new(&config, &outer).build(&block)?;
        let mut graph = built.graph;
        let classified = Classifier::new(&mut graph, &config.fields, &outer, &built.non_vertex_refs)
            .classify(&block, &built.non_vertex_refs)?;
        Ok((graph, classified))
    }

    fn classify(query: &str) -> Result<(MatchGraph, ClassifiedQuery)> {
        classify_with_outer(query, BTreeMap::new())
    }

    fn names(props: &[PropertyName]) -> Vec<String> {
        props.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_split_conjuncts() {
        let block =
            parse_query("SELECT a.id FROM node a WHERE a.x = 1 AND (a.y = 2 AND a.z = 3) OR a.w = 4")
                .unwrap();
        assert_eq!(split_conjuncts(block.where_clause.as_ref().unwrap()).len(), 1);

        let block =
            parse_query("SELECT a.id FROM node a WHERE a.x = 1 AND (a.y = 2 AND a.z = 3)").unwrap();
        assert_eq!(split_conjuncts(block.where_clause.as_ref().unwrap()).len(), 3);
    }

    #[test]
    fn test_single_table_predicate_is_attached() {
        let (graph, classified) = classify(
            "SELECT b.name FROM node a, node b MATCH a-[knows]->b WHERE a.name = 'marko'",
        )
        .unwrap();

        let a = graph.node(graph.node_id("a").unwrap());
        let b = graph.node(graph.node_id("b").unwrap());
        assert_eq!(a.predicates.len(), 1);
        assert_eq!(names(&a.properties), vec!["id", "name"]);
        assert_eq!(names(&b.properties), vec!["id", "name"]);
        assert!(classified.pending.is_empty());
    }

    #[test]
    fn test_cross_table_predicate_is_deferred() {
        let (graph, classified) = classify(
            "SELECT a.id FROM node a, node b MATCH a-[knows]->b WHERE a.age = b.age AND a.age > 3",
        )
        .unwrap();

        assert_eq!(classified.pending.len(), 1);
        let pending = &classified.pending[0];
        assert_eq!(
            pending.tables,
            BTreeSet::from(["a".to_string(), "b".to_string()])
        );
        let a = graph.node(graph.node_id("a").unwrap());
        let b = graph.node(graph.node_id("b").unwrap());
        assert_eq!(a.predicates.len(), 1);
        assert!(b.predicates.is_empty());
        assert_eq!(names(&a.properties), vec!["id", "age"]);
        assert_eq!(names(&b.properties), vec!["id", "age"]);
    }

    #[test]
    fn test_edge_predicate_by_label() {
        let (graph, classified) = classify(
            "SELECT b.name FROM node a, node b MATCH a-[knows]->b WHERE knows.weight > 0.5",
        )
        .unwrap();

        let edge = graph.edge_id("a_knows_b").unwrap();
        let attributes = graph.edge_attributes(edge);
        assert_eq!(attributes.predicates.len(), 1);
        assert_eq!(
            attributes.predicates[0].to_string(),
            "a_knows_b.weight > 0.5"
        );
        assert_eq!(names(&attributes.properties), vec!["_sink", "_ID", "weight"]);

        let reverse = graph.reverse_of("a_knows_b").unwrap();
        assert_eq!(graph.edge_attributes(reverse).predicates.len(), 1);
        assert!(classified.pending.is_empty());
    }

    #[test]
    fn test_bare_alias_means_whole_document() {
        let (graph, classified) = classify("SELECT a FROM node a").unwrap();
        let a = graph.node(graph.node_id("a").unwrap());
        assert!(a.properties.contains(&PropertyName::All));
        match &classified.select[0] {
            SelectElement::Scalar { expr, .. } => assert_eq!(expr.to_string(), "a.*"),
            other => panic!("unexpected element {:?}", other),
        }
    }

    #[test]
    fn test_properties_are_deduplicated() {
        let (graph, _) = classify(
            "SELECT a.name, a.name FROM node a WHERE a.name = 'x' ORDER BY a.name",
        )
        .unwrap();
        let a = graph.node(graph.node_id("a").unwrap());
        assert_eq!(names(&a.properties), vec!["id", "name"]);
    }

    #[test]
    fn test_unknown_alias_is_a_binding_error() {
        let err = classify("SELECT a.id FROM node a WHERE x.name = 'y'").unwrap_err();
        assert!(matches!(err, Error::UnresolvedTable(alias) if alias == "x"));

        let err = classify("SELECT name FROM node a").unwrap_err();
        assert!(matches!(err, Error::UnboundColumn { .. }));
    }

    #[test]
    fn test_cross_document_comparison_is_rejected() {
        let err = classify("SELECT a.id FROM node a, node b WHERE a.x + 1 = b.y + 1").unwrap_err();
        assert!(matches!(err, Error::CrossDocumentPredicate(_)));
        assert!(err.is_compiler_limitation());
    }

    #[test]
    fn test_constant_and_table_predicates() {
        let (_, classified) =
            classify("SELECT a.id FROM node a, values(a.name) AS v WHERE 1 = 1 AND v._value = 'x'")
                .unwrap();

        assert_eq!(classified.pending.len(), 1);
        assert!(classified.pending[0].tables.is_empty());
        assert_eq!(classified.table_predicates["v"].len(), 1);
    }

    #[test]
    fn test_subquery_outer_references() {
        let (graph, _) = classify(
            "SELECT (SELECT c.name FROM node c MATCH a-[knows]->c) AS friend FROM node a WHERE a.age > 1",
        )
        .unwrap();
        let a = graph.node(graph.node_id("a").unwrap());
        assert_eq!(names(&a.properties), vec!["id", "age", "_edge"]);
    }

    #[test]
    fn test_subquery_conjunct_is_deferred() {
        let (graph, classified) = classify(
            "SELECT a.id FROM node a WHERE a.name = 'x' AND a.age > (SELECT b.age FROM node b)",
        )
        .unwrap();

        let a = graph.node(graph.node_id("a").unwrap());
        assert_eq!(a.predicates.len(), 1);
        assert_eq!(a.predicates[0].to_string(), "a.name = 'x'");
        assert_eq!(names(&a.properties), vec!["id", "name", "age"]);

        assert_eq!(classified.pending.len(), 1);
        assert_eq!(classified.pending[0].tables, BTreeSet::from(["a".to_string()]));
        assert!(classified.pending[0].predicate.contains_subquery());
    }

    #[test]
    fn test_subquery_outer_tail_references() {
        let (graph, _) = classify(
            "SELECT (SELECT b.name FROM node b MATCH b-[knows]->a) AS x FROM node a",
        )
        .unwrap();
        let a = graph.node(graph.node_id("a").unwrap());
        assert_eq!(names(&a.properties), vec!["id", "_reverse_edge"]);

        // Interior nodes may be walked either way
        let (graph, _) = classify(
            "SELECT (SELECT c.id FROM node b, node c MATCH b-[knows]->a-[likes]->c) AS x \
             FROM node a",
        )
        .unwrap();
        let a = graph.node(graph.node_id("a").unwrap());
        assert_eq!(names(&a.properties), vec!["id", "_reverse_edge", "_edge"]);

        // Variable-length hops are only walked forward
        let (graph, _) = classify(
            "SELECT (SELECT b.id FROM node b MATCH b-[knows*1..3]->a) AS x FROM node a",
        )
        .unwrap();
        let a = graph.node(graph.node_id("a").unwrap());
        assert_eq!(names(&a.properties), vec!["id"]);
    }

    #[test]
    fn test_outer_node_predicates_are_deferred() {
        let mut outer = BTreeMap::new();
        outer.insert("a".to_string(), TableGraphType::Vertex);
        let (graph, classified) = classify_with_outer(
            "SELECT b.name FROM node b MATCH a-[knows]->b WHERE a.age > 3",
            outer,
        )
        .unwrap();

        let a = graph.node(graph.node_id("a").unwrap());
        assert!(a.predicates.is_empty());
        assert_eq!(classified.pending.len(), 1);
    }
}
