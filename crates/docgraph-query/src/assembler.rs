//! Operator-tree assembly
//!
//! Walks the traversal chains of an optimized, script-annotated pattern
//! graph and emits the operator chain that realizes the query block,
//! keeping the compilation context's layout in step with every operator.
//! Deferred predicates are injected as filters as soon as every table they
//! touch is bound.

use crate::ast::{ScalarExpr, SelectElement, TableReference};
use crate::classifier::{ClassifiedQuery, PendingPredicate};
use crate::config::CompilerConfig;
use crate::context::{CompilationContext, LayoutColumn, LayoutDiff, RawRecordLayout, TableHeader};
use crate::functions::{BooleanFunction, ExpressionCompiler, ScalarFunction, SubqueryCompiler};
use crate::graph::{EdgeId, EdgeKind, MatchGraph, NodeId, TraversalStep};
use crate::operators::{ExecutionPlan, PathBounds, PhysicalOperator};
use crate::script::NodeScript;
use crate::table_functions::TableFunctionCompiler;
use docgraph_core::types::VALUE_FIELD;
use docgraph_core::{ColumnGraphType, Error, PropertyName, Result, TableGraphType};
use tracing::{debug, trace};

pub struct OperatorAssembler<'a> {
    config: &'a CompilerConfig,
    subqueries: &'a dyn SubqueryCompiler,
    pending: Vec<PendingPredicate>,
}

impl<'a> OperatorAssembler<'a> {
    pub fn new(config: &'a CompilerConfig, subqueries: &'a dyn SubqueryCompiler) -> Self {
        Self {
            config,
            subqueries,
            pending: Vec::new(),
        }
    }

    /// Build the operator chain of a query block into `ctx`
    pub fn assemble(
        &mut self,
        graph: &MatchGraph,
        classified: ClassifiedQuery,
        ctx: &mut CompilationContext,
    ) -> Result<ExecutionPlan> {
        let ClassifiedQuery {
            pending,
            mut table_predicates,
            select,
            order_by,
            non_vertex_refs,
        } = classified;
        self.pending = pending;

        if ctx.has_outer_context() && ctx.current().is_none() {
            ctx.set_current(PhysicalOperator::OuterContext);
        }
        self.apply_ready_predicates(ctx)?;

        for component in &graph.components {
            for step in &component.traversal_chain {
                self.assemble_step(graph, step, ctx)?;
            }

            // Open-ended edges are decoded once the whole component is bound.
            for &edge in component.edges.values() {
                if graph.edge(edge).is_dangling() {
                    self.cross_apply_edge(graph, edge, None, ctx)?;
                }
            }
        }

        for table_ref in &non_vertex_refs {
            let alias = table_ref.alias();
            self.bind_table_reference(table_ref, ctx)?;
            for predicate in table_predicates.remove(alias).unwrap_or_default() {
                let compiled =
                    ExpressionCompiler::new(ctx, self.subqueries).compile_boolean(&predicate)?;
                trace!(alias, predicate = %predicate, "applied table predicate");
                self.push_filter(compiled, ctx)?;
            }
            self.apply_ready_predicates(ctx)?;
        }

        if let Some(left) = self.pending.first() {
            return Err(Error::Internal(format!(
                "predicate {} references tables that were never bound: {:?}",
                left.predicate, left.tables
            )));
        }

        if !order_by.is_empty() {
            let keys = order_by
                .iter()
                .map(|item| match &item.expr {
                    ScalarExpr::Column(column) => {
                        let table = column.table.as_deref().unwrap_or_default();
                        Ok((ctx.locate(table, &column.column)?, item.order))
                    }
                    other => Err(Error::UnsupportedConstruct(format!(
                        "ORDER BY key must be a column reference: {}",
                        other
                    ))),
                })
                .collect::<Result<Vec<_>>>()?;
            let input = self.take_input(ctx)?;
            ctx.set_current(PhysicalOperator::OrderBy { input, keys });
        }

        self.project(&select, ctx)
    }

    fn assemble_step(
        &mut self,
        graph: &MatchGraph,
        step: &TraversalStep,
        ctx: &mut CompilationContext,
    ) -> Result<()> {
        let source = graph.node(step.source);
        if !ctx.is_bound(&source.alias) {
            self.introduce_node(graph, step.source, ctx)?;
        }

        if let (Some(edge), Some(sink)) = (step.edge, step.sink) {
            self.cross_apply_edge(graph, edge, None, ctx)?;
            self.traverse(graph, edge, sink, ctx)?;
        }

        for &edge in &step.forward_matching {
            let sink = graph.edge(edge).sink;
            self.cross_apply_edge(graph, edge, sink, ctx)?;
        }
        Ok(())
    }

    /// Fetch the first node of a (sub-)chain, combined with whatever the
    /// chain already produces
    fn introduce_node(
        &mut self,
        graph: &MatchGraph,
        node_id: NodeId,
        ctx: &mut CompilationContext,
    ) -> Result<()> {
        let node = graph.node(node_id);
        if node.is_from_outer_context {
            self.check_outer_node(graph, node_id, ctx)?;
        } else {
            let script = self.script_of(graph, node_id)?;
            let fetch = PhysicalOperator::Fetch {
                alias: node.alias.clone(),
                script: script.clone(),
            };
            let operator = match ctx.take_current() {
                Some(left) => PhysicalOperator::CartesianProduct {
                    left: Box::new(left),
                    right: Box::new(fetch),
                },
                None => fetch,
            };
            ctx.set_current(operator);
            Self::add_script_columns(script, ctx);
            trace!(alias = %node.alias, "fetched node");
        }
        ctx.bind_table(&node.alias, TableGraphType::Vertex);
        self.apply_ready_predicates(ctx)
    }

    /// Outer nodes are not fetched: every property the block needs must
    /// already be in the inherited record
    fn check_outer_node(
        &self,
        graph: &MatchGraph,
        node_id: NodeId,
        ctx: &CompilationContext,
    ) -> Result<()> {
        let node = graph.node(node_id);
        for property in &node.properties {
            if ctx.try_locate(&node.alias, property).is_none() {
                return Err(Error::UnboundColumn {
                    table: node.alias.clone(),
                    column: property.to_string(),
                });
            }
        }
        Ok(())
    }

    fn traverse(
        &mut self,
        graph: &MatchGraph,
        edge_id: EdgeId,
        sink_id: NodeId,
        ctx: &mut CompilationContext,
    ) -> Result<()> {
        let edge = graph.edge(edge_id);
        let sink = graph.node(sink_id);
        let sink_property = PropertyName::named(&self.config.fields.sink);

        if sink.is_from_outer_context {
            self.check_outer_node(graph, sink_id, ctx)?;
            ctx.bind_table(&sink.alias, TableGraphType::Vertex);
            let predicate = self.sink_equality(&edge.alias, &sink.alias, ctx)?;
            self.push_filter(predicate, ctx)?;
            return self.apply_ready_predicates(ctx);
        }

        let sink_field = ctx.locate(&edge.alias, &sink_property)?;
        let script = self.script_of(graph, sink_id)?;
        let input = self.take_input(ctx)?;
        let offsets = Self::add_script_columns(script, ctx);

        // Edges this script joined, matched against earlier nodes
        let id_property = PropertyName::named(&self.config.fields.id);
        let mut matching = Vec::with_capacity(sink.reverse_checks.len());
        for check in &sink.reverse_checks {
            let id = ctx.locate(&check.target, &id_property)?;
            let adjacency = offsets.get(check.adjacency_field).copied().ok_or_else(|| {
                Error::Internal(format!(
                    "reverse check on {} points outside the script of {}",
                    check.target, sink.alias
                ))
            })?;
            matching.push((adjacency, id));
        }

        ctx.set_current(PhysicalOperator::Traverse {
            input,
            alias: sink.alias.clone(),
            sink_field,
            script: script.clone(),
            matching,
        });
        for column in &script.columns {
            ctx.bind_table(
                &column.table,
                if column.table == sink.alias {
                    TableGraphType::Vertex
                } else {
                    TableGraphType::Edge
                },
            );
        }
        ctx.bind_table(&sink.alias, TableGraphType::Vertex);
        trace!(edge = %edge.alias, sink = %sink.alias, "traversed edge");
        self.apply_ready_predicates(ctx)
    }

    /// Decode an edge from its source's adjacency list. With a sink, the
    /// decoded entry is checked against that already bound vertex.
    fn cross_apply_edge(
        &mut self,
        graph: &MatchGraph,
        edge_id: EdgeId,
        sink: Option<NodeId>,
        ctx: &mut CompilationContext,
    ) -> Result<()> {
        let edge = graph.edge(edge_id);
        let fields = &self.config.fields;
        let sink_property = PropertyName::named(&fields.sink);

        if edge.is_from_outer_context {
            if ctx.try_locate(&edge.alias, &sink_property).is_none() {
                return Err(Error::UnboundColumn {
                    table: edge.alias.clone(),
                    column: sink_property.to_string(),
                });
            }
        } else {
            let source = graph.node(edge.source);
            let adjacency_fields = fields
                .adjacency_fields(edge.edge_type)
                .into_iter()
                .map(|field| ctx.locate(&source.alias, &PropertyName::named(field)))
                .collect::<Result<Vec<_>>>()?;

            let attributes = graph.edge_attributes(edge_id);
            let mut edge_ctx = CompilationContext::new();
            for property in &attributes.properties {
                let column_type = fields.column_type(TableGraphType::Edge, property);
                edge_ctx.add_field(&edge.alias, property.clone(), column_type, false);
            }
            let compiler = ExpressionCompiler::new(&edge_ctx, self.subqueries);
            let predicate = BooleanFunction::all(
                attributes
                    .predicates
                    .iter()
                    .map(|p| compiler.compile_boolean(p))
                    .collect::<Result<Vec<_>>>()?,
            );

            let path = match &edge.kind {
                EdgeKind::Single => None,
                EdgeKind::Path {
                    min_length,
                    max_length,
                    attribute_values,
                } => Some(PathBounds {
                    min_length: *min_length,
                    max_length: *max_length,
                    attribute_values: attribute_values.clone(),
                }),
            };

            let input = self.take_input(ctx)?;
            ctx.set_current(PhysicalOperator::AdjacencyDecode {
                input,
                edge_alias: edge.alias.clone(),
                adjacency_fields,
                properties: attributes.properties.clone(),
                predicate,
                path,
            });
            for property in &attributes.properties {
                let column_type = fields.column_type(TableGraphType::Edge, property);
                ctx.add_field(&edge.alias, property.clone(), column_type, false);
            }
            trace!(edge = %edge.alias, source = %source.alias, "decoded edge");
        }
        ctx.bind_table(&edge.alias, TableGraphType::Edge);

        if let Some(sink) = sink {
            let sink = graph.node(sink);
            let predicate = self.sink_equality(&edge.alias, &sink.alias, ctx)?;
            self.push_filter(predicate, ctx)?;
        }
        self.apply_ready_predicates(ctx)
    }

    fn sink_equality(
        &self,
        edge: &str,
        node: &str,
        ctx: &CompilationContext,
    ) -> Result<BooleanFunction> {
        let fields = &self.config.fields;
        Ok(BooleanFunction::equals(
            ScalarFunction::Field {
                offset: ctx.locate(edge, &PropertyName::named(&fields.sink))?,
            },
            ScalarFunction::Field {
                offset: ctx.locate(node, &PropertyName::named(&fields.id))?,
            },
        ))
    }

    fn bind_table_reference(
        &mut self,
        table_ref: &TableReference,
        ctx: &mut CompilationContext,
    ) -> Result<()> {
        match table_ref {
            TableReference::Derived { query, alias } => {
                let plan = self.subqueries.compile_detached(query, ctx)?;
                self.cross_product(plan.root, ctx);
                ctx.merge(&plan.output.to_diff(alias));
                ctx.bind_table(alias, TableGraphType::Value);
            }
            TableReference::Variable { name, alias } => {
                let table = ctx.registries().temporary_table(name)?;
                self.cross_product(table.plan.root, ctx);
                ctx.merge(&table.header.to_diff(alias));
                ctx.bind_table(alias, TableGraphType::Value);
            }
            TableReference::Function { function, alias } => {
                TableFunctionCompiler::new(self.config, self.subqueries)
                    .compile(function, alias, ctx)?;
            }
            TableReference::Named { alias, .. } => {
                return Err(Error::Internal(format!(
                    "vertex table {} reached non-vertex binding",
                    alias
                )));
            }
        }
        debug!(alias = %table_ref.alias(), "bound table reference");
        Ok(())
    }

    fn cross_product(&self, right: PhysicalOperator, ctx: &mut CompilationContext) {
        let operator = match ctx.take_current() {
            Some(left) => PhysicalOperator::CartesianProduct {
                left: Box::new(left),
                right: Box::new(right),
            },
            None => right,
        };
        ctx.set_current(operator);
    }

    fn project(
        &self,
        select: &[SelectElement],
        ctx: &mut CompilationContext,
    ) -> Result<ExecutionPlan> {
        let mut columns = Vec::new();
        let mut names = Vec::new();
        let mut layout = RawRecordLayout::new();

        for element in select {
            let (expr, alias) = match element {
                SelectElement::Star => {
                    return Err(Error::UnsupportedProjection("*".to_string()));
                }
                SelectElement::Scalar { expr, alias } => (expr, alias),
            };
            match expr {
                ScalarExpr::Column(column) => {
                    let table = column.table.as_deref().unwrap_or_default();
                    let offset = ctx.locate(table, &column.column)?;
                    let column_type = ctx.layout().columns()[offset].column_type;
                    let name = alias.clone().unwrap_or_else(|| match &column.column {
                        PropertyName::Named(name) => name.clone(),
                        PropertyName::All => table.to_string(),
                    });
                    layout.add(table, column.column.clone(), column_type);
                    columns.push(ScalarFunction::Field { offset });
                    names.push(name);
                }
                ScalarExpr::Subquery(_) => {
                    let function =
                        ExpressionCompiler::new(ctx, self.subqueries).compile_scalar(expr)?;
                    let name = alias.clone().unwrap_or_else(|| VALUE_FIELD.to_string());
                    layout.add("", PropertyName::named(&name), ColumnGraphType::Value);
                    columns.push(function);
                    names.push(name);
                }
                other => return Err(Error::UnsupportedProjection(other.to_string())),
            }
        }

        let input = self.take_input(ctx)?;
        let root = PhysicalOperator::Project { input, columns };
        ctx.replace_layout(layout, names);
        let output: TableHeader = ctx.to_temporary_table_header();
        debug!(columns = output.columns.len(), "projected query block");
        Ok(ExecutionPlan { root, output })
    }

    /// Inject every pending predicate whose tables are all bound, in the
    /// order the predicates were written
    fn apply_ready_predicates(&mut self, ctx: &mut CompilationContext) -> Result<()> {
        if ctx.current().is_none() {
            return Ok(());
        }
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| p.tables.iter().all(|t| ctx.is_visible(t)));
        self.pending = waiting;

        for pending in ready {
            let compiled = ExpressionCompiler::new(ctx, self.subqueries)
                .compile_boolean(&pending.predicate)?;
            debug!(predicate = %pending.predicate, "injected cross-table filter");
            self.push_filter(compiled, ctx)?;
        }
        Ok(())
    }

    fn push_filter(&self, predicate: BooleanFunction, ctx: &mut CompilationContext) -> Result<()> {
        let input = self.take_input(ctx)?;
        ctx.set_current(PhysicalOperator::Filter { input, predicate });
        Ok(())
    }

    fn take_input(&self, ctx: &mut CompilationContext) -> Result<Box<PhysicalOperator>> {
        ctx.take_current()
            .map(Box::new)
            .ok_or_else(|| Error::UnsupportedConstruct("query block binds no tables".to_string()))
    }

    fn script_of<'g>(&self, graph: &'g MatchGraph, node: NodeId) -> Result<&'g NodeScript> {
        let node = graph.node(node);
        node.script
            .as_ref()
            .ok_or_else(|| Error::Internal(format!("node {} has no generated script", node.alias)))
    }

    /// Append a script's output columns, returning their offsets
    fn add_script_columns(script: &NodeScript, ctx: &mut CompilationContext) -> Vec<usize> {
        let diff = LayoutDiff {
            columns: script
                .columns
                .iter()
                .map(|c| LayoutColumn {
                    table: c.table.clone(),
                    column: c.property.clone(),
                    column_type: c.column_type,
                })
                .collect(),
        };
        ctx.merge(&diff)
    }
}
