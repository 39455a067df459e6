//! Query compiler entry points
//!
//! A query block goes through five stages, each in its own module:
//! pattern graph construction, predicate classification, traversal-order
//! selection, script generation and operator assembly. Nested blocks
//! (scalar sub-queries, derived tables, table-function branches) re-enter
//! the pipeline through [`SubqueryCompiler`].

use crate::assembler::OperatorAssembler;
use crate::ast::{SelectQueryBlock, Statement};
use crate::builder::GraphBuilder;
use crate::classifier::Classifier;
use crate::config::CompilerConfig;
use crate::context::{CompilationContext, Registries, TemporaryTable};
use crate::functions::SubqueryCompiler;
use crate::operators::ExecutionPlan;
use crate::optimizer::TraversalOptimizer;
use crate::parser::parse_script;
use crate::script::ScriptGenerator;
use docgraph_core::{Error, Result};
use tracing::{debug, info};

/// Query compiler
#[derive(Debug, Clone, Default)]
pub struct QueryCompiler {
    config: CompilerConfig,
}

impl QueryCompiler {
    /// Create a new compiler
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compile a query text; batches return the plan of their last statement
    pub fn compile_query(&self, text: &str) -> Result<ExecutionPlan> {
        self.compile_script(text)
    }

    /// Compile a batch of statements sharing temporary tables and
    /// side-effects, returning the plan of the last one
    pub fn compile_script(&self, text: &str) -> Result<ExecutionPlan> {
        let script = parse_script(text)?;
        let registries = Registries::new();
        let mut last = None;

        for statement in &script.statements {
            let mut ctx = CompilationContext::with_registries(registries.clone());
            let plan = match statement {
                Statement::Select(block) => self.compile_select(block, &mut ctx)?,
                Statement::SetVariable { name, query } => {
                    let plan = self.compile_select(query, &mut ctx)?;
                    let header = ctx.to_temporary_table_header();
                    registries.register_temporary_table(
                        name,
                        TemporaryTable {
                            header,
                            plan: plan.clone(),
                        },
                    )?;
                    debug!(name = %name, "registered temporary table");
                    plan
                }
            };
            last = Some(plan);
        }

        let plan =
            last.ok_or_else(|| Error::QueryParse("script contains no statements".to_string()))?;
        info!(
            statements = script.statements.len(),
            operators = plan.root.count(),
            "compiled query"
        );
        Ok(plan)
    }

    /// Compile one query block into `ctx`
    pub fn compile_select(
        &self,
        block: &SelectQueryBlock,
        ctx: &mut CompilationContext,
    ) -> Result<ExecutionPlan> {
        let outer = ctx.outer_tables().clone();

        let built = GraphBuilder::new(&self.config, &outer).build(block)?;
        let mut graph = built.graph;

        let classified = Classifier::new(
            &mut graph,
            &self.config.fields,
            &outer,
            &built.non_vertex_refs,
        )
        .classify(block, &built.non_vertex_refs)?;

        TraversalOptimizer::new(&self.config).optimize_all(&mut graph);
        ScriptGenerator::new(&self.config).generate_all(&mut graph)?;

        let plan = OperatorAssembler::new(&self.config, self).assemble(&graph, classified, ctx)?;
        debug!(
            depth = ctx.depth(),
            chain = ?plan.chain(),
            "compiled query block"
        );
        Ok(plan)
    }
}

impl SubqueryCompiler for QueryCompiler {
    fn compile_correlated(
        &self,
        block: &SelectQueryBlock,
        parent: &CompilationContext,
    ) -> Result<ExecutionPlan> {
        let mut ctx = parent.for_subquery(self.config.max_nesting_depth)?;
        self.compile_select(block, &mut ctx)
    }

    fn compile_detached(
        &self,
        block: &SelectQueryBlock,
        parent: &CompilationContext,
    ) -> Result<ExecutionPlan> {
        let mut ctx = parent.detached(self.config.max_nesting_depth)?;
        self.compile_select(block, &mut ctx)
    }
}
