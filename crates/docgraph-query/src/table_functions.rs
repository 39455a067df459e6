//! Table-valued functions in FROM
//!
//! Each function reads columns already in the pipeline, appends its own
//! operator and registers its output columns under the function's alias.

use crate::ast::{ColumnRef, Literal, ScalarExpr, SelectQueryBlock, TableFunction};
use crate::config::CompilerConfig;
use crate::context::{CompilationContext, SideEffectFunction};
use crate::functions::{ScalarFunction, SubqueryCompiler};
use crate::operators::{ExecutionPlan, PhysicalOperator};
use crate::script::ScriptGenerator;
use docgraph_core::types::VALUE_FIELD;
use docgraph_core::{ColumnGraphType, Error, PropertyName, Result, TableGraphType};
use tracing::debug;

/// Arguments of a table function split by shape
struct Arguments<'f> {
    name: &'f str,
    args: &'f [ScalarExpr],
}

impl<'f> Arguments<'f> {
    fn new(function: &'f TableFunction) -> Self {
        Self {
            name: &function.name,
            args: &function.args,
        }
    }

    fn malformed(&self, expected: &str) -> Error {
        Error::UnsupportedConstruct(format!(
            "{}() expects {}, got {} argument(s)",
            self.name,
            expected,
            self.args.len()
        ))
    }

    /// Leading column references
    fn columns(&self) -> Vec<&'f ColumnRef> {
        self.args.iter().map_while(ScalarExpr::as_column).collect()
    }

    /// Trailing string literals after the leading columns
    fn names(&self, skip: usize) -> Result<Vec<&'f str>> {
        self.args[skip..]
            .iter()
            .map(|arg| match arg {
                ScalarExpr::Literal(Literal::String(s)) => Ok(s.as_str()),
                _ => Err(self.malformed("column references followed by quoted names")),
            })
            .collect()
    }

    fn subqueries(&self, skip: usize) -> Result<Vec<&'f SelectQueryBlock>> {
        self.args[skip..]
            .iter()
            .map(|arg| match arg {
                ScalarExpr::Subquery(block) => Ok(block.as_ref()),
                _ => Err(self.malformed("sub-queries")),
            })
            .collect()
    }
}

fn locate_column(ctx: &CompilationContext, column: &ColumnRef) -> Result<usize> {
    let table = column.table.as_deref().ok_or_else(|| Error::UnboundColumn {
        table: String::new(),
        column: column.column.to_string(),
    })?;
    ctx.locate(table, &column.column)
}

fn take_input(ctx: &mut CompilationContext, function: &str) -> Result<Box<PhysicalOperator>> {
    ctx.take_current().map(Box::new).ok_or_else(|| {
        Error::UnsupportedConstruct(format!("{}() needs a preceding table in FROM", function))
    })
}

/// Add the outputs of a sub-query plan under `alias`
fn add_plan_outputs(ctx: &mut CompilationContext, alias: &str, plan: &ExecutionPlan) {
    ctx.merge(&plan.output.to_diff(alias));
}

pub struct TableFunctionCompiler<'a> {
    config: &'a CompilerConfig,
    subqueries: &'a dyn SubqueryCompiler,
}

impl<'a> TableFunctionCompiler<'a> {
    pub fn new(config: &'a CompilerConfig, subqueries: &'a dyn SubqueryCompiler) -> Self {
        Self { config, subqueries }
    }

    /// Append the function's operator to the context's chain and bind its alias
    pub fn compile(
        &self,
        function: &TableFunction,
        alias: &str,
        ctx: &mut CompilationContext,
    ) -> Result<()> {
        let args = Arguments::new(function);
        let kind = match function.name.to_ascii_lowercase().as_str() {
            "optional" => self.optional(&args, alias, ctx)?,
            "local" => self.nested(&args, alias, ctx, false)?,
            "flat_map" => self.nested(&args, alias, ctx, true)?,
            "coalesce" => self.coalesce(&args, alias, ctx)?,
            "out_v" | "both_v" => self.bound_vertex(&args, alias, ctx)?,
            "out_e" | "both_e" => self.bound_edge(&args, alias, ctx)?,
            "values" => self.unfold(&args, alias, ctx, false)?,
            "properties" => self.unfold(&args, alias, ctx, true)?,
            "aggregate" => self.aggregate(&args, alias, ctx)?,
            "cap" => self.cap(&args, alias, ctx)?,
            other => {
                return Err(Error::UnsupportedConstruct(format!(
                    "unknown table function {}()",
                    other
                )));
            }
        };
        ctx.bind_table(alias, kind);
        debug!(function = %function.name, alias, "compiled table function");
        Ok(())
    }

    fn optional(
        &self,
        args: &Arguments<'_>,
        alias: &str,
        ctx: &mut CompilationContext,
    ) -> Result<TableGraphType> {
        let columns = args.columns();
        let subqueries = args.subqueries(columns.len())?;
        let [block] = subqueries.as_slice() else {
            return Err(args.malformed("column references followed by one sub-query"));
        };

        let fallback_fields = columns
            .iter()
            .map(|c| locate_column(ctx, c))
            .collect::<Result<Vec<_>>>()?;
        let plan = self.subqueries.compile_correlated(block, ctx)?;

        let input = take_input(ctx, args.name)?;
        add_plan_outputs(ctx, alias, &plan);
        ctx.set_current(PhysicalOperator::Optional {
            input,
            fallback_fields,
            subquery: Box::new(plan),
        });
        Ok(TableGraphType::Value)
    }

    fn nested(
        &self,
        args: &Arguments<'_>,
        alias: &str,
        ctx: &mut CompilationContext,
        flatten: bool,
    ) -> Result<TableGraphType> {
        let subqueries = args.subqueries(0)?;
        let [block] = subqueries.as_slice() else {
            return Err(args.malformed("one sub-query"));
        };
        let plan = Box::new(self.subqueries.compile_correlated(block, ctx)?);

        let input = take_input(ctx, args.name)?;
        add_plan_outputs(ctx, alias, &plan);
        ctx.set_current(if flatten {
            PhysicalOperator::FlatMap {
                input,
                subquery: plan,
            }
        } else {
            PhysicalOperator::Local {
                input,
                subquery: plan,
            }
        });
        Ok(TableGraphType::Value)
    }

    fn coalesce(
        &self,
        args: &Arguments<'_>,
        alias: &str,
        ctx: &mut CompilationContext,
    ) -> Result<TableGraphType> {
        let subqueries = args.subqueries(0)?;
        if subqueries.is_empty() {
            return Err(args.malformed("at least one sub-query"));
        }
        let branches = subqueries
            .iter()
            .map(|block| self.subqueries.compile_correlated(block, ctx))
            .collect::<Result<Vec<_>>>()?;

        let input = take_input(ctx, args.name)?;
        add_plan_outputs(ctx, alias, &branches[0]);
        ctx.set_current(PhysicalOperator::Coalesce { input, branches });
        Ok(TableGraphType::Value)
    }

    fn bound_vertex(
        &self,
        args: &Arguments<'_>,
        alias: &str,
        ctx: &mut CompilationContext,
    ) -> Result<TableGraphType> {
        let columns = args.columns();
        if columns.is_empty() {
            return Err(args.malformed("vertex id columns followed by quoted property names"));
        }
        let id_fields = columns
            .iter()
            .map(|c| locate_column(ctx, c))
            .collect::<Result<Vec<_>>>()?;
        let properties: Vec<PropertyName> = args
            .names(columns.len())?
            .into_iter()
            .map(PropertyName::named)
            .collect();

        let fields = &self.config.fields;
        let input = take_input(ctx, args.name)?;
        let id_only = properties.iter().all(|p| p.as_named() == Some(fields.id.as_str()));

        let script = if id_only {
            ctx.add_field(
                alias,
                PropertyName::named(&fields.id),
                ColumnGraphType::VertexId,
                false,
            );
            None
        } else {
            let script = ScriptGenerator::new(self.config).vertex_lookup(alias, &properties);
            for column in &script.columns {
                ctx.add_field(alias, column.property.clone(), column.column_type, false);
            }
            Some(script)
        };

        ctx.set_current(PhysicalOperator::BoundVertex {
            input,
            alias: alias.to_string(),
            id_fields,
            script,
        });
        Ok(TableGraphType::Vertex)
    }

    fn bound_edge(
        &self,
        args: &Arguments<'_>,
        alias: &str,
        ctx: &mut CompilationContext,
    ) -> Result<TableGraphType> {
        let columns = args.columns();
        if columns.is_empty() {
            return Err(args.malformed("adjacency list columns followed by quoted property names"));
        }
        let adjacency_fields = columns
            .iter()
            .map(|c| locate_column(ctx, c))
            .collect::<Result<Vec<_>>>()?;

        let fields = &self.config.fields;
        let mut properties = vec![PropertyName::named(&fields.sink)];
        for name in args.names(columns.len())? {
            let property = PropertyName::named(name);
            if !properties.contains(&property) {
                properties.push(property);
            }
        }

        let input = take_input(ctx, args.name)?;
        for property in &properties {
            let column_type = fields.column_type(TableGraphType::Edge, property);
            ctx.add_field(alias, property.clone(), column_type, false);
        }
        ctx.set_current(PhysicalOperator::BoundEdge {
            input,
            alias: alias.to_string(),
            adjacency_fields,
            properties,
        });
        Ok(TableGraphType::Edge)
    }

    fn unfold(
        &self,
        args: &Arguments<'_>,
        alias: &str,
        ctx: &mut CompilationContext,
        with_names: bool,
    ) -> Result<TableGraphType> {
        let columns = args.columns();
        if columns.is_empty() || columns.len() != args.args.len() {
            return Err(args.malformed("column references"));
        }
        let fields = columns
            .iter()
            .map(|c| locate_column(ctx, c))
            .collect::<Result<Vec<_>>>()?;

        let input = take_input(ctx, args.name)?;
        ctx.add_field(alias, PropertyName::named(VALUE_FIELD), ColumnGraphType::Value, false);
        ctx.set_current(PhysicalOperator::Unfold {
            input,
            fields,
            with_names,
        });
        Ok(TableGraphType::Value)
    }

    fn aggregate(
        &self,
        args: &Arguments<'_>,
        alias: &str,
        ctx: &mut CompilationContext,
    ) -> Result<TableGraphType> {
        let columns = args.columns();
        let names = args.names(columns.len())?;
        let ([column], [name]) = (columns.as_slice(), names.as_slice()) else {
            return Err(args.malformed("a column reference and a quoted side-effect name"));
        };

        let field = locate_column(ctx, column)?;
        ctx.registries().register_side_effect(SideEffectFunction {
            name: name.to_string(),
            source: ScalarFunction::Field { offset: field },
        })?;

        let input = take_input(ctx, args.name)?;
        ctx.add_field(alias, PropertyName::named(VALUE_FIELD), ColumnGraphType::Value, false);
        ctx.set_current(PhysicalOperator::Aggregate {
            input,
            field,
            side_effect: name.to_string(),
        });
        Ok(TableGraphType::Value)
    }

    fn cap(
        &self,
        args: &Arguments<'_>,
        alias: &str,
        ctx: &mut CompilationContext,
    ) -> Result<TableGraphType> {
        let names = args.names(0)?;
        if names.is_empty() {
            return Err(args.malformed("quoted side-effect names"));
        }
        for name in &names {
            ctx.registries().side_effect(name)?;
        }

        let input = take_input(ctx, args.name)?;
        ctx.add_field(alias, PropertyName::named(VALUE_FIELD), ColumnGraphType::Value, false);
        ctx.set_current(PhysicalOperator::Cap {
            input,
            side_effects: names.into_iter().map(str::to_string).collect(),
        });
        Ok(TableGraphType::Value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::TableReference;
    use crate::compiler::QueryCompiler;
    use crate::parser::parse_query;

    fn function_of(query: &str) -> (TableFunction, String) {
        let block = parse_query(query).unwrap();
        match block.from.into_iter().last() {
            Some(TableReference::Function { function, alias }) => (function, alias),
            other => panic!("expected a table function, got {:?}", other),
        }
    }

    /// A context holding `a.id, a._edge, a.name` behind a placeholder input
    fn context() -> CompilationContext {
        let mut ctx = CompilationContext::new();
        ctx.add_field("a", PropertyName::named("id"), ColumnGraphType::VertexId, false);
        ctx.add_field("a", PropertyName::named("_edge"), ColumnGraphType::AdjacencyList, false);
        ctx.add_field("a", PropertyName::named("name"), ColumnGraphType::Value, false);
        ctx.bind_table("a", TableGraphType::Vertex);
        ctx.set_current(PhysicalOperator::OuterContext);
        ctx
    }

    #[test]
    fn test_bound_edge_fields() {
        let compiler = QueryCompiler::default();
        let functions = TableFunctionCompiler::new(compiler.config(), &compiler);
        let (function, alias) =
            function_of("SELECT e._sink FROM node a, out_e(a._edge, 'weight', 'weight') AS e");

        let mut ctx = context();
        functions.compile(&function, &alias, &mut ctx).unwrap();

        assert!(ctx.is_bound("e"));
        assert_eq!(ctx.locate("e", &PropertyName::named("_sink")).unwrap(), 3);
        assert_eq!(ctx.locate("e", &PropertyName::named("weight")).unwrap(), 4);
        let Some(PhysicalOperator::BoundEdge {
            adjacency_fields,
            properties,
            ..
        }) = ctx.current()
        else {
            panic!("expected bound edge");
        };
        assert_eq!(adjacency_fields, &vec![1]);
        assert_eq!(properties.len(), 2);
    }

    #[test]
    fn test_unfold_adds_single_value_field() {
        let compiler = QueryCompiler::default();
        let functions = TableFunctionCompiler::new(compiler.config(), &compiler);
        let (function, alias) =
            function_of("SELECT v._value FROM node a, values(a.name, a.id) AS v");

        let mut ctx = context();
        functions.compile(&function, &alias, &mut ctx).unwrap();
        assert_eq!(ctx.locate("v", &PropertyName::named(VALUE_FIELD)).unwrap(), 3);
        assert!(matches!(
            ctx.current(),
            Some(PhysicalOperator::Unfold { fields, with_names: false, .. }) if fields == &vec![2, 0]
        ));
    }

    #[test]
    fn test_malformed_arguments() {
        let compiler = QueryCompiler::default();
        let functions = TableFunctionCompiler::new(compiler.config(), &compiler);

        for query in [
            "SELECT v.id FROM node a, out_v('name') AS v",
            "SELECT v._value FROM node a, values(a.name, 'x') AS v",
            "SELECT s._value FROM node a, aggregate(a.name, a.id, 'x') AS s",
            "SELECT o.name FROM node a, optional(a.name) AS o",
            "SELECT c._value FROM node a, coalesce() AS c",
        ] {
            let (function, alias) = function_of(query);
            let err = functions
                .compile(&function, &alias, &mut context())
                .unwrap_err();
            assert!(
                matches!(err, Error::UnsupportedConstruct(_)),
                "{}: {:?}",
                query,
                err
            );
        }
    }

    #[test]
    fn test_function_needs_an_input() {
        let compiler = QueryCompiler::default();
        let functions = TableFunctionCompiler::new(compiler.config(), &compiler);
        let (function, alias) = function_of("SELECT v._value FROM node a, values(a.name) AS v");

        let mut ctx = context();
        ctx.take_current();
        let err = functions.compile(&function, &alias, &mut ctx).unwrap_err();
        assert!(matches!(err, Error::UnsupportedConstruct(_)));
        assert!(!ctx.is_bound("v"));
    }
}
