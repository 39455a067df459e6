//! Compiled scalar and boolean functions
//!
//! Expressions are lowered against a compilation context: column
//! references become record offsets, scalar sub-queries become nested
//! plans.

use crate::ast::{ArithmeticOp, BooleanExpr, ComparisonOp, Literal, ScalarExpr, SelectQueryBlock};
use crate::context::CompilationContext;
use crate::operators::ExecutionPlan;
use docgraph_core::{Error, Result};
use serde::Serialize;

/// Compiles nested query blocks on behalf of the expression compiler and
/// the table functions
pub trait SubqueryCompiler {
    /// Compile a block that may reference the bindings of `parent`
    fn compile_correlated(
        &self,
        block: &SelectQueryBlock,
        parent: &CompilationContext,
    ) -> Result<ExecutionPlan>;

    /// Compile a self-contained block sharing `parent`'s registries
    fn compile_detached(
        &self,
        block: &SelectQueryBlock,
        parent: &CompilationContext,
    ) -> Result<ExecutionPlan>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "function", rename_all = "snake_case")]
pub enum ScalarFunction {
    /// Value at a record offset
    Field { offset: usize },
    Constant { value: Literal },
    Arithmetic {
        left: Box<ScalarFunction>,
        op: ArithmeticOp,
        right: Box<ScalarFunction>,
    },
    Call {
        name: String,
        args: Vec<ScalarFunction>,
    },
    /// Single-column sub-query evaluated per record
    Subquery { plan: Box<ExecutionPlan> },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "function", rename_all = "snake_case")]
pub enum BooleanFunction {
    Comparison {
        left: ScalarFunction,
        op: ComparisonOp,
        right: ScalarFunction,
    },
    IsNull {
        expr: ScalarFunction,
        negated: bool,
    },
    And {
        left: Box<BooleanFunction>,
        right: Box<BooleanFunction>,
    },
    Or {
        left: Box<BooleanFunction>,
        right: Box<BooleanFunction>,
    },
    Not { inner: Box<BooleanFunction> },
}

impl BooleanFunction {
    pub fn equals(left: ScalarFunction, right: ScalarFunction) -> Self {
        BooleanFunction::Comparison {
            left,
            op: ComparisonOp::Eq,
            right,
        }
    }

    /// Conjunction of a list; `None` when it is empty
    pub fn all(functions: Vec<BooleanFunction>) -> Option<Self> {
        functions.into_iter().reduce(|left, right| BooleanFunction::And {
            left: Box::new(left),
            right: Box::new(right),
        })
    }
}

pub struct ExpressionCompiler<'a> {
    context: &'a CompilationContext,
    subqueries: &'a dyn SubqueryCompiler,
}

impl<'a> ExpressionCompiler<'a> {
    pub fn new(context: &'a CompilationContext, subqueries: &'a dyn SubqueryCompiler) -> Self {
        Self {
            context,
            subqueries,
        }
    }

    pub fn compile_scalar(&self, expr: &ScalarExpr) -> Result<ScalarFunction> {
        Ok(match expr {
            ScalarExpr::Column(column) => {
                let table = column.table.as_deref().ok_or_else(|| Error::UnboundColumn {
                    table: String::new(),
                    column: column.column.to_string(),
                })?;
                ScalarFunction::Field {
                    offset: self.context.locate(table, &column.column)?,
                }
            }
            ScalarExpr::Literal(value) => ScalarFunction::Constant {
                value: value.clone(),
            },
            ScalarExpr::Binary { left, op, right } => ScalarFunction::Arithmetic {
                left: Box::new(self.compile_scalar(left)?),
                op: *op,
                right: Box::new(self.compile_scalar(right)?),
            },
            ScalarExpr::FunctionCall { name, args } => ScalarFunction::Call {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|arg| self.compile_scalar(arg))
                    .collect::<Result<Vec<_>>>()?,
            },
            ScalarExpr::Subquery(block) => {
                let plan = self.subqueries.compile_correlated(block, self.context)?;
                if plan.output.columns.len() != 1 {
                    return Err(Error::UnsupportedProjection(format!(
                        "scalar sub-query must return one column, got {}: ({})",
                        plan.output.columns.len(),
                        block
                    )));
                }
                ScalarFunction::Subquery {
                    plan: Box::new(plan),
                }
            }
        })
    }

    pub fn compile_boolean(&self, expr: &BooleanExpr) -> Result<BooleanFunction> {
        Ok(match expr {
            BooleanExpr::Comparison { left, op, right } => BooleanFunction::Comparison {
                left: self.compile_scalar(left)?,
                op: *op,
                right: self.compile_scalar(right)?,
            },
            BooleanExpr::IsNull { expr, negated } => BooleanFunction::IsNull {
                expr: self.compile_scalar(expr)?,
                negated: *negated,
            },
            BooleanExpr::And(left, right) => BooleanFunction::And {
                left: Box::new(self.compile_boolean(left)?),
                right: Box::new(self.compile_boolean(right)?),
            },
            BooleanExpr::Or(left, right) => BooleanFunction::Or {
                left: Box::new(self.compile_boolean(left)?),
                right: Box::new(self.compile_boolean(right)?),
            },
            BooleanExpr::Not(inner) => BooleanFunction::Not {
                inner: Box::new(self.compile_boolean(inner)?),
            },
        })
    }
}
