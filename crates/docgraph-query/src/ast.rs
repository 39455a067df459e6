//! Abstract syntax tree of a parsed query block
//!
//! This is the inbound interface of the compiler: whatever front end
//! produced it (the bundled parser or a traversal translator), the compiler
//! only ever sees these types.

use docgraph_core::{Direction, PropertyName, SortOrder};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A batch of statements sharing temporary tables and side-effects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub statements: Vec<Statement>,
}

/// A single statement in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    /// SELECT query block
    Select(SelectQueryBlock),
    /// SET @name = (SELECT ...)
    SetVariable {
        name: String,
        query: SelectQueryBlock,
    },
}

/// One SELECT ... FROM ... MATCH ... WHERE ... ORDER BY block
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SelectQueryBlock {
    pub select: Vec<SelectElement>,
    pub from: Vec<TableReference>,
    pub match_clause: Option<MatchClause>,
    pub where_clause: Option<BooleanExpr>,
    pub order_by: Vec<OrderByElement>,
}

/// Element of the SELECT list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SelectElement {
    /// SELECT *
    Star,
    /// An expression with an optional output alias
    Scalar {
        expr: ScalarExpr,
        alias: Option<String>,
    },
}

/// A table reference in the FROM clause
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TableReference {
    /// A vertex table bound to an alias
    Named { table: String, alias: String },
    /// (SELECT ...) AS alias
    Derived {
        query: Box<SelectQueryBlock>,
        alias: String,
    },
    /// @name AS alias
    Variable { name: String, alias: String },
    /// function(args) AS alias
    Function { function: TableFunction, alias: String },
}

impl TableReference {
    pub fn alias(&self) -> &str {
        match self {
            TableReference::Named { alias, .. }
            | TableReference::Derived { alias, .. }
            | TableReference::Variable { alias, .. }
            | TableReference::Function { alias, .. } => alias,
        }
    }

    pub fn is_vertex_table(&self) -> bool {
        matches!(self, TableReference::Named { .. })
    }
}

/// A table-valued function call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableFunction {
    pub name: String,
    pub args: Vec<ScalarExpr>,
}

/// MATCH clause
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MatchClause {
    pub paths: Vec<MatchPath>,
}

/// One path of the MATCH clause
///
/// `a-[e]->b-[f]->c` is stored as steps `[(a, e), (b, f)]` with tail `c`;
/// a path ending in an edge has no tail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchPath {
    pub steps: Vec<PathStep>,
    pub tail: Option<String>,
    /// The path was written against the stored edge direction; every
    /// edge on it is enumerated from the opposite adjacency list.
    pub is_reversed: bool,
}

/// A node followed by the edge leaving it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathStep {
    pub node: String,
    pub edge: EdgePattern,
}

/// Edge descriptor inside `-[ ]->`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgePattern {
    pub label: String,
    pub alias: Option<String>,
    pub min_length: u32,
    pub max_length: u32,
    pub direction: Direction,
    pub attribute_values: Vec<(String, Literal)>,
}

impl EdgePattern {
    /// A single-hop outgoing edge with the given label
    pub fn new<S: Into<String>>(label: S) -> Self {
        Self {
            label: label.into(),
            alias: None,
            min_length: 1,
            max_length: 1,
            direction: Direction::Outgoing,
            attribute_values: Vec::new(),
        }
    }

    pub fn is_single_hop(&self) -> bool {
        self.min_length == 1 && self.max_length == 1
    }
}

/// Boolean expression tree (WHERE clause)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BooleanExpr {
    Comparison {
        left: ScalarExpr,
        op: ComparisonOp,
        right: ScalarExpr,
    },
    IsNull {
        expr: ScalarExpr,
        negated: bool,
    },
    And(Box<BooleanExpr>, Box<BooleanExpr>),
    Or(Box<BooleanExpr>, Box<BooleanExpr>),
    Not(Box<BooleanExpr>),
}

impl BooleanExpr {
    pub fn contains_subquery(&self) -> bool {
        match self {
            BooleanExpr::Comparison { left, right, .. } => {
                left.contains_subquery() || right.contains_subquery()
            }
            BooleanExpr::IsNull { expr, .. } => expr.contains_subquery(),
            BooleanExpr::And(left, right) | BooleanExpr::Or(left, right) => {
                left.contains_subquery() || right.contains_subquery()
            }
            BooleanExpr::Not(inner) => inner.contains_subquery(),
        }
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOp {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Arithmetic operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

/// Scalar expression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScalarExpr {
    Column(ColumnRef),
    Literal(Literal),
    Binary {
        left: Box<ScalarExpr>,
        op: ArithmeticOp,
        right: Box<ScalarExpr>,
    },
    FunctionCall {
        name: String,
        args: Vec<ScalarExpr>,
    },
    Subquery(Box<SelectQueryBlock>),
}

impl ScalarExpr {
    pub fn column<T: Into<String>>(table: T, column: PropertyName) -> Self {
        ScalarExpr::Column(ColumnRef {
            table: Some(table.into()),
            column,
        })
    }

    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            ScalarExpr::Column(col) => Some(col),
            _ => None,
        }
    }

    /// True if a nested query block appears anywhere in the expression
    pub fn contains_subquery(&self) -> bool {
        match self {
            ScalarExpr::Subquery(_) => true,
            ScalarExpr::Binary { left, right, .. } => {
                left.contains_subquery() || right.contains_subquery()
            }
            ScalarExpr::FunctionCall { args, .. } => args.iter().any(|a| a.contains_subquery()),
            ScalarExpr::Column(_) | ScalarExpr::Literal(_) => false,
        }
    }
}

/// Reference to `table.column`, `table.*` or a bare name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub column: PropertyName,
}

/// Literal values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Null,
}

/// ORDER BY element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderByElement {
    pub expr: ScalarExpr,
    pub order: SortOrder,
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Integer(i) => write!(f, "{}", i),
            Literal::Float(v) => write!(f, "{}", v),
            Literal::String(s) => write!(f, "'{}'", s.replace('\'', "\\'")),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::Null => write!(f, "null"),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}.{}", table, self.column),
            None => write!(f, "{}", self.column),
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::NotEq => "!=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
        };
        write!(f, "{}", op)
    }
}

impl fmt::Display for ArithmeticOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Subtract => "-",
            ArithmeticOp::Multiply => "*",
            ArithmeticOp::Divide => "/",
            ArithmeticOp::Modulo => "%",
        };
        write!(f, "{}", op)
    }
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for ScalarExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarExpr::Column(col) => write!(f, "{}", col),
            ScalarExpr::Literal(lit) => write!(f, "{}", lit),
            ScalarExpr::Binary { left, op, right } => {
                for (i, operand) in [left, right].into_iter().enumerate() {
                    if i == 1 {
                        write!(f, " {} ", op)?;
                    }
                    match operand.as_ref() {
                        ScalarExpr::Binary { .. } => write!(f, "({})", operand)?,
                        other => write!(f, "{}", other)?,
                    }
                }
                Ok(())
            }
            ScalarExpr::FunctionCall { name, args } => {
                write!(f, "{}(", name)?;
                write_list(f, args)?;
                write!(f, ")")
            }
            ScalarExpr::Subquery(query) => write!(f, "({})", query),
        }
    }
}

impl fmt::Display for BooleanExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BooleanExpr::Comparison { left, op, right } => write!(f, "{} {} {}", left, op, right),
            BooleanExpr::IsNull { expr, negated } => {
                if *negated {
                    write!(f, "{} IS NOT NULL", expr)
                } else {
                    write!(f, "{} IS NULL", expr)
                }
            }
            BooleanExpr::And(left, right) => {
                for (i, operand) in [left, right].into_iter().enumerate() {
                    if i == 1 {
                        write!(f, " AND ")?;
                    }
                    match operand.as_ref() {
                        BooleanExpr::Or(..) => write!(f, "({})", operand)?,
                        other => write!(f, "{}", other)?,
                    }
                }
                Ok(())
            }
            BooleanExpr::Or(left, right) => write!(f, "{} OR {}", left, right),
            BooleanExpr::Not(inner) => write!(f, "NOT ({})", inner),
        }
    }
}

impl fmt::Display for SelectElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectElement::Star => write!(f, "*"),
            SelectElement::Scalar { expr, alias: None } => write!(f, "{}", expr),
            SelectElement::Scalar {
                expr,
                alias: Some(alias),
            } => write!(f, "{} AS {}", expr, alias),
        }
    }
}

impl fmt::Display for TableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableReference::Named { table, alias } => write!(f, "{} AS {}", table, alias),
            TableReference::Derived { query, alias } => write!(f, "({}) AS {}", query, alias),
            TableReference::Variable { name, alias } => write!(f, "@{} AS {}", name, alias),
            TableReference::Function { function, alias } => {
                write!(f, "{}(", function.name)?;
                write_list(f, &function.args)?;
                write!(f, ") AS {}", alias)
            }
        }
    }
}

impl fmt::Display for EdgePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)?;
        if let Some(alias) = &self.alias {
            write!(f, " AS {}", alias)?;
        }
        if !self.is_single_hop() {
            write!(f, "*{}..{}", self.min_length, self.max_length)?;
        }
        if !self.attribute_values.is_empty() {
            write!(f, " {{")?;
            for (i, (name, value)) in self.attribute_values.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}: {}", name, value)?;
            }
            write!(f, "}}")?;
        }
        Ok(())
    }
}

impl fmt::Display for MatchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for step in &self.steps {
            let outgoing = step.edge.direction == Direction::Outgoing;
            match (step.edge.direction, self.is_reversed) {
                (Direction::Both, _) => write!(f, "{}-[{}]-", step.node, step.edge)?,
                (_, reversed) if outgoing != reversed => {
                    write!(f, "{}-[{}]->", step.node, step.edge)?
                }
                _ => write!(f, "{}<-[{}]-", step.node, step.edge)?,
            }
        }
        if let Some(tail) = &self.tail {
            write!(f, "{}", tail)?;
        }
        Ok(())
    }
}

impl fmt::Display for SelectQueryBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT ")?;
        write_list(f, &self.select)?;
        if !self.from.is_empty() {
            write!(f, " FROM ")?;
            write_list(f, &self.from)?;
        }
        if let Some(match_clause) = &self.match_clause {
            write!(f, " MATCH ")?;
            write_list(f, &match_clause.paths)?;
        }
        if let Some(predicate) = &self.where_clause {
            write!(f, " WHERE {}", predicate)?;
        }
        if !self.order_by.is_empty() {
            write!(f, " ORDER BY ")?;
            for (i, item) in self.order_by.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                match item.order {
                    SortOrder::Ascending => write!(f, "{}", item.expr)?,
                    SortOrder::Descending => write!(f, "{} DESC", item.expr)?,
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicate_display() {
        let predicate = BooleanExpr::And(
            Box::new(BooleanExpr::Comparison {
                left: ScalarExpr::column("a", PropertyName::named("name")),
                op: ComparisonOp::Eq,
                right: ScalarExpr::Literal(Literal::String("marko".to_string())),
            }),
            Box::new(BooleanExpr::Or(
                Box::new(BooleanExpr::IsNull {
                    expr: ScalarExpr::column("a", PropertyName::named("age")),
                    negated: false,
                }),
                Box::new(BooleanExpr::Comparison {
                    left: ScalarExpr::column("a", PropertyName::named("age")),
                    op: ComparisonOp::Gt,
                    right: ScalarExpr::Literal(Literal::Integer(30)),
                }),
            )),
        );

        assert_eq!(
            predicate.to_string(),
            "a.name = 'marko' AND (a.age IS NULL OR a.age > 30)"
        );
    }

    #[test]
    fn test_contains_subquery() {
        let inner = SelectQueryBlock {
            select: vec![SelectElement::Scalar {
                expr: ScalarExpr::column("b", PropertyName::named("age")),
                alias: None,
            }],
            ..SelectQueryBlock::default()
        };
        let nested = BooleanExpr::Not(Box::new(BooleanExpr::Comparison {
            left: ScalarExpr::column("a", PropertyName::named("age")),
            op: ComparisonOp::Gt,
            right: ScalarExpr::Binary {
                left: Box::new(ScalarExpr::Literal(Literal::Integer(1))),
                op: ArithmeticOp::Add,
                right: Box::new(ScalarExpr::Subquery(Box::new(inner))),
            },
        }));
        assert!(nested.contains_subquery());

        let flat = BooleanExpr::IsNull {
            expr: ScalarExpr::column("a", PropertyName::named("age")),
            negated: true,
        };
        assert!(!flat.contains_subquery());
    }

    #[test]
    fn test_wildcard_column_display() {
        let expr = ScalarExpr::column("a", PropertyName::All);
        assert_eq!(expr.to_string(), "a.*");
    }

    #[test]
    fn test_string_literal_escaping() {
        let lit = Literal::String("o'brien".to_string());
        assert_eq!(lit.to_string(), "'o\\'brien'");
    }
}
