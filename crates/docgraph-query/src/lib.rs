//! docgraph Query Compiler
//!
//! Compiles graph-pattern queries into physical operator plans over a
//! document store.
//!
//! # Overview
//!
//! The compiler implements:
//! - SQL-flavoured MATCH/WHERE/SELECT lexer and parser
//! - Pattern graph construction with connected components
//! - Predicate classification (node, edge and cross-table)
//! - Traversal order optimization
//! - Per-node fetch script generation
//! - Physical operator assembly with record layouts
//! - Table functions and nested sub-queries

pub mod ast;
pub mod assembler;
pub mod builder;
pub mod classifier;
pub mod compiler;
pub mod config;
pub mod context;
pub mod functions;
pub mod graph;
pub mod lexer;
pub mod operators;
pub mod optimizer;
pub mod parser;
pub mod script;
pub mod table_functions;
pub mod union_find;

pub use ast::{Script, SelectQueryBlock, Statement};
pub use compiler::QueryCompiler;
pub use config::{CompilerConfig, DocumentFields};
pub use context::{CompilationContext, RawRecordLayout, Registries, TableHeader};
pub use functions::{BooleanFunction, ScalarFunction, SubqueryCompiler};
pub use graph::{ConnectedComponent, MatchGraph};
pub use lexer::{tokenize, Token};
pub use operators::{ExecutionPlan, PhysicalOperator};
pub use parser::{parse_query, parse_script};

// Type alias for lexer (uses logos::Lexer)
pub type QueryLexer<'a> = logos::Lexer<'a, Token>;
