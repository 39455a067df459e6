//! docgraph - Graph-pattern query compiler over a document store
//!
//! This is the main library crate that re-exports all docgraph components.

pub use docgraph_core as core;
pub use docgraph_query as query;

// Re-export commonly used types
pub use docgraph_core::{
    ColumnGraphType, Direction, Error, PropertyName, Result, SortOrder, TableGraphType,
};

pub use docgraph_query::{
    parse_query, parse_script, CompilerConfig, DocumentFields, ExecutionPlan, PhysicalOperator,
    QueryCompiler,
};
