//! Core types shared by the query compiler
//!
//! Defines table and column kinds, traversal directions, property names and
//! the meta-fields every vertex and edge document carries.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default name of the vertex id field
pub const DEFAULT_ID_FIELD: &str = "id";

/// Default name of the outgoing adjacency list field
pub const DEFAULT_EDGE_FIELD: &str = "_edge";

/// Default name of the incoming adjacency list field
pub const DEFAULT_REVERSE_EDGE_FIELD: &str = "_reverse_edge";

/// Default name of the field holding the other endpoint of an adjacency entry
pub const DEFAULT_SINK_FIELD: &str = "_sink";

/// Default name of the edge id field inside an adjacency entry
pub const DEFAULT_EDGE_ID_FIELD: &str = "_ID";

/// Name of the single field added by value-producing table functions
pub const VALUE_FIELD: &str = "_value";

/// Kind of a table alias bound in a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableGraphType {
    /// A vertex document
    Vertex,
    /// An edge decoded from an adjacency list
    Edge,
    /// Any other value (derived tables, variables, table functions)
    Value,
}

/// Kind of a single column in the raw record layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnGraphType {
    VertexId,
    AdjacencyList,
    ReverseAdjacencyList,
    EdgeSink,
    EdgeId,
    VertexObject,
    EdgeObject,
    Value,
}

/// Direction of a relationship traversal
///
/// For a pattern edge this is also its edge type: which adjacency list of
/// the source vertex has to be decoded to enumerate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Outgoing relationship (->), decoded from the forward list
    Outgoing,
    /// Incoming relationship (<-), decoded from the reverse list
    Incoming,
    /// Both directions (--), decoded from both lists
    Both,
}

impl Direction {
    /// Returns the opposite direction
    pub fn reverse(self) -> Self {
        match self {
            Direction::Outgoing => Direction::Incoming,
            Direction::Incoming => Direction::Outgoing,
            Direction::Both => Direction::Both,
        }
    }
}

/// A property referenced on a vertex or edge
///
/// `All` stands for the whole document and is kept apart from any field
/// that happens to be literally named `*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PropertyName {
    Named(String),
    All,
}

impl PropertyName {
    /// Create a named property
    pub fn named<S: Into<String>>(name: S) -> Self {
        PropertyName::Named(name.into())
    }

    /// The field name, if this is not the whole document
    pub fn as_named(&self) -> Option<&str> {
        match self {
            PropertyName::Named(name) => Some(name),
            PropertyName::All => None,
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, PropertyName::All)
    }
}

impl From<&str> for PropertyName {
    fn from(s: &str) -> Self {
        PropertyName::named(s)
    }
}

impl fmt::Display for PropertyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyName::Named(name) => write!(f, "{}", name),
            PropertyName::All => write!(f, "*"),
        }
    }
}

/// Sort order of an ORDER BY key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}
