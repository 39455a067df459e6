//! Error types for docgraph
//!
//! Every compilation failure is fatal and surfaces as one of the named
//! conditions below, so callers can tell user query errors apart from
//! compiler limitations and compiler defects.

use thiserror::Error;

/// The main error type for docgraph operations
#[derive(Error, Debug)]
pub enum Error {
    // ========== Query Errors ==========
    #[error("Query parse error: {0}")]
    QueryParse(String),

    // ========== Binding Errors ==========
    #[error("Table {0} doesn't exist in the context")]
    UnresolvedTable(String),

    #[error("Alias {0} is declared more than once")]
    DuplicateAlias(String),

    #[error("Column {table}.{column} is not bound in the current query")]
    UnboundColumn { table: String, column: String },

    #[error("Temporary table @{0} is not defined")]
    UnknownTemporaryTable(String),

    #[error("Side-effect {0} is not registered")]
    UnknownSideEffect(String),

    // ========== Unsupported Constructs ==========
    #[error("Cross-document predicate is not supported: {0}")]
    CrossDocumentPredicate(String),

    #[error("Projection is not supported: {0}")]
    UnsupportedProjection(String),

    #[error("Unsupported construct: {0}")]
    UnsupportedConstruct(String),

    #[error("Sub-query nesting exceeds the limit of {0}")]
    NestingTooDeep(usize),

    // ========== Internal Errors ==========
    #[error(
        "Column reference {table}.{column} cannot be located in the raw records of the current pipeline"
    )]
    ColumnNotFound { table: String, column: String },

    #[error("Internal error: {0}")]
    Internal(String),

    // ========== Configuration Errors ==========
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ========== Serialization Errors ==========
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ========== IO Errors ==========
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for docgraph operations
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl Error {
    /// Returns true if the query text or its names are at fault
    pub fn is_user_error(&self) -> bool {
        matches!(self, Error::QueryParse(_)) || self.is_binding_error()
    }

    /// Returns true if a name in the query could not be resolved
    pub fn is_binding_error(&self) -> bool {
        matches!(
            self,
            Error::UnresolvedTable(_)
                | Error::DuplicateAlias(_)
                | Error::UnboundColumn { .. }
                | Error::UnknownTemporaryTable(_)
                | Error::UnknownSideEffect(_)
        )
    }

    /// Returns true if the query is valid but cannot be lowered yet
    pub fn is_compiler_limitation(&self) -> bool {
        matches!(
            self,
            Error::CrossDocumentPredicate(_)
                | Error::UnsupportedProjection(_)
                | Error::UnsupportedConstruct(_)
                | Error::NestingTooDeep(_)
        )
    }

    /// Returns true if an earlier compilation stage left an inconsistent state
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::ColumnNotFound { .. } | Error::Internal(_))
    }
}
