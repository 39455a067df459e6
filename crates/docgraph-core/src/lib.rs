//! docgraph Core Library
//!
//! This crate provides the shared vocabulary of the docgraph query compiler:
//! error handling, table and column kinds, directions and property names.
//!
//! # Modules
//!
//! - `error` - Error types and result aliases
//! - `types` - Table/column kinds, directions, property names

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{ColumnGraphType, Direction, PropertyName, SortOrder, TableGraphType};
