//! Physical operator descriptors
//!
//! The compiler's output: a tree whose leaves fetch documents with a
//! generated script and whose inner nodes decode, join, filter, order and
//! project records. Every operator carries the record offsets it reads, so
//! the runtime never resolves a column name.

use crate::ast::Literal;
use crate::context::TableHeader;
use crate::functions::{BooleanFunction, ScalarFunction};
use crate::script::NodeScript;
use docgraph_core::{PropertyName, SortOrder};
use serde::Serialize;

/// Compiled query block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPlan {
    /// Root physical operator
    pub root: PhysicalOperator,

    /// Output columns of the root, in record order
    pub output: TableHeader,
}

impl ExecutionPlan {
    /// Operator names from the leftmost leaf up to the root
    pub fn chain(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        let mut current = Some(&self.root);
        while let Some(op) = current {
            names.push(op.name());
            current = op.input();
        }
        names.reverse();
        names
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.output.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Serialize the plan for the runtime
    pub fn to_json(&self) -> docgraph_core::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Bounds of a variable-length edge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathBounds {
    pub min_length: u32,
    pub max_length: u32,

    /// Equality filters applied to every hop
    pub attribute_values: Vec<(String, Literal)>,
}

/// Physical query operators
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "operator", rename_all = "snake_case")]
pub enum PhysicalOperator {
    /// Enumerates the record of the enclosing query
    OuterContext,

    /// Run a node script against the store
    Fetch { alias: String, script: NodeScript },

    /// Every left record combined with every right record
    CartesianProduct {
        left: Box<PhysicalOperator>,
        right: Box<PhysicalOperator>,
    },

    /// Decode adjacency lists into one record per entry
    AdjacencyDecode {
        input: Box<PhysicalOperator>,
        edge_alias: String,
        adjacency_fields: Vec<usize>,

        /// Edge properties appended to the record, in order
        properties: Vec<PropertyName>,

        /// Evaluated against the decoded edge alone
        predicate: Option<BooleanFunction>,

        path: Option<PathBounds>,
    },

    /// Fetch the vertex an edge points at
    Traverse {
        input: Box<PhysicalOperator>,
        alias: String,
        sink_field: usize,
        script: NodeScript,

        /// (adjacency sink offset, vertex id offset) pairs that must match
        matching: Vec<(usize, usize)>,
    },

    Filter {
        input: Box<PhysicalOperator>,
        predicate: BooleanFunction,
    },

    OrderBy {
        input: Box<PhysicalOperator>,
        keys: Vec<(usize, SortOrder)>,
    },

    Project {
        input: Box<PhysicalOperator>,
        columns: Vec<ScalarFunction>,
    },

    /// Run a correlated sub-query per record, falling back to the given
    /// input fields when it yields nothing
    Optional {
        input: Box<PhysicalOperator>,
        fallback_fields: Vec<usize>,
        subquery: Box<ExecutionPlan>,
    },

    /// Run a correlated sub-query per record, scoped to that record
    Local {
        input: Box<PhysicalOperator>,
        subquery: Box<ExecutionPlan>,
    },

    /// Run a correlated sub-query per record and flatten the results
    FlatMap {
        input: Box<PhysicalOperator>,
        subquery: Box<ExecutionPlan>,
    },

    /// First branch producing any result wins
    Coalesce {
        input: Box<PhysicalOperator>,
        branches: Vec<ExecutionPlan>,
    },

    /// Fetch vertices by the ids found in the given fields; no script
    /// means only the id is needed
    BoundVertex {
        input: Box<PhysicalOperator>,
        alias: String,
        id_fields: Vec<usize>,
        script: Option<NodeScript>,
    },

    /// Decode adjacency lists located in the record
    BoundEdge {
        input: Box<PhysicalOperator>,
        alias: String,
        adjacency_fields: Vec<usize>,
        properties: Vec<PropertyName>,
    },

    /// One record per value of the given fields
    Unfold {
        input: Box<PhysicalOperator>,
        fields: Vec<usize>,
        with_names: bool,
    },

    /// Feed a field into a named side-effect and pass records through
    Aggregate {
        input: Box<PhysicalOperator>,
        field: usize,
        side_effect: String,
    },

    /// Emit the collected values of side-effects once the input is drained
    Cap {
        input: Box<PhysicalOperator>,
        side_effects: Vec<String>,
    },
}

impl PhysicalOperator {
    pub fn name(&self) -> &'static str {
        match self {
            PhysicalOperator::OuterContext => "outer_context",
            PhysicalOperator::Fetch { .. } => "fetch",
            PhysicalOperator::CartesianProduct { .. } => "cartesian_product",
            PhysicalOperator::AdjacencyDecode { .. } => "adjacency_decode",
            PhysicalOperator::Traverse { .. } => "traverse",
            PhysicalOperator::Filter { .. } => "filter",
            PhysicalOperator::OrderBy { .. } => "order_by",
            PhysicalOperator::Project { .. } => "project",
            PhysicalOperator::Optional { .. } => "optional",
            PhysicalOperator::Local { .. } => "local",
            PhysicalOperator::FlatMap { .. } => "flat_map",
            PhysicalOperator::Coalesce { .. } => "coalesce",
            PhysicalOperator::BoundVertex { .. } => "bound_vertex",
            PhysicalOperator::BoundEdge { .. } => "bound_edge",
            PhysicalOperator::Unfold { .. } => "unfold",
            PhysicalOperator::Aggregate { .. } => "aggregate",
            PhysicalOperator::Cap { .. } => "cap",
        }
    }

    /// The operator records flow in from; the left side of a product
    pub fn input(&self) -> Option<&PhysicalOperator> {
        match self {
            PhysicalOperator::OuterContext | PhysicalOperator::Fetch { .. } => None,
            PhysicalOperator::CartesianProduct { left, .. } => Some(left),
            PhysicalOperator::AdjacencyDecode { input, .. }
            | PhysicalOperator::Traverse { input, .. }
            | PhysicalOperator::Filter { input, .. }
            | PhysicalOperator::OrderBy { input, .. }
            | PhysicalOperator::Project { input, .. }
            | PhysicalOperator::Optional { input, .. }
            | PhysicalOperator::Local { input, .. }
            | PhysicalOperator::FlatMap { input, .. }
            | PhysicalOperator::Coalesce { input, .. }
            | PhysicalOperator::BoundVertex { input, .. }
            | PhysicalOperator::BoundEdge { input, .. }
            | PhysicalOperator::Unfold { input, .. }
            | PhysicalOperator::Aggregate { input, .. }
            | PhysicalOperator::Cap { input, .. } => Some(input),
        }
    }

    /// Number of operators in the tree, including nested sub-query plans
    pub fn count(&self) -> usize {
        let nested: usize = match self {
            PhysicalOperator::CartesianProduct { right, .. } => right.count(),
            PhysicalOperator::Optional { subquery, .. }
            | PhysicalOperator::Local { subquery, .. }
            | PhysicalOperator::FlatMap { subquery, .. } => subquery.root.count(),
            PhysicalOperator::Coalesce { branches, .. } => {
                branches.iter().map(|b| b.root.count()).sum()
            }
            _ => 0,
        };
        1 + nested + self.input().map_or(0, PhysicalOperator::count)
    }
}
