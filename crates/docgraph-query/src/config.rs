//! Compiler configuration

use docgraph_core::types::{
    DEFAULT_EDGE_FIELD, DEFAULT_EDGE_ID_FIELD, DEFAULT_ID_FIELD, DEFAULT_REVERSE_EDGE_FIELD,
    DEFAULT_SINK_FIELD,
};
use docgraph_core::{ColumnGraphType, Direction, Error, PropertyName, Result, TableGraphType};
use serde::{Deserialize, Serialize};

/// Names of the meta-fields carried by vertex documents and adjacency entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentFields {
    /// Vertex id
    pub id: String,

    /// Outgoing adjacency list
    pub edge: String,

    /// Incoming adjacency list
    pub reverse_edge: String,

    /// Other endpoint of an adjacency entry
    pub sink: String,

    /// Edge id inside an adjacency entry
    pub edge_id: String,
}

impl Default for DocumentFields {
    fn default() -> Self {
        Self {
            id: DEFAULT_ID_FIELD.to_string(),
            edge: DEFAULT_EDGE_FIELD.to_string(),
            reverse_edge: DEFAULT_REVERSE_EDGE_FIELD.to_string(),
            sink: DEFAULT_SINK_FIELD.to_string(),
            edge_id: DEFAULT_EDGE_ID_FIELD.to_string(),
        }
    }
}

impl DocumentFields {
    /// Properties every pattern vertex starts with
    pub fn default_node_properties(&self) -> Vec<PropertyName> {
        vec![PropertyName::named(&self.id)]
    }

    /// Properties every pattern edge starts with
    pub fn default_edge_properties(&self) -> Vec<PropertyName> {
        vec![
            PropertyName::named(&self.sink),
            PropertyName::named(&self.edge_id),
        ]
    }

    /// Adjacency list fields to decode for an edge of the given type
    pub fn adjacency_fields(&self, edge_type: Direction) -> Vec<&str> {
        match edge_type {
            Direction::Outgoing => vec![self.edge.as_str()],
            Direction::Incoming => vec![self.reverse_edge.as_str()],
            Direction::Both => vec![self.edge.as_str(), self.reverse_edge.as_str()],
        }
    }

    /// Column kind of a property on a table of the given kind
    pub fn column_type(&self, table: TableGraphType, column: &PropertyName) -> ColumnGraphType {
        let name = match column {
            PropertyName::All => {
                return match table {
                    TableGraphType::Vertex => ColumnGraphType::VertexObject,
                    TableGraphType::Edge => ColumnGraphType::EdgeObject,
                    TableGraphType::Value => ColumnGraphType::Value,
                };
            }
            PropertyName::Named(name) => name.as_str(),
        };
        match table {
            TableGraphType::Vertex if name == self.id => ColumnGraphType::VertexId,
            TableGraphType::Vertex if name == self.edge => ColumnGraphType::AdjacencyList,
            TableGraphType::Vertex if name == self.reverse_edge => {
                ColumnGraphType::ReverseAdjacencyList
            }
            TableGraphType::Edge if name == self.sink => ColumnGraphType::EdgeSink,
            TableGraphType::Edge if name == self.edge_id => ColumnGraphType::EdgeId,
            _ => ColumnGraphType::Value,
        }
    }
}

/// Query compiler configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Meta-field names of the backing documents
    pub fields: DocumentFields,

    /// Collection named in the FROM clause of generated scripts
    pub node_collection: String,

    /// Join backward-matching edges inside the fetch script of the node
    /// that introduces them instead of decoding them in the pipeline
    pub eager_backward_matching: bool,

    /// Maximum depth of nested sub-query compilation
    pub max_nesting_depth: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            fields: DocumentFields::default(),
            node_collection: "Node".to_string(),
            eager_backward_matching: true,
            max_nesting_depth: 16,
        }
    }
}

impl CompilerConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration for debugging plans: every edge is decoded in
    /// the pipeline so each join shows up as its own operator
    pub fn for_development() -> Self {
        Self {
            eager_backward_matching: false,
            ..Default::default()
        }
    }

    /// Load a configuration from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("invalid compiler config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for unusable values
    pub fn validate(&self) -> Result<()> {
        let names = [
            &self.fields.id,
            &self.fields.edge,
            &self.fields.reverse_edge,
            &self.fields.sink,
            &self.fields.edge_id,
            &self.node_collection,
        ];
        if names.iter().any(|name| name.is_empty()) {
            return Err(Error::Configuration(
                "document field and collection names must not be empty".to_string(),
            ));
        }
        if self.fields.edge == self.fields.reverse_edge {
            return Err(Error::Configuration(
                "forward and reverse adjacency lists must use different fields".to_string(),
            ));
        }
        if self.max_nesting_depth == 0 {
            return Err(Error::Configuration(
                "max_nesting_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Builder: set the document meta-field names
    pub fn fields(mut self, fields: DocumentFields) -> Self {
        self.fields = fields;
        self
    }

    /// Builder: set the collection name used in scripts
    pub fn node_collection(mut self, collection: &str) -> Self {
        self.node_collection = collection.to_string();
        self
    }

    /// Builder: disable eager backward matching
    pub fn lazy_backward_matching(mut self) -> Self {
        self.eager_backward_matching = false;
        self
    }

    /// Builder: set the nesting limit
    pub fn max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }
}
