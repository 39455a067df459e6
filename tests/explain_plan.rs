//! Plan descriptors as the runtime sees them

use docgraph::{CompilerConfig, DocumentFields, Error, QueryCompiler};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct Column {
    name: String,
    offset: usize,
    column_type: String,
}

#[derive(Debug, Deserialize)]
struct Header {
    columns: Vec<Column>,
}

fn explain(compiler: &QueryCompiler, query: &str) -> Value {
    let json = compiler.compile_query(query).unwrap().to_json().unwrap();
    serde_json::from_str(&json).unwrap()
}

/// Operator tags from the root down the leftmost inputs
fn tags(plan: &Value) -> Vec<String> {
    let mut tags = Vec::new();
    let mut current = Some(&plan["root"]);
    while let Some(op) = current {
        tags.push(op["operator"].as_str().unwrap().to_string());
        current = op.get("input").or_else(|| op.get("left"));
    }
    tags
}

#[test]
fn test_single_edge_plan_json() {
    let compiler = QueryCompiler::default();
    let plan = explain(
        &compiler,
        "SELECT b.name AS friend FROM node a, node b MATCH a-[knows]->b WHERE a.name = 'marko'",
    );

    assert_eq!(tags(&plan), vec!["project", "traverse", "adjacency_decode", "fetch"]);

    let fetch = &plan["root"]["input"]["input"]["input"];
    assert_eq!(
        fetch["script"]["text"],
        "SELECT a.id, a.name, a._edge FROM Node a WHERE a.name = 'marko'"
    );

    let header: Header = serde_json::from_value(plan["output"].clone()).unwrap();
    assert_eq!(header.columns.len(), 1);
    assert_eq!(header.columns[0].name, "friend");
    assert_eq!(header.columns[0].offset, 0);
    assert_eq!(header.columns[0].column_type, "Value");
}

#[test]
fn test_custom_document_fields() {
    let config = CompilerConfig::from_json_str(
        r#"{
            "fields": {
                "id": "vid",
                "edge": "out",
                "reverse_edge": "in"
            },
            "node_collection": "Vertex",
            "eager_backward_matching": true,
            "max_nesting_depth": 4
        }"#,
    )
    .unwrap();
    assert_eq!(config.fields.id, "vid");

    let plan = explain(
        &QueryCompiler::new(config),
        "SELECT b.vid FROM node a, node b MATCH a-[knows]->b",
    );
    let fetch = &plan["root"]["input"]["input"]["input"];
    assert_eq!(fetch["script"]["text"], "SELECT a.vid, a.out FROM Vertex a");
}

#[test]
fn test_errors_surface_as_results() {
    let compiler = QueryCompiler::new(CompilerConfig::for_development());
    assert!(matches!(
        compiler.compile_query("SELECT FROM"),
        Err(Error::QueryParse(_))
    ));
    assert!(matches!(
        compiler.compile_query("SELECT x.id FROM node a"),
        Err(Error::UnresolvedTable(_))
    ));

    let invalid = CompilerConfig::new().fields(DocumentFields {
        id: String::new(),
        ..DocumentFields::default()
    });
    assert!(invalid.validate().is_err());
}
