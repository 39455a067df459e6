//! docgraph explain entry point
//!
//! Compiles a query and prints its execution plan as JSON. Without a query
//! argument the query is read from stdin.

use clap::Parser;
use docgraph::{CompilerConfig, QueryCompiler, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "docgraph-explain", version, about, long_about = None)]
struct Args {
    /// JSON compiler configuration
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Query or batch script to compile
    query: Option<String>,
}

fn load_config(path: Option<&Path>) -> Result<CompilerConfig> {
    match path {
        Some(path) => {
            info!("Loading compiler config from {}", path.display());
            CompilerConfig::from_json_str(&std::fs::read_to_string(path)?)
        }
        None => Ok(CompilerConfig::default()),
    }
}

fn run(args: Args) -> Result<String> {
    let config = load_config(args.config.as_deref())?;

    let query = match args.query {
        Some(query) => query,
        None => {
            let mut query = String::new();
            std::io::stdin().read_to_string(&mut query)?;
            query
        }
    };

    let plan = QueryCompiler::new(config).compile_query(&query)?;
    plan.to_json()
}

fn main() {
    let args = Args::parse();

    // Logs go to stderr, the plan to stdout
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(args) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            error!("Failed to compile query: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_config_flag_and_query() {
        let args = Args::try_parse_from([
            "docgraph-explain",
            "--config",
            "compiler.json",
            "SELECT a.id FROM node a",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("compiler.json")));
        assert_eq!(args.query.as_deref(), Some("SELECT a.id FROM node a"));

        let args = Args::try_parse_from(["docgraph-explain"]).unwrap();
        assert!(args.config.is_none());
        assert!(args.query.is_none());
    }

    #[test]
    fn test_bad_arguments_are_rejected() {
        assert!(Args::try_parse_from(["docgraph-explain", "--config"]).is_err());
        assert!(Args::try_parse_from(["docgraph-explain", "q1", "q2"]).is_err());
    }

    #[test]
    fn test_missing_config_file() {
        let err = load_config(Some(Path::new("/nonexistent/docgraph.json"))).unwrap_err();
        assert!(matches!(err, docgraph::Error::Io(_)));
    }
}
