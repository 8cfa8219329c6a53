//! MF-019: CLI subcommands: init, validate, analyze, map.

use crate::core::config::Configuration;
use crate::core::registry::PlanRegistry;
use crate::core::typemap::TypeMap;
use crate::core::types::{TypeKey, TypePair};
use crate::core::{fingerprint, json, parser};
use clap::Subcommand;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new mapforge project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate mapforge.yaml without compiling plans
    Validate {
        /// Path to mapforge.yaml
        #[arg(short, long, default_value = "mapforge.yaml")]
        file: PathBuf,
    },

    /// Compile plans and show analyzer decisions
    Analyze {
        /// Path to mapforge.yaml
        #[arg(short, long, default_value = "mapforge.yaml")]
        file: PathBuf,

        /// Restrict to type maps with this source type
        #[arg(short, long)]
        source: Option<String>,

        /// Restrict to type maps with this destination type
        #[arg(short, long)]
        destination: Option<String>,
    },

    /// Map one JSON instance and print the result
    Map {
        /// Path to mapforge.yaml
        #[arg(short, long, default_value = "mapforge.yaml")]
        file: PathBuf,

        /// Source type
        #[arg(short, long)]
        source: String,

        /// Destination type
        #[arg(short, long)]
        destination: String,

        /// Input JSON file, or "-" for stdin
        #[arg(short, long, default_value = "-")]
        input: String,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Analyze {
            file,
            source,
            destination,
        } => cmd_analyze(&file, source.as_deref(), destination.as_deref()),
        Commands::Map {
            file,
            source,
            destination,
            input,
        } => cmd_map(&file, &source, &destination, &input),
    }
}

const TEMPLATE: &str = r#"version: "1.0"
name: my-mappings
description: "Managed by mapforge"

options:
  max_execution_plan_depth: 1
  value_cycle_max_depth: 10
  allow_null_destination_values: true

types:
  Person:
    kind: class
    members:
      Name: { type: string }
      Manager: { type: Person }
  PersonDto:
    kind: class
    members:
      Name: { type: string }
      Manager: { type: PersonDto }

type_maps:
  - source: Person
    destination: PersonDto
"#;

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("mapforge.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }
    std::fs::create_dir_all(path).map_err(|e| format!("cannot create {}: {}", path.display(), e))?;
    std::fs::write(&config_path, TEMPLATE)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized mapforge project at {}", path.display());
    println!("  Created: {}", config_path.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let doc = parser::parse_document_file(file).map_err(|e| e.to_string())?;
    let errors = parser::validate_document(&doc);

    if errors.is_empty() {
        println!(
            "OK: {} ({} types, {} type maps)",
            doc.name,
            doc.types.len(),
            doc.type_maps.len()
        );
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(format!("{} validation error(s)", errors.len()))
    }
}

fn cmd_analyze(file: &Path, source: Option<&str>, destination: Option<&str>) -> Result<(), String> {
    let registry = load_registry(file)?;
    print!("{}", render_analysis(&registry, source, destination)?);
    Ok(())
}

fn cmd_map(file: &Path, source: &str, destination: &str, input: &str) -> Result<(), String> {
    let registry = load_registry(file)?;
    let text = read_input(input)?;
    println!("{}", render_mapping(&registry, source, destination, &text)?);
    Ok(())
}

/// Parse, validate and build, reporting every validation error.
fn load_registry(file: &Path) -> Result<PlanRegistry, String> {
    let doc = parser::parse_document_file(file).map_err(|e| e.to_string())?;
    let errors = parser::validate_document(&doc);
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        return Err("validation failed".to_string());
    }
    let config: Configuration = parser::build_configuration(&doc).map_err(|e| e.to_string())?;
    Ok(PlanRegistry::new(Arc::new(config)))
}

fn read_input(input: &str) -> Result<String, String> {
    if input == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .map_err(|e| format!("cannot read stdin: {}", e))?;
        Ok(text)
    } else {
        std::fs::read_to_string(input).map_err(|e| format!("cannot read {}: {}", input, e))
    }
}

/// Compile the selected type maps and describe what the analyzer decided.
fn render_analysis(
    registry: &PlanRegistry,
    source: Option<&str>,
    destination: Option<&str>,
) -> Result<String, String> {
    let selected: Vec<Arc<TypeMap>> = registry
        .configuration()
        .type_maps()
        .filter(|tm| source.is_none_or(|s| tm.source_type().as_str() == s))
        .filter(|tm| destination.is_none_or(|d| tm.destination_type().as_str() == d))
        .cloned()
        .collect();
    if selected.is_empty() {
        return Err("no type map matches the selection".to_string());
    }

    let mut failures = 0;
    for tm in &selected {
        if let Err(e) = registry.get_or_compile(tm.pair()) {
            eprintln!("  ERROR: {}", e);
            failures += 1;
        }
    }

    let mut out = String::new();
    for tm in &selected {
        let dispatched: Vec<&str> = tm
            .all_member_maps()
            .into_iter()
            .filter(|m| !m.is_inline())
            .map(|m| m.destination_name.as_str())
            .collect();
        out.push_str(&format!("{}\n", tm.pair()));
        out.push_str(&format!("  state: {:?}\n", tm.state()));
        out.push_str(&format!("  preserve_references: {}\n", tm.preserve_references()));
        out.push_str(&format!("  max_depth: {}\n", tm.max_depth()));
        if !dispatched.is_empty() {
            out.push_str(&format!("  dispatched members: {}\n", dispatched.join(", ")));
        }
        out.push_str(&format!("  fingerprint: {}\n", fingerprint::type_map_fingerprint(tm)));
    }
    if failures > 0 {
        print!("{}", out);
        return Err(format!("{} plan(s) failed to compile", failures));
    }
    Ok(out)
}

/// Decode `text` as a `source` instance, map it and encode the result.
fn render_mapping(registry: &PlanRegistry, source: &str, destination: &str, text: &str) -> Result<String, String> {
    let input: serde_json::Value = serde_json::from_str(text).map_err(|e| format!("invalid JSON input: {}", e))?;
    let pair = TypePair::new(source, destination);
    let value = json::from_json(&input, &TypeKey::new(source), &registry.configuration().catalog)
        .map_err(|e| e.to_string())?;
    let mapped = registry.map(&pair, &value).map_err(|e| match e.root_cause() {
        root if root.to_string() != e.to_string() => format!("{}: {}", e, root),
        _ => e.to_string(),
    })?;
    serde_json::to_string_pretty(&json::to_json(&mapped)).map_err(|e| format!("cannot encode result: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        cmd_init(dir.path()).unwrap();
        let file = dir.path().join("mapforge.yaml");
        (dir, file)
    }

    #[test]
    fn test_mf019_init() {
        let (dir, file) = project();
        assert!(file.exists());
        assert!(cmd_init(dir.path()).is_err());
    }

    #[test]
    fn test_mf019_validate_template() {
        let (_dir, file) = project();
        cmd_validate(&file).unwrap();
    }

    #[test]
    fn test_mf019_validate_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("mapforge.yaml");
        std::fs::write(
            &file,
            r#"
version: "1.0"
name: broken
type_maps:
  - { source: Missing, destination: string }
"#,
        )
        .unwrap();
        let err = cmd_validate(&file).unwrap_err();
        assert!(err.contains("1 validation error"));
        assert!(load_registry(&file).is_err());
    }

    #[test]
    fn test_mf019_analyze_reports_cycle() {
        let (_dir, file) = project();
        let registry = load_registry(&file).unwrap();
        let report = render_analysis(&registry, Some("Person"), None).unwrap();
        assert!(report.contains("Person -> PersonDto"));
        assert!(report.contains("preserve_references: true"));
        assert!(report.contains("dispatched members: Manager"));
        assert!(report.contains("fingerprint: blake3:"));
        assert!(render_analysis(&registry, Some("Nobody"), None).is_err());
    }

    #[test]
    fn test_mf019_map_cyclic_instance() {
        let (_dir, file) = project();
        let registry = load_registry(&file).unwrap();
        let input = r#"{"$id": "1", "Name": "Ada", "Manager": {"$id": "2", "Name": "Bob", "Manager": {"$ref": "1"}}}"#;
        let output = render_mapping(&registry, "Person", "PersonDto", input).unwrap();
        let result: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(result["Name"], "Ada");
        assert_eq!(result["Manager"]["Name"], "Bob");
        assert_eq!(result["Manager"]["Manager"]["$ref"], result["$id"]);
    }

    #[test]
    fn test_mf019_map_errors() {
        let (_dir, file) = project();
        let registry = load_registry(&file).unwrap();
        assert!(render_mapping(&registry, "Person", "PersonDto", "{not json").is_err());
        let err = render_mapping(&registry, "Person", "Ghost", "{}").unwrap_err();
        assert!(err.contains("missing type map configuration"));
    }

    #[test]
    fn test_mf019_map_from_file() {
        let (dir, file) = project();
        let input = dir.path().join("person.json");
        std::fs::write(&input, r#"{"Name": "Solo"}"#).unwrap();
        cmd_map(&file, "Person", "PersonDto", input.to_str().unwrap()).unwrap();
        assert!(cmd_map(&file, "Person", "PersonDto", "/nonexistent/input.json").is_err());
    }
}
