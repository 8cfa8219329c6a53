//! MF-017: YAML parsing, validation and configuration building.
//!
//! Parses mapforge.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - Every referenced type must be in the catalog
//! - Member rules must name destination members and resolvable source paths
//! - Derived pairs must be declared type maps

use super::config::Configuration;
use super::document::{MappingDocument, MemberRule, TypeMapDecl};
use super::error::{MapError, MapResult};
use super::typemap::{ConstructorMap, ConstructorParameterMap, IncludedMember, MemberMap, PathMap, TypeMap};
use super::types::{TypeCatalog, TypeKey, TypePair};
use super::value::Value;
use rustc_hash::FxHashSet;
use std::path::Path;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a mapforge.yaml file from disk.
pub fn parse_document_file(path: &Path) -> MapResult<MappingDocument> {
    let content = std::fs::read_to_string(path).map_err(|e| MapError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_document(&content)
}

/// Parse a mapforge.yaml from a string.
pub fn parse_document(yaml: &str) -> MapResult<MappingDocument> {
    serde_yaml_ng::from_str(yaml).map_err(|e| MapError::Document(format!("YAML parse error: {}", e)))
}

/// Built-in types plus the document's types.
pub fn build_catalog(doc: &MappingDocument) -> TypeCatalog {
    let mut catalog = TypeCatalog::default();
    for (name, info) in &doc.types {
        catalog.register(name.as_str(), info.clone());
    }
    catalog
}

// ============================================================================
// Validation
// ============================================================================

/// Validate a parsed document. Returns a list of errors (empty = valid).
pub fn validate_document(doc: &MappingDocument) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ValidationError { message });

    if doc.version != "1.0" {
        push(format!("version must be \"1.0\", got \"{}\"", doc.version));
    }
    if doc.name.is_empty() {
        push("name must not be empty".to_string());
    }

    let catalog = build_catalog(doc);
    for (name, info) in &doc.types {
        for (member, member_info) in &info.members {
            if !catalog.contains(&member_info.ty) {
                push(format!("type '{}' member '{}' has unknown type '{}'", name, member, member_info.ty));
            }
        }
        for parameter in info.constructor.iter().flatten() {
            if !catalog.contains(&parameter.ty) {
                push(format!(
                    "type '{}' constructor parameter '{}' has unknown type '{}'",
                    name, parameter.name, parameter.ty
                ));
            }
        }
    }

    let declared: FxHashSet<(&str, &str)> = doc
        .type_maps
        .iter()
        .map(|tm| (tm.source.as_str(), tm.destination.as_str()))
        .collect();
    let mut seen = FxHashSet::default();
    for tm in &doc.type_maps {
        let label = format!("type map {} -> {}", tm.source, tm.destination);
        if !seen.insert((tm.source.as_str(), tm.destination.as_str())) {
            push(format!("{} is declared more than once", label));
        }
        let source = TypeKey::new(&tm.source);
        let destination = TypeKey::new(&tm.destination);
        let mut known = true;
        for (role, ty) in [("source", &source), ("destination", &destination)] {
            if !catalog.contains(ty) {
                push(format!("{} has unknown {} type '{}'", label, role, ty));
                known = false;
            }
        }
        if !known {
            continue;
        }
        for message in validate_type_map(&catalog, tm, &source, &destination) {
            push(format!("{}: {}", label, message));
        }
        for derived in &tm.include_derived {
            if !declared.contains(&(derived.source.as_str(), derived.destination.as_str())) {
                push(format!(
                    "{} includes undeclared derived map {} -> {}",
                    label, derived.source, derived.destination
                ));
            }
        }
    }

    errors
}

fn validate_type_map(catalog: &TypeCatalog, tm: &TypeMapDecl, source: &TypeKey, destination: &TypeKey) -> Vec<String> {
    let mut messages = Vec::new();

    for include in &tm.include_members {
        if let Err(e) = catalog.member_path_type(source, &include.from) {
            messages.push(format!("included member '{}': {}", include.name, e));
        }
    }

    for (name, rule) in &tm.members {
        if catalog.member(destination, name).is_none() {
            messages.push(format!("member '{}' is not a member of {}", name, destination));
            continue;
        }
        if let Err(message) = check_rule(catalog, tm, source, name, rule) {
            messages.push(format!("member '{}': {}", name, message));
        }
    }

    for path in &tm.paths {
        let display = path.path.join(".");
        let Some(leaf) = path.path.last() else {
            messages.push("path map with an empty path".to_string());
            continue;
        };
        if let Err(e) = catalog.member_path_type(destination, &path.path) {
            messages.push(format!("path '{}': {}", display, e));
            continue;
        }
        if let Err(message) = check_rule(catalog, tm, source, leaf, &path.rule) {
            messages.push(format!("path '{}': {}", display, message));
        }
    }

    if let Some(parameters) = &tm.constructor {
        match catalog.get(destination).and_then(|info| info.constructor.as_ref()) {
            None => messages.push(format!("{} declares no constructor", destination)),
            Some(declared) => {
                for parameter in parameters {
                    if !declared.iter().any(|p| p.name.eq_ignore_ascii_case(&parameter.name)) {
                        messages.push(format!("constructor has no parameter '{}'", parameter.name));
                    } else if parameter.rule.from.is_some() {
                        if let Err(message) = check_rule(catalog, tm, source, &parameter.name, &parameter.rule) {
                            messages.push(format!("parameter '{}': {}", parameter.name, message));
                        }
                    }
                }
            }
        }
    }

    messages
}

fn check_rule(
    catalog: &TypeCatalog,
    tm: &TypeMapDecl,
    source: &TypeKey,
    name: &str,
    rule: &MemberRule,
) -> Result<(), String> {
    if rule.ignore {
        return Ok(());
    }
    let root = match &rule.include {
        Some(include) => {
            let decl = tm
                .include_members
                .iter()
                .find(|i| &i.name == include)
                .ok_or_else(|| format!("unknown included member '{}'", include))?;
            catalog
                .member_path_type(source, &decl.from)
                .map_err(|e| e.to_string())?
        }
        None => source.clone(),
    };
    let path = rule.from.clone().unwrap_or_else(|| vec![name.to_string()]);
    catalog.member_path_type(&root, &path).map(|_| ()).map_err(|e| e.to_string())
}

// ============================================================================
// Building
// ============================================================================

/// Validate `doc` and turn it into a configuration.
pub fn build_configuration(doc: &MappingDocument) -> MapResult<Configuration> {
    let errors = validate_document(doc);
    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(|e| e.message.clone()).collect();
        return Err(MapError::Document(messages.join("; ")));
    }
    let catalog = build_catalog(doc);
    let mut type_maps = Vec::with_capacity(doc.type_maps.len());
    for decl in &doc.type_maps {
        type_maps.push(build_type_map(&catalog, decl)?);
    }
    let mut config = Configuration::new(catalog).with_options(doc.options.clone());
    for type_map in type_maps {
        config.add(type_map);
    }
    tracing::debug!(name = %doc.name, type_maps = config.type_map_count(), "built configuration");
    Ok(config)
}

fn build_type_map(catalog: &TypeCatalog, decl: &TypeMapDecl) -> MapResult<TypeMap> {
    let source = TypeKey::new(&decl.source);
    let destination = TypeKey::new(&decl.destination);
    let mut tm = TypeMap::new(source.clone(), destination.clone());

    let mut included = Vec::with_capacity(decl.include_members.len());
    for include in &decl.include_members {
        let source_type = catalog.member_path_type(&source, &include.from)?;
        let path: Vec<&str> = include.from.iter().map(String::as_str).collect();
        included.push(IncludedMember::new(&include.name, &path, source_type));
    }

    if let Some(info) = catalog.get(&destination) {
        for (name, member_info) in &info.members {
            let rule = match decl.members.get(name) {
                Some(rule) => rule.clone(),
                None if decl.auto_members && catalog.member(&source, name).is_some() => MemberRule::default(),
                None => continue,
            };
            tm = tm.member(build_member(catalog, &source, &included, name, member_info.ty.clone(), &rule)?);
        }
    }

    for path in &decl.paths {
        let leaf_type = catalog.member_path_type(&destination, &path.path)?;
        let leaf = path.path.last().map(String::as_str).unwrap_or_default();
        let member = build_member(catalog, &source, &included, leaf, leaf_type, &path.rule)?;
        let segments: Vec<&str> = path.path.iter().map(String::as_str).collect();
        tm = tm.path(PathMap::new(&segments, member));
    }

    if let Some(ctor) = build_constructor(catalog, decl, &source, &destination, &included)? {
        tm = tm.constructor(ctor);
    }
    for include in included {
        tm = tm.include_members(include);
    }
    for derived in &decl.include_derived {
        tm = tm.include_derived(TypePair::new(derived.source.as_str(), derived.destination.as_str()));
    }
    if decl.preserve_references {
        tm = tm.preserving_references();
    }
    if decl.max_depth > 0 {
        tm = tm.with_max_depth(decl.max_depth);
    }
    if let Some(substitute) = &decl.null_substitute {
        tm = tm.with_null_substitute(Value::from(substitute));
    }
    Ok(tm)
}

fn build_member(
    catalog: &TypeCatalog,
    source: &TypeKey,
    included: &[IncludedMember],
    name: &str,
    destination_type: TypeKey,
    rule: &MemberRule,
) -> MapResult<MemberMap> {
    let mut member = MemberMap::new(name, destination_type);
    if rule.ignore {
        return Ok(member.ignore());
    }
    let (root, index) = match &rule.include {
        Some(include) => {
            let index = included.iter().position(|i| &i.name == include).ok_or_else(|| {
                MapError::Document(format!("member '{}' names unknown included member '{}'", name, include))
            })?;
            (included[index].source_type.clone(), Some(index))
        }
        None => (source.clone(), None),
    };
    let path = rule.from.clone().unwrap_or_else(|| vec![name.to_string()]);
    let source_type = catalog.member_path_type(&root, &path)?;
    let segments: Vec<&str> = path.iter().map(String::as_str).collect();
    member = member.map_from(&segments, source_type);
    if let Some(index) = index {
        member = member.from_included(index);
    }
    if let Some(inline) = rule.inline {
        member = member.inline(inline);
    }
    if let Some(substitute) = &rule.null_substitute {
        member = member.null_substitute(Value::from(substitute));
    }
    if rule.use_destination_value {
        member = member.use_destination_value();
    }
    if let Some(allow) = rule.allow_null {
        member = member.allow_null(allow);
    }
    if let Some(order) = rule.order {
        member = member.order(order);
    }
    Ok(member)
}

/// Explicit parameters, or the destination's declared constructor with
/// parameters paired case-insensitively to source members.
fn build_constructor(
    catalog: &TypeCatalog,
    decl: &TypeMapDecl,
    source: &TypeKey,
    destination: &TypeKey,
    included: &[IncludedMember],
) -> MapResult<Option<ConstructorMap>> {
    let Some(declared) = catalog.get(destination).and_then(|info| info.constructor.as_ref()) else {
        return Ok(None);
    };
    if decl.constructor.is_none() && !decl.auto_members {
        return Ok(None);
    }
    let mut parameters = Vec::with_capacity(declared.len());
    for info in declared {
        let rule = decl
            .constructor
            .iter()
            .flatten()
            .find(|p| p.name.eq_ignore_ascii_case(&info.name));
        let default = rule.and_then(|p| p.default.as_ref()).or(info.default.as_ref());
        let member = match rule {
            Some(p) if p.rule.from.is_some() || p.rule.include.is_some() => {
                build_member(catalog, source, included, &info.name, info.ty.clone(), &p.rule)?
            }
            _ => match source_member_named(catalog, source, &info.name) {
                Some(found) => {
                    let rule = MemberRule {
                        from: Some(vec![found]),
                        ..MemberRule::default()
                    };
                    build_member(catalog, source, included, &info.name, info.ty.clone(), &rule)?
                }
                None => MemberMap::new(&info.name, info.ty.clone()),
            },
        };
        let mut parameter = ConstructorParameterMap::new(member);
        if let Some(default) = default {
            parameter = parameter.with_default(Value::from(default));
        }
        parameters.push(parameter);
    }
    Ok(Some(ConstructorMap::new(parameters)))
}

fn source_member_named(catalog: &TypeCatalog, source: &TypeKey, name: &str) -> Option<String> {
    catalog
        .get(source)?
        .members
        .keys()
        .find(|member| member.eq_ignore_ascii_case(name))
        .cloned()
}
