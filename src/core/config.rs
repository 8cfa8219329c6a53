//! MF-007: Mapper configuration: options, catalog, type maps, services.
//!
//! A `Configuration` is delivered fully populated by upstream code (or by
//! [`crate::core::parser::build_configuration`]) and is read-only to the
//! compiler apart from the analyzer's annotations on the type maps.

use super::services::{NoServices, ServiceLocator};
use super::typemap::TypeMap;
use super::types::{TypeCatalog, TypePair};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Global mapper options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MapperOptions {
    /// Nesting depth at which the analyzer stops inlining nested plans
    #[serde(default = "default_plan_depth")]
    pub max_execution_plan_depth: usize,

    /// Recursion bound applied to value-type cycles
    #[serde(default = "default_value_cycle_depth")]
    pub value_cycle_max_depth: usize,

    /// Null resolved values stay null (no default-instance backfill)
    #[serde(default = "default_true")]
    pub allow_null_destination_values: bool,
}

impl Default for MapperOptions {
    fn default() -> Self {
        Self {
            max_execution_plan_depth: default_plan_depth(),
            value_cycle_max_depth: default_value_cycle_depth(),
            allow_null_destination_values: true,
        }
    }
}

fn default_plan_depth() -> usize {
    1
}

fn default_value_cycle_depth() -> usize {
    10
}

fn default_true() -> bool {
    true
}

/// Everything the plan compiler reads.
pub struct Configuration {
    pub catalog: TypeCatalog,
    pub options: MapperOptions,
    type_maps: IndexMap<TypePair, Arc<TypeMap>>,
    services: Arc<dyn ServiceLocator>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new(TypeCatalog::default())
    }
}

impl Configuration {
    pub fn new(catalog: TypeCatalog) -> Self {
        Self {
            catalog,
            options: MapperOptions::default(),
            type_maps: IndexMap::new(),
            services: Arc::new(NoServices),
        }
    }

    pub fn with_options(mut self, options: MapperOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_services(mut self, services: Arc<dyn ServiceLocator>) -> Self {
        self.services = services;
        self
    }

    /// Register a type map. A later map for the same pair replaces the earlier one.
    pub fn add(&mut self, type_map: TypeMap) -> Arc<TypeMap> {
        let type_map = Arc::new(type_map);
        self.type_maps
            .insert(type_map.pair().clone(), Arc::clone(&type_map));
        type_map
    }

    /// Builder form of [`add`](Self::add).
    pub fn with(mut self, type_map: TypeMap) -> Self {
        self.add(type_map);
        self
    }

    pub fn services(&self) -> &dyn ServiceLocator {
        self.services.as_ref()
    }

    pub fn type_maps(&self) -> impl Iterator<Item = &Arc<TypeMap>> {
        self.type_maps.values()
    }

    pub fn type_map_count(&self) -> usize {
        self.type_maps.len()
    }

    /// Exact pair lookup.
    pub fn type_map(&self, pair: &TypePair) -> Option<&Arc<TypeMap>> {
        self.type_maps.get(pair)
    }

    /// Lookup with nullable markers stripped on both sides.
    pub fn resolve_type_map(&self, pair: &TypePair) -> Option<&Arc<TypeMap>> {
        self.type_map(pair)
            .or_else(|| self.type_map(&pair.underlying()))
    }

    /// Type map associated with a member's (resolved type, destination type)
    /// pair: direct, nullable-unwrapped, or through array element types.
    pub fn resolve_associated_type_map(&self, pair: &TypePair) -> Option<&Arc<TypeMap>> {
        self.resolve_type_map(pair).or_else(|| {
            pair.elements()
                .and_then(|elements| self.resolve_type_map(&elements))
        })
    }

    /// Type maps registered as derived from `type_map`.
    pub fn derived_type_maps(&self, type_map: &TypeMap) -> Vec<&Arc<TypeMap>> {
        type_map
            .derived
            .iter()
            .filter_map(|pair| self.type_map(pair))
            .collect()
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("types", &self.catalog.len())
            .field("type_maps", &self.type_maps.keys().collect::<Vec<_>>())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mf007_default_options() {
        let options = MapperOptions::default();
        assert_eq!(options.max_execution_plan_depth, 1);
        assert_eq!(options.value_cycle_max_depth, 10);
        assert!(options.allow_null_destination_values);
    }

    #[test]
    fn test_mf007_options_yaml_defaults() {
        let options: MapperOptions = serde_yaml_ng::from_str("max_execution_plan_depth: 3").unwrap();
        assert_eq!(options.max_execution_plan_depth, 3);
        assert_eq!(options.value_cycle_max_depth, 10);
    }

    #[test]
    fn test_mf007_resolve_type_map_variants() {
        let config = Configuration::default()
            .with(TypeMap::new("Person", "PersonDto"));
        let direct = TypePair::new("Person", "PersonDto");
        assert!(config.type_map(&direct).is_some());
        assert!(config.type_map(&TypePair::new("Person?", "PersonDto")).is_none());
        assert!(config
            .resolve_type_map(&TypePair::new("Person?", "PersonDto?"))
            .is_some());
        assert!(config
            .resolve_associated_type_map(&TypePair::new("Person[]", "PersonDto[]"))
            .is_some());
        assert!(config
            .resolve_associated_type_map(&TypePair::new("Person", "Other"))
            .is_none());
    }

    #[test]
    fn test_mf007_add_replaces_same_pair() {
        let mut config = Configuration::default();
        config.add(TypeMap::new("A", "B"));
        config.add(TypeMap::new("A", "B").with_max_depth(4));
        assert_eq!(config.type_map_count(), 1);
        assert_eq!(
            config
                .type_map(&TypePair::new("A", "B"))
                .map(|tm| tm.max_depth()),
            Some(4)
        );
    }

    #[test]
    fn test_mf007_derived_lookup() {
        let config = Configuration::default()
            .with(TypeMap::new("Base", "BaseDto").include_derived(TypePair::new("Derived", "DerivedDto")))
            .with(TypeMap::new("Derived", "DerivedDto"));
        let base = config.type_map(&TypePair::new("Base", "BaseDto")).unwrap();
        assert_eq!(config.derived_type_maps(base).len(), 1);
    }
}
