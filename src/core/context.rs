//! MF-006: Per-call execution context.
//!
//! One `ResolutionContext` lives for one top-level map call. It carries the
//! reference cache (source identity + destination type -> destination), the
//! per-type-map recursion depth counters, and a free-form item bag.

use super::config::Configuration;
use super::error::MapResult;
use super::registry::PlanRegistry;
use super::types::{TypeCatalog, TypeKey, TypePair};
use super::value::{ObjectRef, Value};
use rustc_hash::FxHashMap;
use std::hash::{Hash, Hasher};

/// Cache key that holds the source alive, so its address cannot be reused
/// by another allocation while the context exists.
#[derive(Clone)]
struct SourceKey(ObjectRef);

impl PartialEq for SourceKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ptr_eq(&other.0)
    }
}

impl Eq for SourceKey {}

impl Hash for SourceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id().hash(state);
    }
}

fn source_key(source: &Value) -> Option<SourceKey> {
    match source {
        Value::Object(object) => Some(SourceKey(object.clone())),
        _ => None,
    }
}

pub struct ResolutionContext<'r> {
    registry: &'r PlanRegistry,
    references: FxHashMap<(SourceKey, TypeKey), Value>,
    depths: FxHashMap<TypePair, usize>,
    items: FxHashMap<String, Value>,
}

impl<'r> ResolutionContext<'r> {
    pub fn new(registry: &'r PlanRegistry) -> Self {
        Self {
            registry,
            references: FxHashMap::default(),
            depths: FxHashMap::default(),
            items: FxHashMap::default(),
        }
    }

    pub fn registry(&self) -> &'r PlanRegistry {
        self.registry
    }

    pub fn configuration(&self) -> &'r Configuration {
        self.registry.configuration()
    }

    pub fn catalog(&self) -> &'r TypeCatalog {
        &self.registry.configuration().catalog
    }

    // ========================================================================
    // Reference cache
    // ========================================================================

    /// Destination previously produced for this source instance and type.
    /// Only reference-typed sources have an identity to key on.
    pub fn cached_destination(&self, source: &Value, destination_type: &TypeKey) -> Option<Value> {
        let key = source_key(source)?;
        self.references
            .get(&(key, destination_type.underlying()))
            .cloned()
    }

    pub fn cache_destination(&mut self, source: &Value, destination_type: &TypeKey, destination: &Value) {
        if let Some(key) = source_key(source) {
            self.references
                .insert((key, destination_type.underlying()), destination.clone());
        }
    }

    pub fn cached_count(&self) -> usize {
        self.references.len()
    }

    // ========================================================================
    // Depth counters
    // ========================================================================

    pub fn type_depth(&self, pair: &TypePair) -> usize {
        self.depths.get(pair).copied().unwrap_or(0)
    }

    pub fn increment_type_depth(&mut self, pair: &TypePair) {
        *self.depths.entry(pair.clone()).or_insert(0) += 1;
    }

    pub fn decrement_type_depth(&mut self, pair: &TypePair) {
        if let Some(depth) = self.depths.get_mut(pair) {
            *depth = depth.saturating_sub(1);
        }
    }

    // ========================================================================
    // Items
    // ========================================================================

    pub fn item(&self, key: &str) -> Option<&Value> {
        self.items.get(key)
    }

    pub fn set_item(&mut self, key: &str, value: impl Into<Value>) {
        self.items.insert(key.to_string(), value.into());
    }

    pub fn items(&self) -> &FxHashMap<String, Value> {
        &self.items
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Map through the registered plan for `pair`, sharing this context.
    pub fn map(&mut self, pair: &TypePair, source: &Value, destination: Option<Value>) -> MapResult<Value> {
        let plan = self.registry.get_or_compile(pair)?;
        tracing::trace!(pair = %pair, "dispatch");
        plan.execute(source, destination, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::ObjectRef;
    use std::sync::Arc;

    fn registry() -> PlanRegistry {
        PlanRegistry::new(Arc::new(Configuration::default()))
    }

    #[test]
    fn test_mf006_reference_cache_keys_on_identity() {
        let registry = registry();
        let mut ctx = ResolutionContext::new(&registry);
        let source = Value::Object(ObjectRef::new("Person".into()));
        let other = Value::Object(ObjectRef::new("Person".into()));
        let dest = Value::Object(ObjectRef::new("PersonDto".into()));
        ctx.cache_destination(&source, &"PersonDto".into(), &dest);

        assert!(ctx
            .cached_destination(&source, &"PersonDto".into())
            .is_some_and(|d| d.same_instance(&dest)));
        assert!(ctx.cached_destination(&source, &"PersonDto?".into()).is_some());
        assert!(ctx.cached_destination(&other, &"PersonDto".into()).is_none());
        assert!(ctx.cached_destination(&source, &"Other".into()).is_none());
    }

    #[test]
    fn test_mf006_cache_keeps_transient_sources_alive() {
        let registry = registry();
        let mut ctx = ResolutionContext::new(&registry);
        let dest = Value::Object(ObjectRef::new("PersonDto".into()));
        let first = ObjectRef::new("Person".into());
        let first_id = first.id();
        ctx.cache_destination(&Value::Object(first), &"PersonDto".into(), &dest);

        // The cache owns the only handle, so no later allocation shares its address.
        let second = Value::Object(ObjectRef::new("Person".into()));
        assert_ne!(second.identity(), Some(first_id));
        assert!(ctx.cached_destination(&second, &"PersonDto".into()).is_none());
    }

    #[test]
    fn test_mf006_value_sources_are_not_cached() {
        let registry = registry();
        let mut ctx = ResolutionContext::new(&registry);
        ctx.cache_destination(&Value::Int(1), &"i64".into(), &Value::Int(1));
        assert_eq!(ctx.cached_count(), 0);
    }

    #[test]
    fn test_mf006_depth_counters() {
        let registry = registry();
        let mut ctx = ResolutionContext::new(&registry);
        let pair = TypePair::new("Node", "NodeDto");
        ctx.increment_type_depth(&pair);
        ctx.increment_type_depth(&pair);
        assert_eq!(ctx.type_depth(&pair), 2);
        ctx.decrement_type_depth(&pair);
        ctx.decrement_type_depth(&pair);
        ctx.decrement_type_depth(&pair);
        assert_eq!(ctx.type_depth(&pair), 0);
    }

    #[test]
    fn test_mf006_items() {
        let registry = registry();
        let mut ctx = ResolutionContext::new(&registry);
        ctx.set_item("tenant", "acme");
        assert_eq!(ctx.item("tenant"), Some(&Value::Str("acme".into())));
        assert!(ctx.item("missing").is_none());
    }
}
