//! MF-014: Plan cache and dispatch.
//!
//! Plans are compiled at most once per type pair. Compiled plans are looked up
//! under a read lock that compilation never holds; compilation is serialized
//! by a separate mutex, so concurrent requests for the same pair wait and then
//! observe the finished plan while executions of other plans carry on.
//! Compilation never re-enters the registry; nested maps that are not inlined
//! are dispatched at execution time.

use super::config::Configuration;
use super::context::ResolutionContext;
use super::error::{MapError, MapResult};
use super::planner::{compile_collection_plan, compile_plan, Plan};
use super::typemap::{PlanState, TypeMap};
use super::types::TypePair;
use super::value::Value;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub struct PlanRegistry {
    config: Arc<Configuration>,
    plans: RwLock<FxHashMap<TypePair, Arc<Plan>>>,
    compile_lock: Mutex<()>,
    compilations: AtomicUsize,
}

impl PlanRegistry {
    pub fn new(config: Arc<Configuration>) -> Self {
        Self {
            config,
            plans: RwLock::new(FxHashMap::default()),
            compile_lock: Mutex::new(()),
            compilations: AtomicUsize::new(0),
        }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    fn cached(&self, pair: &TypePair) -> Option<Arc<Plan>> {
        self.plans.read().get(pair).cloned()
    }

    fn publish(&self, pair: &TypePair, plan: &Arc<Plan>) {
        self.plans.write().insert(pair.clone(), Arc::clone(plan));
    }

    /// The plan for `pair`, compiling it on first request.
    pub fn get_or_compile(&self, pair: &TypePair) -> MapResult<Arc<Plan>> {
        if let Some(plan) = self.cached(pair) {
            return Ok(plan);
        }
        let _compiling = self.compile_lock.lock();
        if let Some(plan) = self.cached(pair) {
            return Ok(plan);
        }
        let plan = match self.config.resolve_type_map(pair) {
            Some(type_map) => match self.cached(type_map.pair()) {
                Some(plan) => plan,
                None => {
                    let plan = Arc::new(self.compile_type_map(type_map)?);
                    self.publish(type_map.pair(), &plan);
                    plan
                }
            },
            None if pair.elements().is_some() => {
                let plan = Arc::new(compile_collection_plan(&self.config, pair)?);
                self.compilations.fetch_add(1, Ordering::SeqCst);
                plan
            }
            None => {
                return Err(MapError::configuration(
                    Some(pair),
                    "missing type map configuration or unsupported mapping",
                ))
            }
        };
        self.publish(pair, &plan);
        Ok(plan)
    }

    fn compile_type_map(&self, type_map: &TypeMap) -> MapResult<Plan> {
        type_map.set_state(PlanState::Compiling);
        match compile_plan(&self.config, type_map) {
            Ok(plan) => {
                type_map.set_state(PlanState::Compiled);
                self.compilations.fetch_add(1, Ordering::SeqCst);
                tracing::info!(
                    pair = %type_map.pair(),
                    preserve_references = type_map.preserve_references(),
                    max_depth = type_map.max_depth(),
                    "compiled plan"
                );
                Ok(plan)
            }
            Err(e) => {
                type_map.set_state(PlanState::Uncompiled);
                tracing::warn!(pair = %type_map.pair(), error = %e, "plan compilation failed");
                Err(e)
            }
        }
    }

    /// Run a plan inside an existing context.
    pub fn invoke(
        &self,
        plan: &Plan,
        source: &Value,
        destination: Option<Value>,
        ctx: &mut ResolutionContext<'_>,
    ) -> MapResult<Value> {
        plan.execute(source, destination, ctx)
    }

    /// Map `source` into a new destination with a fresh context.
    pub fn map(&self, pair: &TypePair, source: &Value) -> MapResult<Value> {
        let mut ctx = ResolutionContext::new(self);
        ctx.map(pair, source, None)
    }

    /// Map `source` onto an existing destination with a fresh context.
    pub fn map_into(&self, pair: &TypePair, source: &Value, destination: Value) -> MapResult<Value> {
        let mut ctx = ResolutionContext::new(self);
        ctx.map(pair, source, Some(destination))
    }

    /// Discard every plan. Type maps return to `Uncompiled`; analyzer
    /// annotations are kept.
    pub fn clear(&self) {
        let _compiling = self.compile_lock.lock();
        self.plans.write().clear();
        for type_map in self.config.type_maps() {
            type_map.set_state(PlanState::Uncompiled);
        }
    }

    pub fn compilation_count(&self) -> usize {
        self.compilations.load(Ordering::SeqCst)
    }

    pub fn cached_plan_count(&self) -> usize {
        self.plans.read().len()
    }
}

impl std::fmt::Debug for PlanRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanRegistry")
            .field("config", &self.config)
            .field("compilations", &self.compilation_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::typemap::MemberMap;
    use crate::core::types::{TypeCatalog, TypeInfo};
    use crate::core::value::ObjectRef;

    fn contact_registry() -> PlanRegistry {
        let catalog = TypeCatalog::default()
            .with("Contact", TypeInfo::class().member("Name", "string"))
            .with("ContactDto", TypeInfo::class().member("Name", "string"));
        let config = Configuration::new(catalog).with(
            TypeMap::new("Contact", "ContactDto").member(MemberMap::new("Name", "string").map_from(&["Name"], "string")),
        );
        PlanRegistry::new(Arc::new(config))
    }

    fn contact_pair() -> TypePair {
        TypePair::new("Contact", "ContactDto")
    }

    #[test]
    fn test_mf014_concurrent_requests_compile_once() {
        let registry = contact_registry();
        let plans: Vec<Arc<Plan>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| registry.get_or_compile(&contact_pair()).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(registry.compilation_count(), 1);
        assert!(plans.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[test]
    fn test_mf014_compiled_plans_run_while_compilation_is_in_progress() {
        let registry = contact_registry();
        let source = Value::Object(ObjectRef::new("Contact".into()).with("Name", "x"));
        registry.get_or_compile(&contact_pair()).unwrap();

        let _compiling = registry.compile_lock.lock();
        let mapped = std::thread::scope(|scope| {
            scope
                .spawn(|| registry.map(&contact_pair(), &source))
                .join()
                .unwrap()
        })
        .unwrap();
        assert_eq!(mapped.get_member("Name").unwrap(), Value::Str("x".into()));
        assert_eq!(registry.cached_plan_count(), 1);
    }

    #[test]
    fn test_mf014_state_follows_compilation() {
        let registry = contact_registry();
        let type_map = Arc::clone(registry.configuration().type_map(&contact_pair()).unwrap());
        assert_eq!(type_map.state(), PlanState::Uncompiled);

        registry.get_or_compile(&contact_pair()).unwrap();
        assert_eq!(type_map.state(), PlanState::Compiled);

        registry.clear();
        assert_eq!(type_map.state(), PlanState::Uncompiled);
        assert_eq!(registry.cached_plan_count(), 0);

        registry.get_or_compile(&contact_pair()).unwrap();
        assert_eq!(registry.compilation_count(), 2);
    }

    #[test]
    fn test_mf014_nullable_alias_shares_plan() {
        let registry = contact_registry();
        let plan = registry.get_or_compile(&contact_pair()).unwrap();
        let alias = registry.get_or_compile(&TypePair::new("Contact?", "ContactDto?")).unwrap();
        assert!(Arc::ptr_eq(&plan, &alias));
        assert_eq!(registry.compilation_count(), 1);
        assert_eq!(registry.cached_plan_count(), 2);
    }

    #[test]
    fn test_mf014_collection_pair_compiles_element_plan_lazily() {
        let registry = contact_registry();
        let contacts = Value::List(vec![
            Value::Object(ObjectRef::new("Contact".into()).with("Name", "a")),
            Value::Null,
        ]);
        let mapped = registry
            .map(&TypePair::new("Contact[]", "ContactDto[]"), &contacts)
            .unwrap();
        let Value::List(items) = mapped else {
            panic!("expected a list");
        };
        assert_eq!(items[0].get_member("Name").unwrap(), Value::Str("a".into()));
        assert_eq!(items[1], Value::Null);
        assert_eq!(registry.compilation_count(), 2);
    }

    #[test]
    fn test_mf014_missing_type_map() {
        let registry = contact_registry();
        let err = registry
            .get_or_compile(&TypePair::new("Contact", "Invoice"))
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(
            err.to_string(),
            "missing type map configuration or unsupported mapping: Contact -> Invoice"
        );
    }

    #[test]
    fn test_mf014_invoke_shares_context_cache() {
        let registry = contact_registry();
        let plan = registry.get_or_compile(&contact_pair()).unwrap();
        let mut ctx = ResolutionContext::new(&registry);
        let source = Value::Object(ObjectRef::new("Contact".into()).with("Name", "x"));
        let first = registry.invoke(&plan, &source, None, &mut ctx).unwrap();
        let second = registry.invoke(&plan, &source, None, &mut ctx).unwrap();
        assert!(!first.same_instance(&second));
        assert_eq!(ctx.cached_count(), 0);
    }
}
