//! MF-005: External converter/resolver objects and the service locator seam.
//!
//! Resolvers and converters declared by type rather than by instance are
//! located at execution time through a [`ServiceLocator`], keyed by a
//! [`ServiceKey`] whose open generic arguments are closed during compilation.

use super::context::ResolutionContext;
use super::error::{MapError, MapResult};
use super::types::TypeKey;
use super::value::Value;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// Identifies a service type. `None` arguments are open generic parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub name: String,
    pub type_args: Vec<Option<TypeKey>>,
}

impl ServiceKey {
    /// A non-generic service.
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_args: Vec::new(),
        }
    }

    /// A generic service with `arity` open parameters.
    pub fn open(name: &str, arity: usize) -> Self {
        Self {
            name: name.to_string(),
            type_args: vec![None; arity],
        }
    }

    /// A generic service with explicit (possibly open) arguments.
    pub fn generic(name: &str, type_args: Vec<Option<TypeKey>>) -> Self {
        Self {
            name: name.to_string(),
            type_args,
        }
    }

    pub fn is_open(&self) -> bool {
        self.type_args.iter().any(Option::is_none)
    }

    /// Close open parameters positionally with `runtime` types. Declared
    /// (closed) arguments are kept.
    pub fn close(&self, runtime: &[TypeKey]) -> Self {
        let type_args = self
            .type_args
            .iter()
            .zip(runtime.iter().map(Some).chain(std::iter::repeat(None)))
            .map(|(declared, actual)| declared.clone().or_else(|| actual.cloned()))
            .collect();
        Self {
            name: self.name.clone(),
            type_args,
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.type_args.is_empty() {
            let args: Vec<String> = self
                .type_args
                .iter()
                .map(|a| a.as_ref().map_or_else(|| "_".to_string(), |t| t.to_string()))
                .collect();
            write!(f, "<{}>", args.join(", "))?;
        }
        Ok(())
    }
}

/// Converts one source member value into a destination member value.
pub trait ValueConverter: Send + Sync {
    fn convert(&self, source_member: &Value, ctx: &mut ResolutionContext<'_>) -> MapResult<Value>;
}

/// Arguments passed to a [`MemberValueResolver`].
pub struct ResolverArgs<'a> {
    pub source: &'a Value,
    pub destination: &'a Value,
    /// Present only when a source member was configured.
    pub source_member: Option<&'a Value>,
    pub destination_member: &'a Value,
}

/// Produces a destination member value from the whole source.
pub trait MemberValueResolver: Send + Sync {
    fn resolve(&self, args: &ResolverArgs<'_>, ctx: &mut ResolutionContext<'_>) -> MapResult<Value>;
}

/// Replaces a whole type map's conversion.
pub trait TypeConverter: Send + Sync {
    fn convert(
        &self,
        source: &Value,
        destination: Option<Value>,
        ctx: &mut ResolutionContext<'_>,
    ) -> MapResult<Value>;
}

/// Service location by abstract key. Implementations return
/// `ServiceNotFound` for keys they do not know.
pub trait ServiceLocator: Send + Sync {
    fn value_converter(&self, key: &ServiceKey) -> MapResult<Arc<dyn ValueConverter>> {
        Err(MapError::ServiceNotFound(key.to_string()))
    }

    fn value_resolver(&self, key: &ServiceKey) -> MapResult<Arc<dyn MemberValueResolver>> {
        Err(MapError::ServiceNotFound(key.to_string()))
    }

    fn type_converter(&self, key: &ServiceKey) -> MapResult<Arc<dyn TypeConverter>> {
        Err(MapError::ServiceNotFound(key.to_string()))
    }
}

/// Locator that knows no services.
#[derive(Debug, Default)]
pub struct NoServices;

impl ServiceLocator for NoServices {}

/// In-memory locator populated by hand.
#[derive(Default)]
pub struct ServiceRegistry {
    converters: RwLock<FxHashMap<ServiceKey, Arc<dyn ValueConverter>>>,
    resolvers: RwLock<FxHashMap<ServiceKey, Arc<dyn MemberValueResolver>>>,
    type_converters: RwLock<FxHashMap<ServiceKey, Arc<dyn TypeConverter>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_converter(&self, key: ServiceKey, converter: Arc<dyn ValueConverter>) {
        self.converters.write().insert(key, converter);
    }

    pub fn register_resolver(&self, key: ServiceKey, resolver: Arc<dyn MemberValueResolver>) {
        self.resolvers.write().insert(key, resolver);
    }

    pub fn register_type_converter(&self, key: ServiceKey, converter: Arc<dyn TypeConverter>) {
        self.type_converters.write().insert(key, converter);
    }
}

impl ServiceLocator for ServiceRegistry {
    fn value_converter(&self, key: &ServiceKey) -> MapResult<Arc<dyn ValueConverter>> {
        self.converters
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| MapError::ServiceNotFound(key.to_string()))
    }

    fn value_resolver(&self, key: &ServiceKey) -> MapResult<Arc<dyn MemberValueResolver>> {
        self.resolvers
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| MapError::ServiceNotFound(key.to_string()))
    }

    fn type_converter(&self, key: &ServiceKey) -> MapResult<Arc<dyn TypeConverter>> {
        self.type_converters
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| MapError::ServiceNotFound(key.to_string()))
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("converters", &self.converters.read().len())
            .field("resolvers", &self.resolvers.read().len())
            .field("type_converters", &self.type_converters.read().len())
            .finish()
    }
}
