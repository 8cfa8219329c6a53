//! MF-004: The type-map graph, the declarative input of the plan compiler.
//!
//! Upstream configuration produces these fully populated. The compiler only
//! mutates three annotations, all through atomics so shared `Arc<TypeMap>`
//! handles stay valid: `preserve_references`, `max_depth` (type map) and
//! `inline` (member map). The analyzer sets them before assembly.

use super::context::ResolutionContext;
use super::error::MapResult;
use super::resolver::{SourceExpression, ValueResolver};
use super::services::{ServiceKey, TypeConverter};
use super::types::{TypeKey, TypePair};
use super::value::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// User callbacks
// ============================================================================

/// `(source, destination, destination member, ctx) -> value`
pub type ResolverFn =
    Arc<dyn Fn(&Value, &Value, &Value, &mut ResolutionContext<'_>) -> MapResult<Value> + Send + Sync>;

/// Post-resolution gate for one assignment.
pub type ConditionFn = Arc<dyn Fn(&ConditionArgs<'_>, &ResolutionContext<'_>) -> bool + Send + Sync>;

/// `(source, destination, ctx) -> run this member at all?`
pub type PreConditionFn = Arc<dyn Fn(&Value, &Value, &ResolutionContext<'_>) -> bool + Send + Sync>;

/// Before/after hook over `(source, destination, ctx)`.
pub type HookFn =
    Arc<dyn Fn(&Value, &mut Value, &mut ResolutionContext<'_>) -> MapResult<()> + Send + Sync>;

/// Custom destination factory over `(source, ctx)`.
pub type ConstructFn = Arc<dyn Fn(&Value, &mut ResolutionContext<'_>) -> MapResult<Value> + Send + Sync>;

/// Whole-conversion replacement over `(source, destination, ctx)`.
pub type ConvertFn = Arc<
    dyn Fn(&Value, Option<Value>, &mut ResolutionContext<'_>) -> MapResult<Value> + Send + Sync,
>;

/// Value transformer applied after a member is mapped.
pub type TransformFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Arguments of a member condition.
pub struct ConditionArgs<'a> {
    /// Custom source (root source or mixin source)
    pub source: &'a Value,
    pub destination: &'a Value,
    /// Mapped value about to be assigned
    pub value: &'a Value,
    /// Current destination member value
    pub destination_member: &'a Value,
}

// ============================================================================
// Member maps
// ============================================================================

/// Resolution rule for one destination member (or constructor parameter).
pub struct MemberMap {
    pub destination_name: String,
    pub destination_type: TypeKey,
    /// Source member chain this member is paired with (may be empty)
    pub source_members: Vec<String>,
    pub resolver: Option<ValueResolver>,
    pub condition: Option<ConditionFn>,
    pub pre_condition: Option<PreConditionFn>,
    pub null_substitute: Option<Value>,
    pub ignored: bool,
    pub use_destination_value: bool,
    /// Overrides `MapperOptions::allow_null_destination_values`
    pub allow_null: Option<bool>,
    pub transformers: Vec<TransformFn>,
    /// Index into the owning type map's `included_members`
    pub included_member: Option<usize>,
    /// Explicit mapping order; unordered members follow in declaration order
    pub order: Option<i32>,
    inline: AtomicBool,
}

impl MemberMap {
    pub fn new(destination_name: &str, destination_type: impl Into<TypeKey>) -> Self {
        Self {
            destination_name: destination_name.to_string(),
            destination_type: destination_type.into(),
            source_members: Vec::new(),
            resolver: None,
            condition: None,
            pre_condition: None,
            null_substitute: None,
            ignored: false,
            use_destination_value: false,
            allow_null: None,
            transformers: Vec::new(),
            included_member: None,
            order: None,
            inline: AtomicBool::new(true),
        }
    }

    /// Map from a source member chain; `source_type` is the chain's result type.
    pub fn map_from(mut self, path: &[&str], source_type: impl Into<TypeKey>) -> Self {
        let path: Vec<String> = path.iter().map(|s| s.to_string()).collect();
        self.source_members = path.clone();
        self.resolver = Some(ValueResolver::expression(
            source_type.into(),
            SourceExpression::Path(path),
        ));
        self
    }

    /// Resolve through a user function returning `resolved_type`.
    pub fn resolve_using<F>(mut self, resolved_type: impl Into<TypeKey>, func: F) -> Self
    where
        F: Fn(&Value, &Value, &Value, &mut ResolutionContext<'_>) -> MapResult<Value>
            + Send
            + Sync
            + 'static,
    {
        self.resolver = Some(ValueResolver::func(resolved_type.into(), Arc::new(func)));
        self
    }

    pub fn with_resolver(mut self, resolver: ValueResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Record the paired source chain without replacing the resolver.
    pub fn source_members(mut self, path: &[&str]) -> Self {
        self.source_members = path.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn ignore(mut self) -> Self {
        self.ignored = true;
        self
    }

    pub fn inline(self, inline: bool) -> Self {
        self.set_inline(inline);
        self
    }

    pub fn condition<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&ConditionArgs<'_>, &ResolutionContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(predicate));
        self
    }

    pub fn pre_condition<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value, &Value, &ResolutionContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.pre_condition = Some(Arc::new(predicate));
        self
    }

    pub fn null_substitute(mut self, value: impl Into<Value>) -> Self {
        self.null_substitute = Some(value.into());
        self
    }

    pub fn use_destination_value(mut self) -> Self {
        self.use_destination_value = true;
        self
    }

    pub fn allow_null(mut self, allow: bool) -> Self {
        self.allow_null = Some(allow);
        self
    }

    pub fn transform<F>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.transformers.push(Arc::new(f));
        self
    }

    pub fn from_included(mut self, index: usize) -> Self {
        self.included_member = Some(index);
        self
    }

    pub fn order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    pub fn is_inline(&self) -> bool {
        self.inline.load(Ordering::Acquire)
    }

    pub fn set_inline(&self, inline: bool) {
        self.inline.store(inline, Ordering::Release);
    }

    /// Participates in the plan: not ignored and something produces a value.
    pub fn can_resolve_value(&self) -> bool {
        !self.ignored && (self.resolver.is_some() || self.use_destination_value)
    }

    /// Type of the value the resolver yields (the destination type when
    /// no resolver is configured).
    pub fn source_type(&self) -> TypeKey {
        self.resolver
            .as_ref()
            .map(|r| r.resolved_type().clone())
            .unwrap_or_else(|| self.destination_type.clone())
    }

    /// The (resolved value type, destination member type) pair.
    pub fn types(&self) -> TypePair {
        TypePair {
            source: self.source_type(),
            destination: self.destination_type.clone(),
        }
    }
}

impl fmt::Debug for MemberMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemberMap")
            .field("destination_name", &self.destination_name)
            .field("destination_type", &self.destination_type)
            .field("source_members", &self.source_members)
            .field("resolver", &self.resolver)
            .field("ignored", &self.ignored)
            .field("inline", &self.is_inline())
            .finish_non_exhaustive()
    }
}

/// A destination reached through intermediate members, e.g. `Address.City`.
#[derive(Debug)]
pub struct PathMap {
    pub destination_path: Vec<String>,
    /// Leaf rule; its `destination_name` is the last path segment
    pub member: MemberMap,
}

impl PathMap {
    /// `member.destination_name` is overwritten with the last path segment.
    pub fn new(destination_path: &[&str], mut member: MemberMap) -> Self {
        if let Some(last) = destination_path.last() {
            member.destination_name = last.to_string();
        }
        Self {
            destination_path: destination_path.iter().map(|s| s.to_string()).collect(),
            member,
        }
    }

    pub fn display_path(&self) -> String {
        self.destination_path.join(".")
    }
}

/// One constructor argument.
#[derive(Debug)]
pub struct ConstructorParameterMap {
    /// Rule producing the argument; `destination_name` is the parameter name
    pub member: MemberMap,
    pub default_value: Option<Value>,
}

impl ConstructorParameterMap {
    pub fn new(member: MemberMap) -> Self {
        Self {
            member,
            default_value: None,
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn can_resolve(&self) -> bool {
        self.member.can_resolve_value() || self.default_value.is_some()
    }
}

/// Selected constructor and its argument rules, in parameter order.
#[derive(Debug, Default)]
pub struct ConstructorMap {
    pub parameters: Vec<ConstructorParameterMap>,
}

impl ConstructorMap {
    pub fn new(parameters: Vec<ConstructorParameterMap>) -> Self {
        Self { parameters }
    }

    pub fn can_resolve(&self) -> bool {
        self.parameters.iter().all(ConstructorParameterMap::can_resolve)
    }

    /// Case-insensitive parameter name match.
    pub fn matches_parameter(&self, name: &str) -> bool {
        self.parameters
            .iter()
            .any(|p| p.member.destination_name.eq_ignore_ascii_case(name))
    }
}

/// A mixin source whose members are merged into the owning type map.
#[derive(Debug, Clone)]
pub struct IncludedMember {
    pub name: String,
    /// Member chain from the root source to the mixin source
    pub source_path: Vec<String>,
    pub source_type: TypeKey,
}

impl IncludedMember {
    pub fn new(name: &str, source_path: &[&str], source_type: impl Into<TypeKey>) -> Self {
        Self {
            name: name.to_string(),
            source_path: source_path.iter().map(|s| s.to_string()).collect(),
            source_type: source_type.into(),
        }
    }
}

/// Custom whole-map conversion.
#[derive(Clone)]
pub enum TypeConverterRef {
    Func(ConvertFn),
    Instance(Arc<dyn TypeConverter>),
    /// Located at execution time; open arguments are closed with the type pair.
    Service(ServiceKey),
}

impl fmt::Debug for TypeConverterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Func(_) => write!(f, "Func"),
            Self::Instance(_) => write!(f, "Instance"),
            Self::Service(key) => write!(f, "Service({})", key),
        }
    }
}

/// Value transformer applied to members of a given destination type.
#[derive(Clone)]
pub struct ValueTransformer {
    pub ty: TypeKey,
    pub transform: TransformFn,
}

// ============================================================================
// Type maps
// ============================================================================

/// Compile state of a type map's plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PlanState {
    Uncompiled = 0,
    Compiling = 1,
    Compiled = 2,
}

impl PlanState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Compiling,
            2 => Self::Compiled,
            _ => Self::Uncompiled,
        }
    }
}

/// Conversion description for one type pair.
pub struct TypeMap {
    pair: TypePair,
    pub member_maps: Vec<MemberMap>,
    pub path_maps: Vec<PathMap>,
    pub constructor_map: Option<ConstructorMap>,
    pub before_hooks: Vec<HookFn>,
    pub after_hooks: Vec<HookFn>,
    pub type_converter: Option<TypeConverterRef>,
    pub custom_constructor: Option<ConstructFn>,
    pub included_members: Vec<IncludedMember>,
    /// Derived (polymorphic) type maps sharing this map's annotations
    pub derived: Vec<TypePair>,
    /// Produced when the source is null and no destination was supplied
    pub null_substitute: Option<Value>,
    pub value_transformers: Vec<ValueTransformer>,
    preserve_references: AtomicBool,
    max_depth: AtomicUsize,
    state: AtomicU8,
}

impl TypeMap {
    pub fn new(source: impl Into<TypeKey>, destination: impl Into<TypeKey>) -> Self {
        Self {
            pair: TypePair::new(source, destination),
            member_maps: Vec::new(),
            path_maps: Vec::new(),
            constructor_map: None,
            before_hooks: Vec::new(),
            after_hooks: Vec::new(),
            type_converter: None,
            custom_constructor: None,
            included_members: Vec::new(),
            derived: Vec::new(),
            null_substitute: None,
            value_transformers: Vec::new(),
            preserve_references: AtomicBool::new(false),
            max_depth: AtomicUsize::new(0),
            state: AtomicU8::new(PlanState::Uncompiled as u8),
        }
    }

    pub fn pair(&self) -> &TypePair {
        &self.pair
    }

    pub fn source_type(&self) -> &TypeKey {
        &self.pair.source
    }

    pub fn destination_type(&self) -> &TypeKey {
        &self.pair.destination
    }

    pub fn member(mut self, member: MemberMap) -> Self {
        self.member_maps.push(member);
        self
    }

    pub fn path(mut self, path: PathMap) -> Self {
        self.path_maps.push(path);
        self
    }

    pub fn constructor(mut self, constructor: ConstructorMap) -> Self {
        self.constructor_map = Some(constructor);
        self
    }

    pub fn before<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Value, &mut Value, &mut ResolutionContext<'_>) -> MapResult<()> + Send + Sync + 'static,
    {
        self.before_hooks.push(Arc::new(hook));
        self
    }

    pub fn after<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Value, &mut Value, &mut ResolutionContext<'_>) -> MapResult<()> + Send + Sync + 'static,
    {
        self.after_hooks.push(Arc::new(hook));
        self
    }

    pub fn convert_using(mut self, converter: TypeConverterRef) -> Self {
        self.type_converter = Some(converter);
        self
    }

    pub fn construct_using<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Value, &mut ResolutionContext<'_>) -> MapResult<Value> + Send + Sync + 'static,
    {
        self.custom_constructor = Some(Arc::new(factory));
        self
    }

    pub fn include_members(mut self, included: IncludedMember) -> Self {
        self.included_members.push(included);
        self
    }

    pub fn include_derived(mut self, pair: TypePair) -> Self {
        self.derived.push(pair);
        self
    }

    pub fn with_null_substitute(mut self, value: impl Into<Value>) -> Self {
        self.null_substitute = Some(value.into());
        self
    }

    pub fn transform_values<F>(mut self, ty: impl Into<TypeKey>, f: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.value_transformers.push(ValueTransformer {
            ty: ty.into(),
            transform: Arc::new(f),
        });
        self
    }

    /// Declare reference preservation up front.
    pub fn preserving_references(self) -> Self {
        self.set_preserve_references(true);
        self
    }

    /// Declare a recursion bound up front.
    pub fn with_max_depth(self, depth: usize) -> Self {
        self.set_max_depth(depth);
        self
    }

    pub fn has_type_converter(&self) -> bool {
        self.type_converter.is_some()
    }

    pub fn preserve_references(&self) -> bool {
        self.preserve_references.load(Ordering::Acquire)
    }

    pub fn set_preserve_references(&self, preserve: bool) {
        self.preserve_references.store(preserve, Ordering::Release);
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth.load(Ordering::Acquire)
    }

    pub fn set_max_depth(&self, depth: usize) {
        self.max_depth.store(depth, Ordering::Release);
    }

    pub fn state(&self) -> PlanState {
        PlanState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: PlanState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn is_compiled(&self) -> bool {
        self.state() == PlanState::Compiled
    }

    /// Member maps in mapping order: explicitly ordered members first
    /// (ascending, stable), then the rest in declaration order.
    pub fn ordered_member_maps(&self) -> Vec<&MemberMap> {
        let mut ordered: Vec<&MemberMap> = self.member_maps.iter().collect();
        ordered.sort_by_key(|m| m.order.unwrap_or(i32::MAX));
        ordered
    }

    /// Every member rule of this map: properties, path leaves, constructor parameters.
    pub fn all_member_maps(&self) -> Vec<&MemberMap> {
        let mut all: Vec<&MemberMap> = self.member_maps.iter().collect();
        all.extend(self.path_maps.iter().map(|p| &p.member));
        if let Some(ctor) = &self.constructor_map {
            all.extend(ctor.parameters.iter().map(|p| &p.member));
        }
        all
    }
}

impl fmt::Debug for TypeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeMap")
            .field("pair", &self.pair)
            .field("member_maps", &self.member_maps)
            .field("path_maps", &self.path_maps)
            .field("constructor_map", &self.constructor_map)
            .field("type_converter", &self.type_converter)
            .field("preserve_references", &self.preserve_references())
            .field("max_depth", &self.max_depth())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mf004_member_defaults() {
        let m = MemberMap::new("Name", "string");
        assert!(m.is_inline());
        assert!(!m.can_resolve_value());
        assert_eq!(m.source_type().as_str(), "string");
    }

    #[test]
    fn test_mf004_map_from_sets_resolver_and_types() {
        let m = MemberMap::new("Manager", "PersonDto").map_from(&["Manager"], "Person");
        assert!(m.can_resolve_value());
        assert_eq!(m.source_members, vec!["Manager"]);
        assert_eq!(m.types(), TypePair::new("Person", "PersonDto"));
    }

    #[test]
    fn test_mf004_ignored_member_does_not_resolve() {
        let m = MemberMap::new("Secret", "string")
            .map_from(&["Secret"], "string")
            .ignore();
        assert!(!m.can_resolve_value());
    }

    #[test]
    fn test_mf004_ordered_member_maps() {
        let tm = TypeMap::new("A", "B")
            .member(MemberMap::new("First", "i64"))
            .member(MemberMap::new("Late", "i64").order(5))
            .member(MemberMap::new("Second", "i64"))
            .member(MemberMap::new("Early", "i64").order(1));
        let names: Vec<&str> = tm
            .ordered_member_maps()
            .iter()
            .map(|m| m.destination_name.as_str())
            .collect();
        assert_eq!(names, vec!["Early", "Late", "First", "Second"]);
    }

    #[test]
    fn test_mf004_annotations_are_shared_through_arc() {
        let tm = Arc::new(TypeMap::new("A", "B"));
        let alias = Arc::clone(&tm);
        alias.set_preserve_references(true);
        alias.set_max_depth(3);
        assert!(tm.preserve_references());
        assert_eq!(tm.max_depth(), 3);
    }

    #[test]
    fn test_mf004_plan_state_transitions() {
        let tm = TypeMap::new("A", "B");
        assert_eq!(tm.state(), PlanState::Uncompiled);
        tm.set_state(PlanState::Compiling);
        assert!(!tm.is_compiled());
        tm.set_state(PlanState::Compiled);
        assert!(tm.is_compiled());
    }

    #[test]
    fn test_mf004_path_map_leaf_name() {
        let path = PathMap::new(
            &["Address", "City"],
            MemberMap::new("ignored", "string").map_from(&["City"], "string"),
        );
        assert_eq!(path.member.destination_name, "City");
        assert_eq!(path.display_path(), "Address.City");
    }

    #[test]
    fn test_mf004_constructor_resolution() {
        let ctor = ConstructorMap::new(vec![
            ConstructorParameterMap::new(MemberMap::new("name", "string").map_from(&["Name"], "string")),
            ConstructorParameterMap::new(MemberMap::new("age", "i64")).with_default(0i64),
        ]);
        assert!(ctor.can_resolve());
        assert!(ctor.matches_parameter("Name"));
        let unresolvable =
            ConstructorMap::new(vec![ConstructorParameterMap::new(MemberMap::new("id", "i64"))]);
        assert!(!unresolvable.can_resolve());
    }

    #[test]
    fn test_mf004_all_member_maps_includes_paths_and_parameters() {
        let tm = TypeMap::new("A", "B")
            .member(MemberMap::new("X", "i64"))
            .path(PathMap::new(&["Inner", "Y"], MemberMap::new("Y", "i64")))
            .constructor(ConstructorMap::new(vec![ConstructorParameterMap::new(
                MemberMap::new("z", "i64"),
            )]));
        assert_eq!(tm.all_member_maps().len(), 3);
    }
}
