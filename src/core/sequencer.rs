//! MF-011: Member assignment sequencing.
//!
//! Each member map, path map and constructor parameter compiles into its own
//! session object holding everything one assignment needs. Nothing is shared
//! between members at compile or execution time.

use super::config::Configuration;
use super::context::ResolutionContext;
use super::convert::{check_convertible, convert};
use super::error::{MapError, MapResult};
use super::planner::{build_body, PlanFn};
use super::resolver::{compile_resolver, ResolveFn, ResolveInput};
use super::typemap::{
    ConditionArgs, ConditionFn, ConstructorParameterMap, MemberMap, PathMap, PreConditionFn, TransformFn,
    TypeMap,
};
use super::types::{TypeKey, TypeKind, TypePair};
use super::value::Value;

/// Per-invocation inputs shared by the units of one plan run.
pub struct Frame<'a> {
    pub source: &'a Value,
    /// Mixin sources, evaluated once per invocation
    pub included: Vec<Value>,
    pub initial_destination_is_null: bool,
}

impl Frame<'_> {
    /// Root source, or the mixin source the member reads from.
    pub fn custom_source(&self, included: Option<usize>) -> &Value {
        match included {
            Some(index) => self.included.get(index).unwrap_or(&Value::Null),
            None => self.source,
        }
    }
}

// ============================================================================
// Nested mapping
// ============================================================================

/// How a resolved value becomes the destination member value.
pub enum MemberMapping {
    /// Built-in conversion (no type map between the two types)
    Convert(TypePair),
    /// Nested plan body compiled into this plan
    Inline { nullable: bool, body: PlanFn },
    /// Nested plan looked up through the registry at execution time
    Dispatch { nullable: bool, pair: TypePair },
    /// Element-wise mapping of `T[]` into `U[]`
    Elements { types: TypePair, element: Box<MemberMapping> },
}

impl MemberMapping {
    pub fn compile(
        config: &Configuration,
        owner: &TypeMap,
        types: &TypePair,
        inline: bool,
        compiling: &mut Vec<TypePair>,
    ) -> MapResult<Self> {
        if let Some(nested) = config.resolve_type_map(types) {
            let nullable = types.destination.is_nullable();
            if inline && !nested.preserve_references() && !compiling.contains(nested.pair()) {
                let body = build_body(config, nested, compiling)?;
                return Ok(Self::Inline { nullable, body });
            }
            return Ok(Self::Dispatch {
                nullable,
                pair: nested.pair().clone(),
            });
        }
        if let Some(elements) = types.elements() {
            if config.resolve_type_map(&elements).is_some() {
                let element = Self::compile(config, owner, &elements, false, compiling)?;
                return Ok(Self::Elements {
                    types: types.clone(),
                    element: Box::new(element),
                });
            }
        }
        check_convertible(&config.catalog, owner.pair(), types)?;
        Ok(Self::Convert(types.clone()))
    }

    pub fn map(&self, value: Value, destination_member: Value, ctx: &mut ResolutionContext<'_>) -> MapResult<Value> {
        let existing = Some(destination_member).filter(|d| !d.is_null());
        match self {
            Self::Convert(types) => convert(&value, &types.source, &types.destination, ctx.catalog()),
            Self::Inline { nullable, body } => {
                if value.is_null() && *nullable {
                    return Ok(Value::Null);
                }
                body(&value, existing, ctx)
            }
            Self::Dispatch { nullable, pair } => {
                if value.is_null() && *nullable {
                    return Ok(Value::Null);
                }
                ctx.map(pair, &value, existing)
            }
            Self::Elements { types, element } => match value {
                Value::Null => Ok(Value::Null),
                Value::List(items) => items
                    .into_iter()
                    .map(|item| element.map(item, Value::Null, ctx))
                    .collect::<MapResult<Vec<_>>>()
                    .map(Value::List),
                other => Err(MapError::Conversion {
                    from: types.source.clone(),
                    to: types.destination.clone(),
                    value: other.kind_name().to_string(),
                }),
            },
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Convert(_) => "convert",
            Self::Inline { .. } => "inline",
            Self::Dispatch { .. } => "dispatch",
            Self::Elements { .. } => "elements",
        }
    }
}

fn transformers_for(type_map: &TypeMap, member: &MemberMap) -> Vec<TransformFn> {
    let destination = member.destination_type.underlying();
    member
        .transformers
        .iter()
        .cloned()
        .chain(
            type_map
                .value_transformers
                .iter()
                .filter(|t| t.ty.underlying() == destination)
                .map(|t| t.transform.clone()),
        )
        .collect()
}

fn null_substitution(value: Value, substitute: Option<&Value>) -> Value {
    match (value.is_null(), substitute) {
        (true, Some(substitute)) => substitute.clone(),
        _ => value,
    }
}

// ============================================================================
// Member assignment
// ============================================================================

/// Session object for one destination member.
pub struct AssignmentPlan {
    owner: TypePair,
    name: String,
    included: Option<usize>,
    resolve: Option<ResolveFn>,
    pre_condition: Option<PreConditionFn>,
    condition: Option<ConditionFn>,
    null_substitute: Option<Value>,
    /// Type instantiated when the resolved value is null and nulls are not allowed
    backfill: Option<TypeKey>,
    readable: bool,
    read_only: bool,
    use_destination_value: bool,
    destination_is_value: bool,
    member_default: Value,
    mapping: MemberMapping,
    transformers: Vec<TransformFn>,
    /// Member is also a constructor parameter of the owner
    skip_when_constructed: bool,
}

impl AssignmentPlan {
    /// `holder` is the type declaring the member: the destination type, or
    /// the last intermediate of a path.
    pub fn compile(
        config: &Configuration,
        type_map: &TypeMap,
        member: &MemberMap,
        holder: &TypeKey,
        compiling: &mut Vec<TypePair>,
    ) -> MapResult<Self> {
        let catalog = &config.catalog;
        let info = catalog.member(holder, &member.destination_name);
        let allow_null = member
            .allow_null
            .unwrap_or(config.options.allow_null_destination_values);
        let resolved_type = member.source_type();
        let backfill = (member.null_substitute.is_none()
            && !allow_null
            && catalog.kind(&resolved_type) == Some(TypeKind::Class))
        .then(|| resolved_type.underlying());
        let skip_when_constructed = type_map.custom_constructor.is_none()
            && type_map
                .constructor_map
                .as_ref()
                .is_some_and(|ctor| ctor.can_resolve() && ctor.matches_parameter(&member.destination_name));

        Ok(Self {
            owner: type_map.pair().clone(),
            name: member.destination_name.clone(),
            included: member.included_member,
            resolve: compile_resolver(config, type_map, member)?,
            pre_condition: member.pre_condition.clone(),
            condition: member.condition.clone(),
            null_substitute: member.null_substitute.clone(),
            backfill,
            readable: info.is_none_or(|i| i.readable),
            read_only: info.is_some_and(|i| i.read_only),
            use_destination_value: member.use_destination_value,
            destination_is_value: catalog.is_value_type(holder),
            member_default: catalog.default_value(&member.destination_type),
            mapping: MemberMapping::compile(config, type_map, &member.types(), member.is_inline(), compiling)?,
            transformers: transformers_for(type_map, member),
            skip_when_constructed,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mapping(&self) -> &MemberMapping {
        &self.mapping
    }

    /// Run the member against `destination`, wrapping any failure.
    pub fn apply(&self, frame: &Frame<'_>, destination: &mut Value, ctx: &mut ResolutionContext<'_>) -> MapResult<()> {
        if self.skip_when_constructed && frame.initial_destination_is_null {
            return Ok(());
        }
        if !self.passes_pre_condition(frame, destination, ctx) {
            return Ok(());
        }
        self.assign(frame, destination, ctx)
            .map_err(|e| MapError::member(&self.owner, &self.name, e))
    }

    fn passes_pre_condition(&self, frame: &Frame<'_>, destination: &Value, ctx: &ResolutionContext<'_>) -> bool {
        self.pre_condition
            .as_ref()
            .is_none_or(|pre| pre(frame.custom_source(self.included), destination, ctx))
    }

    fn assign(&self, frame: &Frame<'_>, destination: &mut Value, ctx: &mut ResolutionContext<'_>) -> MapResult<()> {
        let source = frame.custom_source(self.included);
        let getter = if self.readable {
            destination.get_member(&self.name)?
        } else {
            self.member_default.clone()
        };

        let resolved = match &self.resolve {
            Some(resolve) => {
                let input = ResolveInput {
                    source,
                    destination: &*destination,
                    destination_member: &getter,
                };
                resolve(&input, ctx)?
            }
            None => getter.clone(),
        };
        let resolved = match (resolved.is_null(), &self.backfill) {
            (true, Some(ty)) if self.null_substitute.is_none() => ctx.catalog().construct(ty)?,
            _ => null_substitution(resolved, self.null_substitute.as_ref()),
        };

        let destination_member = if self.read_only || self.use_destination_value {
            getter.clone()
        } else if self.destination_is_value || frame.initial_destination_is_null {
            self.member_default.clone()
        } else {
            getter.clone()
        };
        let mut mapped = self.mapping.map(resolved, destination_member, ctx)?;
        for transform in &self.transformers {
            mapped = transform(mapped);
        }

        if let Some(condition) = &self.condition {
            let args = ConditionArgs {
                source,
                destination: &*destination,
                value: &mapped,
                destination_member: &getter,
            };
            if !condition(&args, ctx) {
                return Ok(());
            }
        }
        if self.read_only {
            return Ok(());
        }
        destination.set_member(&self.name, mapped)
    }
}

// ============================================================================
// Path maps
// ============================================================================

struct PathSegment {
    name: String,
    ty: TypeKey,
    read_only: bool,
    value_type: bool,
}

/// Session object for a destination reached through intermediates.
pub struct PathPlan {
    owner: TypePair,
    display: String,
    segments: Vec<PathSegment>,
    leaf: AssignmentPlan,
}

impl std::fmt::Debug for PathPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathPlan").field("owner", &self.owner).finish_non_exhaustive()
    }
}

impl PathPlan {
    pub fn compile(
        config: &Configuration,
        type_map: &TypeMap,
        path_map: &PathMap,
        compiling: &mut Vec<TypePair>,
    ) -> MapResult<Self> {
        let catalog = &config.catalog;
        let intermediates = path_map
            .destination_path
            .split_last()
            .map(|(_, init)| init)
            .unwrap_or_default();
        let mut holder = type_map.destination_type().underlying();
        let mut segments = Vec::with_capacity(intermediates.len());
        for name in intermediates {
            let info = catalog.member(&holder, name).ok_or_else(|| {
                MapError::configuration(
                    Some(type_map.pair()),
                    format!("path {} names unknown member {} of {}", path_map.display_path(), name, holder),
                )
            })?;
            let ty = info.ty.underlying();
            segments.push(PathSegment {
                name: name.clone(),
                ty: ty.clone(),
                read_only: info.read_only,
                value_type: catalog.is_value_type(&ty),
            });
            holder = ty;
        }
        let mut leaf = AssignmentPlan::compile(config, type_map, &path_map.member, &holder, compiling)?;
        leaf.skip_when_constructed = false;
        Ok(Self {
            owner: type_map.pair().clone(),
            display: path_map.display_path(),
            segments,
            leaf,
        })
    }

    pub fn apply(&self, frame: &Frame<'_>, destination: &mut Value, ctx: &mut ResolutionContext<'_>) -> MapResult<()> {
        if !self.leaf.passes_pre_condition(frame, destination, ctx) {
            return Ok(());
        }
        self.descend(0, frame, destination, ctx)
            .map_err(|e| MapError::member(&self.owner, &self.display, e))
    }

    /// Walk to the leaf, creating missing intermediates. Value-type
    /// intermediates are copies, so they are written back on the way out.
    fn descend(
        &self,
        index: usize,
        frame: &Frame<'_>,
        target: &mut Value,
        ctx: &mut ResolutionContext<'_>,
    ) -> MapResult<()> {
        let Some(segment) = self.segments.get(index) else {
            return self.leaf.assign(frame, target, ctx);
        };
        let mut child = target.get_member(&segment.name)?;
        let created = child.is_null();
        if created {
            if segment.read_only {
                let path: Vec<&str> = self.segments[..=index].iter().map(|s| s.name.as_str()).collect();
                return Err(MapError::NullPath { path: path.join(".") });
            }
            child = ctx.catalog().construct(&segment.ty)?;
        }
        self.descend(index + 1, frame, &mut child, ctx)?;
        if (created || segment.value_type) && !segment.read_only {
            target.set_member(&segment.name, child)?;
        }
        Ok(())
    }
}

// ============================================================================
// Constructor parameters
// ============================================================================

/// Session object producing one constructor argument.
pub struct ParameterPlan {
    owner: TypePair,
    name: String,
    included: Option<usize>,
    resolve: Option<ResolveFn>,
    null_substitute: Option<Value>,
    default_value: Option<Value>,
    type_default: Value,
    mapping: MemberMapping,
    transformers: Vec<TransformFn>,
}

impl ParameterPlan {
    pub fn compile(
        config: &Configuration,
        type_map: &TypeMap,
        parameter: &ConstructorParameterMap,
        compiling: &mut Vec<TypePair>,
    ) -> MapResult<Self> {
        let member = &parameter.member;
        let catalog = &config.catalog;
        let resolves = member.can_resolve_value() && member.resolver.is_some();
        if resolves && parameter.default_value.is_none() && member.null_substitute.is_none() {
            let resolved = member.source_type();
            let may_return_null = resolved.is_nullable()
                || matches!(
                    catalog.kind(&resolved),
                    Some(TypeKind::Text | TypeKind::Class | TypeKind::Abstract | TypeKind::Interface | TypeKind::Array)
                );
            let target = &member.destination_type;
            if may_return_null && !target.is_nullable() && catalog.is_value_type(target) {
                return Err(MapError::configuration(
                    Some(type_map.pair()),
                    format!(
                        "constructor parameter '{}' of type {} cannot take the possibly null {} \
                         its resolver returns; declare a default or a null substitute",
                        member.destination_name, target, resolved
                    ),
                ));
            }
        }
        Ok(Self {
            owner: type_map.pair().clone(),
            name: member.destination_name.clone(),
            included: member.included_member,
            resolve: if resolves {
                compile_resolver(config, type_map, member)?
            } else {
                None
            },
            null_substitute: member.null_substitute.clone(),
            default_value: parameter.default_value.clone(),
            type_default: catalog.default_value(&member.destination_type),
            mapping: MemberMapping::compile(config, type_map, &member.types(), member.is_inline(), compiling)?,
            transformers: transformers_for(type_map, member),
        })
    }

    /// `(parameter name, argument)`; failures are wrapped with the parameter name.
    pub fn resolve(&self, frame: &Frame<'_>, ctx: &mut ResolutionContext<'_>) -> MapResult<(String, Value)> {
        self.evaluate(frame, ctx)
            .map(|value| (self.name.clone(), value))
            .map_err(|e| MapError::member(&self.owner, &self.name, e))
    }

    fn evaluate(&self, frame: &Frame<'_>, ctx: &mut ResolutionContext<'_>) -> MapResult<Value> {
        let fallback = self.default_value.clone().unwrap_or_else(|| self.type_default.clone());
        let Some(resolve) = &self.resolve else {
            return Ok(fallback);
        };
        let input = ResolveInput {
            source: frame.custom_source(self.included),
            destination: &Value::Null,
            destination_member: &fallback,
        };
        let resolved = resolve(&input, ctx)?;
        let resolved = null_substitution(resolved, self.null_substitute.as_ref().or(self.default_value.as_ref()));
        let mut mapped = self.mapping.map(resolved, fallback, ctx)?;
        for transform in &self.transformers {
            mapped = transform(mapped);
        }
        Ok(mapped)
    }
}

/// One step of a plan's member phase.
pub enum MemberUnit {
    Member(AssignmentPlan),
    Path(PathPlan),
}

impl MemberUnit {
    pub fn apply(&self, frame: &Frame<'_>, destination: &mut Value, ctx: &mut ResolutionContext<'_>) -> MapResult<()> {
        match self {
            Self::Member(plan) => plan.apply(frame, destination, ctx),
            Self::Path(plan) => plan.apply(frame, destination, ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::PlanRegistry;
    use crate::core::typemap::MemberMap;
    use crate::core::types::{TypeCatalog, TypeInfo};
    use crate::core::value::{ObjectRef, Record};
    use std::sync::Arc;

    fn copy(name: &str, ty: &str) -> MemberMap {
        MemberMap::new(name, ty).map_from(&[name], ty)
    }

    fn catalog() -> TypeCatalog {
        TypeCatalog::default()
            .with("Order", TypeInfo::class().member("X", "f64").member("Age", "i64?").member("Address", "Address"))
            .with("Address", TypeInfo::class().member("City", "string"))
            .with("AddressDto", TypeInfo::class().member("City", "string"))
            .with("Point", TypeInfo::structure().member("X", "f64").member("Y", "f64"))
            .with("OrderDto", TypeInfo::class().member("Position", "Point").member("Age", "i64"))
    }

    fn frame(source: &Value) -> Frame<'_> {
        Frame {
            source,
            included: Vec::new(),
            initial_destination_is_null: false,
        }
    }

    fn order() -> Value {
        Value::Object(ObjectRef::new("Order".into()).with("X", 2.5))
    }

    #[test]
    fn test_mf011_member_mapping_kinds() {
        let config = Configuration::new(catalog())
            .with(TypeMap::new("Address", "AddressDto").member(copy("City", "string")))
            .with(TypeMap::new("Order", "OrderDto"));
        let owner = TypeMap::new("Order", "OrderDto");
        let kind = |types: TypePair, inline: bool| {
            MemberMapping::compile(&config, &owner, &types, inline, &mut Vec::new()).map(|m| m.kind_name())
        };
        assert_eq!(kind(TypePair::new("i64", "string"), true).unwrap(), "convert");
        assert_eq!(kind(TypePair::new("Address", "AddressDto"), true).unwrap(), "inline");
        assert_eq!(kind(TypePair::new("Address", "AddressDto"), false).unwrap(), "dispatch");
        assert_eq!(kind(TypePair::new("Address[]", "AddressDto[]"), true).unwrap(), "elements");
        assert!(kind(TypePair::new("Address", "Order"), true).unwrap_err().is_configuration());
    }

    #[test]
    fn test_mf011_pair_being_compiled_is_dispatched() {
        let config = Configuration::new(catalog())
            .with(TypeMap::new("Address", "AddressDto").member(copy("City", "string")));
        let owner = TypeMap::new("Order", "OrderDto");
        let mut compiling = vec![TypePair::new("Address", "AddressDto")];
        let mapping =
            MemberMapping::compile(&config, &owner, &TypePair::new("Address", "AddressDto"), true, &mut compiling)
                .unwrap();
        assert_eq!(mapping.kind_name(), "dispatch");
    }

    #[test]
    fn test_mf011_path_writes_back_value_type_intermediate() {
        let registry = PlanRegistry::new(Arc::new(Configuration::new(catalog())));
        let config = registry.configuration();
        let type_map = TypeMap::new("Order", "OrderDto");
        let path = PathMap::new(&["Position", "X"], copy("X", "f64"));
        let plan = PathPlan::compile(config, &type_map, &path, &mut Vec::new()).unwrap();

        let position = Record::new("Point".into()).with("X", 0.0).with("Y", 7.0);
        let mut destination =
            Value::Object(ObjectRef::new("OrderDto".into()).with("Position", Value::Record(position)));
        let source = order();
        let mut ctx = ResolutionContext::new(&registry);
        plan.apply(&frame(&source), &mut destination, &mut ctx).unwrap();

        let position = destination.get_member("Position").unwrap();
        assert_eq!(position.get_member("X").unwrap(), Value::Float(2.5));
        assert_eq!(position.get_member("Y").unwrap(), Value::Float(7.0));
    }

    #[test]
    fn test_mf011_path_through_unknown_member_fails_compilation() {
        let config = Configuration::new(catalog());
        let type_map = TypeMap::new("Order", "OrderDto");
        let path = PathMap::new(&["Shipping", "City"], copy("City", "string"));
        let err = PathPlan::compile(&config, &type_map, &path, &mut Vec::new()).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("path Shipping.City names unknown member Shipping of OrderDto"));
    }

    #[test]
    fn test_mf011_parameter_falls_back_to_default() {
        let registry = PlanRegistry::new(Arc::new(Configuration::new(catalog())));
        let type_map = TypeMap::new("Order", "OrderDto");
        let parameter =
            ConstructorParameterMap::new(MemberMap::new("age", "i64").map_from(&["Age"], "i64?")).with_default(18i64);
        let plan = ParameterPlan::compile(registry.configuration(), &type_map, &parameter, &mut Vec::new()).unwrap();

        let source = order();
        let mut ctx = ResolutionContext::new(&registry);
        let (name, value) = plan.resolve(&frame(&source), &mut ctx).unwrap();
        assert_eq!(name, "age");
        assert_eq!(value, Value::Int(18));
    }

    #[test]
    fn test_mf011_parameter_failure_names_parameter() {
        let registry = PlanRegistry::new(Arc::new(Configuration::new(catalog())));
        let type_map = TypeMap::new("Order", "OrderDto");
        let parameter = ConstructorParameterMap::new(
            MemberMap::new("age", "i64").resolve_using("i64", |_, _, _, _| Err(MapError::failed("offline"))),
        );
        let plan = ParameterPlan::compile(registry.configuration(), &type_map, &parameter, &mut Vec::new()).unwrap();

        let source = order();
        let mut ctx = ResolutionContext::new(&registry);
        let err = plan.resolve(&frame(&source), &mut ctx).unwrap_err();
        assert_eq!(err.failing_member(), Some("age"));
        assert_eq!(err.root_cause().to_string(), "offline");
    }

    #[test]
    fn test_mf011_member_skipped_when_constructor_supplies_it() {
        let catalog = catalog().with(
            "Ticket",
            TypeInfo::class()
                .member("Age", "i64")
                .constructor(vec![crate::core::types::ParameterInfo::new("age", "i64")]),
        );
        let registry = PlanRegistry::new(Arc::new(Configuration::new(catalog)));
        let type_map = TypeMap::new("Order", "Ticket").constructor(crate::core::typemap::ConstructorMap::new(vec![
            ConstructorParameterMap::new(MemberMap::new("age", "i64")).with_default(1i64),
        ]));
        let member = MemberMap::new("Age", "i64").resolve_using("i64", |_, _, _, _| Ok(Value::Int(99)));
        let plan =
            AssignmentPlan::compile(registry.configuration(), &type_map, &member, &"Ticket".into(), &mut Vec::new())
                .unwrap();

        let source = order();
        let mut ctx = ResolutionContext::new(&registry);
        let mut fresh = Value::Object(ObjectRef::new("Ticket".into()).with("Age", 1i64));
        let constructed = Frame {
            source: &source,
            included: Vec::new(),
            initial_destination_is_null: true,
        };
        plan.apply(&constructed, &mut fresh, &mut ctx).unwrap();
        assert_eq!(fresh.get_member("Age").unwrap(), Value::Int(1));

        plan.apply(&frame(&source), &mut fresh, &mut ctx).unwrap();
        assert_eq!(fresh.get_member("Age").unwrap(), Value::Int(99));
    }
}
