//! MF-013: Plan assembly, one executable plan per type pair.
//!
//! Wrapping, outermost first:
//! reference cache -> null source -> max depth -> construction ->
//! before hooks, members, path maps, after hooks (inside the depth counter).

use super::analyzer::analyze;
use super::config::Configuration;
use super::construct::DestinationFactory;
use super::context::ResolutionContext;
use super::error::{MapError, MapResult};
use super::sequencer::{AssignmentPlan, Frame, MemberUnit, PathPlan};
use super::typemap::{HookFn, TypeConverterRef, TypeMap};
use super::types::{TypeKey, TypePair};
use super::value::Value;
use std::fmt;
use std::sync::Arc;

/// Executable body: `(source, caller destination, ctx) -> destination`.
pub type PlanFn =
    Arc<dyn Fn(&Value, Option<Value>, &mut ResolutionContext<'_>) -> MapResult<Value> + Send + Sync>;

fn plan_fn<F>(f: F) -> PlanFn
where
    F: Fn(&Value, Option<Value>, &mut ResolutionContext<'_>) -> MapResult<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A compiled, immutable conversion for one type pair.
pub struct Plan {
    pair: TypePair,
    body: PlanFn,
}

impl Plan {
    pub fn pair(&self) -> &TypePair {
        &self.pair
    }

    pub fn execute(
        &self,
        source: &Value,
        destination: Option<Value>,
        ctx: &mut ResolutionContext<'_>,
    ) -> MapResult<Value> {
        (self.body)(source, destination, ctx)
    }
}

impl fmt::Debug for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plan").field("pair", &self.pair).finish_non_exhaustive()
    }
}

/// Compile the plan for `type_map`.
pub fn compile_plan(config: &Configuration, type_map: &TypeMap) -> MapResult<Plan> {
    let mut compiling = Vec::new();
    let body = build_body(config, type_map, &mut compiling)?;
    Ok(Plan {
        pair: type_map.pair().clone(),
        body,
    })
}

/// Compile an element-wise plan for an array pair whose element types have a type map.
pub fn compile_collection_plan(config: &Configuration, pair: &TypePair) -> MapResult<Plan> {
    let element_pair = pair
        .elements()
        .and_then(|elements| config.resolve_type_map(&elements))
        .map(|tm| tm.pair().clone())
        .ok_or_else(|| MapError::configuration(Some(pair), "missing type map configuration or unsupported mapping"))?;
    let types = pair.clone();
    let body = plan_fn(move |source, _destination, ctx| match source {
        Value::Null => Ok(Value::Null),
        Value::List(items) => items
            .iter()
            .map(|item| ctx.map(&element_pair, item, None))
            .collect::<MapResult<Vec<_>>>()
            .map(Value::List),
        other => Err(MapError::Conversion {
            from: types.source.clone(),
            to: types.destination.clone(),
            value: other.kind_name().to_string(),
        }),
    });
    Ok(Plan {
        pair: pair.clone(),
        body,
    })
}

/// Build the body of `type_map`. `compiling` holds the pairs whose bodies are
/// being built further up; nested members never inline one of those.
pub(crate) fn build_body(
    config: &Configuration,
    type_map: &TypeMap,
    compiling: &mut Vec<TypePair>,
) -> MapResult<PlanFn> {
    if let Some(converter) = &type_map.type_converter {
        return Ok(converter_body(type_map, converter));
    }
    compiling.push(type_map.pair().clone());
    let assembled = assemble(config, type_map, compiling);
    compiling.pop();
    let assembled = Arc::new(assembled?);
    Ok(plan_fn(move |source, destination, ctx| assembled.execute(source, destination, ctx)))
}

fn converter_body(type_map: &TypeMap, converter: &TypeConverterRef) -> PlanFn {
    match converter {
        TypeConverterRef::Func(f) => {
            let f = Arc::clone(f);
            plan_fn(move |source, destination, ctx| f(source, destination, ctx))
        }
        TypeConverterRef::Instance(instance) => {
            let instance = Arc::clone(instance);
            plan_fn(move |source, destination, ctx| instance.convert(source, destination, ctx))
        }
        TypeConverterRef::Service(key) => {
            let key = if key.is_open() {
                key.close(&[type_map.source_type().clone(), type_map.destination_type().clone()])
            } else {
                key.clone()
            };
            plan_fn(move |source, destination, ctx| {
                let converter = ctx.configuration().services().type_converter(&key)?;
                converter.convert(source, destination, ctx)
            })
        }
    }
}

fn assemble(config: &Configuration, type_map: &TypeMap, compiling: &mut Vec<TypePair>) -> MapResult<AssembledPlan> {
    analyze(config, type_map);
    let destination_type = type_map.destination_type().underlying();
    let factory = DestinationFactory::compile(config, type_map, compiling)?;

    let mut units = Vec::with_capacity(type_map.member_maps.len() + type_map.path_maps.len());
    for member in type_map.ordered_member_maps() {
        if member.can_resolve_value() {
            let plan = AssignmentPlan::compile(config, type_map, member, &destination_type, compiling)?;
            units.push(MemberUnit::Member(plan));
        }
    }
    for path in &type_map.path_maps {
        if path.member.can_resolve_value() {
            units.push(MemberUnit::Path(PathPlan::compile(config, type_map, path, compiling)?));
        }
    }

    Ok(AssembledPlan {
        pair: type_map.pair().clone(),
        preserve_references: type_map.preserve_references(),
        max_depth: type_map.max_depth(),
        null_substitute: type_map.null_substitute.clone(),
        default_destination: config.catalog.default_value(&destination_type),
        included: type_map
            .included_members
            .iter()
            .map(|i| (i.name.clone(), i.source_path.clone()))
            .collect(),
        factory,
        before: type_map.before_hooks.clone(),
        units,
        after: type_map.after_hooks.clone(),
        destination_type,
    })
}

struct AssembledPlan {
    pair: TypePair,
    destination_type: TypeKey,
    preserve_references: bool,
    max_depth: usize,
    null_substitute: Option<Value>,
    default_destination: Value,
    /// Mixin name and its member chain from the root source
    included: Vec<(String, Vec<String>)>,
    factory: DestinationFactory,
    before: Vec<HookFn>,
    units: Vec<MemberUnit>,
    after: Vec<HookFn>,
}

impl AssembledPlan {
    fn execute(&self, source: &Value, destination: Option<Value>, ctx: &mut ResolutionContext<'_>) -> MapResult<Value> {
        if self.preserve_references {
            if let Some(cached) = ctx.cached_destination(source, &self.destination_type) {
                return Ok(cached);
            }
        }
        let destination = destination.filter(|d| !d.is_null());
        if source.is_null() {
            return Ok(destination
                .or_else(|| self.null_substitute.clone())
                .unwrap_or_else(|| self.default_destination.clone()));
        }
        if self.max_depth > 0 && ctx.type_depth(&self.pair) >= self.max_depth {
            return Ok(self.default_destination.clone());
        }

        let included = self
            .included
            .iter()
            .map(|(name, path)| {
                source
                    .get_path(path)
                    .map(Option::unwrap_or_default)
                    .map_err(|e| MapError::member(&self.pair, name, e))
            })
            .collect::<MapResult<Vec<_>>>()?;
        let frame = Frame {
            source,
            included,
            initial_destination_is_null: destination.is_none(),
        };
        let mut result = self.factory.create(&frame, destination, ctx)?;

        if self.max_depth > 0 {
            ctx.increment_type_depth(&self.pair);
        }
        let populated = self.populate(&frame, &mut result, ctx);
        if self.max_depth > 0 {
            ctx.decrement_type_depth(&self.pair);
        }
        populated.map(|()| result)
    }

    fn populate(&self, frame: &Frame<'_>, destination: &mut Value, ctx: &mut ResolutionContext<'_>) -> MapResult<()> {
        for hook in &self.before {
            hook(frame.source, destination, ctx)?;
        }
        for unit in &self.units {
            unit.apply(frame, destination, ctx)?;
        }
        for hook in &self.after {
            hook(frame.source, destination, ctx)?;
        }
        Ok(())
    }
}
