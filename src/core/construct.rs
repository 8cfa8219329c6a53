//! MF-012: Destination construction.

use super::config::Configuration;
use super::context::ResolutionContext;
use super::error::{MapError, MapResult};
use super::sequencer::{Frame, ParameterPlan};
use super::typemap::{ConstructFn, TypeMap};
use super::types::{TypeKey, TypeKind, TypePair};
use super::value::Value;

enum Strategy {
    Custom(ConstructFn),
    Constructor(Vec<ParameterPlan>),
    /// Interface or abstract destination; fails only when an instance is needed
    Uninstantiable(TypeKind),
    Parameterless,
}

/// Produces the destination instance of one plan.
pub struct DestinationFactory {
    pair: TypePair,
    destination_type: TypeKey,
    value_type: bool,
    preserve_references: bool,
    strategy: Strategy,
}

impl std::fmt::Debug for DestinationFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationFactory").field("pair", &self.pair).finish_non_exhaustive()
    }
}

impl DestinationFactory {
    pub fn compile(config: &Configuration, type_map: &TypeMap, compiling: &mut Vec<TypePair>) -> MapResult<Self> {
        let catalog = &config.catalog;
        let destination_type = type_map.destination_type().underlying();
        let strategy = if let Some(factory) = &type_map.custom_constructor {
            Strategy::Custom(factory.clone())
        } else if let Some(ctor) = type_map.constructor_map.as_ref().filter(|c| c.can_resolve()) {
            let parameters = ctor
                .parameters
                .iter()
                .map(|p| ParameterPlan::compile(config, type_map, p, compiling))
                .collect::<MapResult<Vec<_>>>()?;
            Strategy::Constructor(parameters)
        } else {
            match catalog.kind(&destination_type) {
                Some(kind @ (TypeKind::Interface | TypeKind::Abstract)) => Strategy::Uninstantiable(kind),
                Some(TypeKind::Class | TypeKind::Struct) => {
                    let default_constructible = catalog
                        .get(&destination_type)
                        .is_some_and(|info| info.default_constructible);
                    if !default_constructible {
                        return Err(MapError::configuration(
                            Some(type_map.pair()),
                            format!(
                                "{} has no parameterless constructor and no constructor map whose parameters all resolve",
                                destination_type
                            ),
                        ));
                    }
                    Strategy::Parameterless
                }
                Some(_) => Strategy::Parameterless,
                None => {
                    return Err(MapError::configuration(
                        Some(type_map.pair()),
                        format!("unknown destination type {}", destination_type),
                    ))
                }
            }
        };
        Ok(Self {
            pair: type_map.pair().clone(),
            value_type: catalog.is_value_type(&destination_type),
            destination_type,
            preserve_references: type_map.preserve_references(),
            strategy,
        })
    }

    /// Reuse the caller's destination (reference types only) or create one.
    /// With reference preservation the result is cached before any member runs.
    pub fn create(
        &self,
        frame: &Frame<'_>,
        destination: Option<Value>,
        ctx: &mut ResolutionContext<'_>,
    ) -> MapResult<Value> {
        let supplied = destination.filter(|_| !self.value_type);
        let created = match supplied {
            Some(existing) => existing,
            None => self.instantiate(frame, ctx)?,
        };
        if self.preserve_references {
            ctx.cache_destination(frame.source, &self.destination_type, &created);
        }
        Ok(created)
    }

    fn instantiate(&self, frame: &Frame<'_>, ctx: &mut ResolutionContext<'_>) -> MapResult<Value> {
        match &self.strategy {
            Strategy::Custom(factory) => factory(frame.source, ctx),
            Strategy::Constructor(parameters) => {
                let mut arguments = Vec::with_capacity(parameters.len());
                for parameter in parameters {
                    arguments.push(parameter.resolve(frame, ctx)?);
                }
                if self.preserve_references {
                    if let Some(cached) = ctx.cached_destination(frame.source, &self.destination_type) {
                        return Ok(cached);
                    }
                }
                ctx.catalog().construct_with(&self.destination_type, &arguments)
            }
            Strategy::Uninstantiable(kind) => Err(MapError::configuration(
                Some(&self.pair),
                format!("cannot create an instance of {} type {}", kind, self.destination_type),
            )),
            Strategy::Parameterless => ctx.catalog().construct(&self.destination_type),
        }
    }
}
