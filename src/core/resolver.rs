//! MF-009: Value resolution: one destination member value from the source.
//!
//! Four resolver shapes: a user function, a member expression (path or
//! lambda, null safe), an external value converter, and an external member
//! resolver. Each is compiled once into a [`ResolveFn`].

use super::config::Configuration;
use super::context::ResolutionContext;
use super::error::{MapError, MapResult};
use super::services::{MemberValueResolver, ResolverArgs, ServiceKey, ValueConverter};
use super::typemap::{MemberMap, ResolverFn, TypeMap};
use super::types::TypeKey;
use super::value::Value;
use std::fmt;
use std::sync::Arc;

/// Lambda over the source, e.g. `|s| s.get_member("Total")`.
pub type SourceExprFn = Arc<dyn Fn(&Value) -> MapResult<Value> + Send + Sync>;

/// Inputs of a compiled resolver.
pub struct ResolveInput<'a> {
    pub source: &'a Value,
    pub destination: &'a Value,
    pub destination_member: &'a Value,
}

/// A compiled resolver.
pub type ResolveFn =
    Arc<dyn Fn(&ResolveInput<'_>, &mut ResolutionContext<'_>) -> MapResult<Value> + Send + Sync>;

fn resolve_fn<F>(f: F) -> ResolveFn
where
    F: Fn(&ResolveInput<'_>, &mut ResolutionContext<'_>) -> MapResult<Value> + Send + Sync + 'static,
{
    Arc::new(f)
}

// ============================================================================
// Resolver configuration
// ============================================================================

#[derive(Clone)]
pub enum SourceExpression {
    /// Member chain from the source
    Path(Vec<String>),
    Lambda(SourceExprFn),
}

impl fmt::Debug for SourceExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => write!(f, "{}", path.join(".")),
            Self::Lambda(_) => write!(f, "<lambda>"),
        }
    }
}

/// Where an external converter or resolver instance comes from.
pub enum Provided<T: ?Sized> {
    Instance(Arc<T>),
    /// Located through the configuration's service locator at execution time
    Service(ServiceKey),
}

impl<T: ?Sized> Clone for Provided<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Instance(instance) => Self::Instance(Arc::clone(instance)),
            Self::Service(key) => Self::Service(key.clone()),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Provided<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(_) => write!(f, "instance"),
            Self::Service(key) => write!(f, "service {}", key),
        }
    }
}

/// Input handed to an external converter or resolver.
#[derive(Clone, Debug)]
pub enum MemberInput {
    Expression(SourceExpression),
    /// Source member name
    Member(String),
}

#[derive(Clone)]
pub struct ConverterConfig {
    pub resolved_type: TypeKey,
    pub converter: Provided<dyn ValueConverter>,
    pub input: Option<MemberInput>,
}

#[derive(Clone)]
pub struct ClassResolverConfig {
    pub resolved_type: TypeKey,
    pub resolver: Provided<dyn MemberValueResolver>,
    pub input: Option<MemberInput>,
}

/// Strategy producing a member value.
#[derive(Clone)]
pub enum ValueResolver {
    Func { resolved_type: TypeKey, func: ResolverFn },
    Expression { resolved_type: TypeKey, expression: SourceExpression },
    Converter(ConverterConfig),
    Class(ClassResolverConfig),
}

impl ValueResolver {
    pub fn func(resolved_type: TypeKey, func: ResolverFn) -> Self {
        Self::Func { resolved_type, func }
    }

    pub fn expression(resolved_type: TypeKey, expression: SourceExpression) -> Self {
        Self::Expression {
            resolved_type,
            expression,
        }
    }

    /// Null-safe lambda over the source.
    pub fn lambda<F>(resolved_type: impl Into<TypeKey>, f: F) -> Self
    where
        F: Fn(&Value) -> MapResult<Value> + Send + Sync + 'static,
    {
        Self::expression(resolved_type.into(), SourceExpression::Lambda(Arc::new(f)))
    }

    pub fn converter(
        resolved_type: impl Into<TypeKey>,
        converter: Provided<dyn ValueConverter>,
        input: Option<MemberInput>,
    ) -> Self {
        Self::Converter(ConverterConfig {
            resolved_type: resolved_type.into(),
            converter,
            input,
        })
    }

    pub fn class(
        resolved_type: impl Into<TypeKey>,
        resolver: Provided<dyn MemberValueResolver>,
        input: Option<MemberInput>,
    ) -> Self {
        Self::Class(ClassResolverConfig {
            resolved_type: resolved_type.into(),
            resolver,
            input,
        })
    }

    /// Type of the value this resolver yields.
    pub fn resolved_type(&self) -> &TypeKey {
        match self {
            Self::Func { resolved_type, .. } | Self::Expression { resolved_type, .. } => resolved_type,
            Self::Converter(c) => &c.resolved_type,
            Self::Class(c) => &c.resolved_type,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Func { .. } => "func",
            Self::Expression { .. } => "expression",
            Self::Converter(_) => "converter",
            Self::Class(_) => "class",
        }
    }
}

impl fmt::Debug for ValueResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expression { expression, .. } => {
                write!(f, "Expression({:?}: {})", expression, self.resolved_type())
            }
            Self::Converter(c) => write!(f, "Converter({:?}: {})", c.converter, c.resolved_type),
            Self::Class(c) => write!(f, "Class({:?}: {})", c.resolver, c.resolved_type),
            Self::Func { resolved_type, .. } => write!(f, "Func({})", resolved_type),
        }
    }
}

// ============================================================================
// Compilation
// ============================================================================

/// Compile the member's resolver. `None` when the member has no resolver
/// (it maps from the destination's current value only).
pub fn compile_resolver(
    config: &Configuration,
    type_map: &TypeMap,
    member: &MemberMap,
) -> MapResult<Option<ResolveFn>> {
    let Some(resolver) = &member.resolver else {
        return Ok(None);
    };
    let default = config.catalog.default_value(&member.destination_type);
    let compiled: ResolveFn = match resolver {
        ValueResolver::Func { func, .. } => {
            let func = Arc::clone(func);
            resolve_fn(move |input, ctx| func(input.source, input.destination, input.destination_member, ctx))
        }
        ValueResolver::Expression { expression, .. } => {
            let expression = expression.clone();
            resolve_fn(move |input, _ctx| evaluate(&expression, input.source, &default))
        }
        ValueResolver::Converter(converter) => compile_converter(type_map, member, converter, default)?,
        ValueResolver::Class(class) => compile_class_resolver(config, type_map, member, class, default),
    };
    Ok(Some(compiled))
}

/// Evaluate a source expression with null checks: a null intermediate or a
/// null-access failure yields `default`.
pub fn evaluate(expression: &SourceExpression, source: &Value, default: &Value) -> MapResult<Value> {
    match expression {
        SourceExpression::Path(path) => Ok(source.get_path(path)?.unwrap_or_else(|| default.clone())),
        SourceExpression::Lambda(f) => match f(source) {
            Err(e) if e.is_null_access() => Ok(default.clone()),
            other => other,
        },
    }
}

fn input_expression(input: &MemberInput) -> SourceExpression {
    match input {
        MemberInput::Expression(expression) => expression.clone(),
        MemberInput::Member(name) => SourceExpression::Path(vec![name.clone()]),
    }
}

fn compile_converter(
    type_map: &TypeMap,
    member: &MemberMap,
    converter: &ConverterConfig,
    default: Value,
) -> MapResult<ResolveFn> {
    let expression = match &converter.input {
        Some(input) => input_expression(input),
        None if !member.source_members.is_empty() => SourceExpression::Path(member.source_members.clone()),
        None => {
            return Err(MapError::configuration(
                Some(type_map.pair()),
                format!(
                    "cannot find a source member to pass to the value converter of member '{}'; \
                     configure a source member to map from",
                    member.destination_name
                ),
            ))
        }
    };
    let provided = converter.converter.clone();
    Ok(resolve_fn(move |input, ctx| {
        let value = evaluate(&expression, input.source, &default)?;
        let instance = match &provided {
            Provided::Instance(instance) => Arc::clone(instance),
            Provided::Service(key) => ctx.configuration().services().value_converter(key)?,
        };
        instance.convert(&value, ctx)
    }))
}

fn compile_class_resolver(
    config: &Configuration,
    type_map: &TypeMap,
    member: &MemberMap,
    class: &ClassResolverConfig,
    default: Value,
) -> ResolveFn {
    let expression = class.input.as_ref().map(input_expression);
    let provided = match &class.resolver {
        Provided::Service(key) if key.is_open() => {
            let mut runtime = vec![type_map.source_type().clone(), type_map.destination_type().clone()];
            if let Some(ty) = input_type(config, type_map, class.input.as_ref()) {
                runtime.push(ty);
            }
            runtime.push(member.destination_type.clone());
            Provided::Service(key.close(&runtime))
        }
        other => other.clone(),
    };
    resolve_fn(move |input, ctx| {
        let source_member = expression
            .as_ref()
            .map(|e| evaluate(e, input.source, &default))
            .transpose()?;
        let instance = match &provided {
            Provided::Instance(instance) => Arc::clone(instance),
            Provided::Service(key) => ctx.configuration().services().value_resolver(key)?,
        };
        let args = ResolverArgs {
            source: input.source,
            destination: input.destination,
            source_member: source_member.as_ref(),
            destination_member: input.destination_member,
        };
        instance.resolve(&args, ctx)
    })
}

/// Declared type of a member-name or path input, when the catalog knows it.
fn input_type(config: &Configuration, type_map: &TypeMap, input: Option<&MemberInput>) -> Option<TypeKey> {
    let path = match input? {
        MemberInput::Member(name) => vec![name.clone()],
        MemberInput::Expression(SourceExpression::Path(path)) => path.clone(),
        MemberInput::Expression(SourceExpression::Lambda(_)) => return None,
    };
    config.catalog.member_path_type(type_map.source_type(), &path).ok()
}
