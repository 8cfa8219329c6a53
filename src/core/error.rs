//! MF-003: Error types for plan compilation and execution.

use super::types::{TypeKey, TypePair};
use thiserror::Error;

/// Result alias used throughout the crate.
pub type MapResult<T> = Result<T, MapError>;

/// Boxed error raised by user-supplied resolvers, converters and hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum MapError {
    /// The type-map graph cannot be compiled or the destination cannot be created.
    #[error("configuration error{}: {message}", pair_suffix(.pair))]
    Configuration {
        pair: Option<TypePair>,
        message: String,
    },

    /// A member or constructor parameter failed; wraps the original failure.
    #[error("error mapping types {pair}, member '{member}'")]
    Mapping {
        pair: TypePair,
        member: String,
        #[source]
        source: Box<MapError>,
    },

    /// A read-only intermediate of a destination path is null.
    #[error("{path} cannot be null because it is used by a path map")]
    NullPath { path: String },

    #[error("object reference not set: cannot access '{member}' on null")]
    NullReference { member: String },

    #[error("value cannot be null (parameter '{0}')")]
    ArgumentNull(String),

    #[error("{ty} has no member '{member}'")]
    UnknownMember { ty: String, member: String },

    #[error("cannot convert {value} from {from} to {to}")]
    Conversion {
        from: TypeKey,
        to: TypeKey,
        value: String,
    },

    #[error("no service registered for {0}")]
    ServiceNotFound(String),

    #[error("{0}")]
    Failed(String),

    /// Failure raised by user code, carried as-is.
    #[error("{0}")]
    External(BoxError),

    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("document error: {0}")]
    Document(String),
}

impl From<BoxError> for MapError {
    fn from(err: BoxError) -> Self {
        Self::External(err)
    }
}

fn pair_suffix(pair: &Option<TypePair>) -> String {
    pair.as_ref()
        .map(|p| format!(" for {}", p))
        .unwrap_or_default()
}

impl MapError {
    pub fn configuration(pair: Option<&TypePair>, message: impl Into<String>) -> Self {
        Self::Configuration {
            pair: pair.cloned(),
            message: message.into(),
        }
    }

    /// Wrap a failure raised while mapping one member.
    pub fn member(pair: &TypePair, member: &str, cause: MapError) -> Self {
        Self::Mapping {
            pair: pair.clone(),
            member: member.to_string(),
            source: Box::new(cause),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }

    /// Failures an expression resolver converts into a default value.
    pub fn is_null_access(&self) -> bool {
        matches!(self, Self::NullReference { .. } | Self::ArgumentNull(_))
    }

    /// Member name of the outermost mapping failure.
    pub fn failing_member(&self) -> Option<&str> {
        match self {
            Self::Mapping { member, .. } => Some(member),
            _ => None,
        }
    }

    /// Innermost cause, following mapping wrappers.
    pub fn root_cause(&self) -> &MapError {
        let mut current = self;
        while let Self::Mapping { source, .. } = current {
            current = source;
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_mf003_configuration_display() {
        let pair = TypePair::new("Person", "PersonDto");
        let err = MapError::configuration(Some(&pair), "no constructor");
        assert_eq!(
            err.to_string(),
            "configuration error for Person -> PersonDto: no constructor"
        );
        let bare = MapError::configuration(None, "oops");
        assert_eq!(bare.to_string(), "configuration error: oops");
    }

    #[test]
    fn test_mf003_member_wrapping_keeps_cause() {
        let pair = TypePair::new("A", "B");
        let inner = MapError::failed("boom");
        let err = MapError::member(&pair, "Total", inner);
        assert_eq!(err.failing_member(), Some("Total"));
        assert_eq!(err.source().map(|s| s.to_string()), Some("boom".to_string()));
        assert!(matches!(err.root_cause(), MapError::Failed(_)));
    }

    #[test]
    fn test_mf003_null_access_classification() {
        assert!(MapError::NullReference { member: "x".into() }.is_null_access());
        assert!(MapError::ArgumentNull("x".into()).is_null_access());
        assert!(!MapError::failed("x").is_null_access());
    }

    #[test]
    fn test_mf003_external_from_boxed() {
        let boxed: BoxError = "parse failure".into();
        let err: MapError = boxed.into();
        assert_eq!(err.to_string(), "parse failure");
    }
}
