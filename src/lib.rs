//! Mapforge, a mapping-plan compiler.
//!
//! Declarative type maps are analyzed for reference and value cycles, then
//! compiled once per type pair into reusable conversion plans.

pub mod cli;
pub mod core;

pub use crate::core::config::{Configuration, MapperOptions};
pub use crate::core::error::{MapError, MapResult};
pub use crate::core::registry::PlanRegistry;
pub use crate::core::typemap::{MemberMap, TypeMap};
pub use crate::core::types::{TypeCatalog, TypeInfo, TypeKey, TypePair};
pub use crate::core::value::{ObjectRef, Record, Value};
