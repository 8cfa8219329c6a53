//! Core mapping logic: type model, analysis, plan assembly, dispatch.

pub mod analyzer;
pub mod config;
pub mod construct;
pub mod context;
pub mod convert;
pub mod document;
pub mod error;
pub mod fingerprint;
pub mod json;
pub mod parser;
pub mod planner;
pub mod registry;
pub mod resolver;
pub mod sequencer;
pub mod services;
pub mod typemap;
pub mod types;
pub mod value;
