// src/runtime/mod.rs
//! Runtime components for executing rule sets

pub mod context;
pub mod executor;
pub mod value;

pub use context::{Chunk, ExecutionContext, Exclusion};
pub use executor::{ExecutionResult, Executor, MatchedRule};
pub use value::Value;
