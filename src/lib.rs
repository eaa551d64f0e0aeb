// src/lib.rs
//! # RAG Rule Engine
//!
//! A small, sandboxed rule language for steering retrieval-augmented
//! generation pipelines. Operators write rules that boost, filter, exclude
//! or tag retrieved chunks; the engine compiles them once and evaluates them
//! against every query's context.
//!
//! Data flows one way: text → tokens → AST → validated AST → execution
//! result. Only [`RuleManager`] keeps state between calls.
//!
//! ## Example
//!
//! ```rust
//! use rag_rule_engine::{Chunk, ExecutionContext, RuleManager, Stage};
//!
//! let source = r#"
//!     rule_set "quality" {
//!         rule "boost-high-quality" {
//!             priority: 10
//!             when { chunk.qualityScore > 0.9 }
//!             then { BOOST_SCORE(amount: 10) }
//!         }
//!     }
//! "#;
//!
//! let manager = RuleManager::default();
//! manager.compile(source).unwrap();
//!
//! let context = ExecutionContext::new("what is retrieval augmentation?")
//!     .with_chunk(Chunk::new("a").with_field("qualityScore", 0.95))
//!     .with_chunk(Chunk::new("b").with_field("qualityScore", 0.40));
//!
//! let result = manager.run("quality", Stage::Ranking, context).unwrap();
//! assert!(result.success);
//! assert_eq!(result.context.chunks[0].score(), 10.0);
//! assert_eq!(result.context.chunks[1].score(), 0.0);
//! ```

pub mod actions;
pub mod config;
pub mod diagnostics;
pub mod manager;
pub mod parser;
pub mod runtime;
pub mod validator;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use actions::ActionType;
pub use config::EngineConfig;
pub use diagnostics::{Diagnostic, Origin, Position, Severity};
pub use manager::{CompileFailure, CompiledRuleSet, RuleManager};
pub use parser::ast::{Rule, RuleSet, Scope, Stage};
pub use runtime::{Chunk, ExecutionContext, ExecutionResult, Executor, MatchedRule, Value};
pub use validator::{validate, ValidationReport};

/// Crate-level failures
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Unknown rule set: {0}")]
    UnknownRuleSet(String),

    #[error("Rule set source is {size} bytes, which exceeds the limit of {limit} bytes")]
    SourceTooLarge { size: usize, limit: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Deserialization error: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Compile(#[from] CompileFailure),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Everything a compile pass found, successful or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileOutput {
    pub success: bool,
    /// Absent only when lexing failed or the header could not be parsed
    pub ast: Option<RuleSet>,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

/// Lex, parse and validate `source` without touching any cache.
///
/// Validation only runs when parsing produced no errors, so a syntax error
/// is never buried under follow-on semantic findings.
pub fn compile(source: &str) -> CompileOutput {
    let parsed = parser::parse(source);
    let mut errors = parsed.errors;
    let mut warnings = parsed.warnings;

    if let (true, Some(ast)) = (errors.is_empty(), parsed.ast.as_ref()) {
        let report = validator::validate(ast);
        errors.extend(report.errors);
        warnings.extend(report.warnings);
    }

    CompileOutput {
        success: errors.is_empty() && parsed.ast.is_some(),
        ast: parsed.ast,
        errors,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_collects_all_stages() {
        let output = compile(
            r#"rule_set "s" {
                rule "r" { when { chunk.page > "ten" } then { BOOST_SCORE(amount: 1) } }
            }"#,
        );
        assert!(!output.success);
        assert!(output.ast.is_some());
        assert_eq!(output.errors.len(), 1);
        assert_eq!(output.errors[0].origin, Origin::Semantic);
    }

    #[test]
    fn test_syntax_errors_skip_validation() {
        let output = compile(
            r#"rule_set "s" {
                rule "r" { when { chunk.page > "ten" } }
            }"#,
        );
        assert!(!output.success);
        assert_eq!(output.errors.len(), 1);
        assert_eq!(output.errors[0].origin, Origin::Syntax);
    }

    #[test]
    fn test_lexer_errors_have_no_ast() {
        let output = compile("rule_set \"s\" { @ }");
        assert!(!output.success);
        assert!(output.ast.is_none());
        assert_eq!(output.errors[0].origin, Origin::Lexer);
    }

    #[test]
    fn test_engine_error_messages() {
        let err = EngineError::SourceTooLarge { size: 10, limit: 4 };
        assert_eq!(
            err.to_string(),
            "Rule set source is 10 bytes, which exceeds the limit of 4 bytes"
        );
        assert_eq!(
            EngineError::UnknownRuleSet("x".into()).to_string(),
            "Unknown rule set: x"
        );
    }
}
