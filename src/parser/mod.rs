// src/parser/mod.rs
//! Parser for the retrieval rule DSL
//!
//! Converts DSL source code into an Abstract Syntax Tree (AST)

pub mod ast;
pub mod lexer;
pub mod parser;

pub use ast::RuleSet;
pub use lexer::{tokenize, tokenize_with_trivia, Token, TokenKind};
pub use parser::{ParseOutcome, Parser};

/// Parse DSL source code into an AST.
///
/// Lexical errors stop the pipeline before parsing: the outcome then carries
/// only the lexer diagnostics and no tree.
pub fn parse(source: &str) -> ParseOutcome {
    let (tokens, lex_errors) = lexer::tokenize(source);

    if !lex_errors.is_empty() {
        tracing::debug!(errors = lex_errors.len(), "Lexing failed, skipping parse");
        return ParseOutcome {
            success: false,
            ast: None,
            errors: lex_errors,
            warnings: Vec::new(),
        };
    }

    let outcome = parser::Parser::new(tokens).parse();
    tracing::debug!(
        success = outcome.success,
        rules = outcome.ast.as_ref().map_or(0, |ast| ast.rules.len()),
        errors = outcome.errors.len(),
        warnings = outcome.warnings.len(),
        "Parsed rule set"
    );
    outcome
}
