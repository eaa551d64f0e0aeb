// src/diagnostics.rs
//! Diagnostics shared by every stage of the pipeline
//!
//! No stage returns its findings as an `Err`: the lexer, parser, validator and
//! executor all push `Diagnostic`s into lists that travel next to their
//! (possibly partial) output.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which stage produced a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Origin {
    Lexer,
    Syntax,
    Semantic,
    Runtime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Line/column of a token or AST node (both 1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub origin: Origin,
    pub severity: Severity,
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl Diagnostic {
    pub fn error(origin: Origin, message: impl Into<String>, position: Position) -> Self {
        Self {
            origin,
            severity: Severity::Error,
            message: message.into(),
            line: position.line,
            column: position.column,
        }
    }

    pub fn warning(origin: Origin, message: impl Into<String>, position: Position) -> Self {
        Self {
            origin,
            severity: Severity::Warning,
            message: message.into(),
            line: position.line,
            column: position.column,
        }
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn position(&self) -> Position {
        Position::new(self.line, self.column)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origin = match self.origin {
            Origin::Lexer => "lexer",
            Origin::Syntax => "syntax",
            Origin::Semantic => "semantic",
            Origin::Runtime => "runtime",
        };
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(
            f,
            "{} {} at {}:{}: {}",
            origin, severity, self.line, self.column, self.message
        )
    }
}

/// Split a mixed list into `(errors, warnings)`, preserving order
pub fn partition(diagnostics: Vec<Diagnostic>) -> (Vec<Diagnostic>, Vec<Diagnostic>) {
    diagnostics.into_iter().partition(Diagnostic::is_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let diag = Diagnostic::error(Origin::Syntax, "Expected '{'", Position::new(3, 7));
        assert_eq!(diag.to_string(), "syntax error at 3:7: Expected '{'");
    }

    #[test]
    fn test_partition_keeps_order() {
        let diags = vec![
            Diagnostic::warning(Origin::Runtime, "a", Position::default()),
            Diagnostic::error(Origin::Runtime, "b", Position::default()),
            Diagnostic::warning(Origin::Runtime, "c", Position::default()),
        ];
        let (errors, warnings) = partition(diags);
        assert_eq!(errors.len(), 1);
        assert_eq!(warnings[0].message, "a");
        assert_eq!(warnings[1].message, "c");
    }

    #[test]
    fn test_serialization() {
        let diag = Diagnostic::warning(Origin::Semantic, "unused", Position::new(1, 2));
        let json = serde_json::to_string(&diag).unwrap();
        assert!(json.contains("\"SEMANTIC\""));
        assert!(json.contains("\"warning\""));
    }
}
