// src/parser/ast.rs
//! Abstract Syntax Tree definitions for the rule DSL
//!
//! The tree is built once by the parser and only read afterwards.

use crate::diagnostics::Position;
use ahash::HashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_VERSION: &str = "1.0.0";
pub const DEFAULT_PRIORITY: i64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub name: String,
    pub version: String,
    pub scope: Scope,
    pub description: Option<String>,
    pub metadata: HashMap<String, Literal>,
    pub rules: Vec<Rule>,
    pub position: Position,
}

impl RuleSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: DEFAULT_VERSION.to_string(),
            scope: Scope::default(),
            description: None,
            metadata: HashMap::default(),
            rules: Vec::new(),
            position: Position::default(),
        }
    }

    pub fn rule(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub priority: i64,
    pub weight: Option<f64>,
    pub stage: Stage,
    pub enabled: bool,
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
    /// Rule-level `version`/`scope` and attributes the grammar does not model
    pub metadata: HashMap<String, Literal>,
    pub position: Position,
}

impl Rule {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: slugify(&name),
            name,
            description: None,
            priority: DEFAULT_PRIORITY,
            weight: None,
            stage: Stage::default(),
            enabled: true,
            conditions: Vec::new(),
            actions: Vec::new(),
            metadata: HashMap::default(),
            position: Position::default(),
        }
    }
}

/// Derive a rule id from its display name.
///
/// Letters, digits and Hangul are kept (ASCII lowercased); every other run of
/// characters collapses into a single `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for ch in name.chars() {
        if ch.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(ch.to_lowercase());
        } else {
            pending_dash = true;
        }
    }

    slug
}

/// Pipeline phase a rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Retrieval,
    #[default]
    Ranking,
    Filtering,
    PostProcessing,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Retrieval,
        Stage::Ranking,
        Stage::Filtering,
        Stage::PostProcessing,
    ];

    /// Accepts `ranking`, `RANKING`, `post-processing`, `post_processing`, ...
    pub fn parse(text: &str) -> Option<Self> {
        match normalize_enum_name(text).as_str() {
            "RETRIEVAL" => Some(Stage::Retrieval),
            "RANKING" => Some(Stage::Ranking),
            "FILTERING" => Some(Stage::Filtering),
            "POST_PROCESSING" | "POSTPROCESSING" => Some(Stage::PostProcessing),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Retrieval => "RETRIEVAL",
            Stage::Ranking => "RANKING",
            Stage::Filtering => "FILTERING",
            Stage::PostProcessing => "POST_PROCESSING",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a rule set applies in the surrounding system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scope {
    #[default]
    Global,
    Notebook,
    Source,
    Chat,
}

impl Scope {
    pub fn parse(text: &str) -> Option<Self> {
        match normalize_enum_name(text).as_str() {
            "GLOBAL" => Some(Scope::Global),
            "NOTEBOOK" => Some(Scope::Notebook),
            "SOURCE" => Some(Scope::Source),
            "CHAT" => Some(Scope::Chat),
            _ => None,
        }
    }
}

fn normalize_enum_name(text: &str) -> String {
    text.trim().to_ascii_uppercase().replace('-', "_")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: FieldPath,
    pub operator: Operator,
    pub value: Literal,
    /// How this condition combines with the next one in its `when` block
    pub logic: Option<Logic>,
    pub position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Contains,
    NotContains,
    In,
    NotIn,
    StartsWith,
    EndsWith,
}

impl Operator {
    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            Operator::GreaterThan
                | Operator::GreaterOrEqual
                | Operator::LessThan
                | Operator::LessOrEqual
        )
    }

    pub fn is_membership(self) -> bool {
        matches!(
            self,
            Operator::Contains | Operator::NotContains | Operator::In | Operator::NotIn
        )
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Equals => "==",
            Operator::NotEquals => "!=",
            Operator::GreaterThan => ">",
            Operator::GreaterOrEqual => ">=",
            Operator::LessThan => "<",
            Operator::LessOrEqual => "<=",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Logic {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Identifier as written; resolved against the action registry later
    pub name: String,
    pub params: HashMap<String, Literal>,
    pub position: Position,
}

impl Action {
    pub fn param(&self, name: &str) -> Option<&Literal> {
        self.params.get(name)
    }
}

/// Dotted path into the runtime context, e.g. `chunk.qualityScore`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldPath(pub Vec<String>);

impl FieldPath {
    pub fn parse(dotted: &str) -> Self {
        FieldPath(dotted.split('.').map(str::to_string).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn root(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// Literal value as written in the DSL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Literal>),
    /// Unevaluated path, resolved against the context at execution time
    Reference(FieldPath),
}

impl Literal {
    pub fn type_name(&self) -> &'static str {
        match self {
            Literal::Null => "null",
            Literal::Bool(_) => "boolean",
            Literal::Number(_) => "number",
            Literal::String(_) => "string",
            Literal::Array(_) => "array",
            Literal::Reference(_) => "reference",
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Literal::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "null"),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Number(n) => write!(f, "{}", n),
            Literal::String(s) => write!(f, "\"{}\"", s),
            Literal::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Literal::Reference(path) => write!(f, "{}", path),
        }
    }
}
