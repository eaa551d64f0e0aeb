// src/validator/mod.rs
//! Semantic checks over a parsed rule set
//!
//! The validator only reads the tree. Every finding becomes a `SEMANTIC`
//! diagnostic; a set with warnings only is still runnable.

use crate::actions::{ActionType, ParamKind};
use crate::diagnostics::{self, Diagnostic, Origin, Position};
use crate::parser::ast::{Condition, FieldPath, Literal, Logic, Operator, Rule, RuleSet};
use ahash::HashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Static type of well-known context fields, for best-effort checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldType {
    Number,
    String,
}

static KNOWN_FIELDS: Lazy<HashMap<&'static str, FieldType>> = Lazy::new(|| {
    [
        ("query", FieldType::String),
        ("chunk.id", FieldType::String),
        ("chunk.text", FieldType::String),
        ("chunk.score", FieldType::Number),
        ("chunk.qualityScore", FieldType::Number),
        ("chunk.page", FieldType::Number),
    ]
    .into_iter()
    .collect()
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

/// Validate a rule set without modifying it
pub fn validate(ast: &RuleSet) -> ValidationReport {
    let mut validator = Validator::default();
    validator.check_rule_set(ast);

    let (errors, warnings) = diagnostics::partition(validator.diagnostics);
    tracing::debug!(
        rule_set = %ast.name,
        errors = errors.len(),
        warnings = warnings.len(),
        "Validated rule set"
    );

    ValidationReport {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

#[derive(Default)]
struct Validator {
    diagnostics: Vec<Diagnostic>,
}

impl Validator {
    fn check_rule_set(&mut self, ast: &RuleSet) {
        if ast.rules.is_empty() {
            self.warn(
                format!("Rule set \"{}\" contains no rules", ast.name),
                ast.position,
            );
        }

        self.check_uniqueness(&ast.rules);

        for rule in &ast.rules {
            self.check_rule(rule);
        }
    }

    fn check_uniqueness(&mut self, rules: &[Rule]) {
        let mut names: HashMap<&str, Position> = HashMap::default();
        let mut ids: HashMap<&str, &str> = HashMap::default();

        for rule in rules {
            if let Some(first) = names.get(rule.name.as_str()) {
                self.error(
                    format!(
                        "Duplicate rule name \"{}\" (first declared at {})",
                        rule.name, first
                    ),
                    rule.position,
                );
                continue;
            }
            names.insert(&rule.name, rule.position);

            if rule.id.is_empty() {
                self.error(
                    format!("Rule name \"{}\" does not produce a usable id", rule.name),
                    rule.position,
                );
                continue;
            }

            match ids.get(rule.id.as_str()) {
                Some(other) => self.error(
                    format!(
                        "Rule \"{}\" has id '{}', which collides with rule \"{}\"",
                        rule.name, rule.id, other
                    ),
                    rule.position,
                ),
                None => {
                    ids.insert(&rule.id, &rule.name);
                }
            }
        }
    }

    fn check_rule(&mut self, rule: &Rule) {
        if let Some(weight) = rule.weight {
            if !weight.is_finite() || weight < 0.0 {
                self.warn(
                    format!("Rule \"{}\" has a negative or non-finite weight", rule.name),
                    rule.position,
                );
            }
        }

        for condition in &rule.conditions {
            self.check_condition(condition);
        }
        self.check_bounds(rule);

        for action in &rule.actions {
            self.check_action(action);
        }
    }

    fn check_condition(&mut self, condition: &Condition) {
        let at = condition.position;
        self.check_path(&condition.field, at);
        self.check_literal_paths(&condition.value, at);

        let op = condition.operator;
        let value = &condition.value;

        let compatible = match value {
            Literal::Reference(_) => true,
            Literal::Null if op.is_ordering() => {
                self.warn(
                    format!("{} is ordered against null; this condition never holds", condition.field),
                    at,
                );
                return;
            }
            _ if op.is_ordering() => matches!(value, Literal::Number(_)),
            _ if op.is_membership() => matches!(value, Literal::String(_) | Literal::Array(_)),
            _ => match op {
                Operator::StartsWith | Operator::EndsWith => matches!(value, Literal::String(_)),
                _ => true,
            },
        };

        if !compatible {
            self.error(
                format!(
                    "Operator '{}' cannot compare {} with {} {}",
                    op,
                    condition.field,
                    value.type_name(),
                    value
                ),
                at,
            );
            return;
        }

        self.check_static_impossibility(condition);
    }

    /// Best-effort detection of conditions that can never hold
    fn check_static_impossibility(&mut self, condition: &Condition) {
        let at = condition.position;
        let value = &condition.value;

        if matches!(condition.operator, Operator::Equals | Operator::NotEquals)
            && matches!(value, Literal::Array(_))
        {
            self.warn(
                format!(
                    "{} is compared for equality with an array; did you mean 'in'?",
                    condition.field
                ),
                at,
            );
            return;
        }

        let Some(known) = KNOWN_FIELDS.get(condition.field.to_string().as_str()) else {
            return;
        };

        let mismatch = match (known, value) {
            (_, Literal::Null) | (_, Literal::Reference(_)) => false,
            (FieldType::Number, Literal::Number(_)) => false,
            (FieldType::String, Literal::String(_)) => false,
            (FieldType::Number, Literal::Array(items)) | (FieldType::String, Literal::Array(items))
                if condition.operator.is_membership() =>
            {
                let wanted = |item: &Literal| match known {
                    FieldType::Number => matches!(item, Literal::Number(_)),
                    FieldType::String => matches!(item, Literal::String(_)),
                };
                !items.iter().all(|item| matches!(item, Literal::Reference(_)) || wanted(item))
            }
            (FieldType::String, _) if condition.operator.is_membership() => false,
            _ => true,
        };

        if mismatch {
            let expected = match known {
                FieldType::Number => "number",
                FieldType::String => "string",
            };
            self.warn(
                format!(
                    "{} is a {} but is compared with {} {}; this condition never holds",
                    condition.field,
                    expected,
                    value.type_name(),
                    value
                ),
                at,
            );
        }
    }

    /// Contradictory numeric bounds on one field in an all-AND chain
    fn check_bounds(&mut self, rule: &Rule) {
        let all_and = rule
            .conditions
            .iter()
            .all(|c| c.logic.unwrap_or(Logic::And) == Logic::And);
        if !all_and || rule.conditions.len() < 2 {
            return;
        }

        // (lower, lower_inclusive, upper, upper_inclusive)
        let mut bounds: HashMap<String, (f64, bool, f64, bool)> = HashMap::default();
        for condition in &rule.conditions {
            let Literal::Number(n) = condition.value else {
                continue;
            };
            let entry = bounds
                .entry(condition.field.to_string())
                .or_insert((f64::NEG_INFINITY, true, f64::INFINITY, true));

            match condition.operator {
                Operator::GreaterThan if n >= entry.0 => *entry = (n, false, entry.2, entry.3),
                Operator::GreaterOrEqual if n > entry.0 => *entry = (n, true, entry.2, entry.3),
                Operator::LessThan if n <= entry.2 => *entry = (entry.0, entry.1, n, false),
                Operator::LessOrEqual if n < entry.2 => *entry = (entry.0, entry.1, n, true),
                Operator::Equals => {
                    if n > entry.0 || (n == entry.0 && entry.1) {
                        entry.0 = n;
                        entry.1 = true;
                    } else {
                        entry.0 = f64::INFINITY;
                    }
                    if n < entry.2 || (n == entry.2 && entry.3) {
                        entry.2 = n;
                        entry.3 = true;
                    } else {
                        entry.2 = f64::NEG_INFINITY;
                    }
                }
                _ => {}
            }
        }

        let mut fields: Vec<_> = bounds
            .into_iter()
            .filter(|(_, (lo, lo_inc, hi, hi_inc))| lo > hi || (lo == hi && !(*lo_inc && *hi_inc)))
            .map(|(field, _)| field)
            .collect();
        fields.sort();

        for field in fields {
            self.warn(
                format!(
                    "Conditions on {} in rule \"{}\" contradict each other; the rule can never match",
                    field, rule.name
                ),
                rule.position,
            );
        }
    }

    fn check_action(&mut self, action: &crate::parser::ast::Action) {
        let at = action.position;
        let Some(action_type) = ActionType::lookup(&action.name) else {
            self.error(format!("Unknown action '{}'", action.name), at);
            return;
        };
        let schema = action_type.schema();

        for spec in schema.params.iter().filter(|p| p.required) {
            if !action.params.contains_key(spec.name) {
                self.error(
                    format!(
                        "Action {} is missing required parameter '{}'",
                        action_type, spec.name
                    ),
                    at,
                );
            }
        }

        if !schema.any_of.is_empty()
            && !schema.any_of.iter().any(|p| action.params.contains_key(*p))
        {
            self.error(
                format!(
                    "Action {} needs at least one of: {}",
                    action_type,
                    schema.any_of.join(", ")
                ),
                at,
            );
        }

        let mut names: Vec<&String> = action.params.keys().collect();
        names.sort();
        for name in names {
            let value = &action.params[name];
            self.check_literal_paths(value, at);

            match schema.param(name) {
                None => self.warn(
                    format!("Action {} does not take parameter '{}'", action_type, name),
                    at,
                ),
                Some(spec) if !kind_accepts(spec.kind, value) => self.error(
                    format!(
                        "Action {} parameter '{}' must be a {}, got {} {}",
                        action_type,
                        name,
                        spec.kind,
                        value.type_name(),
                        value
                    ),
                    at,
                ),
                Some(_) => {}
            }
        }
    }

    fn check_path(&mut self, path: &FieldPath, at: Position) {
        let valid = !path.segments().is_empty()
            && path
                .segments()
                .iter()
                .all(|segment| !segment.is_empty() && !segment.contains(char::is_whitespace));
        if !valid {
            self.error(format!("Invalid field path '{}'", path), at);
        }
    }

    fn check_literal_paths(&mut self, literal: &Literal, at: Position) {
        match literal {
            Literal::Reference(path) => self.check_path(path, at),
            Literal::Array(items) => {
                for item in items {
                    self.check_literal_paths(item, at);
                }
            }
            _ => {}
        }
    }

    fn error(&mut self, message: impl Into<String>, at: Position) {
        self.diagnostics
            .push(Diagnostic::error(Origin::Semantic, message, at));
    }

    fn warn(&mut self, message: impl Into<String>, at: Position) {
        self.diagnostics
            .push(Diagnostic::warning(Origin::Semantic, message, at));
    }
}

/// References are typed at runtime, so they pass any static check
fn kind_accepts(kind: ParamKind, value: &Literal) -> bool {
    match (kind, value) {
        (_, Literal::Reference(_)) => true,
        (ParamKind::Any, _) => true,
        (ParamKind::Number, Literal::Number(_)) => true,
        (ParamKind::String, Literal::String(_)) => true,
        (ParamKind::Bool, Literal::Bool(_)) => true,
        _ => false,
    }
}
