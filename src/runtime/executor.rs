// src/runtime/executor.rs
//! Rule evaluation against an execution context
//!
//! This is the hot path: one call per pipeline stage per query. The rule set
//! is only read; every mutation goes through the action handlers.

use crate::actions::handlers::{self, Params};
use crate::actions::{ActionError, ActionTarget, ActionType};
use crate::diagnostics::{Diagnostic, Origin, Position};
use crate::parser::ast::{Action, Condition, FieldPath, Literal, Logic, Operator, Rule, RuleSet, Stage};
use crate::runtime::context::{Chunk, ExecutionContext};
use crate::Value;
use ahash::HashSet;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// A rule whose conditions held during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedRule {
    pub rule_id: String,
    pub stage: Stage,
}

/// Outcome of running one rule set over one context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// `false` iff a RUNTIME error was recorded
    pub success: bool,
    /// The caller's context after all actions applied
    pub context: ExecutionContext,
    /// In execution order
    pub matched_rules: Vec<MatchedRule>,
    pub logs: Vec<String>,
    /// RUNTIME diagnostics only
    pub diagnostics: Vec<Diagnostic>,
    pub execution_time_ms: f64,
}

impl ExecutionResult {
    pub fn matched_ids(&self) -> Vec<&str> {
        self.matched_rules.iter().map(|m| m.rule_id.as_str()).collect()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| !d.is_error())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Executor {
    time_budget: Option<Duration>,
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Soft wall-clock ceiling, checked before each rule. A zero budget
    /// runs nothing.
    pub fn with_time_budget(mut self, budget: Option<Duration>) -> Self {
        self.time_budget = budget;
        self
    }

    /// Run every enabled rule of `stage` against `context`
    pub fn execute(&self, rule_set: &RuleSet, stage: Stage, context: ExecutionContext) -> ExecutionResult {
        let start = Instant::now();
        let mut run = Run::new(context);

        let mut rules: Vec<&Rule> = rule_set
            .rules
            .iter()
            .filter(|r| r.enabled && r.stage == stage)
            .collect();
        // stable: equal priorities keep declaration order
        rules.sort_by_key(|r| r.priority);

        for (index, rule) in rules.iter().enumerate() {
            if let Some(budget) = self.time_budget {
                if start.elapsed() >= budget {
                    let skipped = rules.len() - index;
                    tracing::warn!(
                        rule_set = %rule_set.name,
                        budget_ms = budget.as_millis() as u64,
                        skipped,
                        "Time budget exceeded"
                    );
                    run.error(
                        format!(
                            "Time budget of {} ms exceeded; skipped {} rule(s) starting at '{}'",
                            budget.as_millis(),
                            skipped,
                            rule.id
                        ),
                        rule.position,
                    );
                    break;
                }
            }
            run.apply_rule(rule);
        }

        let execution_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        let success = !run.diagnostics.iter().any(Diagnostic::is_error);

        tracing::debug!(
            rule_set = %rule_set.name,
            stage = %stage,
            matched = run.matched.len(),
            success,
            execution_time_ms,
            "Executed rule set"
        );

        ExecutionResult {
            success,
            context: run.context,
            matched_rules: run.matched,
            logs: run.logs,
            diagnostics: run.diagnostics,
            execution_time_ms,
        }
    }
}

/// Mutable state of one execution
struct Run {
    context: ExecutionContext,
    matched: Vec<MatchedRule>,
    logs: Vec<String>,
    diagnostics: Vec<Diagnostic>,
    /// (rule id, path) pairs already reported
    warned: HashSet<(String, String)>,
}

impl Run {
    fn new(context: ExecutionContext) -> Self {
        Self {
            context,
            matched: Vec::new(),
            logs: Vec::new(),
            diagnostics: Vec::new(),
            warned: HashSet::default(),
        }
    }

    fn apply_rule(&mut self, rule: &Rule) {
        let (any_match, mut mask) = self.match_rule(rule);
        if !any_match {
            return;
        }

        let count = mask.iter().filter(|m| **m).count();
        tracing::debug!(rule = %rule.id, chunks = count, "Rule matched");
        self.matched.push(MatchedRule {
            rule_id: rule.id.clone(),
            stage: rule.stage,
        });
        self.logs
            .push(format!("Rule '{}' matched {} chunk(s)", rule.id, count));

        for action in &rule.actions {
            self.apply_action(rule, action, &mut mask);
        }
    }

    /// Evaluate `rule` per active chunk, or once with no chunk bound when
    /// the context has none. Returns whether anything matched and the mask
    /// of matched chunks.
    fn match_rule(&mut self, rule: &Rule) -> (bool, Vec<bool>) {
        let context = &self.context;
        let mut eval = Evaluation {
            context,
            rule,
            diagnostics: &mut self.diagnostics,
            warned: &mut self.warned,
        };

        if context.chunks.is_empty() {
            let matched = eval.conditions_hold(None);
            return (matched, Vec::new());
        }

        let mask: Vec<bool> = context
            .chunks
            .iter()
            .map(|chunk| !chunk.is_excluded() && eval.conditions_hold(Some(chunk)))
            .collect();
        (mask.iter().any(|m| *m), mask)
    }

    fn apply_action(&mut self, rule: &Rule, action: &Action, mask: &mut Vec<bool>) {
        let Some(action_type) = ActionType::lookup(&action.name) else {
            self.error(
                ActionError::UnknownAction(action.name.clone()).to_string(),
                action.position,
            );
            return;
        };

        match action_type.target() {
            ActionTarget::Chunk => {
                for index in 0..self.context.chunks.len() {
                    if !mask.get(index).copied().unwrap_or(false) {
                        continue;
                    }
                    let result = resolve_params(
                        action_type,
                        action,
                        &self.context,
                        Some(&self.context.chunks[index]),
                    )
                    .and_then(|params| {
                        handlers::apply_to_chunk(
                            action_type,
                            &mut self.context.chunks[index],
                            rule,
                            &params,
                        )
                    });
                    self.record(action_type, action.position, result);
                }
            }
            ActionTarget::Context => {
                let result = resolve_params(action_type, action, &self.context, None).and_then(
                    |params| handlers::apply_to_context(action_type, &mut self.context, &params),
                );
                let result = result.map(|(line, kept)| {
                    *mask = realign(mask, &kept);
                    line
                });
                self.record(action_type, action.position, result);
            }
        }
    }

    fn record(&mut self, action: ActionType, at: Position, result: Result<String, ActionError>) {
        match result {
            Ok(line) => {
                tracing::trace!(action = %action, "{}", line);
                self.logs.push(line);
            }
            Err(err) => self.error(err.to_string(), at),
        }
    }

    fn error(&mut self, message: impl Into<String>, at: Position) {
        self.diagnostics
            .push(Diagnostic::error(Origin::Runtime, message, at));
    }
}

/// Drop mask entries for chunks that a context action removed
fn realign(mask: &[bool], kept: &[bool]) -> Vec<bool> {
    if mask.is_empty() {
        return Vec::new();
    }
    mask.iter()
        .zip(kept.iter())
        .filter(|(_, keep)| **keep)
        .map(|(matched, _)| *matched)
        .collect()
}

fn resolve_params(
    action_type: ActionType,
    action: &Action,
    context: &ExecutionContext,
    chunk: Option<&Chunk>,
) -> Result<Params, ActionError> {
    action
        .params
        .iter()
        .map(|(name, literal)| {
            resolve_literal(literal, context, chunk)
                .map(|value| (name.clone(), value))
                .map_err(|path| ActionError::UnresolvedReference {
                    action: action_type,
                    path: path.to_string(),
                })
        })
        .collect()
}

/// Turn a literal into a runtime value; `Err` carries the unresolved path
fn resolve_literal<'a>(
    literal: &'a Literal,
    context: &ExecutionContext,
    chunk: Option<&Chunk>,
) -> Result<Value, &'a FieldPath> {
    match literal {
        Literal::Reference(path) => context.resolve(path, chunk).ok_or(path),
        Literal::Array(items) => items
            .iter()
            .map(|item| resolve_literal(item, context, chunk))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        other => Ok(Value::from_literal(other).unwrap_or(Value::Null)),
    }
}

/// Condition evaluation for one rule, borrowing the run's diagnostics
struct Evaluation<'a> {
    context: &'a ExecutionContext,
    rule: &'a Rule,
    diagnostics: &'a mut Vec<Diagnostic>,
    warned: &'a mut HashSet<(String, String)>,
}

impl Evaluation<'_> {
    /// Strict left-to-right fold, no precedence: each condition's connector
    /// joins the running result with the next condition. A missing connector
    /// means AND. The next condition is not evaluated when the running result
    /// already decides the connector (false before AND, true before OR).
    fn conditions_hold(&mut self, chunk: Option<&Chunk>) -> bool {
        let rule = self.rule;
        let mut conditions = rule.conditions.iter();
        let Some(first) = conditions.next() else {
            return true;
        };

        let mut acc = self.check(first, chunk);
        let mut connector = first.logic.unwrap_or(Logic::And);
        for condition in conditions {
            acc = match connector {
                Logic::And if !acc => false,
                Logic::Or if acc => true,
                _ => self.check(condition, chunk),
            };
            connector = condition.logic.unwrap_or(Logic::And);
        }

        acc
    }

    fn check(&mut self, condition: &Condition, chunk: Option<&Chunk>) -> bool {
        let Some(left) = self.context.resolve(&condition.field, chunk) else {
            self.warn_missing(&condition.field, condition.position);
            return false;
        };

        let right = match resolve_literal(&condition.value, self.context, chunk) {
            Ok(value) => value,
            Err(path) => {
                self.warn_missing(path, condition.position);
                return false;
            }
        };

        match compare(condition.operator, &left, &right) {
            Some(result) => result,
            None => {
                self.warn_once(
                    &condition.field,
                    format!(
                        "Cannot apply '{}' to {} {} and {} {} in rule '{}'",
                        condition.operator,
                        condition.field,
                        left.type_name(),
                        right.type_name(),
                        right,
                        self.rule.id
                    ),
                    condition.position,
                );
                false
            }
        }
    }

    fn warn_missing(&mut self, path: &FieldPath, at: Position) {
        let message = format!("Field '{}' not found in rule '{}'", path, self.rule.id);
        self.warn_once(path, message, at);
    }

    fn warn_once(&mut self, path: &FieldPath, message: String, at: Position) {
        if self.warned.insert((self.rule.id.clone(), path.to_string())) {
            self.diagnostics
                .push(Diagnostic::warning(Origin::Runtime, message, at));
        }
    }
}

/// `None` when the operand types do not fit the operator
fn compare(operator: Operator, left: &Value, right: &Value) -> Option<bool> {
    use std::cmp::Ordering::*;

    match operator {
        Operator::Equals => Some(left.loose_eq(right)),
        Operator::NotEquals => Some(!left.loose_eq(right)),
        Operator::GreaterThan => left.partial_cmp_value(right).map(|o| o == Greater),
        Operator::GreaterOrEqual => left.partial_cmp_value(right).map(|o| o != Less),
        Operator::LessThan => left.partial_cmp_value(right).map(|o| o == Less),
        Operator::LessOrEqual => left.partial_cmp_value(right).map(|o| o != Greater),
        Operator::Contains => contains(left, right),
        Operator::NotContains => contains(left, right).map(|b| !b),
        Operator::In => contains(right, left),
        Operator::NotIn => contains(right, left).map(|b| !b),
        Operator::StartsWith => Some(left.as_str()?.starts_with(right.as_str()?)),
        Operator::EndsWith => Some(left.as_str()?.ends_with(right.as_str()?)),
    }
}

/// Substring for strings, membership for arrays
fn contains(haystack: &Value, needle: &Value) -> Option<bool> {
    match haystack {
        Value::String(s) => Some(s.contains(needle.as_str()?)),
        Value::Array(items) => Some(items.iter().any(|item| item.loose_eq(needle))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn rule_set(source: &str) -> RuleSet {
        let outcome = parser::parse(source);
        assert!(outcome.success, "parse errors: {:?}", outcome.errors);
        outcome.ast.unwrap()
    }

    fn chunk(id: &str, quality: f64) -> Chunk {
        Chunk::new(id)
            .with_field("qualityScore", quality)
            .with_field("score", 1.0)
    }

    #[test]
    fn test_boost_matching_chunks_only() {
        let rules = rule_set(
            r#"rule_set "q" {
                rule "boost" {
                    when { chunk.qualityScore >= 0.8 }
                    then { BOOST_SCORE(amount: 2) }
                }
            }"#,
        );
        let ctx = ExecutionContext::new("q")
            .with_chunk(chunk("a", 0.9))
            .with_chunk(chunk("b", 0.5));

        let result = Executor::new().execute(&rules, Stage::Ranking, ctx);

        assert!(result.success);
        assert_eq!(result.matched_ids(), vec!["boost"]);
        assert_eq!(result.context.chunks[0].score(), 3.0);
        assert_eq!(result.context.chunks[1].score(), 1.0);
    }

    #[test]
    fn test_priority_order_and_stage_filter() {
        let rules = rule_set(
            r#"rule_set "p" {
                rule "A" { priority: 20 then { SET_METADATA(key: "a", value: 1) } }
                rule "B" { priority: 5 then { SET_METADATA(key: "b", value: 1) } }
                rule "C" { priority: 10 then { SET_METADATA(key: "c", value: 1) } }
                rule "D" { priority: 1 stage: FILTERING then { EXCLUDE } }
                rule "E" { priority: 1 enabled: false then { EXCLUDE } }
            }"#,
        );
        let result = Executor::new().execute(&rules, Stage::Ranking, ExecutionContext::new("q"));
        assert_eq!(result.matched_ids(), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_short_circuit_skips_missing_field() {
        let rules = rule_set(
            r#"rule_set "s" {
                rule "r" {
                    when { chunk.qualityScore > 0.99 and chunk.nonexistentField == 1 }
                    then { EXCLUDE }
                }
            }"#,
        );
        let ctx = ExecutionContext::new("q").with_chunk(chunk("a", 0.5));
        let result = Executor::new().execute(&rules, Stage::Ranking, ctx);

        assert!(result.matched_rules.is_empty());
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn test_missing_field_warns_once() {
        let rules = rule_set(
            r#"rule_set "m" {
                rule "r" { when { chunk.nonexistentField == 1 } then { EXCLUDE } }
            }"#,
        );
        let ctx = ExecutionContext::new("q")
            .with_chunk(chunk("a", 0.5))
            .with_chunk(chunk("b", 0.5))
            .with_chunk(chunk("c", 0.5));
        let result = Executor::new().execute(&rules, Stage::Ranking, ctx);

        assert!(result.success);
        assert!(result.matched_rules.is_empty());
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].origin, Origin::Runtime);
        assert!(!result.diagnostics[0].is_error());
    }

    #[test]
    fn test_or_chain() {
        let rules = rule_set(
            r#"rule_set "o" {
                rule "r" {
                    when { chunk.qualityScore > 0.95 or chunk.id == "b" }
                    then { SET_METADATA(key: "hit", value: true) }
                }
            }"#,
        );
        let ctx = ExecutionContext::new("q")
            .with_chunk(chunk("a", 0.5))
            .with_chunk(chunk("b", 0.5));
        let result = Executor::new().execute(&rules, Stage::Ranking, ctx);

        assert!(result.context.chunks[0].field("metadata").is_none());
        assert!(result.context.chunks[1].field("metadata").is_some());
    }

    fn flags(id: &str, a: i64, b: i64, c: i64) -> Chunk {
        Chunk::new(id)
            .with_field("a", a)
            .with_field("b", b)
            .with_field("c", c)
    }

    #[test]
    fn test_or_then_and_folds_left_to_right() {
        // (a or b) and c
        let rules = rule_set(
            r#"rule_set "mix" {
                rule "r" {
                    when { chunk.a == 1 or chunk.b == 1 and chunk.c == 1 }
                    then { EXCLUDE }
                }
            }"#,
        );
        let ctx = ExecutionContext::new("q")
            .with_chunk(flags("x", 1, 0, 0))
            .with_chunk(flags("y", 1, 0, 1))
            .with_chunk(flags("z", 0, 1, 1));
        let result = Executor::new().execute(&rules, Stage::Ranking, ctx);

        let excluded: Vec<bool> = result.context.chunks.iter().map(Chunk::is_excluded).collect();
        assert_eq!(excluded, vec![false, true, true]);
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn test_and_then_or_folds_left_to_right() {
        // (a and b) or c
        let rules = rule_set(
            r#"rule_set "mix" {
                rule "r" {
                    when { chunk.a == 1 and chunk.b == 1 or chunk.c == 1 }
                    then { EXCLUDE }
                }
            }"#,
        );
        let ctx = ExecutionContext::new("q")
            .with_chunk(flags("x", 0, 0, 1))
            .with_chunk(flags("y", 0, 1, 0))
            .with_chunk(flags("z", 1, 1, 0));
        let result = Executor::new().execute(&rules, Stage::Ranking, ctx);

        let excluded: Vec<bool> = result.context.chunks.iter().map(Chunk::is_excluded).collect();
        assert_eq!(excluded, vec![true, false, true]);
    }

    #[test]
    fn test_excluded_chunks_skipped_by_later_rules() {
        let rules = rule_set(
            r#"rule_set "x" {
                rule "drop" { priority: 1 when { chunk.qualityScore < 0.3 } then { EXCLUDE(reason: "low") } }
                rule "boost" { priority: 2 then { BOOST_SCORE(amount: 1) } }
            }"#,
        );
        let ctx = ExecutionContext::new("q")
            .with_chunk(chunk("a", 0.1))
            .with_chunk(chunk("b", 0.9));
        let result = Executor::new().execute(&rules, Stage::Ranking, ctx);

        let a = result.context.chunk("a").unwrap();
        assert!(a.is_excluded());
        assert_eq!(a.score(), 1.0);
        assert_eq!(result.context.chunk("b").unwrap().score(), 2.0);
    }

    #[test]
    fn test_context_action_realigns_mask() {
        let rules = rule_set(
            r#"rule_set "f" {
                rule "gate" {
                    stage: FILTERING
                    when { chunk.qualityScore >= 0.5 }
                    then {
                        FILTER_BY_QUALITY(threshold: 0.7)
                        SET_METADATA(key: "kept", value: true)
                    }
                }
            }"#,
        );
        let ctx = ExecutionContext::new("q")
            .with_chunk(chunk("a", 0.6))
            .with_chunk(chunk("b", 0.2))
            .with_chunk(chunk("c", 0.8));
        let result = Executor::new().execute(&rules, Stage::Filtering, ctx);

        assert!(result.success, "{:?}", result.diagnostics);
        assert_eq!(result.context.chunks.len(), 1);
        let c = &result.context.chunks[0];
        assert_eq!(c.id, "c");
        assert!(c.field("metadata").is_some());
    }

    #[test]
    fn test_unknown_action_is_runtime_error() {
        let rules = rule_set(r#"rule_set "u" { rule "r" { then { TELEPORT } } }"#);
        let result = Executor::new().execute(&rules, Stage::Ranking, ExecutionContext::new("q"));

        assert!(!result.success);
        assert_eq!(result.errors().count(), 1);
        assert_eq!(result.matched_ids(), vec!["r"]);
    }

    #[test]
    fn test_references_resolve_against_context() {
        let rules = rule_set(
            r#"rule_set "r" {
                rule "tag" {
                    when { chunk.source == document.primarySource }
                    then { SET_METADATA(key: "query", value: query) }
                }
            }"#,
        );
        let ctx = ExecutionContext::new("what is rag")
            .with_document_field("primarySource", "wiki")
            .with_chunk(Chunk::new("a").with_field("source", "wiki"))
            .with_chunk(Chunk::new("b").with_field("source", "blog"));
        let result = Executor::new().execute(&rules, Stage::Ranking, ctx);

        let meta = result.context.chunks[0]
            .field("metadata")
            .and_then(Value::as_object)
            .unwrap();
        assert_eq!(meta.get("query"), Some(&Value::from("what is rag")));
        assert!(result.context.chunks[1].field("metadata").is_none());
    }

    #[test]
    fn test_zero_budget_skips_rules() {
        let rules = rule_set(
            r#"rule_set "t" {
                rule "a" { then { EXCLUDE } }
                rule "b" { then { EXCLUDE } }
            }"#,
        );
        let executor = Executor::new().with_time_budget(Some(Duration::ZERO));
        let ctx = ExecutionContext::new("q").with_chunk(chunk("a", 0.5));
        let result = executor.execute(&rules, Stage::Ranking, ctx);

        assert!(!result.success);
        assert!(result.matched_rules.is_empty());
        assert!(!result.context.chunks[0].is_excluded());
        assert!(result.errors().any(|d| d.message.contains("Time budget")));
    }

    #[test]
    fn test_compare_operators() {
        let tags = Value::from(vec!["rust", "rag"]);
        assert_eq!(compare(Operator::Contains, &tags, &Value::from("rag")), Some(true));
        assert_eq!(compare(Operator::In, &Value::from("rag"), &tags), Some(true));
        assert_eq!(compare(Operator::NotIn, &Value::from("go"), &tags), Some(true));
        assert_eq!(
            compare(Operator::StartsWith, &Value::from("retrieval"), &Value::from("ret")),
            Some(true)
        );
        assert_eq!(compare(Operator::GreaterThan, &Value::from("a"), &Value::Int(1)), None);
        assert_eq!(compare(Operator::Equals, &Value::Int(1), &Value::Float(1.0)), Some(true));
    }
}
