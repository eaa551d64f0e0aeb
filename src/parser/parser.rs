// src/parser/parser.rs
//! Parser that converts tokens into an Abstract Syntax Tree
//!
//! Recursive descent over the rule-set grammar. Errors inside a rule are
//! recorded and the parser resynchronizes on the next `}`, `rule`, `when` or
//! `then`, so one typo does not hide the rest of the file's problems.

use super::ast::*;
use super::lexer::{Token, TokenKind};
use crate::diagnostics::{self, Diagnostic, Origin, Position};
use ahash::{HashMap, HashSet};
use once_cell::sync::Lazy;

static SYMBOL_OPERATORS: Lazy<HashMap<&'static str, Operator>> = Lazy::new(|| {
    [
        ("==", Operator::Equals),
        ("=", Operator::Equals),
        ("!=", Operator::NotEquals),
        (">", Operator::GreaterThan),
        (">=", Operator::GreaterOrEqual),
        ("<", Operator::LessThan),
        ("<=", Operator::LessOrEqual),
    ]
    .into_iter()
    .collect()
});

static WORD_OPERATORS: Lazy<HashMap<&'static str, Operator>> = Lazy::new(|| {
    [
        ("equals", Operator::Equals),
        ("eq", Operator::Equals),
        ("not_equals", Operator::NotEquals),
        ("ne", Operator::NotEquals),
        ("gt", Operator::GreaterThan),
        ("gte", Operator::GreaterOrEqual),
        ("lt", Operator::LessThan),
        ("lte", Operator::LessOrEqual),
        ("contains", Operator::Contains),
        ("not_contains", Operator::NotContains),
        ("in", Operator::In),
        ("not_in", Operator::NotIn),
        ("starts_with", Operator::StartsWith),
        ("ends_with", Operator::EndsWith),
    ]
    .into_iter()
    .collect()
});

/// Deepest array literal accepted; keeps every recursive walk over a literal
/// bounded
pub const MAX_ARRAY_NESTING: usize = 32;

type ParseResult<T> = Result<T, Diagnostic>;

/// Output of a parse: the (possibly partial) tree plus every finding
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    pub success: bool,
    pub ast: Option<RuleSet>,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    diagnostics: Vec<Diagnostic>,
    /// open `[` inside the value being parsed
    array_depth: usize,
}

impl Parser {
    /// `tokens` should be trivia-free; an `Eof` token is appended if missing
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.last().map(|t| t.kind) != Some(TokenKind::Eof) {
            let (line, column) = tokens.last().map_or((1, 1), |t| (t.line, t.column));
            tokens.push(Token {
                kind: TokenKind::Eof,
                value: String::new(),
                line,
                column,
                raw: String::new(),
            });
        }

        Self {
            tokens,
            current: 0,
            diagnostics: Vec::new(),
            array_depth: 0,
        }
    }

    pub fn parse(mut self) -> ParseOutcome {
        let ast = match self.parse_rule_set() {
            Ok(rule_set) => Some(rule_set),
            Err(diag) => {
                self.diagnostics.push(diag);
                None
            }
        };

        let (errors, warnings) = diagnostics::partition(self.diagnostics);
        ParseOutcome {
            success: ast.is_some() && errors.is_empty(),
            ast,
            errors,
            warnings,
        }
    }

    fn parse_rule_set(&mut self) -> ParseResult<RuleSet> {
        let at = self.peek().position();
        self.expect_keyword("rule_set")?;
        let name = self.expect_string("rule set name")?;
        self.expect_punct('{')?;

        let mut rule_set = RuleSet::new(name);
        rule_set.position = at;
        let mut seen = HashSet::default();

        while !self.check_punct('}') && !self.is_at_end() {
            let result = if self.check_keyword("rule") {
                self.parse_rule().map(|rule| rule_set.rules.push(rule))
            } else if self.peek().is_word() && self.peek_next().is_punct(':') {
                self.parse_metadata_entry(&mut rule_set, &mut seen)
            } else {
                Err(self.unexpected("'rule' or a rule set attribute"))
            };

            if let Err(diag) = result {
                self.diagnostics.push(diag);
                self.skip_to_next_rule();
            }
        }

        if self.check_punct('}') {
            self.advance();
        } else {
            let diag = self.error_here(format!(
                "Expected '}}' to close rule set \"{}\"",
                rule_set.name
            ));
            self.diagnostics.push(diag);
        }

        if !self.is_at_end() {
            let diag = self.error_here(format!(
                "Unexpected {} after end of rule set",
                self.peek()
            ));
            self.diagnostics.push(diag);
        }

        Ok(rule_set)
    }

    fn parse_metadata_entry(
        &mut self,
        rule_set: &mut RuleSet,
        seen: &mut HashSet<String>,
    ) -> ParseResult<()> {
        let key_token = self.advance().clone();
        let key = key_token.raw.clone();
        self.expect_punct(':')?;
        let value = self.parse_value()?;
        self.skip_separator();

        let lowered = key.to_lowercase();
        if !seen.insert(lowered.clone()) {
            self.warn(
                format!("Duplicate rule set attribute '{}'", key),
                key_token.position(),
            );
        }

        match lowered.as_str() {
            "version" => match &value {
                Literal::String(s) => rule_set.version = s.clone(),
                Literal::Number(n) => rule_set.version = n.to_string(),
                other => self.type_error("version", "a string", other, key_token.position()),
            },
            "scope" => match enum_text(&value).and_then(Scope::parse) {
                Some(scope) => rule_set.scope = scope,
                None => self.error(
                    format!("Unknown scope {}", value),
                    key_token.position(),
                ),
            },
            "description" => match value {
                Literal::String(s) => rule_set.description = Some(s),
                other => self.type_error("description", "a string", &other, key_token.position()),
            },
            _ => {
                rule_set.metadata.insert(key, value);
            }
        }

        Ok(())
    }

    fn parse_rule(&mut self) -> ParseResult<Rule> {
        let at = self.advance().position(); // 'rule'
        let name = self.expect_string("rule name")?;
        self.expect_punct('{')?;

        let mut rule = Rule::new(name);
        rule.position = at;
        let mut seen = HashSet::default();

        loop {
            if self.check_punct('}') {
                self.advance();
                break;
            }
            if self.is_at_end() || self.check_keyword("rule") {
                let diag = self.error_here(format!(
                    "Expected '}}' to close rule \"{}\", got {}",
                    rule.name,
                    self.peek()
                ));
                self.diagnostics.push(diag);
                break;
            }

            let start = self.current;
            let result = if self.check_keyword("when") {
                self.parse_when(&mut rule)
            } else if self.check_keyword("then") {
                self.parse_then(&mut rule)
            } else if self.peek().is_word() {
                self.parse_attribute(&mut rule, &mut seen)
            } else {
                Err(self.unexpected("a rule attribute, 'when' or 'then'"))
            };

            if let Err(diag) = result {
                self.recover(diag, start);
            }
        }

        if rule.conditions.is_empty() {
            self.warn(
                format!("Rule \"{}\" has no conditions and will always match", rule.name),
                rule.position,
            );
        }
        if rule.actions.is_empty() {
            self.error(
                format!("Rule \"{}\" has no actions", rule.name),
                rule.position,
            );
        }

        Ok(rule)
    }

    fn parse_attribute(&mut self, rule: &mut Rule, seen: &mut HashSet<String>) -> ParseResult<()> {
        let key_token = self.advance().clone();
        let at = key_token.position();
        let key = key_token.raw.to_lowercase();
        self.expect_punct(':')?;
        let value = self.parse_value()?;
        self.skip_separator();

        if !seen.insert(key.clone()) {
            self.warn(format!("Duplicate attribute '{}' in rule \"{}\"", key, rule.name), at);
        }

        match key.as_str() {
            "priority" => match value.as_number() {
                Some(n) if n.fract() == 0.0 && n.abs() <= i64::MAX as f64 => {
                    rule.priority = n as i64
                }
                _ => self.type_error("priority", "an integer", &value, at),
            },
            "weight" => match value.as_number() {
                Some(n) => rule.weight = Some(n),
                None => self.type_error("weight", "a number", &value, at),
            },
            "stage" => match enum_text(&value).and_then(Stage::parse) {
                Some(stage) => rule.stage = stage,
                None => self.error(format!("Unknown stage {}", value), at),
            },
            "enabled" => match value {
                Literal::Bool(b) => rule.enabled = b,
                other => self.type_error("enabled", "a boolean", &other, at),
            },
            "description" => match value {
                Literal::String(s) => rule.description = Some(s),
                other => self.type_error("description", "a string", &other, at),
            },
            "version" | "scope" => {
                rule.metadata.insert(key, value);
            }
            _ => {
                self.warn(
                    format!("Unknown attribute '{}' in rule \"{}\"", key_token.raw, rule.name),
                    at,
                );
                rule.metadata.insert(key_token.raw, value);
            }
        }

        Ok(())
    }

    fn parse_when(&mut self, rule: &mut Rule) -> ParseResult<()> {
        self.advance(); // 'when'
        self.expect_punct('{')?;

        let mut block = Vec::new();
        loop {
            if self.check_punct('}') {
                self.advance();
                break;
            }
            if self.is_at_end() || self.at_sync_keyword() {
                rule.conditions.append(&mut block);
                return Err(self.error_here(format!(
                    "Expected '}}' to close 'when' block, got {}",
                    self.peek()
                )));
            }

            let start = self.current;
            match self.parse_condition() {
                Ok(condition) => block.push(condition),
                Err(diag) => self.recover(diag, start),
            }
        }

        if let Some(last) = block.last_mut() {
            if last.logic.take().is_some() {
                let at = last.position;
                self.warn("Trailing connector at end of 'when' block is ignored", at);
            }
        }

        rule.conditions.append(&mut block);
        Ok(())
    }

    fn parse_condition(&mut self) -> ParseResult<Condition> {
        let at = self.peek().position();
        let field = self.parse_path()?;
        let operator = self.parse_operator()?;
        let value = self.parse_value()?;

        let logic = if self.check_keyword("and") || self.check_operator("&&") {
            self.advance();
            Some(Logic::And)
        } else if self.check_keyword("or") || self.check_operator("||") {
            self.advance();
            Some(Logic::Or)
        } else {
            None
        };
        self.skip_separator();

        Ok(Condition {
            field,
            operator,
            value,
            logic,
            position: at,
        })
    }

    fn parse_operator(&mut self) -> ParseResult<Operator> {
        let token = self.peek().clone();

        match token.kind {
            TokenKind::Operator => match SYMBOL_OPERATORS.get(token.value.as_str()) {
                Some(op) => {
                    self.advance();
                    Ok(*op)
                }
                None => Err(self.unexpected("a comparison operator")),
            },
            TokenKind::Identifier => {
                self.advance();
                let word = token.value.to_lowercase();
                match WORD_OPERATORS.get(word.as_str()) {
                    Some(op) => Ok(*op),
                    None => {
                        self.warn(
                            format!("Unknown operator '{}', defaulting to EQUALS", token.raw),
                            token.position(),
                        );
                        Ok(Operator::Equals)
                    }
                }
            }
            _ => Err(self.unexpected("a comparison operator")),
        }
    }

    fn parse_then(&mut self, rule: &mut Rule) -> ParseResult<()> {
        self.advance(); // 'then'
        self.expect_punct('{')?;

        loop {
            if self.check_punct('}') {
                self.advance();
                return Ok(());
            }
            if self.is_at_end() || self.at_sync_keyword() {
                return Err(self.error_here(format!(
                    "Expected '}}' to close 'then' block, got {}",
                    self.peek()
                )));
            }

            let start = self.current;
            match self.parse_action() {
                Ok(action) => rule.actions.push(action),
                Err(diag) => self.recover(diag, start),
            }
        }
    }

    fn parse_action(&mut self) -> ParseResult<Action> {
        if self.peek().kind != TokenKind::Identifier {
            return Err(self.unexpected("an action name"));
        }
        let name_token = self.advance().clone();

        let mut params = HashMap::default();
        if self.check_punct('(') {
            self.advance();

            while !self.check_punct(')') {
                if self.is_at_end() {
                    return Err(self.error_here(format!(
                        "Unterminated parameter list for action '{}'",
                        name_token.raw
                    )));
                }
                if !self.peek().is_word() {
                    return Err(self.unexpected("a parameter name"));
                }

                let key_token = self.advance().clone();
                self.expect_punct(':')?;
                let value = self.parse_value()?;
                if params.insert(key_token.raw.clone(), value).is_some() {
                    self.warn(
                        format!(
                            "Duplicate parameter '{}' for action '{}'",
                            key_token.raw, name_token.raw
                        ),
                        key_token.position(),
                    );
                }

                if self.check_punct(',') {
                    self.advance();
                }
            }
            self.advance(); // ')'
        }
        self.skip_separator();

        Ok(Action {
            name: name_token.raw.clone(),
            params,
            position: name_token.position(),
        })
    }

    fn parse_value(&mut self) -> ParseResult<Literal> {
        let token = self.peek().clone();

        match token.kind {
            TokenKind::String => {
                self.advance();
                Ok(Literal::String(token.value))
            }
            TokenKind::Number => {
                let n = token.value.parse::<f64>().map_err(|_| {
                    Diagnostic::error(
                        Origin::Syntax,
                        format!("Invalid number: {}", token.raw),
                        token.position(),
                    )
                })?;
                self.advance();
                Ok(Literal::Number(n))
            }
            TokenKind::Keyword => match token.value.as_str() {
                "true" => {
                    self.advance();
                    Ok(Literal::Bool(true))
                }
                "false" => {
                    self.advance();
                    Ok(Literal::Bool(false))
                }
                "null" => {
                    self.advance();
                    Ok(Literal::Null)
                }
                _ => Err(self.unexpected("a value")),
            },
            TokenKind::Punctuation if token.is_punct('[') => self.parse_array(),
            TokenKind::Identifier => Ok(Literal::Reference(self.parse_path()?)),
            _ => Err(self.unexpected("a value")),
        }
    }

    fn parse_array(&mut self) -> ParseResult<Literal> {
        if self.array_depth >= MAX_ARRAY_NESTING {
            return Err(self.error_here(format!(
                "Array literal nested deeper than {} levels",
                MAX_ARRAY_NESTING
            )));
        }

        self.array_depth += 1;
        let items = self.parse_array_items();
        self.array_depth -= 1;
        items.map(Literal::Array)
    }

    fn parse_array_items(&mut self) -> ParseResult<Vec<Literal>> {
        self.advance(); // '['

        let mut items = Vec::new();
        while !self.check_punct(']') {
            if self.is_at_end() {
                return Err(self.error_here("Unterminated array literal"));
            }
            items.push(self.parse_value()?);
            if self.check_punct(',') {
                self.advance();
            }
        }
        self.advance(); // ']'

        Ok(items)
    }

    /// `IDENTIFIER ('.' word)*`; later segments may collide with keywords
    fn parse_path(&mut self) -> ParseResult<FieldPath> {
        if self.peek().kind != TokenKind::Identifier {
            return Err(self.unexpected("a field name"));
        }
        let mut segments = vec![self.advance().raw.clone()];

        while self.check_punct('.') {
            self.advance();
            if !self.peek().is_word() {
                return Err(self.unexpected("a field name after '.'"));
            }
            segments.push(self.advance().raw.clone());
        }

        Ok(FieldPath(segments))
    }

    // ---- recovery --------------------------------------------------------

    fn recover(&mut self, diag: Diagnostic, start: usize) {
        self.diagnostics.push(diag);
        self.synchronize();
        if self.current == start && !self.is_at_end() {
            self.advance();
        }
    }

    /// Discard tokens until a `}` or a `rule`/`when`/`then` keyword
    fn synchronize(&mut self) {
        while !self.is_at_end() {
            if self.check_punct('}') || self.at_sync_keyword() {
                return;
            }
            self.advance();
        }
    }

    /// Top-level recovery: skip to the next `rule` or the rule set's own `}`
    fn skip_to_next_rule(&mut self) {
        let mut depth = 0usize;
        while !self.is_at_end() {
            if self.check_keyword("rule") {
                return;
            }
            if self.check_punct('{') {
                depth += 1;
            } else if self.check_punct('}') {
                if depth == 0 {
                    return;
                }
                depth -= 1;
            }
            self.advance();
        }
    }

    fn at_sync_keyword(&self) -> bool {
        self.check_keyword("rule") || self.check_keyword("when") || self.check_keyword("then")
    }

    // ---- token helpers ---------------------------------------------------

    fn peek(&self) -> &Token {
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }

    fn peek_next(&self) -> &Token {
        &self.tokens[(self.current + 1).min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> &Token {
        let index = self.current.min(self.tokens.len() - 1);
        if !self.is_at_end() {
            self.current += 1;
        }
        &self.tokens[index]
    }

    fn is_at_end(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn check_punct(&self, ch: char) -> bool {
        self.peek().is_punct(ch)
    }

    fn check_keyword(&self, word: &str) -> bool {
        self.peek().is_keyword(word)
    }

    fn check_operator(&self, op: &str) -> bool {
        let token = self.peek();
        token.kind == TokenKind::Operator && token.value == op
    }

    fn skip_separator(&mut self) {
        while self.check_punct(',') || self.check_punct(';') {
            self.advance();
        }
    }

    fn expect_punct(&mut self, ch: char) -> ParseResult<()> {
        if self.check_punct(ch) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", ch)))
        }
    }

    fn expect_keyword(&mut self, word: &str) -> ParseResult<()> {
        if self.check_keyword(word) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", word)))
        }
    }

    fn expect_string(&mut self, what: &str) -> ParseResult<String> {
        if self.peek().kind == TokenKind::String {
            Ok(self.advance().value.clone())
        } else {
            Err(self.unexpected(&format!("{} string", what)))
        }
    }

    // ---- diagnostics -----------------------------------------------------

    fn unexpected(&self, expected: &str) -> Diagnostic {
        self.error_here(format!("Expected {}, got {}", expected, self.peek()))
    }

    fn error_here(&self, message: impl Into<String>) -> Diagnostic {
        Diagnostic::error(Origin::Syntax, message, self.peek().position())
    }

    fn error(&mut self, message: impl Into<String>, at: Position) {
        self.diagnostics
            .push(Diagnostic::error(Origin::Syntax, message, at));
    }

    fn warn(&mut self, message: impl Into<String>, at: Position) {
        self.diagnostics
            .push(Diagnostic::warning(Origin::Syntax, message, at));
    }

    fn type_error(&mut self, attribute: &str, expected: &str, got: &Literal, at: Position) {
        self.error(
            format!(
                "Attribute '{}' must be {}, got {} {}",
                attribute,
                expected,
                got.type_name(),
                got
            ),
            at,
        );
    }
}

/// Stage/scope values may be bare identifiers or strings
fn enum_text(value: &Literal) -> Option<&str> {
    match value {
        Literal::String(s) => Some(s),
        Literal::Reference(path) if path.segments().len() == 1 => path.root(),
        _ => None,
    }
}
