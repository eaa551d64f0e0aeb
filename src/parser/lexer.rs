// src/parser/lexer.rs
//! Lexical analyzer (tokenizer) for the rule DSL

use crate::diagnostics::{Diagnostic, Origin, Position};
use ahash::HashSet;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved words, matched case-insensitively
static KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "rule_set", "rule", "when", "then", "and", "or", "true", "false", "null", "priority",
        "weight", "stage", "enabled", "scope",
    ]
    .into_iter()
    .collect()
});

const TWO_CHAR_OPERATORS: [&str; 6] = ["==", "!=", ">=", "<=", "&&", "||"];
const ONE_CHAR_OPERATORS: [char; 8] = ['=', '!', '<', '>', '+', '-', '*', '/'];
const PUNCTUATION: [char; 10] = ['{', '}', '[', ']', '(', ')', ':', ',', '.', ';'];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    Whitespace,
    Comment,
    String,
    Number,
    Identifier,
    Keyword,
    Operator,
    Punctuation,
    Eof,
}

impl TokenKind {
    /// Whitespace and comments carry no meaning for the parser
    pub fn is_trivia(self) -> bool {
        matches!(self, TokenKind::Whitespace | TokenKind::Comment)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    /// Normalized text: unescaped for strings, lowercased for keywords
    pub value: String,
    pub line: usize,
    pub column: usize,
    /// Exact source slice the token was read from
    pub raw: String,
}

impl Token {
    pub fn position(&self) -> Position {
        Position::new(self.line, self.column)
    }

    pub fn is_keyword(&self, word: &str) -> bool {
        self.kind == TokenKind::Keyword && self.value == word
    }

    pub fn is_punct(&self, ch: char) -> bool {
        self.kind == TokenKind::Punctuation && self.value.len() == 1 && self.value.starts_with(ch)
    }

    /// Identifiers and keywords both spell a word
    pub fn is_word(&self) -> bool {
        matches!(self.kind, TokenKind::Identifier | TokenKind::Keyword)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Eof => write!(f, "end of input"),
            TokenKind::String => write!(f, "string \"{}\"", self.value),
            TokenKind::Number => write!(f, "number {}", self.value),
            TokenKind::Identifier => write!(f, "identifier '{}'", self.value),
            TokenKind::Keyword => write!(f, "keyword '{}'", self.value),
            _ => write!(f, "'{}'", self.value),
        }
    }
}

/// Letters accepted in identifiers besides ASCII: Hangul syllables and jamo
#[inline]
fn is_hangul(ch: char) -> bool {
    matches!(ch, '\u{AC00}'..='\u{D7A3}' | '\u{1100}'..='\u{11FF}' | '\u{3130}'..='\u{318F}')
}

#[inline]
fn is_identifier_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_' || is_hangul(ch)
}

#[inline]
fn is_identifier_part(ch: char) -> bool {
    is_identifier_start(ch) || ch.is_ascii_digit()
}

pub struct Lexer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
    tokens: Vec<Token>,
    errors: Vec<Diagnostic>,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
            tokens: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Scan the whole input, keeping whitespace and comment tokens.
    ///
    /// The scan never stops early: unrecognized characters are reported and
    /// skipped, and the stream always ends with an `Eof` token.
    pub fn scan(mut self) -> (Vec<Token>, Vec<Diagnostic>) {
        while !self.is_at_end() {
            self.scan_token();
        }

        let eof_at = self.here();
        self.tokens.push(Token {
            kind: TokenKind::Eof,
            value: String::new(),
            line: eof_at.line,
            column: eof_at.column,
            raw: String::new(),
        });

        (self.tokens, self.errors)
    }

    fn scan_token(&mut self) {
        let start = self.position;
        let at = self.here();
        let ch = self.current_char();

        if ch.is_whitespace() {
            while !self.is_at_end() && self.current_char().is_whitespace() {
                self.advance();
            }
            let raw = self.slice(start);
            self.push(TokenKind::Whitespace, raw.clone(), raw, at);
            return;
        }

        if ch == '#' {
            while !self.is_at_end() && self.current_char() != '\n' {
                self.advance();
            }
            let raw = self.slice(start);
            self.push(TokenKind::Comment, raw.clone(), raw, at);
            return;
        }

        if ch == '"' || ch == '\'' {
            self.read_string(ch, at);
            return;
        }

        let starts_number =
            ch.is_ascii_digit() || (ch == '-' && self.peek().is_some_and(|c| c.is_ascii_digit()));
        if starts_number {
            self.read_number(at);
            return;
        }

        if is_identifier_start(ch) {
            self.read_identifier(at);
            return;
        }

        if let Some(next) = self.peek() {
            let pair: String = [ch, next].iter().collect();
            if TWO_CHAR_OPERATORS.contains(&pair.as_str()) {
                self.advance();
                self.advance();
                self.push(TokenKind::Operator, pair.clone(), pair, at);
                return;
            }
        }

        if ONE_CHAR_OPERATORS.contains(&ch) {
            self.advance();
            self.push(TokenKind::Operator, ch.to_string(), ch.to_string(), at);
            return;
        }

        if PUNCTUATION.contains(&ch) {
            self.advance();
            self.push(TokenKind::Punctuation, ch.to_string(), ch.to_string(), at);
            return;
        }

        self.advance();
        self.errors.push(Diagnostic::error(
            Origin::Lexer,
            format!("Unexpected character: '{}'", ch),
            at,
        ));
    }

    fn read_string(&mut self, quote: char, at: Position) {
        let start = self.position;
        self.advance(); // consume opening quote

        let mut result = String::new();
        let mut terminated = false;

        while !self.is_at_end() {
            let ch = self.current_char();

            if ch == quote {
                self.advance();
                terminated = true;
                break;
            }

            if ch == '\\' {
                self.advance();
                if self.is_at_end() {
                    break;
                }
                let escaped = match self.current_char() {
                    'n' => '\n',
                    't' => '\t',
                    '\\' => '\\',
                    '"' => '"',
                    '\'' => '\'',
                    c => {
                        result.push('\\');
                        c
                    }
                };
                result.push(escaped);
                self.advance();
            } else {
                result.push(ch);
                self.advance();
            }
        }

        if !terminated {
            self.errors
                .push(Diagnostic::error(Origin::Lexer, "Unterminated string", at));
        }

        let raw = self.slice(start);
        self.push(TokenKind::String, result, raw, at);
    }

    fn read_number(&mut self, at: Position) {
        let start = self.position;

        if self.current_char() == '-' {
            self.advance();
        }
        while !self.is_at_end() && self.current_char().is_ascii_digit() {
            self.advance();
        }
        // A dot only belongs to the number when digits follow it
        if !self.is_at_end()
            && self.current_char() == '.'
            && self.peek().is_some_and(|c| c.is_ascii_digit())
        {
            self.advance();
            while !self.is_at_end() && self.current_char().is_ascii_digit() {
                self.advance();
            }
        }

        let raw = self.slice(start);
        self.push(TokenKind::Number, raw.clone(), raw, at);
    }

    fn read_identifier(&mut self, at: Position) {
        let start = self.position;

        while !self.is_at_end() && is_identifier_part(self.current_char()) {
            self.advance();
        }

        let raw = self.slice(start);
        let lowered = raw.to_lowercase();
        if KEYWORDS.contains(lowered.as_str()) {
            self.push(TokenKind::Keyword, lowered, raw, at);
        } else {
            self.push(TokenKind::Identifier, raw.clone(), raw, at);
        }
    }

    fn push(&mut self, kind: TokenKind, value: String, raw: String, at: Position) {
        self.tokens.push(Token {
            kind,
            value,
            line: at.line,
            column: at.column,
            raw,
        });
    }

    fn slice(&self, start: usize) -> String {
        self.input[start..self.position].iter().collect()
    }

    fn here(&self) -> Position {
        Position::new(self.line, self.column)
    }

    fn current_char(&self) -> char {
        self.input[self.position]
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn advance(&mut self) {
        if !self.is_at_end() {
            if self.current_char() == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
            self.position += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }
}

/// Tokenize `input`, dropping whitespace and comments
pub fn tokenize(input: &str) -> (Vec<Token>, Vec<Diagnostic>) {
    let (tokens, errors) = Lexer::new(input).scan();
    let tokens = tokens.into_iter().filter(|t| !t.kind.is_trivia()).collect();
    (tokens, errors)
}

/// Tokenize `input` keeping every token, trivia included
pub fn tokenize_with_trivia(input: &str) -> (Vec<Token>, Vec<Diagnostic>) {
    Lexer::new(input).scan()
}
