// src/runtime/context.rs
//! Execution context: the live retrieval data a rule set runs against

use crate::parser::ast::FieldPath;
use crate::Value;
use ahash::HashMap;
use serde::{Deserialize, Serialize};

/// Field written by `BOOST_SCORE` and read by `LIMIT_RESULTS`
pub const SCORE_FIELD: &str = "score";
/// Object field `SET_METADATA` writes into
pub const METADATA_FIELD: &str = "metadata";

/// Per-invocation bag of runtime values, owned by the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionContext {
    pub query: String,
    /// Metadata of the document (or notebook) the chunks come from
    pub document: HashMap<String, Value>,
    /// Candidate chunks, in retrieval order
    pub chunks: Vec<Chunk>,
    /// Anything else the pipeline wants rules to see
    pub variables: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_document_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.document.insert(key.into(), value.into());
        self
    }

    pub fn with_chunk(mut self, chunk: Chunk) -> Self {
        self.chunks.push(chunk);
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn chunk(&self, id: &str) -> Option<&Chunk> {
        self.chunks.iter().find(|c| c.id == id)
    }

    /// Chunks that have not been soft-excluded
    pub fn active_chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter().filter(|c| !c.is_excluded())
    }

    /// Resolve a dotted path.
    ///
    /// Roots: `query`, `document.*`, `chunk.*` (needs a bound chunk), and
    /// otherwise the first segment names a variable.
    pub fn resolve(&self, path: &FieldPath, chunk: Option<&Chunk>) -> Option<Value> {
        let (root, rest) = path.segments().split_first()?;

        match root.as_str() {
            "query" if rest.is_empty() => Some(Value::String(self.query.clone())),
            "document" => lookup(&self.document, rest).cloned(),
            "chunk" => chunk?.resolve(rest),
            _ => {
                let value = self.variables.get(root)?;
                descend(value, rest).cloned()
            }
        }
    }

    /// Parse a context from the JSON shape the retrieval pipeline sends
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// One retrieved passage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    #[serde(flatten)]
    pub fields: HashMap<String, Value>,
    /// Set by `EXCLUDE`; the chunk stays in the list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excluded: Option<Exclusion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub rule_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Chunk {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: HashMap::default(),
            excluded: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    #[inline]
    pub fn is_excluded(&self) -> bool {
        self.excluded.is_some()
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Numeric field value, if present and numeric
    pub fn number(&self, name: &str) -> Option<f64> {
        self.fields.get(name).and_then(Value::as_f64)
    }

    pub fn score(&self) -> f64 {
        self.number(SCORE_FIELD).unwrap_or(0.0)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    /// Write `key` into the chunk's `metadata` object, creating it if needed
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        let entry = self
            .fields
            .entry(METADATA_FIELD.to_string())
            .or_insert_with(|| Value::Object(HashMap::default()));

        if !matches!(entry, Value::Object(_)) {
            *entry = Value::Object(HashMap::default());
        }
        if let Value::Object(map) = entry {
            map.insert(key.into(), value);
        }
    }

    fn resolve(&self, segments: &[String]) -> Option<Value> {
        match segments {
            [] => None,
            [only] if only == "id" && !self.fields.contains_key("id") => {
                Some(Value::String(self.id.clone()))
            }
            _ => lookup(&self.fields, segments).cloned(),
        }
    }
}

fn lookup<'a>(map: &'a HashMap<String, Value>, segments: &[String]) -> Option<&'a Value> {
    let (first, rest) = segments.split_first()?;
    descend(map.get(first)?, rest)
}

fn descend<'a>(value: &'a Value, segments: &[String]) -> Option<&'a Value> {
    match segments.split_first() {
        None => Some(value),
        Some((first, rest)) => match value {
            Value::Object(map) => descend(map.get(first)?, rest),
            _ => None,
        },
    }
}
