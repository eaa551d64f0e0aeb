// src/actions/mod.rs
//! Actions that rules can apply to retrieval data
//!
//! The vocabulary is fixed: every action identifier maps to one `ActionType`,
//! each with a parameter schema (checked by the validator) and a handler
//! (run by the executor). Nothing outside this list can touch a context.

pub mod handlers;

use ahash::HashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    /// Add to and/or multiply a chunk's score
    BoostScore,
    /// Remove chunks whose quality is below a threshold
    FilterByQuality,
    /// Soft-exclude a chunk (kept in the list, flagged)
    Exclude,
    /// Write a tag into a chunk's metadata
    SetMetadata,
    /// Keep only the N best-scoring active chunks
    LimitResults,
}

/// What an action operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionTarget {
    /// Applied to every chunk the rule matched
    Chunk,
    /// Applied once to the whole context
    Context,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Number,
    String,
    Bool,
    Any,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParamKind::Number => "number",
            ParamKind::String => "string",
            ParamKind::Bool => "boolean",
            ParamKind::Any => "any value",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

const fn param(name: &'static str, kind: ParamKind, required: bool) -> ParamSpec {
    ParamSpec {
        name,
        kind,
        required,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ActionSchema {
    pub params: &'static [ParamSpec],
    /// At least one of these must be present (empty = no constraint)
    pub any_of: &'static [&'static str],
}

impl ActionSchema {
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }
}

const BOOST_SCORE_SCHEMA: ActionSchema = ActionSchema {
    params: &[
        param("amount", ParamKind::Number, false),
        param("factor", ParamKind::Number, false),
        param("field", ParamKind::String, false),
    ],
    any_of: &["amount", "factor"],
};

const FILTER_BY_QUALITY_SCHEMA: ActionSchema = ActionSchema {
    params: &[
        param("threshold", ParamKind::Number, true),
        param("field", ParamKind::String, false),
    ],
    any_of: &[],
};

const EXCLUDE_SCHEMA: ActionSchema = ActionSchema {
    params: &[param("reason", ParamKind::String, false)],
    any_of: &[],
};

const SET_METADATA_SCHEMA: ActionSchema = ActionSchema {
    params: &[
        param("key", ParamKind::String, true),
        param("value", ParamKind::Any, true),
    ],
    any_of: &[],
};

const LIMIT_RESULTS_SCHEMA: ActionSchema = ActionSchema {
    params: &[param("max", ParamKind::Number, true)],
    any_of: &[],
};

static REGISTRY: Lazy<HashMap<&'static str, ActionType>> = Lazy::new(|| {
    ActionType::ALL
        .iter()
        .map(|action| (action.name(), *action))
        .collect()
});

impl ActionType {
    pub const ALL: [ActionType; 5] = [
        ActionType::BoostScore,
        ActionType::FilterByQuality,
        ActionType::Exclude,
        ActionType::SetMetadata,
        ActionType::LimitResults,
    ];

    /// Resolve an identifier as written in the DSL (case-insensitive)
    pub fn lookup(name: &str) -> Option<Self> {
        REGISTRY.get(name.to_ascii_uppercase().as_str()).copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            ActionType::BoostScore => "BOOST_SCORE",
            ActionType::FilterByQuality => "FILTER_BY_QUALITY",
            ActionType::Exclude => "EXCLUDE",
            ActionType::SetMetadata => "SET_METADATA",
            ActionType::LimitResults => "LIMIT_RESULTS",
        }
    }

    pub fn schema(&self) -> &'static ActionSchema {
        match self {
            ActionType::BoostScore => &BOOST_SCORE_SCHEMA,
            ActionType::FilterByQuality => &FILTER_BY_QUALITY_SCHEMA,
            ActionType::Exclude => &EXCLUDE_SCHEMA,
            ActionType::SetMetadata => &SET_METADATA_SCHEMA,
            ActionType::LimitResults => &LIMIT_RESULTS_SCHEMA,
        }
    }

    pub fn target(&self) -> ActionTarget {
        match self {
            ActionType::BoostScore | ActionType::Exclude | ActionType::SetMetadata => {
                ActionTarget::Chunk
            }
            ActionType::FilterByQuality | ActionType::LimitResults => ActionTarget::Context,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reasons an action could not be applied at runtime
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    #[error("Unknown action '{0}'")]
    UnknownAction(String),

    #[error("Action {action} is missing required parameter '{param}'")]
    MissingParam { action: ActionType, param: String },

    #[error("Action {action} parameter '{param}' must be {expected}, got {actual}")]
    InvalidParam {
        action: ActionType,
        param: String,
        expected: String,
        actual: String,
    },

    #[error("Action {0} was dispatched to the wrong target")]
    WrongTarget(ActionType),

    #[error("Action {action} could not resolve '{path}'")]
    UnresolvedReference { action: ActionType, path: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_case_insensitive() {
        assert_eq!(ActionType::lookup("BOOST_SCORE"), Some(ActionType::BoostScore));
        assert_eq!(ActionType::lookup("boost_score"), Some(ActionType::BoostScore));
        assert_eq!(ActionType::lookup("Exclude"), Some(ActionType::Exclude));
        assert_eq!(ActionType::lookup("DELETE_EVERYTHING"), None);
    }

    #[test]
    fn test_schema_shape() {
        let schema = ActionType::FilterByQuality.schema();
        assert!(schema.param("threshold").unwrap().required);
        assert!(!schema.param("field").unwrap().required);
        assert_eq!(ActionType::BoostScore.schema().any_of, &["amount", "factor"]);
    }

    #[test]
    fn test_action_serialization() {
        let json = serde_json::to_string(&ActionType::SetMetadata).unwrap();
        assert_eq!(json, "\"SET_METADATA\"");
        let action: ActionType = serde_json::from_str("\"LIMIT_RESULTS\"").unwrap();
        assert_eq!(action, ActionType::LimitResults);
    }

    #[test]
    fn test_error_messages() {
        let err = ActionError::MissingParam {
            action: ActionType::SetMetadata,
            param: "key".into(),
        };
        assert_eq!(
            err.to_string(),
            "Action SET_METADATA is missing required parameter 'key'"
        );
    }
}
