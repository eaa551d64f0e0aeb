// src/actions/handlers.rs
//! Handlers that apply an action to an execution context
//!
//! Parameters arrive already resolved (references replaced by context
//! values). Each handler returns a short log line describing what it did.

use super::{ActionError, ActionType};
use crate::parser::ast::Rule;
use crate::runtime::context::{Chunk, ExecutionContext, Exclusion, SCORE_FIELD};
use crate::runtime::value::number;
use crate::Value;
use ahash::{HashMap, HashSet};

pub type Params = HashMap<String, Value>;

const DEFAULT_QUALITY_FIELD: &str = "qualityScore";

/// Apply a chunk-scoped action to one chunk
pub fn apply_to_chunk(
    action: ActionType,
    chunk: &mut Chunk,
    rule: &Rule,
    params: &Params,
) -> Result<String, ActionError> {
    match action {
        ActionType::BoostScore => boost_score(chunk, rule, params),
        ActionType::Exclude => exclude(chunk, rule, params),
        ActionType::SetMetadata => set_metadata(chunk, params),
        ActionType::FilterByQuality | ActionType::LimitResults => {
            Err(ActionError::WrongTarget(action))
        }
    }
}

/// Apply a context-scoped action.
///
/// Returns the log line and a mask over the chunks as they were before the
/// call: `true` for every chunk that is still present.
pub fn apply_to_context(
    action: ActionType,
    context: &mut ExecutionContext,
    params: &Params,
) -> Result<(String, Vec<bool>), ActionError> {
    match action {
        ActionType::FilterByQuality => filter_by_quality(context, params),
        ActionType::LimitResults => limit_results(context, params),
        ActionType::BoostScore | ActionType::Exclude | ActionType::SetMetadata => {
            Err(ActionError::WrongTarget(action))
        }
    }
}

fn boost_score(chunk: &mut Chunk, rule: &Rule, params: &Params) -> Result<String, ActionError> {
    let action = ActionType::BoostScore;
    let field = string_param(action, params, "field")?.unwrap_or(SCORE_FIELD);
    let amount = number_param(action, params, "amount")?;
    let factor = number_param(action, params, "factor")?;

    if amount.is_none() && factor.is_none() {
        return Err(ActionError::MissingParam {
            action,
            param: "amount".to_string(),
        });
    }

    let before = match chunk.field(field) {
        None | Some(Value::Null) => 0.0,
        Some(value) => value.as_f64().ok_or_else(|| ActionError::InvalidParam {
            action,
            param: field.to_string(),
            expected: "a numeric chunk field".to_string(),
            actual: value.type_name().to_string(),
        })?,
    };

    let mut after = before;
    if let Some(amount) = amount {
        after += amount * rule.weight.unwrap_or(1.0);
    }
    if let Some(factor) = factor {
        after *= factor;
    }

    chunk.set_field(field, Value::Float(after));
    Ok(format!(
        "BOOST_SCORE {}.{}: {} -> {}",
        chunk.id, field, before, after
    ))
}

fn exclude(chunk: &mut Chunk, rule: &Rule, params: &Params) -> Result<String, ActionError> {
    let reason = string_param(ActionType::Exclude, params, "reason")?.map(str::to_string);

    if chunk.excluded.is_none() {
        chunk.excluded = Some(Exclusion {
            rule_id: rule.id.clone(),
            reason: reason.clone(),
        });
    }

    Ok(match reason {
        Some(reason) => format!("EXCLUDE {}: {}", chunk.id, reason),
        None => format!("EXCLUDE {}", chunk.id),
    })
}

fn set_metadata(chunk: &mut Chunk, params: &Params) -> Result<String, ActionError> {
    let action = ActionType::SetMetadata;
    let key = string_param(action, params, "key")?.ok_or_else(|| missing(action, "key"))?;
    let value = params.get("value").ok_or_else(|| missing(action, "value"))?;

    let line = format!("SET_METADATA {}.metadata.{} = {}", chunk.id, key, value);
    chunk.set_metadata(key, value.clone());
    Ok(line)
}

fn filter_by_quality(
    context: &mut ExecutionContext,
    params: &Params,
) -> Result<(String, Vec<bool>), ActionError> {
    let action = ActionType::FilterByQuality;
    let threshold =
        number_param(action, params, "threshold")?.ok_or_else(|| missing(action, "threshold"))?;
    let field = string_param(action, params, "field")?.unwrap_or(DEFAULT_QUALITY_FIELD);

    // excluded chunks keep their marker; only active chunks are filtered
    let kept = retain_chunks(context, |chunk| {
        chunk.is_excluded() || chunk.number(field).is_some_and(|q| q >= threshold)
    });
    let removed = kept.iter().filter(|k| !**k).count();

    Ok((
        format!(
            "FILTER_BY_QUALITY {} >= {}: removed {} chunk(s)",
            field, threshold, removed
        ),
        kept,
    ))
}

fn limit_results(
    context: &mut ExecutionContext,
    params: &Params,
) -> Result<(String, Vec<bool>), ActionError> {
    let action = ActionType::LimitResults;
    let max = number_param(action, params, "max")?.ok_or_else(|| missing(action, "max"))?;
    if max < 0.0 || max.fract() != 0.0 {
        return Err(ActionError::InvalidParam {
            action,
            param: "max".to_string(),
            expected: "a non-negative integer".to_string(),
            actual: number(max).to_string(),
        });
    }
    let max = max as usize;

    let mut ranked: Vec<(usize, f64)> = context
        .chunks
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.is_excluded())
        .map(|(i, c)| (i, c.score()))
        .collect();
    // stable: equal scores keep retrieval order
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    let dropped: HashSet<usize> = ranked.iter().skip(max).map(|(i, _)| *i).collect();
    let mut index = 0;
    let kept = retain_chunks(context, |_| {
        let keep = !dropped.contains(&index);
        index += 1;
        keep
    });

    Ok((
        format!("LIMIT_RESULTS {}: removed {} chunk(s)", max, dropped.len()),
        kept,
    ))
}

/// `Vec::retain` that also reports which original positions survived
fn retain_chunks(
    context: &mut ExecutionContext,
    mut keep: impl FnMut(&Chunk) -> bool,
) -> Vec<bool> {
    let mask: Vec<bool> = context.chunks.iter().map(|c| keep(c)).collect();
    let mut flags = mask.iter();
    context
        .chunks
        .retain(|_| flags.next().copied().unwrap_or(true));
    mask
}

fn number_param(
    action: ActionType,
    params: &Params,
    name: &str,
) -> Result<Option<f64>, ActionError> {
    match params.get(name) {
        None => Ok(None),
        Some(value) => value
            .as_f64()
            .map(Some)
            .ok_or_else(|| invalid(action, name, "a number", value)),
    }
}

fn string_param<'a>(
    action: ActionType,
    params: &'a Params,
    name: &str,
) -> Result<Option<&'a str>, ActionError> {
    match params.get(name) {
        None => Ok(None),
        Some(value) => value
            .as_str()
            .map(Some)
            .ok_or_else(|| invalid(action, name, "a string", value)),
    }
}

fn missing(action: ActionType, param: &str) -> ActionError {
    ActionError::MissingParam {
        action,
        param: param.to_string(),
    }
}

fn invalid(action: ActionType, param: &str, expected: &str, value: &Value) -> ActionError {
    ActionError::InvalidParam {
        action,
        param: param.to_string(),
        expected: expected.to_string(),
        actual: value.type_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(entries: &[(&str, Value)]) -> Params {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn scored(id: &str, score: f64, quality: f64) -> Chunk {
        Chunk::new(id)
            .with_field("score", score)
            .with_field("qualityScore", quality)
    }

    #[test]
    fn test_boost_adds_weighted_amount_then_multiplies() {
        let mut rule = Rule::new("r");
        rule.weight = Some(2.0);
        let mut chunk = scored("c", 1.0, 0.5);

        apply_to_chunk(
            ActionType::BoostScore,
            &mut chunk,
            &rule,
            &params(&[("amount", Value::Int(3)), ("factor", Value::Float(0.5))]),
        )
        .unwrap();

        assert_eq!(chunk.score(), 3.5);
    }

    #[test]
    fn test_boost_missing_score_starts_at_zero() {
        let mut chunk = Chunk::new("c");
        apply_to_chunk(
            ActionType::BoostScore,
            &mut chunk,
            &Rule::new("r"),
            &params(&[("amount", Value::Int(10))]),
        )
        .unwrap();
        assert_eq!(chunk.score(), 10.0);
    }

    #[test]
    fn test_boost_rejects_non_numeric_param() {
        let mut chunk = Chunk::new("c");
        let err = apply_to_chunk(
            ActionType::BoostScore,
            &mut chunk,
            &Rule::new("r"),
            &params(&[("amount", Value::from("lots"))]),
        )
        .unwrap_err();
        assert!(matches!(err, ActionError::InvalidParam { .. }));
        assert!(chunk.field("score").is_none());
    }

    #[test]
    fn test_exclude_is_soft() {
        let mut chunk = Chunk::new("c");
        apply_to_chunk(
            ActionType::Exclude,
            &mut chunk,
            &Rule::new("Drop Spam"),
            &params(&[("reason", Value::from("spam"))]),
        )
        .unwrap();

        let exclusion = chunk.excluded.unwrap();
        assert_eq!(exclusion.rule_id, "drop-spam");
        assert_eq!(exclusion.reason.as_deref(), Some("spam"));
    }

    #[test]
    fn test_filter_by_quality_removes_below_threshold() {
        let mut ctx = ExecutionContext::new("q")
            .with_chunk(scored("a", 0.0, 0.9))
            .with_chunk(scored("b", 0.0, 0.2))
            .with_chunk(Chunk::new("c"))
            .with_chunk(scored("d", 0.0, 0.5));

        let (_, kept) = apply_to_context(
            ActionType::FilterByQuality,
            &mut ctx,
            &params(&[("threshold", Value::Float(0.5))]),
        )
        .unwrap();

        assert_eq!(kept, vec![true, false, false, true]);
        let ids: Vec<_> = ctx.chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "d"]);
    }

    #[test]
    fn test_filter_by_quality_keeps_excluded_chunks() {
        let mut dropped = scored("low", 0.0, 0.1);
        dropped.excluded = Some(Exclusion {
            rule_id: "drop-drafts".to_string(),
            reason: Some("draft".to_string()),
        });
        let mut ctx = ExecutionContext::new("q")
            .with_chunk(dropped)
            .with_chunk(scored("b", 0.0, 0.2))
            .with_chunk(scored("c", 0.0, 0.8));

        let (line, kept) = apply_to_context(
            ActionType::FilterByQuality,
            &mut ctx,
            &params(&[("threshold", Value::Float(0.5))]),
        )
        .unwrap();

        assert_eq!(kept, vec![true, false, true]);
        assert!(line.ends_with("removed 1 chunk(s)"));
        let low = ctx.chunk("low").unwrap();
        assert_eq!(low.excluded.as_ref().unwrap().rule_id, "drop-drafts");
        assert!(ctx.chunk("c").is_some());
    }

    #[test]
    fn test_limit_results_keeps_best_scores() {
        let mut ctx = ExecutionContext::new("q")
            .with_chunk(scored("a", 1.0, 0.0))
            .with_chunk(scored("b", 5.0, 0.0))
            .with_chunk(scored("c", 3.0, 0.0))
            .with_chunk(scored("d", 5.0, 0.0));

        apply_to_context(
            ActionType::LimitResults,
            &mut ctx,
            &params(&[("max", Value::Int(2))]),
        )
        .unwrap();

        let ids: Vec<_> = ctx.chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d"]);
    }
}
