// src/manager.rs
//! Compile cache and run orchestration
//!
//! The manager is the only component with state that outlives a call. Rule
//! sets are installed under their name; runs take an `Arc` snapshot and
//! release the lock before evaluating anything.

use crate::config::EngineConfig;
use crate::diagnostics::{Diagnostic, Origin, Position, Severity};
use crate::parser::ast::{RuleSet, Stage};
use crate::runtime::{ExecutionContext, ExecutionResult, Executor};
use crate::{CompileOutput, EngineError};
use ahash::{HashMap, RandomState};
use parking_lot::RwLock;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Fixed seeds so exported fingerprints still match after a restart
const FINGERPRINT_SEEDS: (u64, u64, u64, u64) = (
    0x5241_475f_5255_4c45,
    0x0000_0000_0000_0001,
    0x9e37_79b9_7f4a_7c15,
    0xc2b2_ae3d_27d4_eb4f,
);

/// Stable hash of rule-set source text
pub fn fingerprint(source: &str) -> u64 {
    let (a, b, c, d) = FINGERPRINT_SEEDS;
    RandomState::with_seeds(a, b, c, d).hash_one(source)
}

/// A rule set that parsed and validated without errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledRuleSet {
    pub ast: RuleSet,
    /// Non-blocking findings from parsing and validation
    pub warnings: Vec<Diagnostic>,
    pub fingerprint: u64,
}

impl CompiledRuleSet {
    pub fn id(&self) -> &str {
        &self.ast.name
    }

    pub fn version(&self) -> &str {
        &self.ast.version
    }
}

/// A compile that produced at least one error; nothing was installed
#[derive(Error, Debug, Clone, PartialEq)]
#[error("rule set failed to compile with {} error(s)", .errors.len())]
pub struct CompileFailure {
    /// Present when parsing got far enough to build a tree
    pub ast: Option<RuleSet>,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl CompileFailure {
    fn single(origin: Origin, message: impl Into<String>) -> Self {
        Self {
            ast: None,
            errors: vec![Diagnostic::error(origin, message, Position::new(1, 1))],
            warnings: Vec::new(),
        }
    }
}

#[derive(Default)]
struct Cache {
    entries: HashMap<String, Arc<CompiledRuleSet>>,
    /// fingerprint -> rule-set name
    by_fingerprint: HashMap<u64, String>,
}

impl Cache {
    fn install(&mut self, compiled: Arc<CompiledRuleSet>) -> Option<Arc<CompiledRuleSet>> {
        self.by_fingerprint
            .insert(compiled.fingerprint, compiled.id().to_string());
        let previous = self.entries.insert(compiled.id().to_string(), compiled);
        if let Some(old) = &previous {
            self.forget_fingerprint(old);
        }
        previous
    }

    fn remove(&mut self, id: &str) -> Option<Arc<CompiledRuleSet>> {
        let removed = self.entries.remove(id)?;
        self.forget_fingerprint(&removed);
        Some(removed)
    }

    fn forget_fingerprint(&mut self, old: &CompiledRuleSet) {
        if self.by_fingerprint.get(&old.fingerprint).map(String::as_str) == Some(old.id())
            && self.entries.get(old.id()).map(|e| e.fingerprint) != Some(old.fingerprint)
        {
            self.by_fingerprint.remove(&old.fingerprint);
        }
    }
}

/// Compiles rule sets, caches them, and runs them
pub struct RuleManager {
    config: EngineConfig,
    cache: RwLock<Cache>,
}

impl Default for RuleManager {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl RuleManager {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            cache: RwLock::new(Cache::default()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Parse, validate and install `source`.
    ///
    /// Identical text returns the cached rule set. Changed text for an
    /// existing name replaces the previous entry.
    pub fn compile(&self, source: &str) -> Result<Arc<CompiledRuleSet>, CompileFailure> {
        if source.len() > self.config.max_source_bytes {
            let err = EngineError::SourceTooLarge {
                size: source.len(),
                limit: self.config.max_source_bytes,
            };
            tracing::warn!(size = source.len(), "Rejected rule set source: {}", err);
            return Err(CompileFailure::single(Origin::Lexer, err.to_string()));
        }

        let fingerprint = fingerprint(source);
        if let Some(hit) = self.lookup_fingerprint(fingerprint) {
            tracing::debug!(rule_set = %hit.id(), "Compile cache hit");
            return Ok(hit);
        }

        let output = crate::compile(source);
        let compiled = self.accept(output, fingerprint)?;
        Ok(self.install(compiled))
    }

    /// Run a previously compiled rule set against one context
    pub fn run(
        &self,
        rule_set_id: &str,
        stage: Stage,
        context: ExecutionContext,
    ) -> Result<ExecutionResult, EngineError> {
        let compiled = self.snapshot(rule_set_id)?;
        Ok(self.executor().execute(&compiled.ast, stage, context))
    }

    /// Fan one rule set out over many independent contexts on the rayon pool.
    /// Results keep the order of `contexts`.
    pub fn run_batch(
        &self,
        rule_set_id: &str,
        stage: Stage,
        contexts: Vec<ExecutionContext>,
    ) -> Result<Vec<ExecutionResult>, EngineError> {
        let compiled = self.snapshot(rule_set_id)?;
        let executor = self.executor();

        Ok(contexts
            .into_par_iter()
            .map(|context| executor.execute(&compiled.ast, stage, context))
            .collect())
    }

    /// `run_batch` on tokio's blocking pool
    #[cfg(feature = "async")]
    pub async fn run_batch_async(
        &self,
        rule_set_id: &str,
        stage: Stage,
        contexts: Vec<ExecutionContext>,
    ) -> Result<Vec<ExecutionResult>, EngineError> {
        let compiled = self.snapshot(rule_set_id)?;
        let executor = self.executor();

        tokio::task::spawn_blocking(move || {
            contexts
                .into_par_iter()
                .map(|context| executor.execute(&compiled.ast, stage, context))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| EngineError::Task(e.to_string()))
    }

    pub fn get(&self, rule_set_id: &str) -> Option<Arc<CompiledRuleSet>> {
        self.cache.read().entries.get(rule_set_id).cloned()
    }

    pub fn remove(&self, rule_set_id: &str) -> Option<Arc<CompiledRuleSet>> {
        let removed = self.cache.write().remove(rule_set_id);
        if removed.is_some() {
            tracing::info!(rule_set = %rule_set_id, "Removed rule set");
        }
        removed
    }

    /// Installed rule-set names, sorted
    pub fn rule_set_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.cache.read().entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn clear(&self) {
        let mut cache = self.cache.write();
        cache.entries.clear();
        cache.by_fingerprint.clear();
    }

    /// Serialize an installed rule set for storage or hot reload
    pub fn export(&self, rule_set_id: &str) -> Result<Vec<u8>, EngineError> {
        let compiled = self.snapshot(rule_set_id)?;
        bincode::serialize(compiled.as_ref()).map_err(|e| EngineError::Serialize(e.to_string()))
    }

    /// Install a rule set produced by [`export`](Self::export).
    ///
    /// The tree is validated again before it is installed.
    pub fn import(&self, bytes: &[u8]) -> Result<Arc<CompiledRuleSet>, EngineError> {
        if bytes.len() > self.config.max_source_bytes {
            return Err(EngineError::SourceTooLarge {
                size: bytes.len(),
                limit: self.config.max_source_bytes,
            });
        }

        let imported: CompiledRuleSet =
            bincode::deserialize(bytes).map_err(|e| EngineError::Deserialize(e.to_string()))?;

        let report = crate::validate(&imported.ast);
        let output = CompileOutput {
            success: report.valid,
            ast: Some(imported.ast),
            errors: report.errors,
            warnings: report.warnings,
        };
        let compiled = self.accept(output, imported.fingerprint)?;
        Ok(self.install(compiled))
    }

    fn executor(&self) -> Executor {
        Executor::new().with_time_budget(self.config.time_budget())
    }

    fn snapshot(&self, rule_set_id: &str) -> Result<Arc<CompiledRuleSet>, EngineError> {
        self.get(rule_set_id)
            .ok_or_else(|| EngineError::UnknownRuleSet(rule_set_id.to_string()))
    }

    fn lookup_fingerprint(&self, fingerprint: u64) -> Option<Arc<CompiledRuleSet>> {
        let cache = self.cache.read();
        let name = cache.by_fingerprint.get(&fingerprint)?;
        cache
            .entries
            .get(name)
            .filter(|entry| entry.fingerprint == fingerprint)
            .cloned()
    }

    /// Turn a compile output into an installable rule set or a failure
    fn accept(&self, output: CompileOutput, fingerprint: u64) -> Result<CompiledRuleSet, CompileFailure> {
        let CompileOutput {
            ast,
            mut errors,
            mut warnings,
            ..
        } = output;

        if self.config.warnings_as_errors {
            errors.extend(warnings.drain(..).map(|mut w| {
                w.severity = Severity::Error;
                w
            }));
        }

        match ast {
            Some(ast) if errors.is_empty() => Ok(CompiledRuleSet {
                ast,
                warnings,
                fingerprint,
            }),
            ast => {
                tracing::warn!(
                    rule_set = ast.as_ref().map(|a| a.name.as_str()).unwrap_or("<unparsed>"),
                    errors = errors.len(),
                    "Rule set failed to compile"
                );
                Err(CompileFailure {
                    ast,
                    errors,
                    warnings,
                })
            }
        }
    }

    fn install(&self, compiled: CompiledRuleSet) -> Arc<CompiledRuleSet> {
        let compiled = Arc::new(compiled);
        let previous = self.cache.write().install(Arc::clone(&compiled));

        match previous {
            Some(old) => tracing::info!(
                rule_set = %compiled.id(),
                version = %compiled.version(),
                previous_version = %old.version(),
                "Replaced rule set"
            ),
            None => tracing::info!(
                rule_set = %compiled.id(),
                version = %compiled.version(),
                rules = compiled.ast.rules.len(),
                "Installed rule set"
            ),
        }
        compiled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Chunk;

    const QUALITY_GATE: &str = r#"
        rule_set "quality" {
            version: "1.0.0"
            rule "boost-high-quality" {
                priority: 10
                when { chunk.qualityScore > 0.9 }
                then { BOOST_SCORE(amount: 10) }
            }
        }
    "#;

    fn context() -> ExecutionContext {
        ExecutionContext::new("q")
            .with_chunk(Chunk::new("a").with_field("qualityScore", 0.95).with_field("score", 1.0))
            .with_chunk(Chunk::new("b").with_field("qualityScore", 0.5).with_field("score", 1.0))
    }

    #[test]
    fn test_compile_and_run() {
        let manager = RuleManager::default();
        let compiled = manager.compile(QUALITY_GATE).unwrap();
        assert_eq!(compiled.id(), "quality");

        let result = manager.run("quality", Stage::Ranking, context()).unwrap();
        assert!(result.success);
        assert_eq!(result.context.chunks[0].score(), 11.0);
        assert_eq!(result.context.chunks[1].score(), 1.0);
    }

    #[test]
    fn test_identical_source_is_cache_hit() {
        let manager = RuleManager::default();
        let first = manager.compile(QUALITY_GATE).unwrap();
        let second = manager.compile(QUALITY_GATE).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_changed_source_supersedes() {
        let manager = RuleManager::default();
        let first = manager.compile(QUALITY_GATE).unwrap();
        let changed = QUALITY_GATE.replace("amount: 10", "amount: 20");
        let second = manager.compile(&changed).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(manager.rule_set_ids(), vec!["quality".to_string()]);

        // the old text no longer hits the cache
        let third = manager.compile(QUALITY_GATE).unwrap();
        assert!(!Arc::ptr_eq(&second, &third));
        assert_eq!(third.fingerprint, first.fingerprint);
    }

    #[test]
    fn test_failed_compile_is_not_installed() {
        let manager = RuleManager::default();
        let failure = manager
            .compile(r#"rule_set "bad" { rule "r" { when { chunk.page > 1 } } }"#)
            .unwrap_err();

        assert_eq!(failure.errors.len(), 1);
        assert!(failure.ast.is_some());
        assert!(manager.get("bad").is_none());
    }

    #[test]
    fn test_unknown_rule_set() {
        let manager = RuleManager::default();
        let err = manager
            .run("missing", Stage::Ranking, ExecutionContext::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownRuleSet(_)));
    }

    #[test]
    fn test_source_too_large() {
        let config = EngineConfig {
            max_source_bytes: 16,
            ..EngineConfig::default()
        };
        let failure = RuleManager::new(config).compile(QUALITY_GATE).unwrap_err();
        assert!(failure.errors[0].message.contains("exceeds"));
    }

    #[test]
    fn test_warnings_as_errors() {
        let config = EngineConfig {
            warnings_as_errors: true,
            ..EngineConfig::default()
        };
        let source = r#"rule_set "w" { rule "always" { then { EXCLUDE } } }"#;

        assert!(RuleManager::default().compile(source).is_ok());
        let failure = RuleManager::new(config).compile(source).unwrap_err();
        assert_eq!(failure.errors.len(), 1);
        assert!(failure.warnings.is_empty());
    }

    #[test]
    fn test_hand_built_zero_budget_runs_every_rule() {
        let config = EngineConfig {
            time_budget_ms: Some(0),
            ..EngineConfig::default()
        };
        let manager = RuleManager::new(config);
        manager.compile(QUALITY_GATE).unwrap();

        let result = manager.run("quality", Stage::Ranking, context()).unwrap();
        assert!(result.success, "{:?}", result.diagnostics);
        assert_eq!(result.matched_ids(), vec!["boost-high-quality"]);
    }

    #[test]
    fn test_run_batch_preserves_order() {
        let manager = RuleManager::default();
        manager.compile(QUALITY_GATE).unwrap();

        let contexts: Vec<_> = (0..32)
            .map(|i| {
                ExecutionContext::new(format!("q{}", i))
                    .with_chunk(Chunk::new("c").with_field("qualityScore", if i % 2 == 0 { 0.95 } else { 0.1 }))
            })
            .collect();
        let results = manager.run_batch("quality", Stage::Ranking, contexts).unwrap();

        assert_eq!(results.len(), 32);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.context.query, format!("q{}", i));
            assert_eq!(result.matched_rules.len(), usize::from(i % 2 == 0));
        }
    }

    #[test]
    fn test_export_import_round_trip() {
        let source = RuleManager::default();
        let compiled = source.compile(QUALITY_GATE).unwrap();
        let bytes = source.export("quality").unwrap();

        let target = RuleManager::default();
        let imported = target.import(&bytes).unwrap();
        assert_eq!(imported.as_ref(), compiled.as_ref());

        let result = target.run("quality", Stage::Ranking, context()).unwrap();
        assert_eq!(result.context.chunks[0].score(), 11.0);
    }

    #[test]
    fn test_import_rejects_garbage() {
        let err = RuleManager::default().import(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, EngineError::Deserialize(_)));
    }

    #[test]
    fn test_remove_and_clear() {
        let manager = RuleManager::default();
        manager.compile(QUALITY_GATE).unwrap();
        assert!(manager.remove("quality").is_some());
        assert!(manager.remove("quality").is_none());

        manager.compile(QUALITY_GATE).unwrap();
        manager.clear();
        assert!(manager.rule_set_ids().is_empty());
    }
}
