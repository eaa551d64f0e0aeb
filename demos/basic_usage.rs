// demos/basic_usage.rs
//! Basic usage of the RAG rule engine
//!
//! Run with: RUST_LOG=rag_rule_engine=debug cargo run --example basic_usage

use rag_rule_engine::{Chunk, ExecutionContext, RuleManager, Stage};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("=== RAG Rule Engine - Basic Usage ===\n");

    // Define rules in DSL
    let dsl = r#"
        rule_set "notebook-defaults" {
            version: "1.2.0"
            scope: NOTEBOOK
            description: "Default retrieval policy for research notebooks"

            # Drop anything flagged as a draft before ranking
            rule "drop-drafts" {
                stage: FILTERING
                priority: 1
                when { chunk.status == "draft" }
                then { EXCLUDE(reason: "draft content") }
            }

            rule "quality-floor" {
                stage: FILTERING
                priority: 2
                then { FILTER_BY_QUALITY(threshold: 0.4) }
            }

            rule "boost-high-quality" {
                priority: 5
                when { chunk.qualityScore >= 0.9 }
                then { BOOST_SCORE(amount: 10) }
            }

            rule "prefer-primary-source" {
                priority: 10
                weight: 0.5
                when { chunk.source == document.primarySource or chunk.title starts_with "Chapter" }
                then {
                    BOOST_SCORE(amount: 4)
                    SET_METADATA(key: "primary", value: true)
                }
            }

            rule "top-three" {
                stage: POST_PROCESSING
                then { LIMIT_RESULTS(max: 3) }
            }
        }
    "#;

    let manager = RuleManager::default();
    let compiled = match manager.compile(dsl) {
        Ok(compiled) => compiled,
        Err(failure) => {
            eprintln!("Failed to compile rules:");
            for error in &failure.errors {
                eprintln!("  {}", error);
            }
            return;
        }
    };

    println!(
        "✓ Compiled \"{}\" v{} with {} rule(s)",
        compiled.id(),
        compiled.version(),
        compiled.ast.rules.len()
    );
    for warning in &compiled.warnings {
        println!("  warning: {}", warning);
    }

    let context = ExecutionContext::new("how does the retriever score passages?")
        .with_document_field("primarySource", "handbook")
        .with_chunk(
            Chunk::new("c1")
                .with_field("qualityScore", 0.95)
                .with_field("source", "handbook")
                .with_field("score", 3.0),
        )
        .with_chunk(
            Chunk::new("c2")
                .with_field("qualityScore", 0.62)
                .with_field("title", "Chapter 4: Ranking")
                .with_field("score", 2.0),
        )
        .with_chunk(
            Chunk::new("c3")
                .with_field("qualityScore", 0.91)
                .with_field("status", "draft")
                .with_field("score", 5.0),
        )
        .with_chunk(
            Chunk::new("c4")
                .with_field("qualityScore", 0.2)
                .with_field("score", 8.0),
        )
        .with_chunk(
            Chunk::new("c5")
                .with_field("qualityScore", 0.7)
                .with_field("source", "forum")
                .with_field("score", 1.0),
        );

    let mut context = context;
    for stage in [Stage::Filtering, Stage::Ranking, Stage::PostProcessing] {
        let result = match manager.run(compiled.id(), stage, context) {
            Ok(result) => result,
            Err(err) => {
                eprintln!("Run failed: {}", err);
                return;
            }
        };

        println!("\n--- {} ({:.3} ms) ---", stage, result.execution_time_ms);
        println!("Matched rules: {:?}", result.matched_ids());
        for line in &result.logs {
            println!("  {}", line);
        }
        for diagnostic in &result.diagnostics {
            println!("  {}", diagnostic);
        }

        context = result.context;
    }

    println!("\nFinal chunks:");
    for chunk in &context.chunks {
        match &chunk.excluded {
            Some(exclusion) => println!(
                "  {} (excluded by {}: {})",
                chunk.id,
                exclusion.rule_id,
                exclusion.reason.as_deref().unwrap_or("no reason")
            ),
            None => println!("  {} score = {}", chunk.id, chunk.score()),
        }
    }

    // A broken rule set is rejected with positioned diagnostics
    println!("\n=== Rejected rule set ===\n");
    let broken = r#"
        rule_set "broken" {
            rule "no-actions" {
                when { chunk.qualityScore >= 0.9 }
            }
        }
    "#;
    if let Err(failure) = manager.compile(broken) {
        println!("{}", failure);
        for error in &failure.errors {
            println!("  {}", error);
        }
    }
}
