// demos/async_integration.rs
//! Integrating the rule engine with an async retrieval service
//!
//! Run with: cargo run --example async_integration --features async

use rag_rule_engine::{Chunk, ExecutionContext, RuleManager, Stage};
use std::sync::Arc;
use std::time::Duration;

// Simulated async vector store
struct VectorStore;

impl VectorStore {
    async fn search(&self, query: &str, k: usize) -> Vec<Chunk> {
        // Simulate network latency
        tokio::time::sleep(Duration::from_micros(200)).await;

        (0..k)
            .map(|i| {
                let quality = ((query.len() + i * 17) % 100) as f64 / 100.0;
                Chunk::new(format!("{}-{}", query.len(), i))
                    .with_field("qualityScore", quality)
                    .with_field("score", 1.0 - i as f64 * 0.05)
                    .with_field("source", if i % 2 == 0 { "docs" } else { "forum" })
            })
            .collect()
    }
}

// Retrieval service that applies the rule set between search and generation
struct RetrievalService {
    rules: Arc<RuleManager>,
    store: VectorStore,
}

impl RetrievalService {
    fn new(rules: Arc<RuleManager>) -> Self {
        Self {
            rules,
            store: VectorStore,
        }
    }

    async fn retrieve(&self, query: &str) -> Vec<Chunk> {
        println!("\n=== Query: {} ===", query);

        // Step 1: Search (async)
        let chunks = self.store.search(query, 8).await;
        let context = chunks
            .into_iter()
            .fold(ExecutionContext::new(query), ExecutionContext::with_chunk);

        // Step 2: Apply rules (sync, CPU-bound)
        let result = match self.rules.run("rag-policy", Stage::Ranking, context) {
            Ok(result) => result,
            Err(err) => {
                eprintln!("  rule run failed: {}", err);
                return Vec::new();
            }
        };
        println!(
            "    ✓ {} rule(s) matched in {:.3} ms",
            result.matched_rules.len(),
            result.execution_time_ms
        );

        let mut chunks: Vec<Chunk> = result
            .context
            .chunks
            .into_iter()
            .filter(|c| !c.is_excluded())
            .collect();
        chunks.sort_by(|a, b| b.score().total_cmp(&a.score()));
        chunks
    }
}

#[tokio::main]
async fn main() {
    println!("=== RAG Rule Engine - Async Integration Example ===\n");

    let dsl = r#"
        rule_set "rag-policy" {
            rule "boost-docs" {
                priority: 1
                when { chunk.source == "docs" and chunk.qualityScore >= 0.5 }
                then { BOOST_SCORE(amount: 2) }
            }

            rule "drop-noise" {
                priority: 2
                when { chunk.qualityScore < 0.2 }
                then { EXCLUDE(reason: "low quality") }
            }

            rule "top-five" {
                priority: 3
                then { LIMIT_RESULTS(max: 5) }
            }
        }
    "#;

    let rules = Arc::new(RuleManager::default());
    if let Err(failure) = rules.compile(dsl) {
        eprintln!("Failed to compile rules: {:?}", failure.errors);
        return;
    }

    let service = Arc::new(RetrievalService::new(Arc::clone(&rules)));

    println!("Simulating concurrent queries...");

    let mut handles = vec![];
    for query in ["what is a transformer", "rust async runtimes", "vector databases"] {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            let chunks = service.retrieve(query).await;
            for chunk in &chunks {
                println!("    {} score = {:.2}", chunk.id, chunk.score());
            }
        }));
    }

    for handle in handles {
        if let Err(err) = handle.await {
            eprintln!("task failed: {}", err);
        }
    }

    // Batch evaluation on the blocking pool
    println!("\n=== Batch evaluation ===\n");

    let store = VectorStore;
    let mut contexts = Vec::new();
    for query in ["q1", "query two", "the third query"] {
        let chunks = store.search(query, 6).await;
        contexts.push(
            chunks
                .into_iter()
                .fold(ExecutionContext::new(query), ExecutionContext::with_chunk),
        );
    }

    match rules
        .run_batch_async("rag-policy", Stage::Ranking, contexts)
        .await
    {
        Ok(results) => {
            for result in results {
                println!(
                    "  {:<16} matched {:?}",
                    result.context.query,
                    result.matched_ids()
                );
            }
        }
        Err(err) => eprintln!("batch failed: {}", err),
    }

    // Demonstrate hot reload
    println!("\n=== Demonstrating Hot Reload ===\n");

    let bytes = match rules.export("rag-policy") {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("export failed: {}", err);
            return;
        }
    };
    let reloaded = Arc::new(RuleManager::default());
    if let Err(err) = reloaded.import(&bytes) {
        eprintln!("import failed: {}", err);
        return;
    }

    let new_service = RetrievalService::new(reloaded);
    let chunks = new_service.retrieve("hot reload check").await;
    println!("    {} chunk(s) after reload", chunks.len());

    println!("\n=== Hot reload successful ===");
}
