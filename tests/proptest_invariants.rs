// tests/proptest_invariants.rs
//! Property tests for the lexer, parser, validator and executor

use proptest::prelude::*;
use rag_rule_engine::parser::{tokenize_with_trivia, TokenKind};
use rag_rule_engine::{compile, validate, Chunk, ExecutionContext, Executor, Stage};

/// Inputs built only from characters the lexer accepts
fn arb_lexable() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_가-힣 \t\n{}()\\[\\]:,.;<>=!+*/#-]{0,80}"
}

fn arb_chunk() -> impl Strategy<Value = Chunk> {
    ("[a-z]{1,6}", 0.0f64..1.0, 0.0f64..10.0, proptest::option::of(0i64..20)).prop_map(
        |(id, quality, score, page)| {
            let chunk = Chunk::new(id)
                .with_field("qualityScore", quality)
                .with_field("score", score);
            match page {
                Some(page) => chunk.with_field("page", page),
                None => chunk,
            }
        },
    )
}

fn arb_context() -> impl Strategy<Value = ExecutionContext> {
    proptest::collection::vec(arb_chunk(), 0..6).prop_map(|chunks| {
        chunks
            .into_iter()
            .fold(ExecutionContext::new("q"), ExecutionContext::with_chunk)
    })
}

/// A small rule set whose rules differ only in priority and threshold
fn rule_set_source(rules: &[(i64, f64)]) -> String {
    let mut source = String::from("rule_set \"gen\" {\n");
    for (i, (priority, threshold)) in rules.iter().enumerate() {
        source.push_str(&format!(
            "  rule \"r{}\" {{ priority: {} when {{ chunk.qualityScore >= {:.3} or chunk.page == {} }} then {{ BOOST_SCORE(amount: 1) }} }}\n",
            i, priority, threshold, i
        ));
    }
    source.push('}');
    source
}

/// One rule whose chain tests `chunk.fN == 1`, joined by `and` (false) or
/// `or` (true) connectors
fn chain_source(connectors: &[bool]) -> String {
    let mut when = String::new();
    for i in 0..=connectors.len() {
        when.push_str(&format!("chunk.f{} == 1", i));
        if let Some(is_or) = connectors.get(i) {
            when.push_str(if *is_or { " or " } else { " and " });
        }
    }
    format!(
        "rule_set \"chain\" {{ rule \"r\" {{ when {{ {} }} then {{ EXCLUDE }} }} }}",
        when
    )
}

/// Plain left fold with no precedence
fn fold_chain(values: &[bool], connectors: &[bool]) -> bool {
    let mut acc = values[0];
    for (value, is_or) in values[1..].iter().zip(connectors) {
        acc = if *is_or { acc || *value } else { acc && *value };
    }
    acc
}

// ---------------------------------------------------------------------------
// Lexical round-trip: concatenating raw token text reproduces the input.
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn lexer_round_trip(input in arb_lexable()) {
        let (tokens, errors) = tokenize_with_trivia(&input);
        prop_assert!(errors.is_empty(), "unexpected lexer errors: {:?}", errors);

        let rebuilt: String = tokens.iter().map(|t| t.raw.as_str()).collect();
        prop_assert_eq!(rebuilt, input);
        prop_assert_eq!(tokens.last().map(|t| t.kind), Some(TokenKind::Eof));
    }

    #[test]
    fn lexer_positions_are_monotonic(input in arb_lexable()) {
        let (tokens, _) = tokenize_with_trivia(&input);
        for pair in tokens.windows(2) {
            prop_assert!(
                (pair[0].line, pair[0].column) <= (pair[1].line, pair[1].column),
                "{:?} came after {:?}", pair[1], pair[0]
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Deterministic compile: identical text gives identical output, and no
// input makes the front end panic.
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn compile_is_deterministic(input in any::<String>()) {
        prop_assert_eq!(compile(&input), compile(&input));
    }

    #[test]
    fn compile_is_deterministic_on_near_valid_text(input in arb_lexable()) {
        let source = format!("rule_set \"p\" {{ rule \"r\" {{ {} }} }}", input);
        prop_assert_eq!(compile(&source), compile(&source));
    }

    #[test]
    fn validation_is_idempotent(rules in proptest::collection::vec((-5i64..30, 0.0f64..1.0), 0..8)) {
        let output = compile(&rule_set_source(&rules));
        let ast = output.ast.expect("generated rule sets always parse");
        prop_assert_eq!(validate(&ast), validate(&ast));
    }
}

// ---------------------------------------------------------------------------
// Executor: priority order, determinism, and soft exclusion.
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn matched_rules_follow_priority(
        rules in proptest::collection::vec((-5i64..30, 0.0f64..1.0), 1..8),
        ctx in arb_context(),
    ) {
        let ast = compile(&rule_set_source(&rules)).ast.expect("parses");
        let result = Executor::new().execute(&ast, Stage::Ranking, ctx);

        let priorities: Vec<i64> = result
            .matched_rules
            .iter()
            .map(|m| ast.rule(&m.rule_id).expect("matched rule exists").priority)
            .collect();
        let mut sorted = priorities.clone();
        sorted.sort();
        prop_assert_eq!(priorities, sorted);
    }

    #[test]
    fn execution_is_deterministic(
        rules in proptest::collection::vec((-5i64..30, 0.0f64..1.0), 1..8),
        ctx in arb_context(),
    ) {
        let ast = compile(&rule_set_source(&rules)).ast.expect("parses");
        let executor = Executor::new();
        let first = executor.execute(&ast, Stage::Ranking, ctx.clone());
        let second = executor.execute(&ast, Stage::Ranking, ctx);

        prop_assert_eq!(first.matched_rules, second.matched_rules);
        prop_assert_eq!(first.context, second.context);
        prop_assert_eq!(first.diagnostics, second.diagnostics);
    }

    #[test]
    fn condition_chains_fold_left_to_right(
        terms in proptest::collection::vec((any::<bool>(), any::<bool>()), 1..8),
    ) {
        let values: Vec<bool> = terms.iter().map(|(v, _)| *v).collect();
        let connectors: Vec<bool> = terms[1..].iter().map(|(_, c)| *c).collect();

        let ast = compile(&chain_source(&connectors)).ast.expect("parses");
        let chunk = values
            .iter()
            .enumerate()
            .fold(Chunk::new("c"), |chunk, (i, v)| {
                chunk.with_field(format!("f{}", i), i64::from(*v))
            });
        let ctx = ExecutionContext::new("q").with_chunk(chunk);
        let result = Executor::new().execute(&ast, Stage::Ranking, ctx);

        prop_assert_eq!(
            result.context.chunks[0].is_excluded(),
            fold_chain(&values, &connectors),
            "values {:?} connectors {:?}", values, connectors
        );
        prop_assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn excluded_chunks_are_never_boosted(ctx in arb_context()) {
        let ast = compile(
            r#"rule_set "x" {
                rule "drop" { priority: 1 when { chunk.qualityScore < 0.5 } then { EXCLUDE } }
                rule "lift" { priority: 2 then { BOOST_SCORE(amount: 100) } }
            }"#,
        )
        .ast
        .expect("parses");

        let before = ctx.clone();
        let result = Executor::new().execute(&ast, Stage::Ranking, ctx);

        prop_assert_eq!(result.context.chunks.len(), before.chunks.len());
        for (after, original) in result.context.chunks.iter().zip(&before.chunks) {
            if after.is_excluded() {
                prop_assert_eq!(after.score(), original.score());
            } else {
                prop_assert_eq!(after.score(), original.score() + 100.0);
            }
        }
    }
}
