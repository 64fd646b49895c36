//! End-to-end pipeline runs against the in-memory store and scripted models.

use std::sync::Arc;

use issuelens_common::{
    ProjectSettings, PromptSet, Severity, Stage, Taxonomy, TextEmbedder, UNKNOWN_PROBLEM_TYPE,
};
use issuelens_pipeline::store::InMemoryStore;
use issuelens_pipeline::summarizer::SUMMARY_PLACEHOLDER;
use issuelens_pipeline::testing::{
    problem, problem_json, raw_issue, FailingEmbedder, KeywordEmbedder, ScriptedGenerator,
    TEST_PROJECT,
};
use issuelens_pipeline::traits::{IssueSource, ProblemStore, ReportSink};
use issuelens_pipeline::{PipelineDeps, ProblemPipeline};

const SUMMARY_MARKER: &str = "grouped together";

/// Needle matching only the extraction prompt for `cleaned_text`, not the
/// similar-case block of other prompts.
fn ticket(cleaned_text: &str) -> String {
    format!("Ticket:\n{cleaned_text}")
}

fn taxonomy() -> Arc<Taxonomy> {
    Arc::new(Taxonomy::from_labels(["memory leak", "login issue", "billing error"]))
}

fn keyword_embedder() -> Arc<dyn TextEmbedder> {
    Arc::new(KeywordEmbedder::new(["login", "memory", "billing", "export"]))
}

struct Harness {
    store: Arc<InMemoryStore>,
    generator: Arc<ScriptedGenerator>,
    pipeline: ProblemPipeline,
}

fn harness_with(generator: ScriptedGenerator, embedder: Arc<dyn TextEmbedder>) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let generator = Arc::new(generator);
    let deps = PipelineDeps::builder()
        .store(store.clone())
        .source(store.clone())
        .reports(store.clone())
        .generator(generator.clone())
        .embedder(embedder)
        .taxonomy(taxonomy())
        .build();
    Harness {
        store,
        generator,
        pipeline: ProblemPipeline::new(deps),
    }
}

fn harness(generator: ScriptedGenerator) -> Harness {
    harness_with(generator, keyword_embedder())
}

/// Three login tickets and three memory tickets with matching model replies.
fn two_topic_generator() -> ScriptedGenerator {
    let mut generator = ScriptedGenerator::with_default("[]")
        .respond_when(SUMMARY_MARKER, "Recurring problem summary.");
    for n in 1..=3 {
        generator = generator
            .respond_when(
                ticket(&format!("cannot sign in number {n}")),
                problem_json(&format!("Login issue for account {n}"), "high", "end users"),
            )
            .respond_when(
                ticket(&format!("app grows slower number {n}")),
                problem_json(&format!("Memory leak in worker {n}"), "critical", "all tenants"),
            );
    }
    generator
}

async fn seed_two_topics(store: &InMemoryStore) {
    let mut issues = Vec::new();
    for n in 1..=3 {
        issues.push(raw_issue(&format!("SUP-L{n}"), &format!("Cannot sign in, number {n}!")));
        issues.push(raw_issue(&format!("SUP-M{n}"), &format!("App grows slower, number {n}.")));
    }
    store.save_issues(&issues).await.unwrap();
}

fn extraction_calls(generator: &ScriptedGenerator) -> usize {
    generator
        .prompts()
        .iter()
        .filter(|p| p.contains("Ticket:\n"))
        .count()
}

#[tokio::test]
async fn stage_one_extracts_clusters_and_reports() {
    let h = harness(two_topic_generator());
    seed_two_topics(&h.store).await;

    let stats = h.pipeline.run(TEST_PROJECT, Stage::Extraction).await.unwrap();

    assert_eq!(stats.issues_fetched, 6);
    assert_eq!(stats.issues_extracted, 6);
    assert_eq!(stats.problems_stored, 6);
    assert_eq!(stats.cluster_count, 2);
    assert_eq!(stats.outliers, 0);
    assert_eq!(extraction_calls(&h.generator), 6);

    let report = h.store.latest_report(TEST_PROJECT).await.unwrap().unwrap();
    assert_eq!(report.problem_count, 6);
    assert_eq!(report.cluster_count, 2);
    let mut rows: Vec<_> = report
        .frequency_table
        .iter()
        .map(|r| (r.problem_type.as_str(), r.frequency))
        .collect();
    rows.sort();
    assert_eq!(rows, vec![("login issue", 3), ("memory leak", 3)]);

    assert_eq!(report.cluster_summaries.len(), 2);
    for summary in &report.cluster_summaries {
        assert_eq!(summary.summary, "Recurring problem summary.");
        assert_eq!(summary.source_keys.len(), 3);
    }
}

#[tokio::test]
async fn rerun_makes_no_extraction_calls() {
    let h = harness(two_topic_generator());
    seed_two_topics(&h.store).await;

    h.pipeline.run(TEST_PROJECT, Stage::Extraction).await.unwrap();
    let after_first = extraction_calls(&h.generator);

    let stats = h.pipeline.run(TEST_PROJECT, Stage::Extraction).await.unwrap();
    assert_eq!(extraction_calls(&h.generator), after_first);
    assert_eq!(stats.issues_already_extracted, 6);
    assert_eq!(stats.issues_extracted, 0);
    assert_eq!(h.store.problem_count().await, 6);
}

#[tokio::test]
async fn issue_with_no_problems_is_not_asked_again() {
    let h = harness(ScriptedGenerator::with_default("I found nothing actionable."));
    h.store
        .save_issues(&[raw_issue("SUP-1", "Thanks for the quick fix")])
        .await
        .unwrap();

    h.pipeline.run(TEST_PROJECT, Stage::Extraction).await.unwrap();
    h.pipeline.run(TEST_PROJECT, Stage::Extraction).await.unwrap();

    assert_eq!(extraction_calls(&h.generator), 1);
    assert_eq!(h.store.problem_count().await, 0);
    assert_eq!(h.store.extraction_count().await, 1);
}

#[tokio::test]
async fn failed_model_call_is_isolated_and_retried_next_run() {
    let generator = ScriptedGenerator::with_default(problem_json("Login issue", "low", "users"))
        .fail_when(ticket("billing totals wrong"), "model timed out");
    let h = harness(generator);
    h.store
        .save_issues(&[
            raw_issue("SUP-1", "Billing totals wrong"),
            raw_issue("SUP-2", "Login page blank"),
        ])
        .await
        .unwrap();

    let stats = h.pipeline.run(TEST_PROJECT, Stage::Extraction).await.unwrap();
    assert_eq!(stats.extraction_failures, 1);
    assert_eq!(stats.issues_extracted, 1);

    let stats = h.pipeline.run(TEST_PROJECT, Stage::Extraction).await.unwrap();
    assert_eq!(stats.extraction_failures, 1);
    assert_eq!(stats.issues_already_extracted, 1);
    assert_eq!(extraction_calls(&h.generator), 3);
}

#[tokio::test]
async fn problem_types_stay_within_taxonomy() {
    let generator = ScriptedGenerator::with_default("[]")
        .respond_when(
            ticket("leak report"),
            problem_json("Memory leak detected in the system", "High", "ops"),
        )
        .respond_when(
            ticket("colour report"),
            problem_json("Button is the wrong colour", "High", "designers"),
        )
        .respond_when(
            ticket("mixed report"),
            r#"Problem: Billing error on renewals
Severity: critical
Impact: finance"#,
        );
    let h = harness(generator);
    h.store
        .save_issues(&[
            raw_issue("SUP-1", "Leak report"),
            raw_issue("SUP-2", "Colour report"),
            raw_issue("SUP-3", "Mixed report"),
        ])
        .await
        .unwrap();

    h.pipeline.run(TEST_PROJECT, Stage::Extraction).await.unwrap();

    let problems = h.store.problems(TEST_PROJECT, "").await.unwrap();
    assert_eq!(problems.len(), 3);
    let taxonomy = taxonomy();
    for p in &problems {
        assert!(taxonomy.contains(&p.problem_type) || p.problem_type == UNKNOWN_PROBLEM_TYPE);
        if p.is_unknown() {
            assert_eq!(p.severity, Severity::Low);
        }
    }

    let by_key = |key: &str| problems.iter().find(|p| p.source_key == key).unwrap();
    assert_eq!(by_key("SUP-1").problem_type, "memory leak");
    assert_eq!(by_key("SUP-1").severity, Severity::High);
    assert_eq!(by_key("SUP-2").problem_type, "unknown");
    assert_eq!(by_key("SUP-2").severity, Severity::Low);
    assert_eq!(by_key("SUP-3").problem_type, "billing error");
    assert_eq!(by_key("SUP-3").severity, Severity::Critical);
}

#[tokio::test]
async fn records_without_key_are_skipped() {
    let h = harness(ScriptedGenerator::with_default(problem_json("Login issue", "low", "users")));
    let mut keyless = raw_issue("ignored", "Login loops forever");
    keyless.key = None;
    h.store
        .save_issues(&[keyless, raw_issue("SUP-2", "Login page blank")])
        .await
        .unwrap();

    let stats = h.pipeline.run(TEST_PROJECT, Stage::Extraction).await.unwrap();
    assert_eq!(stats.issues_missing_key, 1);
    assert_eq!(stats.issues_extracted, 1);
    assert_eq!(extraction_calls(&h.generator), 1);
}

#[tokio::test]
async fn similar_cases_reach_the_prompt() {
    let h = harness(ScriptedGenerator::with_default("[]"));
    h.store
        .save_issues(&[
            raw_issue("SUP-1", "Login fails on mobile"),
            raw_issue("SUP-2", "Login fails on desktop"),
        ])
        .await
        .unwrap();

    h.pipeline.run(TEST_PROJECT, Stage::Extraction).await.unwrap();

    let prompts = h.generator.prompts();
    let mobile = prompts
        .iter()
        .find(|p| p.contains(&ticket("login fails on mobile")))
        .unwrap();
    assert!(mobile.contains("1. login fails on desktop"));
}

#[tokio::test]
async fn stage_two_only_analyses() {
    let h = harness(ScriptedGenerator::with_default("Summary."));
    h.store
        .save_issues(&[raw_issue("SUP-9", "Never extracted")])
        .await
        .unwrap();
    for (key, description, problem_type) in [
        ("SUP-1", "login issue on web", "login issue"),
        ("SUP-2", "login issue on mobile", "login issue"),
        ("SUP-3", "memory leak in worker", "memory leak"),
        ("SUP-4", "memory leak in api", "memory leak"),
    ] {
        h.store.upsert_problem(&problem(key, description, problem_type)).await.unwrap();
    }

    let stats = h.pipeline.run(TEST_PROJECT, Stage::Analysis).await.unwrap();

    assert_eq!(extraction_calls(&h.generator), 0);
    assert_eq!(stats.issues_fetched, 0);
    assert_eq!(stats.problems_clustered, 4);
    assert_eq!(stats.cluster_count, 2);
    let report = h.store.latest_report(TEST_PROJECT).await.unwrap().unwrap();
    assert_eq!(report.cluster_summaries.len(), 2);
}

#[tokio::test]
async fn summary_failure_keeps_placeholder() {
    let h = harness(ScriptedGenerator::failing("model offline"));
    for (key, description) in [("SUP-1", "login issue a"), ("SUP-2", "login issue b")] {
        h.store
            .upsert_problem(&problem(key, description, "login issue"))
            .await
            .unwrap();
    }

    h.pipeline.run(TEST_PROJECT, Stage::Analysis).await.unwrap();

    let report = h.store.latest_report(TEST_PROJECT).await.unwrap().unwrap();
    assert!(!report.cluster_summaries.is_empty());
    assert!(report
        .cluster_summaries
        .iter()
        .all(|s| s.summary == SUMMARY_PLACEHOLDER));
}

#[tokio::test]
async fn empty_project_produces_empty_report() {
    let h = harness(ScriptedGenerator::with_default("unused"));

    let stats = h.pipeline.run(TEST_PROJECT, Stage::Analysis).await.unwrap();

    assert_eq!(stats.cluster_count, 0);
    assert_eq!(h.generator.call_count(), 0);
    let report = h.store.latest_report(TEST_PROJECT).await.unwrap().unwrap();
    assert_eq!(report.problem_count, 0);
    assert!(report.frequency_table.is_empty());
}

#[tokio::test]
async fn project_overrides_replace_filter_and_prompts() {
    let prompts = PromptSet {
        version: "v9".to_string(),
        problem_extraction: "CUSTOM EXTRACTION\nTicket:\n{{text}}".to_string(),
        ..PromptSet::default()
    };
    let h = harness(ScriptedGenerator::with_default(problem_json("Login issue", "medium", "users")));
    h.store
        .set_project_settings(ProjectSettings {
            project_id: TEST_PROJECT.to_string(),
            source_filter: Some("project = SUP".to_string()),
            prompts: Some(prompts),
        })
        .await;
    let mut filtered = raw_issue("SUP-1", "Login page blank");
    filtered.source_filter = "project = SUP".to_string();
    h.store
        .save_issues(&[filtered, raw_issue("SUP-2", "Unfiltered issue")])
        .await
        .unwrap();

    let stats = h.pipeline.run(TEST_PROJECT, Stage::Extraction).await.unwrap();

    assert_eq!(stats.issues_fetched, 1);
    assert!(h.generator.prompts()[0].starts_with("CUSTOM EXTRACTION"));
    let problems = h.store.problems(TEST_PROJECT, "project = SUP").await.unwrap();
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].version, "v9");
    assert_eq!(problems[0].source_filter, "project = SUP");
}

#[tokio::test]
async fn prompt_version_bump_reopens_issues() {
    let h = harness(ScriptedGenerator::with_default(problem_json("Login issue", "low", "users")));
    h.store
        .save_issues(&[raw_issue("SUP-1", "Login page blank")])
        .await
        .unwrap();
    h.pipeline.run(TEST_PROJECT, Stage::Extraction).await.unwrap();

    h.store
        .set_project_settings(ProjectSettings {
            project_id: TEST_PROJECT.to_string(),
            source_filter: None,
            prompts: Some(PromptSet::default().with_version("v2")),
        })
        .await;
    let stats = h.pipeline.run(TEST_PROJECT, Stage::Extraction).await.unwrap();

    assert_eq!(stats.issues_extracted, 1);
    assert_eq!(extraction_calls(&h.generator), 2);
    // Same description and key: the v2 extraction replaced the v1 row.
    let problems = h.store.problems(TEST_PROJECT, "").await.unwrap();
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].version, "v2");
}

#[tokio::test]
async fn unreachable_embedding_service_fails_the_run() {
    let h = harness_with(ScriptedGenerator::with_default("[]"), Arc::new(FailingEmbedder));
    h.store
        .save_issues(&[raw_issue("SUP-1", "Login page blank")])
        .await
        .unwrap();

    let err = h.pipeline.run(TEST_PROJECT, Stage::Extraction).await.unwrap_err();
    assert!(format!("{err:#}").contains("unreachable"));
    assert_eq!(h.generator.call_count(), 0);
}

#[tokio::test]
async fn reimported_issue_is_attempted_once_per_run() {
    let h = harness(ScriptedGenerator::failing("model offline"));
    h.store.save_issues(&[raw_issue("SUP-1", "Login page blank")]).await.unwrap();
    h.store.save_issues(&[raw_issue("SUP-1", "Login page blank")]).await.unwrap();

    let stats = h.pipeline.run(TEST_PROJECT, Stage::Extraction).await.unwrap();

    assert_eq!(stats.issues_fetched, 1);
    assert_eq!(stats.extraction_failures, 1);
    assert_eq!(h.generator.call_count(), 1);
}

#[tokio::test]
async fn run_can_be_spawned_onto_the_runtime() {
    let h = harness(two_topic_generator());
    seed_two_topics(&h.store).await;
    let pipeline = Arc::new(h.pipeline);

    // Fails to compile if the run future stops being Send + 'static.
    let handle = tokio::spawn(async move { pipeline.run(TEST_PROJECT, Stage::Extraction).await });

    let stats = handle.await.unwrap().unwrap();
    assert_eq!(stats.issues_extracted, 6);
}
