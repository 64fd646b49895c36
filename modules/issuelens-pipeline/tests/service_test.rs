//! Submission, status polling and report retrieval through ProcessService.

use std::sync::Arc;
use std::time::Duration;

use issuelens_common::{Taxonomy, TextEmbedder};
use issuelens_pipeline::store::InMemoryStore;
use issuelens_pipeline::testing::{
    problem_json, raw_issue, FailingEmbedder, KeywordEmbedder, ScriptedGenerator, TEST_PROJECT,
};
use issuelens_pipeline::traits::IssueSource;
use issuelens_pipeline::{
    JobStatus, PipelineDeps, ProblemPipeline, ProcessService, StatusQuery, SubmitError,
};

const WAIT: Duration = Duration::from_secs(10);

async fn service_with(embedder: Arc<dyn TextEmbedder>) -> ProcessService {
    let store = Arc::new(InMemoryStore::new());
    store
        .save_issues(&[
            raw_issue("SUP-1", "Login page blank"),
            raw_issue("SUP-2", "Login loops after reset"),
        ])
        .await
        .unwrap();
    let deps = PipelineDeps::builder()
        .store(store.clone())
        .source(store.clone())
        .reports(store)
        .generator(Arc::new(ScriptedGenerator::with_default(problem_json(
            "Login issue on web",
            "high",
            "users",
        ))))
        .embedder(embedder)
        .taxonomy(Arc::new(Taxonomy::from_labels(["login issue"])))
        .build();
    ProcessService::new(Arc::new(ProblemPipeline::new(deps)))
}

async fn service() -> ProcessService {
    service_with(Arc::new(KeywordEmbedder::new(["login", "web"]))).await
}

#[tokio::test]
async fn missing_project_is_rejected_without_a_task() {
    let service = service().await;

    assert_eq!(service.submit(None, Some(1)).await, Err(SubmitError::MissingProject));
    assert_eq!(service.submit(Some("   "), Some(1)).await, Err(SubmitError::MissingProject));
    assert!(service.jobs().is_empty().await);
}

#[tokio::test]
async fn missing_or_unknown_stage_is_rejected() {
    let service = service().await;

    assert_eq!(service.submit(Some(TEST_PROJECT), None).await, Err(SubmitError::MissingStage));
    assert_eq!(
        service.submit(Some(TEST_PROJECT), Some(3)).await,
        Err(SubmitError::InvalidStage(3))
    );
    assert!(service.jobs().is_empty().await);
}

#[tokio::test]
async fn unknown_task_is_not_found_and_not_created() {
    let service = service().await;

    let status = service.get_status("nonexistent-id").await;

    assert_eq!(
        status,
        StatusQuery::NotFound {
            task_id: "nonexistent-id".to_string()
        }
    );
    assert!(service.jobs().is_empty().await);
}

#[tokio::test]
async fn accepted_job_runs_to_completion_monotonically() {
    let service = service().await;

    let accepted = service.submit(Some(TEST_PROJECT), Some(1)).await.unwrap();
    assert_eq!(accepted.status, "accepted");

    let order = |s: JobStatus| match s {
        JobStatus::Pending => 0,
        JobStatus::InProgress => 1,
        JobStatus::Completed | JobStatus::Failed => 2,
    };
    let mut observed = Vec::new();
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let StatusQuery::Found(record) = service.get_status(&accepted.task_id).await else {
            panic!("submitted task disappeared");
        };
        observed.push(record.status);
        if record.status.is_terminal() || tokio::time::Instant::now() > deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(observed.windows(2).all(|w| order(w[0]) <= order(w[1])));
    assert_eq!(observed.last(), Some(&JobStatus::Completed));

    let StatusQuery::Found(record) = service.get_status(&accepted.task_id).await else {
        panic!("submitted task disappeared");
    };
    assert!(record.result.unwrap().contains("2 issues extracted"));

    let report = service.get_report(TEST_PROJECT).await.unwrap().unwrap();
    assert_eq!(report.problem_count, 2);
    assert_eq!(report.frequency_table[0].problem_type, "login issue");
}

#[tokio::test]
async fn failing_run_is_reported_as_failed() {
    let service = service_with(Arc::new(FailingEmbedder)).await;

    let accepted = service.submit(Some(TEST_PROJECT), Some(1)).await.unwrap();
    let record = service.jobs().wait(&accepted.task_id, WAIT).await.unwrap();

    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.result.unwrap().contains("unreachable"));
    assert!(service.get_report(TEST_PROJECT).await.unwrap().is_none());
}

#[tokio::test]
async fn report_for_unknown_project_is_none() {
    let service = service().await;
    assert!(service.get_report("never-run").await.unwrap().is_none());
}
