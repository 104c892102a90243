//! Checkpointing, resumption and cancellation

use crate::helpers::*;
use silo::core::{Cursor, EntityKind, JobRecord, JobStatus, SourceFetchError, StepOutcome};
use silo::persistence::JobStore;
use silo::source::SourceError;
use std::sync::Arc;

#[tokio::test]
async fn test_failed_job_resumes_at_the_failed_page() {
    let source = ScriptedSource::new()
        .with("users", users(2))
        .with("issues", issues(120));
    source.fail_at(
        "issues",
        100,
        vec![SourceError::Fetch(SourceFetchError::from_status(400, "bad jql"))],
    );
    let harness = Harness::new(source).await;
    let request = server_request();

    let first = harness.run(request.clone()).await;
    assert_eq!(first.status, JobStatus::Failed);
    let failure = first.failure.clone().unwrap();
    assert_eq!(failure.step_name.as_deref(), Some("issues"));
    assert_eq!(failure.cursor, Some(Cursor::Offset { start_at: 100 }));
    assert_eq!(harness.target.count(EntityKind::Issue), 100);

    let record = harness.store.load(request.job_id).await.unwrap().unwrap();
    assert_eq!(record.checkpoint.step_name.as_deref(), Some("issues"));
    assert_eq!(record.checkpoint.cursor, Some(Cursor::Offset { start_at: 100 }));
    assert_eq!(record.checkpoint.total_processed, 100);
    assert!(record.checkpoint.completed_steps.contains(&"users".to_string()));

    let second = harness.run(request.clone()).await;
    assert_completed(&second);

    // Only the failed page is fetched again, earlier steps are not rerun
    assert_eq!(
        harness.source.fetched("issues"),
        vec![
            Cursor::Offset { start_at: 0 },
            Cursor::Offset { start_at: 50 },
            Cursor::Offset { start_at: 100 },
            Cursor::Offset { start_at: 100 },
        ]
    );
    assert_eq!(harness.source.fetch_count("users"), 1);
    assert!(second.stats_for("users").is_none());
    assert_eq!(second.stats_for("issues").unwrap().pulled, 20);
    assert_eq!(harness.target.count(EntityKind::Issue), 120);

    let record = harness.store.load(request.job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.failure, None);
    assert_eq!(record.checkpoint.id_map.len_of(EntityKind::Issue), 120);
}

#[tokio::test]
async fn test_relations_recorded_before_a_failure_survive_resume() {
    let source = ScriptedSource::new().with(
        "issues",
        (1..=60)
            .map(|n| if n == 2 { issue_with_parent(2, 1) } else { issue(n) })
            .collect(),
    );
    source.fail_at(
        "issues",
        50,
        vec![SourceError::Fetch(SourceFetchError::auth("expired"))],
    );
    let harness = Harness::new(source).await;
    let request = server_request();

    assert_eq!(harness.run(request.clone()).await.status, JobStatus::Failed);
    let result = harness.run(request).await;
    assert_completed(&result);

    assert_eq!(harness.target.count(EntityKind::IssueRelation), 1);
}

#[tokio::test]
async fn test_completed_job_is_not_rerun() {
    let harness = Harness::new(ScriptedSource::new().with("users", users(2))).await;
    let request = server_request();

    assert_completed(&harness.run(request.clone()).await);
    let again = harness.run(request).await;

    assert_completed(&again);
    assert!(again.stats.is_empty());
    assert_eq!(harness.source.fetch_count("users"), 1);
}

#[tokio::test]
async fn test_cancel_stops_at_page_boundary_and_resumes() {
    let harness = Harness::new(ScriptedSource::new().with("issues", issues(150))).await;
    let request = server_request();
    let store: Arc<dyn JobStore> = harness.store.clone();
    harness.source.cancel_during("issues", 50, store, request.job_id);

    let first = harness.run(request.clone()).await;
    assert_eq!(first.status, JobStatus::Cancelled);
    assert_eq!(first.stats_for("issues").unwrap().outcome, StepOutcome::Cancelled);
    // The page being fetched when the request arrived still completes
    assert_eq!(harness.target.count(EntityKind::Issue), 100);

    let record = harness.store.load(request.job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Cancelled);
    assert_eq!(record.checkpoint.cursor, Some(Cursor::Offset { start_at: 100 }));

    let resumed = harness.run(request).await;
    assert_completed(&resumed);
    assert_eq!(resumed.stats_for("issues").unwrap().pulled, 50);
    assert_eq!(harness.target.count(EntityKind::Issue), 150);
}

#[tokio::test]
async fn test_cancel_before_start_runs_nothing() {
    let harness = Harness::new(ScriptedSource::new().with("users", users(2))).await;
    let request = server_request();
    harness.store.save(&JobRecord::new(request.clone())).await.unwrap();
    assert!(harness.store.request_cancel(request.job_id).await.unwrap());

    let result = harness.run(request).await;

    assert_eq!(result.status, JobStatus::Cancelled);
    assert!(result.completed_steps.is_empty());
    assert_eq!(harness.source.fetch_count("users"), 0);
}

#[tokio::test]
async fn test_cancel_unknown_job_is_reported() {
    let harness = Harness::new(ScriptedSource::new()).await;
    assert!(!harness.store.request_cancel(server_request().job_id).await.unwrap());
}
