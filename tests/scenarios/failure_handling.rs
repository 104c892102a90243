//! Item, page and job level failures

use crate::helpers::*;
use serde_json::json;
use silo::core::{EntityKind, JobStatus, Provider, SourceFetchError};
use silo::persistence::JobStore;
use silo::source::{RateLimitHeader, SourceError};
use std::time::Duration;

#[tokio::test]
async fn test_malformed_items_are_skipped_with_warnings() {
    let mut page = issues(50);
    page[10] = malformed_issue("PRJ-BAD-1");
    page[30] = malformed_issue("PRJ-BAD-2");
    let source = ScriptedSource::new().with("issues", page);
    let harness = Harness::new(source).await;

    let result = harness.run(server_request()).await;
    assert_completed(&result);

    let stats = result.stats_for("issues").unwrap();
    assert_eq!(stats.pulled, 50);
    assert_eq!(stats.created, 48);
    assert_eq!(stats.skipped, 2);
    assert_eq!(harness.target.count(EntityKind::Issue), 48);

    let warnings: Vec<_> = result.warnings.iter().filter(|w| w.step == "issues").collect();
    assert_eq!(warnings.len(), 2);
    assert!(warnings[0].message.contains("PRJ-BAD-1"));
}

#[tokio::test]
async fn test_users_without_email_are_skipped_and_the_job_continues() {
    let source = ScriptedSource::new()
        .with(
            "users",
            vec![
                json!({ "accountId": "a1", "displayName": "App Bot", "active": true }),
                json!({ "accountId": "a2", "displayName": "Privacy User", "active": true }),
            ],
        )
        .with("issues", issues(2));
    let harness = Harness::new(source).await;

    let result = harness.run(server_request()).await;
    assert_completed(&result);

    let stats = result.stats_for("users").unwrap();
    assert_eq!(stats.pulled, 2);
    assert_eq!(stats.created, 0);
    assert_eq!(stats.skipped, 2);
    assert_eq!(harness.target.count(EntityKind::User), 0);
    assert_eq!(harness.target.count(EntityKind::Issue), 2);

    let warnings: Vec<_> = result.warnings.iter().filter(|w| w.step == "users").collect();
    assert_eq!(warnings.len(), 2);
    assert!(warnings.iter().any(|w| w.message.contains("Privacy User")));
}

#[tokio::test]
async fn test_page_where_every_item_fails_stops_the_job() {
    let source = ScriptedSource::new().with(
        "issues",
        vec![malformed_issue("PRJ-1"), malformed_issue("PRJ-2"), malformed_issue("PRJ-3")],
    );
    let harness = Harness::new(source).await;

    let result = harness.run(server_request()).await;

    assert_eq!(result.status, JobStatus::Failed);
    let failure = result.failure.unwrap();
    assert_eq!(failure.step_name.as_deref(), Some("issues"));
    assert!(failure.reason.contains("every item"), "{}", failure.reason);
    assert!(!result.completed_steps.contains(&"issues".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_transient_fetch_errors_are_retried() {
    let source = ScriptedSource::new().with("labels", labels(&["backend"]));
    source.fail_at(
        "labels",
        0,
        vec![
            SourceError::Fetch(SourceFetchError::transient("connection reset")),
            SourceError::Fetch(SourceFetchError::from_status(503, "unavailable")),
        ],
    );
    let harness = Harness::new(source).await;

    let result = harness.run(server_request()).await;
    assert_completed(&result);
    assert_eq!(harness.source.fetch_count("labels"), 3);
    assert_eq!(harness.target.count(EntityKind::Label), 1);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_wait_is_capped() {
    let mut config = fast_config();
    config.rate_limit.max_wait_secs = 5;
    let source = ScriptedSource::new().with("users", users(2));
    source.fail_at(
        "users",
        0,
        vec![SourceError::RateLimited(RateLimitHeader::retry_after(Duration::from_secs(600)))],
    );
    let harness = Harness::with_config(source, config).await;

    let started = tokio::time::Instant::now();
    let result = harness.run(server_request()).await;
    let waited = started.elapsed();

    assert_completed(&result);
    assert_eq!(harness.source.fetch_count("users"), 2);
    assert!(waited >= Duration::from_secs(5), "waited {:?}", waited);
    assert!(waited < Duration::from_secs(600), "waited {:?}", waited);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_retries_are_bounded() {
    let mut config = fast_config();
    config.rate_limit.max_retries = 2;
    let source = ScriptedSource::new().with("users", users(2));
    source.fail_at(
        "users",
        0,
        (0..3)
            .map(|_| SourceError::RateLimited(RateLimitHeader::retry_after(Duration::from_secs(1))))
            .collect(),
    );
    let harness = Harness::with_config(source, config).await;

    let result = harness.run(server_request()).await;

    assert_eq!(result.status, JobStatus::Failed);
    let failure = result.failure.unwrap();
    assert_eq!(failure.step_name.as_deref(), Some("users"));
    assert!(failure.reason.contains("rate limit"), "{}", failure.reason);
    assert_eq!(harness.source.fetch_count("users"), 3);
}

#[tokio::test]
async fn test_auth_failure_is_not_retried_and_secret_is_redacted() {
    let source = ScriptedSource::new();
    source.fail_at(
        "users",
        0,
        vec![SourceError::Fetch(SourceFetchError::auth(format!(
            "token {} was rejected",
            SECRET_TOKEN
        )))],
    );
    let harness = Harness::new(source).await;

    let result = harness.run(server_request()).await;

    assert_eq!(result.status, JobStatus::Failed);
    assert_eq!(harness.source.fetch_count("users"), 1);
    let failure = result.failure.unwrap();
    assert!(!failure.reason.contains(SECRET_TOKEN), "{}", failure.reason);

    let stored = harness.store.load(result.job_id).await.unwrap().unwrap();
    let persisted = serde_json::to_string(&stored).unwrap();
    assert!(!persisted.contains(SECRET_TOKEN));
}

#[tokio::test(start_paused = true)]
async fn test_transient_create_failures_are_retried() {
    let source = ScriptedSource::new().with("users", users(3));
    let harness = Harness::new(source).await;
    harness.target.fail_next_creates(2);

    let result = harness.run(server_request()).await;
    assert_completed(&result);
    assert_eq!(harness.target.count(EntityKind::User), 3);
    assert_eq!(result.stats_for("users").unwrap().created, 3);
}

#[tokio::test]
async fn test_unknown_credential_fails_before_any_step() {
    let harness = Harness::new(ScriptedSource::new().with("users", users(1))).await;
    let mut request = server_request();
    request.credential_ref = "missing-ref".to_string();

    let result = harness.run(request).await;

    assert_eq!(result.status, JobStatus::Failed);
    let failure = result.failure.unwrap();
    assert_eq!(failure.step_name, None);
    assert!(failure.reason.contains("missing-ref"));
    assert_eq!(harness.source.fetch_count("users"), 0);
    assert_eq!(harness.target.total(), 0);
}

#[tokio::test]
async fn test_credential_for_another_provider_is_rejected() {
    let harness = Harness::new(ScriptedSource::new()).await;
    let mut request = request(Provider::Jira, "proj");
    request.credential_ref = CREDENTIAL_REF.to_string();

    let result = harness.run(request).await;

    assert_eq!(result.status, JobStatus::Failed);
    assert!(result.failure.unwrap().reason.contains("jira_server"));
}

#[tokio::test]
async fn test_unsupported_provider_fails_preflight() {
    let harness = Harness::new(ScriptedSource::new()).await;

    let result = harness.run(request(Provider::Linear, "proj")).await;

    assert_eq!(result.status, JobStatus::Failed);
    let failure = result.failure.unwrap();
    assert!(failure.reason.contains("linear"), "{}", failure.reason);
    assert!(result.stats.is_empty());
}
