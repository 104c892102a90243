//! Paging, id mapping and load ordering across the Jira pipeline

use crate::helpers::*;
use silo::core::{Cursor, EntityKind, StepOutcome};
use silo::execution::ExecutionEvent;
use silo::persistence::JobStore;
use silo::target::TargetScope;

#[tokio::test]
async fn test_issues_are_loaded_across_pages() {
    let source = ScriptedSource::new()
        .with("users", users(3))
        .with("labels", labels(&["backend", "frontend"]))
        .with("issues", issues(120));
    let harness = Harness::new(source).await;

    let result = harness.run(server_request()).await;
    assert_completed(&result);

    // 50 + 50 + 20
    assert_eq!(
        harness.source.fetched("issues"),
        vec![
            Cursor::Offset { start_at: 0 },
            Cursor::Offset { start_at: 50 },
            Cursor::Offset { start_at: 100 },
        ]
    );
    let stats = result.stats_for("issues").unwrap();
    assert_eq!(stats.pages, 3);
    assert_eq!(stats.pulled, 120);
    assert_eq!(stats.created, 120);
    assert_eq!(harness.target.count(EntityKind::Issue), 120);

    let record = harness.store.load(result.job_id).await.unwrap().unwrap();
    assert_eq!(record.checkpoint.id_map.len_of(EntityKind::Issue), 120);
    assert_eq!(record.checkpoint.id_map.len_of(EntityKind::User), 3);
    assert_eq!(record.progress(), 1.0);
}

#[tokio::test]
async fn test_page_events_follow_the_cursor() {
    let source = ScriptedSource::new().with("issues", issues(60));
    let harness = Harness::new(source).await;

    let result = harness.run(server_request()).await;
    assert_completed(&result);

    let pages: Vec<(u32, usize, bool)> = harness
        .events()
        .into_iter()
        .filter_map(|event| match event {
            ExecutionEvent::PageCompleted {
                step,
                page,
                pulled,
                has_more,
                ..
            } if step == "issues" => Some((page, pulled, has_more)),
            _ => None,
        })
        .collect();
    assert_eq!(pages, vec![(1, 50, true), (2, 10, false)]);
}

#[tokio::test]
async fn test_issue_references_resolve_to_target_ids() {
    let source = ScriptedSource::new()
        .with("users", users(2))
        .with("labels", labels(&["backend"]))
        .with("issues", issues(1));
    let harness = Harness::new(source).await;

    let result = harness.run(server_request()).await;
    assert_completed(&result);

    let user_id = harness.target.get(EntityKind::User, "user1@example.com").unwrap().id;
    let label_id = harness.target.get(EntityKind::Label, "backend").unwrap().id;
    let issue = harness.target.get(EntityKind::Issue, &issue_external_id(1)).unwrap();

    let ref_ids: Vec<(&str, &str)> = issue
        .refs
        .iter()
        .map(|r| (r.role.as_str(), r.target_id.as_str()))
        .collect();
    assert!(ref_ids.contains(&("assignee", user_id.as_str())));
    assert!(ref_ids.contains(&("label", label_id.as_str())));

    let labels = issue.entity.attributes["labels"].as_array().unwrap();
    assert!(labels.iter().any(|l| l == "JIRA IMPORTED"));
    assert_eq!(
        issue.entity.attributes["links"][0]["url"],
        format!("{}/browse/PRJ-1", JIRA_URL)
    );
}

#[tokio::test]
async fn test_entities_are_created_in_dependency_order() {
    let source = ScriptedSource::new()
        .with("users", users(2))
        .with("labels", labels(&["backend"]))
        .with("issues", vec![issue(1), issue_with_parent(2, 1)]);
    let harness = Harness::new(source).await;

    let result = harness.run(server_request()).await;
    assert_completed(&result);

    let order: Vec<EntityKind> = harness
        .target
        .created_order()
        .into_iter()
        .map(|(kind, _)| kind)
        .collect();
    let last = |kind| order.iter().rposition(|k| *k == kind).unwrap();
    let first = |kind| order.iter().position(|k| *k == kind).unwrap();

    assert!(last(EntityKind::User) < first(EntityKind::Label));
    assert!(last(EntityKind::Label) < first(EntityKind::Issue));
    assert!(last(EntityKind::Issue) < first(EntityKind::IssueRelation));
    assert_eq!(harness.target.count(EntityKind::IssueRelation), 1);

    let relation = harness
        .target
        .get(
            EntityKind::IssueRelation,
            &format!("{}|parent|{}", issue_external_id(2), issue_external_id(1)),
        )
        .unwrap();
    assert_eq!(relation.refs.len(), 2);
}

#[tokio::test]
async fn test_rerun_does_not_duplicate_entities() {
    let source = ScriptedSource::new()
        .with("users", users(3))
        .with("labels", labels(&["backend"]))
        .with("issues", issues(10));
    let harness = Harness::new(source).await;

    assert_completed(&harness.run(server_request()).await);
    let total = harness.target.total();

    // A fresh job for the same project finds everything already there
    let second = harness.run(server_request()).await;
    assert_completed(&second);
    assert_eq!(harness.target.total(), total);

    let issues = second.stats_for("issues").unwrap();
    assert_eq!(issues.created, 0);
    assert_eq!(issues.existing, 10);
    assert_eq!(second.stats_for("users").unwrap().existing, 3);
}

#[tokio::test]
async fn test_existing_target_entities_are_mapped_not_recreated() {
    let source = ScriptedSource::new().with("labels", labels(&["backend", "frontend"]));
    let harness = Harness::new(source).await;
    let seeded = harness.target.seed(
        &TargetScope::new("ws-1", "proj"),
        silo::core::TargetEntity::new(EntityKind::Label, "backend", "JIRA_SERVER", "backend"),
    );

    let result = harness.run(server_request()).await;
    assert_completed(&result);

    let stats = result.stats_for("labels").unwrap();
    assert_eq!((stats.created, stats.existing), (1, 1));
    let record = harness.store.load(result.job_id).await.unwrap().unwrap();
    assert_eq!(
        record.checkpoint.id_map.get(EntityKind::Label, "backend"),
        Some(seeded.as_str())
    );
}

#[tokio::test]
async fn test_cloud_issues_use_token_pagination() {
    let source = ScriptedSource::new().with("issues", issues(75));
    let harness = Harness::new(source).await;
    let mut request = request(silo::core::Provider::Jira, "proj");
    request.credential_ref = "jira-cloud".to_string();

    let result = harness.run(request).await;
    assert_completed(&result);

    assert_eq!(
        harness.source.fetched("issues"),
        vec![
            Cursor::first_token(),
            Cursor::Token {
                token: Some("50".to_string())
            },
        ]
    );
    assert_eq!(result.stats_for("issues").unwrap().created, 75);
}

#[tokio::test]
async fn test_page_size_override_and_skipped_steps() {
    let source = ScriptedSource::new()
        .with("users", users(5))
        .with("issues", issues(30));
    let harness = Harness::new(source).await;
    let request = server_request()
        .with_page_size("issues", 10)
        .skip_step("users");

    let result = harness.run(request).await;
    assert_completed(&result);

    assert_eq!(harness.source.fetch_count("issues"), 3);
    assert_eq!(harness.source.fetch_count("users"), 0);
    assert_eq!(result.stats_for("users").unwrap().outcome, StepOutcome::Skipped);
    assert!(result.skipped_steps.contains(&"users".to_string()));
    assert_eq!(harness.target.count(EntityKind::User), 0);
}
