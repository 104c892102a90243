//! Product API client against a mock HTTP server

use serde_json::json;
use silo::core::{EntityKind, ResolvedRef, TargetEntity};
use silo::credentials::Secret;
use silo::execution::AsyncSignal;
use silo::target::{HttpTargetClient, HttpTargetConfig, TargetApi, TargetScope};
use uuid::Uuid;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PROJECT: &str = "/api/v1/workspaces/ws/projects/proj/";

fn client(server: &MockServer) -> HttpTargetClient {
    HttpTargetClient::new(HttpTargetConfig::new(server.uri(), Secret::new("key-123"))).unwrap()
}

fn scope() -> TargetScope {
    TargetScope::new("ws", "proj")
}

fn label() -> TargetEntity {
    TargetEntity::new(EntityKind::Label, "backend", "JIRA", "backend").with_attr("color", "#ff0000")
}

#[tokio::test]
async fn test_project_settings() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(PROJECT))
        .and(header("X-API-Key", "key-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "proj",
            "is_issue_type_enabled": true
        })))
        .mount(&server)
        .await;

    let settings = client(&server).project_settings(&scope()).await.unwrap();
    assert!(settings.exists);
    assert!(settings.issue_types_enabled);

    let missing = client(&server)
        .project_settings(&TargetScope::new("ws", "other"))
        .await
        .unwrap();
    assert!(!missing.exists);
}

#[tokio::test]
async fn test_create_sends_entity_and_references() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{}issues/", PROJECT)))
        .and(body_partial_json(json!({
            "name": "Login fails",
            "external_id": "proj_PRJ_1",
            "external_source": "JIRA",
            "priority": "high",
            "references": { "label": ["l-1", "l-2"], "assignee": "u-1" }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "i-9" })))
        .mount(&server)
        .await;

    let issue = TargetEntity::new(EntityKind::Issue, "proj_PRJ_1", "JIRA", "Login fails")
        .with_attr("priority", "high");
    let refs = [
        ResolvedRef {
            role: "assignee".into(),
            kind: EntityKind::User,
            target_id: "u-1".into(),
        },
        ResolvedRef {
            role: "label".into(),
            kind: EntityKind::Label,
            target_id: "l-1".into(),
        },
        ResolvedRef {
            role: "label".into(),
            kind: EntityKind::Label,
            target_id: "l-2".into(),
        },
    ];

    let id = client(&server).create(&scope(), &issue, &refs).await.unwrap();
    assert_eq!(id, "i-9");
}

#[tokio::test]
async fn test_lookup_by_external_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{}labels/", PROJECT)))
        .and(query_param("external_source", "JIRA"))
        .and(query_param("external_id", "backend"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{ "id": 42, "name": "backend" }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{}labels/", PROJECT)))
        .and(query_param("external_id", "frontend"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let client = client(&server);
    let found = client
        .find_by_external_id(&scope(), EntityKind::Label, "JIRA", "backend")
        .await
        .unwrap();
    assert_eq!(found.as_deref(), Some("42"));

    let missing = client
        .find_by_external_id(&scope(), EntityKind::Label, "JIRA", "frontend")
        .await
        .unwrap();
    assert_eq!(missing, None);
}

#[tokio::test]
async fn test_conflict_resolves_to_existing_entity() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{}labels/", PROJECT)))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{}labels/", PROJECT)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": "l-7" }])))
        .mount(&server)
        .await;

    let id = client(&server).create(&scope(), &label(), &[]).await.unwrap();
    assert_eq!(id, "l-7");
}

#[tokio::test]
async fn test_error_statuses() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{}labels/", PROJECT)))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{}modules/", PROJECT)))
        .respond_with(ResponseTemplate::new(422).set_body_string("name is required"))
        .mount(&server)
        .await;

    let client = client(&server);
    let unavailable = client.create(&scope(), &label(), &[]).await.unwrap_err();
    assert!(unavailable.is_retryable());

    let module = TargetEntity::new(EntityKind::Module, "proj_PRJ_300", "JIRA", "");
    let rejected = client.create(&scope(), &module, &[]).await.unwrap_err();
    assert!(!rejected.is_retryable());
    assert!(rejected.to_string().contains("422"));
}

#[tokio::test]
async fn test_background_status_polling() {
    let server = MockServer::start().await;
    let running = Uuid::new_v4();
    let finished = Uuid::new_v4();
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/import-jobs/{}/", running)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "processing" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/v1/import-jobs/{}/", finished)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "finished" })))
        .mount(&server)
        .await;

    let client = client(&server);
    assert!(!client.poll_status(running).await.unwrap().done);
    assert!(client.poll_status(finished).await.unwrap().done);
}
