//! Several jobs on one runner, and the background-processing wait step

use crate::helpers::*;
use async_trait::async_trait;
use silo::core::{EntityKind, JobStatus};
use silo::execution::{AsyncSignal, AsyncStatus, ExecutionEvent, JobWorker, SignalError};
use silo::persistence::JobStore;
use silo::target::InMemoryTarget;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn test_worker_runs_independent_jobs() {
    let source = ScriptedSource::new()
        .with("users", users(3))
        .with("labels", labels(&["backend"]))
        .with("issues", issues(30));
    let harness = Harness::new(source).await;
    let runner = Arc::new(harness.runner);
    let worker = JobWorker::new(runner.clone(), 2);

    let requests: Vec<_> = ["alpha", "beta", "gamma"]
        .iter()
        .map(|project| request(silo::core::Provider::JiraServer, project))
        .collect();
    let ids: Vec<Uuid> = requests.iter().map(|r| r.job_id).collect();

    let results = worker.run_all(requests).await;

    assert_eq!(results.len(), 3);
    for (result, id) in results.iter().zip(&ids) {
        let result = result.as_ref().unwrap();
        assert_eq!(result.job_id, *id);
        assert_completed(result);
        assert_eq!(result.stats_for("issues").unwrap().created, 30);
    }
    // Each project gets its own copy; nothing leaks between job contexts
    assert_eq!(harness.target.count(EntityKind::Issue), 90);
    assert_eq!(harness.target.count(EntityKind::User), 9);
    for id in ids {
        let record = runner.store().load(id).await.unwrap().unwrap();
        assert_eq!(record.checkpoint.id_map.len_of(EntityKind::Issue), 30);
    }
}

/// Reports done after a number of polls
struct SlowSignal {
    polls: AtomicU32,
    done_after: u32,
}

#[async_trait]
impl AsyncSignal for SlowSignal {
    async fn poll_status(&self, _job_id: Uuid) -> Result<AsyncStatus, SignalError> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if n == 1 {
            return Err(SignalError::Transient("status endpoint warming up".into()));
        }
        Ok(AsyncStatus {
            done: n >= self.done_after,
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_relations_wait_for_background_processing() {
    let signal = Arc::new(SlowSignal {
        polls: AtomicU32::new(0),
        done_after: 4,
    });
    let harness = Harness::with_parts(
        ScriptedSource::new().with("issues", vec![issue(1), issue_with_parent(2, 1)]),
        Arc::new(InMemoryTarget::new()),
        signal.clone(),
        fast_config(),
    )
    .await;

    let result = harness.run(server_request()).await;
    assert_completed(&result);
    assert_eq!(signal.polls.load(Ordering::SeqCst), 4);
    assert!(result
        .completed_steps
        .contains(&"wait_for_issue_processing".to_string()));

    let events = harness.events();
    let waiting = events
        .iter()
        .position(|e| matches!(e, ExecutionEvent::WaitingForAsync { .. }))
        .unwrap();
    let relations = events
        .iter()
        .position(|e| matches!(e, ExecutionEvent::StepStarted { step, .. } if step == "issue_relations"))
        .unwrap();
    assert!(waiting < relations);
    assert_eq!(harness.target.count(EntityKind::IssueRelation), 1);
}

#[tokio::test(start_paused = true)]
async fn test_wait_gives_up_after_max_wait() {
    let mut config = fast_config();
    config.wait_for_async.max_wait_secs = 10;
    let signal = Arc::new(SlowSignal {
        polls: AtomicU32::new(0),
        done_after: u32::MAX,
    });
    let harness = Harness::with_parts(
        ScriptedSource::new().with("issues", issues(2)),
        Arc::new(InMemoryTarget::new()),
        signal,
        config,
    )
    .await;

    let started = tokio::time::Instant::now();
    let result = harness.run(server_request()).await;

    assert_eq!(result.status, JobStatus::Failed);
    let failure = result.failure.unwrap();
    assert_eq!(failure.step_name.as_deref(), Some("wait_for_issue_processing"));
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert!(result.completed_steps.contains(&"issues".to_string()));
}
