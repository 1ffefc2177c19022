//! Scheduler lifecycle integration tests.
//!
//! Require a reachable PostgreSQL at `DATABASE_URL`; run with
//! `cargo test -p nimbus-service --features pg-tests`.

#![cfg(feature = "pg-tests")]

mod support;

use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};

use nimbus_scheduler::JobError;
use support::{unique_id, TestHarness};

/// Poll the history endpoint until a row with `status` exists for `job_id`.
async fn wait_for_status(harness: &TestHarness, job_id: &str, status: &str) -> Value {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let response = harness
            .server
            .get("/jobs/history")
            .add_query_param("job_id", job_id)
            .add_header("authorization", harness.bearer("operator"))
            .await;
        response.assert_status_ok();
        let body: Value = response.json();
        if let Some(row) = body["items"]
            .as_array()
            .and_then(|items| items.iter().find(|r| r["status"] == status))
        {
            return row.clone();
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {job_id} to reach {status}: {body}"
        );
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

async fn history_rows(harness: &TestHarness, job_id: &str) -> Vec<Value> {
    let response = harness
        .server
        .get("/jobs/history")
        .add_query_param("job_id", job_id)
        .add_query_param("page_size", "50")
        .add_header("authorization", harness.bearer("operator"))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    body["items"].as_array().cloned().unwrap_or_default()
}

#[tokio::test]
async fn one_time_job_runs_and_records_lifecycle() {
    let harness = TestHarness::with_database().await;
    let job_id = unique_id("notify");

    let response = harness
        .server
        .post("/jobs")
        .add_header("authorization", harness.bearer("operator"))
        .json(&json!({
            "job_id": job_id,
            "function": "jobs:send_notification_email",
            "trigger_type": "once",
            "args": ["u42", "hi"],
        }))
        .await;
    assert_eq!(response.status_code(), 201);
    let created: Value = response.json();
    assert_eq!(created["trigger_type"], "once");

    let completed = wait_for_status(&harness, &job_id, "completed").await;
    assert!(
        completed["logs"]
            .as_str()
            .unwrap_or_default()
            .contains("Email sent to user u42"),
        "completed row should carry captured logs: {completed}"
    );

    // History ordering: created -> running -> completed, strictly increasing.
    let rows = history_rows(&harness, &job_id).await;
    let mut by_time = rows.clone();
    by_time.sort_by_key(|r| r["created_at"].as_str().unwrap_or_default().to_string());
    let statuses: Vec<&str> = by_time
        .iter()
        .map(|r| r["status"].as_str().unwrap_or_default())
        .collect();
    assert_eq!(statuses, vec!["created", "running", "completed"]);

    // Terminal once-jobs leave the store.
    let response = harness
        .server
        .get(&format!("/jobs/{job_id}"))
        .add_header("authorization", harness.bearer("operator"))
        .await;
    response.assert_status_not_found();
}

#[tokio::test]
async fn failing_job_records_error_and_logs() {
    let harness = TestHarness::with_database().await;
    harness
        .state
        .scheduler
        .registry()
        .register_async("jobs:always_fails", |ctx, _args, _kwargs| async move {
            ctx.log("about to fail");
            Err(JobError::new("boom: invalid dataset"))
        });
    let job_id = unique_id("doomed");

    harness
        .server
        .post("/jobs")
        .add_header("authorization", harness.bearer("operator"))
        .json(&json!({
            "job_id": job_id,
            "function": "jobs:always_fails",
            "trigger_type": "once",
        }))
        .await
        .assert_status(axum::http::StatusCode::CREATED);

    let failed = wait_for_status(&harness, &job_id, "failed").await;
    assert!(failed["error_message"]
        .as_str()
        .unwrap()
        .starts_with("boom"));
    let logs = failed["logs"].as_str().unwrap_or_default();
    assert!(!logs.is_empty(), "failed row should carry logs");
    assert!(logs.contains("about to fail"));
}

#[tokio::test]
async fn unknown_function_fails_at_creation() {
    let harness = TestHarness::with_database().await;

    let response = harness
        .server
        .post("/jobs")
        .add_header("authorization", harness.bearer("operator"))
        .json(&json!({
            "job_id": unique_id("ghost"),
            "function": "jobs:does_not_exist",
            "trigger_type": "once",
        }))
        .await;
    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert!(body["detail"].as_str().unwrap().contains("Unknown job function"));
}

#[tokio::test]
async fn duplicate_id_without_replace_conflicts() {
    let harness = TestHarness::with_database().await;
    let job_id = unique_id("interval");
    let body = json!({
        "job_id": job_id,
        "function": "jobs:health_check",
        "trigger_type": "interval",
        "hours": 6,
        "replace_existing": false,
    });

    harness
        .server
        .post("/jobs")
        .add_header("authorization", harness.bearer("operator"))
        .json(&body)
        .await
        .assert_status(axum::http::StatusCode::CREATED);

    let response = harness
        .server
        .post("/jobs")
        .add_header("authorization", harness.bearer("operator"))
        .json(&body)
        .await;
    assert_eq!(response.status_code(), 409);

    // Replacing is idempotent on the descriptor.
    let mut replace = body.clone();
    replace["replace_existing"] = json!(true);
    harness
        .server
        .post("/jobs")
        .add_header("authorization", harness.bearer("operator"))
        .json(&replace)
        .await
        .assert_status(axum::http::StatusCode::CREATED);
}

#[tokio::test]
async fn pause_resume_cycle_tracks_state_and_history() {
    let harness = TestHarness::with_database().await;
    let job_id = unique_id("pausable");

    harness
        .server
        .post("/jobs")
        .add_header("authorization", harness.bearer("operator"))
        .json(&json!({
            "job_id": job_id,
            "function": "jobs:cleanup_old_data",
            "trigger_type": "interval",
            "hours": 12,
        }))
        .await
        .assert_status(axum::http::StatusCode::CREATED);

    let response = harness
        .server
        .post(&format!("/jobs/{job_id}/pause"))
        .add_header("authorization", harness.bearer("operator"))
        .await;
    response.assert_status_ok();
    let paused: Value = response.json();
    assert_eq!(paused["paused"], true);
    assert!(paused["next_run_time"].is_null());

    let response = harness
        .server
        .post(&format!("/jobs/{job_id}/resume"))
        .add_header("authorization", harness.bearer("operator"))
        .await;
    response.assert_status_ok();
    let resumed: Value = response.json();
    assert_eq!(resumed["paused"], false);
    assert!(resumed["next_run_time"].is_string());

    harness
        .server
        .delete(&format!("/jobs/{job_id}"))
        .add_header("authorization", harness.bearer("operator"))
        .await
        .assert_status(axum::http::StatusCode::NO_CONTENT);

    let rows = history_rows(&harness, &job_id).await;
    let statuses: Vec<&str> = rows
        .iter()
        .map(|r| r["status"].as_str().unwrap_or_default())
        .collect();
    for expected in ["created", "paused", "resumed", "removed"] {
        assert!(statuses.contains(&expected), "missing {expected}: {statuses:?}");
    }

    harness
        .server
        .get(&format!("/jobs/{job_id}"))
        .add_header("authorization", harness.bearer("operator"))
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn run_date_beyond_grace_misfires_without_executing() {
    let harness = TestHarness::with_database().await;
    let job_id = unique_id("stale");

    harness
        .server
        .post("/jobs")
        .add_header("authorization", harness.bearer("operator"))
        .json(&json!({
            "job_id": job_id,
            "function": "jobs:health_check",
            "trigger_type": "once",
            "run_date": (Utc::now() - chrono::Duration::hours(2)).to_rfc3339(),
        }))
        .await
        .assert_status(axum::http::StatusCode::CREATED);

    wait_for_status(&harness, &job_id, "misfired").await;
    let rows = history_rows(&harness, &job_id).await;
    assert!(
        !rows.iter().any(|r| r["status"] == "running" || r["status"] == "completed"),
        "misfired job must not execute: {rows:?}"
    );

    harness
        .server
        .get(&format!("/jobs/{job_id}"))
        .add_header("authorization", harness.bearer("operator"))
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn run_date_within_grace_executes_immediately() {
    let harness = TestHarness::with_database().await;
    let job_id = unique_id("late-but-ok");

    harness
        .server
        .post("/jobs")
        .add_header("authorization", harness.bearer("operator"))
        .json(&json!({
            "job_id": job_id,
            "function": "jobs:health_check",
            "trigger_type": "once",
            "run_date": (Utc::now() - chrono::Duration::seconds(30)).to_rfc3339(),
        }))
        .await
        .assert_status(axum::http::StatusCode::CREATED);

    wait_for_status(&harness, &job_id, "completed").await;
}

#[tokio::test]
async fn created_job_is_immediately_readable() {
    // Persistence verification: a successful add means get() sees the job.
    let harness = TestHarness::with_database().await;
    let job_id = unique_id("verified");

    harness
        .server
        .post("/jobs")
        .add_header("authorization", harness.bearer("operator"))
        .json(&json!({
            "job_id": job_id,
            "function": "jobs:generate_report",
            "trigger_type": "cron",
            "cron_expression": "0 3 * * *",
            "args": ["weekly"],
        }))
        .await
        .assert_status(axum::http::StatusCode::CREATED);

    let response = harness
        .server
        .get(&format!("/jobs/{job_id}"))
        .add_header("authorization", harness.bearer("operator"))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["trigger_type"], "cron");
    assert_eq!(body["function"], "generate_report");
    assert!(body["next_run_time"].is_string());
}
