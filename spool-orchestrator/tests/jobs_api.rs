//! Integration tests for submission, queries and the worker lifecycle.

mod common;

use axum::http::{Method, StatusCode};
use common::{body_json, build_test_app, get, post, send, submit_tts, test_state};
use serde_json::json;

// ---------------------------------------------------------------------------
// Submission and queries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_check_returns_ok() {
    let app = build_test_app(test_state());
    let response = get(app, "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn submitted_job_is_queued_at_zero() {
    let app = build_test_app(test_state());
    let job_id = submit_tts(app.clone()).await;

    let response = get(app, &format!("/jobs/{}", job_id)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let job = body_json(response).await;
    assert_eq!(job["state"], "queued");
    assert_eq!(job["progress"], 0);
    assert_eq!(job["kind"], "tts");
    assert!(job.get("error_message").is_none());
}

#[tokio::test]
async fn missing_required_metadata_is_rejected() {
    let state = test_state();
    let app = build_test_app(state.clone());

    let response = post(
        app.clone(),
        "/jobs",
        json!({"kind": "render_batch", "metadata": {"style": "noir"}}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("prompts"));

    // No job was created
    let listed = body_json(get(app, "/jobs").await).await;
    assert_eq!(listed.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn unknown_kind_is_a_bad_request() {
    let app = build_test_app(test_state());
    let response = post(app, "/jobs", json!({"kind": "podcast", "metadata": {}})).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn caller_supplied_id_is_kept_and_unique() {
    let app = build_test_app(test_state());
    let body = json!({"kind": "tts", "metadata": {"text": "hi"}, "job_id": "narration-42"});

    let response = post(app.clone(), "/jobs", body.clone()).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_json(response).await["job_id"], "narration-42");

    let response = post(app, "/jobs", body).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn unknown_job_returns_404() {
    let app = build_test_app(test_state());
    assert_eq!(
        get(app.clone(), "/jobs/does-not-exist").await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        get(app, "/jobs/does-not-exist/auth").await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn list_filters_by_state_and_kind() {
    let app = build_test_app(test_state());
    let first = submit_tts(app.clone()).await;
    submit_tts(app.clone()).await;
    post(
        app.clone(),
        "/jobs",
        json!({"kind": "compose", "metadata": {"clips": ["a.mp4", "b.mp4"]}}),
    )
    .await;

    post(
        app.clone(),
        &format!("/jobs/{}/claim", first),
        json!({"worker_id": "w1"}),
    )
    .await;

    let running = body_json(get(app.clone(), "/jobs?state=running").await).await;
    assert_eq!(running.as_array().unwrap().len(), 1);
    assert_eq!(running[0]["job_id"], first.as_str());

    let tts = body_json(get(app.clone(), "/jobs?kind=tts").await).await;
    assert_eq!(tts.as_array().unwrap().len(), 2);

    let limited = body_json(get(app.clone(), "/jobs?limit=1").await).await;
    assert_eq!(limited.as_array().unwrap().len(), 1);

    let response = get(app, "/jobs?state=exploded").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn list_oldest_first_returns_next_batch() {
    let app = build_test_app(test_state());
    let first = submit_tts(app.clone()).await;
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    let second = submit_tts(app.clone()).await;
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    submit_tts(app.clone()).await;

    let batch = body_json(get(app.clone(), "/jobs?state=queued&order=oldest_first&limit=2").await).await;
    let ids: Vec<&str> = batch
        .as_array()
        .unwrap()
        .iter()
        .map(|job| job["job_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![first.as_str(), second.as_str()]);

    let response = get(app, "/jobs?order=sideways").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Worker lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn worker_drives_job_to_done() {
    let app = build_test_app(test_state());
    let job_id = submit_tts(app.clone()).await;

    let response = post(
        app.clone(),
        &format!("/jobs/{}/claim", job_id),
        json!({"worker_id": "w1"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["state"], "running");

    let response = post(
        app.clone(),
        &format!("/jobs/{}/progress", job_id),
        json!({
            "worker_id": "w1",
            "progress": 60,
            "message": "Synthesizing voice",
            "resolved": {"resolved_model": "voice-v2", "binding_source": "kind_default"}
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let job = body_json(response).await;
    assert_eq!(job["progress"], 60);
    assert_eq!(job["phase_message"], "Synthesizing voice");
    assert_eq!(job["metadata"]["resolved_model"], "voice-v2");

    // A lower value never moves progress backwards
    let job = body_json(
        post(
            app.clone(),
            &format!("/jobs/{}/progress", job_id),
            json!({"worker_id": "w1", "progress": 20}),
        )
        .await,
    )
    .await;
    assert_eq!(job["progress"], 60);

    let response = post(
        app.clone(),
        &format!("/jobs/{}/complete", job_id),
        json!({
            "worker_id": "w1",
            "outputs": [{"id": "audio", "status": "done", "url": "https://cdn.example/a.mp3"}]
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let job = body_json(get(app, &format!("/jobs/{}", job_id)).await).await;
    assert_eq!(job["state"], "done");
    assert_eq!(job["progress"], 100);
    assert_eq!(job["outputs"][0]["status"], "done");
    assert_eq!(job["outputs"][0]["url"], "https://cdn.example/a.mp3");
}

#[tokio::test]
async fn second_claim_conflicts() {
    let app = build_test_app(test_state());
    let job_id = submit_tts(app.clone()).await;
    let uri = format!("/jobs/{}/claim", job_id);

    assert_eq!(
        post(app.clone(), &uri, json!({"worker_id": "w1"})).await.status(),
        StatusCode::OK
    );
    assert_eq!(
        post(app, &uri, json!({"worker_id": "w2"})).await.status(),
        StatusCode::CONFLICT
    );
}

#[tokio::test]
async fn non_owner_cannot_report() {
    let app = build_test_app(test_state());
    let job_id = submit_tts(app.clone()).await;
    post(
        app.clone(),
        &format!("/jobs/{}/claim", job_id),
        json!({"worker_id": "w1"}),
    )
    .await;

    let response = post(
        app,
        &format!("/jobs/{}/progress", job_id),
        json!({"worker_id": "intruder", "progress": 90}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn failure_is_structured() {
    let app = build_test_app(test_state());
    let job_id = submit_tts(app.clone()).await;
    post(
        app.clone(),
        &format!("/jobs/{}/claim", job_id),
        json!({"worker_id": "w1"}),
    )
    .await;

    let response = post(
        app.clone(),
        &format!("/jobs/{}/fail", job_id),
        json!({
            "worker_id": "w1",
            "failure": {"code": "provider_rejected", "message": "Text exceeds provider limit"}
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let job = body_json(get(app.clone(), &format!("/jobs/{}", job_id)).await).await;
    assert_eq!(job["state"], "error");
    assert_eq!(job["error_code"], "provider_rejected");
    assert_eq!(job["error_message"], "Text exceeds provider limit");

    // Terminal jobs accept no further writes
    let response = post(
        app,
        &format!("/jobs/{}/complete", job_id),
        json!({"worker_id": "w1", "outputs": []}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn cancel_queued_job() {
    let app = build_test_app(test_state());
    let job_id = submit_tts(app.clone()).await;

    let response = send(
        app.clone(),
        Method::POST,
        &format!("/jobs/{}/cancel", job_id),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let job = body_json(response).await;
    assert_eq!(job["state"], "error");
    assert_eq!(job["error_code"], "cancelled");

    // A cancelled job can no longer be claimed
    let response = post(
        app,
        &format!("/jobs/{}/claim", job_id),
        json!({"worker_id": "w1"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn cancel_running_job_sets_flag() {
    let app = build_test_app(test_state());
    let job_id = submit_tts(app.clone()).await;
    post(
        app.clone(),
        &format!("/jobs/{}/claim", job_id),
        json!({"worker_id": "w1"}),
    )
    .await;

    let response = send(app, Method::POST, &format!("/jobs/{}/cancel", job_id), None).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let job = body_json(response).await;
    assert_eq!(job["state"], "running");
    assert_eq!(job["cancel_requested"], true);
}
