mod helpers;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt; // not axum::ServiceExt

use helpers::{fixture, FACULTY};

const BOUNDARY: &str = "XBOUNDARYX";

fn get(uri: &str, who: Option<(&str, &str)>) -> Request<Body> {
    let mut req = Request::builder().uri(uri).method("GET");
    if let Some((id, role)) = who {
        req = req.header("x-learner-id", id).header("x-learner-role", role);
    }
    req.body(Body::empty()).unwrap()
}

fn post_json(uri: &str, who: Option<(&str, &str)>, body: Value) -> Request<Body> {
    let mut req = Request::builder()
        .uri(uri)
        .method("POST")
        .header("content-type", "application/json");
    if let Some((id, role)) = who {
        req = req.header("x-learner-id", id).header("x-learner-role", role);
    }
    req.body(Body::from(body.to_string())).unwrap()
}

fn post_file(uri: &str, who: (&str, &str), file_name: &str, contents: &str) -> Request<Body> {
    let body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
         Content-Type: application/pdf\r\n\r\n{contents}\r\n--{BOUNDARY}--\r\n"
    );
    Request::builder()
        .uri(uri)
        .method("POST")
        .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .header("x-learner-id", who.0)
        .header("x-learner-role", who.1)
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_health_check() {
    let fx = fixture().await;
    let resp = fx
        .app()
        .oneshot(get("/health", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn anonymous_visitor_gets_preview_of_paid_course() {
    let fx = fixture().await;
    let app = fx.app();

    let (status, body) = send(&app, get(&format!("/api/courses/{}/access", fx.paid.id), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["level"], "preview");
    assert_eq!(body["videos"][0]["accessible"], true);
    assert_eq!(body["videos"][1]["accessible"], false);

    let (_, body) = send(&app, get(&format!("/api/courses/{}/access/2", fx.paid.id), None)).await;
    assert_eq!(body["allowed"], false);
}

#[tokio::test]
async fn enroll_creates_then_reports_existing() {
    let fx = fixture().await;
    let app = fx.app();
    let uri = format!("/api/courses/{}/enroll", fx.free.id);
    let who = Some(("stu-1", "student"));

    let (status, body) = send(&app, post_json(&uri, who, json!({}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["created"], true);
    assert_eq!(body["enrollment"]["origin"], "free");

    let (status, body) = send(&app, post_json(&uri, who, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], false);

    let (_, body) = send(&app, get(&format!("/api/courses/{}/enrollments/count", fx.free.id), None)).await;
    assert_eq!(body["enrolled_count"], 1);

    let (_, body) = send(&app, get("/api/me/courses", who)).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn missing_identity_is_forbidden() {
    let fx = fixture().await;
    let (status, body) = send(
        &fx.app(),
        post_json(&format!("/api/courses/{}/enroll", fx.free.id), None, json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "not_authorized");
}

#[tokio::test]
async fn paid_flow_checkout_callback_complete() {
    let fx = fixture().await;
    let app = fx.app();
    let who = Some(("stu-1", "student"));

    let (status, body) =
        send(&app, post_json(&format!("/api/courses/{}/checkout", fx.paid.id), who, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["redirect_url"].as_str().unwrap().starts_with("https://pay.example/"));

    // locked until the gateway confirms
    let complete = format!("/api/courses/{}/videos/2/complete", fx.paid.id);
    let (status, _) = send(&app, post_json(&complete, who, json!({}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let callback = json!({ "learner_id": "stu-1", "course_id": fx.paid.id, "status": "success" });
    let (status, body) = send(&app, post_json("/api/payments/callback", None, callback)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enrollment"]["origin"], "paid");

    let (status, body) = send(&app, post_json(&complete, who, json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["progress_percent"], 25);

    let (_, body) = send(&app, get(&format!("/api/courses/{}/progress", fx.paid.id), who)).await;
    assert_eq!(body["completed_count"], 1);
    assert_eq!(body["total_video_count"], 4);

    let (status, body) =
        send(&app, post_json(&format!("/api/courses/{}/checkout", fx.paid.id), who, json!({}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_enrolled");
}

#[tokio::test]
async fn quiz_attempts_over_http() {
    let fx = fixture().await;
    fx.enroll_paid("stu-1").await;
    let app = fx.app();
    let who = Some(("stu-1", "student"));
    let uri = format!("/api/quizzes/{}/attempts", fx.quiz.id);

    let (status, body) = send(&app, post_json(&uri, who, json!({ "answers": [0, 1, 9, 3, 0] }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["score"], 4);
    assert_eq!(body["total_questions"], 5);

    let (status, body) = send(&app, post_json(&uri, who, json!({ "answers": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (_, body) = send(&app, get(&uri, who)).await;
    assert_eq!(body["attempts"].as_array().unwrap().len(), 1);
    assert_eq!(body["best"], body["latest"]);
}

#[tokio::test]
async fn written_exam_upload_and_grading() {
    let fx = fixture().await;
    fx.enroll_paid("stu-1").await;
    let app = fx.app();
    let uri = format!("/api/exams/{}/submissions", fx.exam.id);

    let (status, body) = send(&app, post_file(&uri, ("stu-1", "student"), "final.pdf", "%PDF-1.4")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["graded"], false);
    assert!(body.get("marks").is_none());
    let submission_id = body["id"].as_str().unwrap().to_string();

    let grade_uri = format!("/api/submissions/{submission_id}/grade");
    let (status, _) = send(
        &app,
        post_json(&grade_uri, Some(("prof-other", "faculty")), json!({ "marks": 90 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&app, post_json(&grade_uri, Some((FACULTY, "faculty")), json!({ "marks": 150 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, post_json(&grade_uri, Some((FACULTY, "faculty")), json!({ "marks": 90 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["graded"], true);
    assert_eq!(body["marks"], 90);

    let (status, body) = send(&app, get(&uri, Some((FACULTY, "faculty")))).await;
    assert_eq!(status, StatusCode::OK);
    let rows = body.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["learner_name"], "Grace Hopper");

    // the stored file is served back from /content
    let url = rows[0]["download_url"].as_str().unwrap().to_string();
    let resp = app.clone().oneshot(get(&url, None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"%PDF-1.4");
}

#[tokio::test]
async fn upload_without_file_field_is_rejected() {
    let fx = fixture().await;
    fx.enroll_paid("stu-1").await;
    let body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhello\r\n--{BOUNDARY}--\r\n"
    );
    let req = Request::builder()
        .uri(format!("/api/exams/{}/submissions", fx.exam.id))
        .method("POST")
        .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .header("x-learner-id", "stu-1")
        .header("x-learner-role", "student")
        .body(Body::from(body))
        .unwrap();
    let (status, body) = send(&fx.app(), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "validation failed: file is required");
}
