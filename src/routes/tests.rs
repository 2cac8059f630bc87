// Router-level checks for requests that are answered before any query runs.
// The pool is lazy and points nowhere, so reaching the database would fail.

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use serde_json::{Value, json};
use sqlx::postgres::PgPoolOptions;
use tower::ServiceExt;
use uuid::Uuid;

use crate::models::AppState;

fn test_app(default_clinic_id: Option<Uuid>) -> Router {
    let db = PgPoolOptions::new()
        .connect_lazy("postgres://nobody@127.0.0.1:1/none")
        .unwrap();
    super::router(AppState {
        db,
        session_ttl_hours: 24,
        default_clinic_id,
    })
}

fn make_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(v) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(v.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn error_code(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    let v: Value = serde_json::from_slice(&bytes).unwrap();
    v["error"]["code"].as_str().unwrap_or_default().to_string()
}

fn booking(time: &str) -> Value {
    json!({
        "first_name": "Hina",
        "last_name": "Malik",
        "email": "hina@example.com",
        "appointment_date": "2026-11-02",
        "appointment_time": time,
        "service": "Cleaning"
    })
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    for (method, uri) in [
        ("GET", "/api/v1/patients"),
        ("GET", "/api/v1/appointments/mine"),
        ("POST", "/api/v1/auth/logout"),
        ("GET", "/api/v1/clinic"),
        ("GET", "/api/v1/transactions/summary"),
    ] {
        let response = test_app(None).oneshot(make_request(method, uri, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{method} {uri}");
        assert_eq!(error_code(response).await, "UNAUTHORIZED");
    }
}

#[tokio::test]
async fn booking_with_bad_time_is_a_validation_error() {
    let req = make_request("POST", "/api/v1/appointments/book", Some(booking("9h30")));
    let response = test_app(Some(Uuid::new_v4())).oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "VALIDATION_ERROR");
}

#[tokio::test]
async fn booking_rejects_out_of_range_duration() {
    let mut body = booking("09:30");
    body["duration_minutes"] = json!(600);
    let req = make_request("POST", "/api/v1/appointments/book", Some(body));
    let response = test_app(Some(Uuid::new_v4())).oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "VALIDATION_ERROR");
}

#[tokio::test]
async fn booking_needs_a_configured_clinic() {
    let req = make_request("POST", "/api/v1/appointments/book", Some(booking("09:30")));
    let response = test_app(None).oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "CLINIC_NOT_CONFIGURED");
}

#[tokio::test]
async fn login_requires_email_and_password() {
    let body = json!({ "email": "admin@example.com", "password": "" });
    let req = make_request("POST", "/api/v1/auth/login", Some(body));
    let response = test_app(None).oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "VALIDATION_ERROR");
}

#[tokio::test]
async fn signup_checks_input_before_touching_the_database() {
    let short = json!({
        "email": "new@example.com",
        "password": "short",
        "first_name": "Nadia",
        "last_name": "Iqbal"
    });
    let response = test_app(None)
        .oneshot(make_request("POST", "/api/v1/auth/signup", Some(short)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "VALIDATION_ERROR");

    let admin_without_clinic = json!({
        "email": "owner@example.com",
        "password": "long enough",
        "first_name": "Nadia",
        "last_name": "Iqbal",
        "role": "admin"
    });
    let response = test_app(None)
        .oneshot(make_request("POST", "/api/v1/auth/signup", Some(admin_without_clinic)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "VALIDATION_ERROR");

    let patient = json!({
        "email": "patient@example.com",
        "password": "long enough",
        "first_name": "Nadia",
        "last_name": "Iqbal"
    });
    let response = test_app(None)
        .oneshot(make_request("POST", "/api/v1/auth/signup", Some(patient)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "CLINIC_NOT_CONFIGURED");
}
