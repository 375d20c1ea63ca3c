//! In-process scenario tests for the full order lifecycle over HTTP.
//!
//! These tests spin up the Axum router **without** binding a TCP socket.
//! Each test calls `routes::build_router` against an in-memory store and
//! drives it via `tower::ServiceExt::oneshot` — no network IO, no Postgres,
//! and the clock is advanced by hand.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Duration, Utc};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt; // oneshot
use uuid::Uuid;

use vax_auth::JwtKeys;
use vax_daemon::{routes, state::AppState};
use vax_schemas::Role;
use vax_testkit::{ManualClock, MemStore, RecordingMailer, RecordingNotifier, TEST_JWT_SECRET};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn t0() -> DateTime<Utc> {
    "2026-03-01T12:00:00Z".parse().unwrap()
}

struct TestEnv {
    store: Arc<MemStore>,
    clock: Arc<ManualClock>,
    notifier: Arc<RecordingNotifier>,
    mailer: Arc<RecordingMailer>,
    state: Arc<AppState>,
    keys: JwtKeys,
}

fn make_env() -> TestEnv {
    let store = Arc::new(MemStore::new());
    let clock = Arc::new(ManualClock::at(t0()));
    let notifier = Arc::new(RecordingNotifier::new());
    let mailer = Arc::new(RecordingMailer::new());
    let keys = JwtKeys::from_secret(TEST_JWT_SECRET);
    let state = Arc::new(AppState::new(
        Arc::clone(&store) as Arc<dyn vax_db::LifecycleStore>,
        Arc::clone(&notifier) as Arc<dyn vax_notify::NotifyChannel>,
        Arc::clone(&mailer) as Arc<dyn vax_notify::CertificateMailer>,
        keys.clone(),
        Arc::clone(&clock) as Arc<dyn vax_lifecycle::Clock>,
    ));
    TestEnv {
        store,
        clock,
        notifier,
        mailer,
        state,
        keys,
    }
}

fn router(env: &TestEnv) -> axum::Router {
    routes::build_router(Arc::clone(&env.state))
}

fn token(env: &TestEnv, user: Uuid, role: Role, hospital: Option<Uuid>) -> String {
    env.keys.mint(user, role, hospital, 24).unwrap()
}

fn patch(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("PATCH")
        .uri(uri)
        .header("Authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

fn patch_json(uri: &str, token: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("PATCH")
        .uri(uri)
        .header("Authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_json(uri: &str, token: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn call(router: axum::Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let bytes = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("body is not valid JSON")
    };
    (status, json)
}

/// Seed a patient, hospital, vaccine, staff member and stock; create an
/// order via the API and return (order_id, patient, hospital, vaccine,
/// staff) plus the tokens.
async fn seeded_order(env: &TestEnv) -> (Uuid, Uuid, Uuid, Uuid, Uuid, String, String) {
    let patient = env.store.add_patient(Some("pat@example.org"));
    let hospital = env.store.add_hospital("General");
    let vaccine = env.store.add_vaccine("VX-1");
    let staff = env.store.add_staff(hospital);
    env.store.set_stock(hospital, vaccine, 5);

    let pat_token = token(env, patient, Role::Patient, None);
    let staff_token = token(env, staff, Role::HospitalStaff, Some(hospital));

    let (status, body) = call(
        router(env),
        post_json(
            "/v1/orders",
            &pat_token,
            json!({
                "hospital_id": hospital,
                "vaccine_id": vaccine,
                "dose_number": 1,
                "charge_amount_cents": 2500
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create: {body}");
    let order_id: Uuid = body["order"]["order_id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    (
        order_id, patient, hospital, vaccine, staff, pat_token, staff_token,
    )
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_is_unauthenticated() {
    let env = make_env();
    let req = Request::builder()
        .method("GET")
        .uri("/v1/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(router(&env), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["service"], "vax-daemon");
}

// ---------------------------------------------------------------------------
// Full happy path (with the too-early rejection in the middle)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_lifecycle_happy_path() {
    let env = make_env();
    let (order_id, _patient, hospital, vaccine, _staff, pat_token, staff_token) =
        seeded_order(&env).await;

    // Fresh order: pending on all axes, no record linked.
    let (status, body) = call(
        router(&env),
        patch(&format!("/v1/orders/{order_id}/approve"), &staff_token),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "approve: {body}");
    assert_eq!(body["order"]["vaccination_status"], "pending_vaccination");
    assert!(body["order"]["vaccination_record_id"].is_null());

    let (status, body) = call(
        router(&env),
        patch(&format!("/v1/orders/{order_id}/mark-as-paid"), &pat_token),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "pay: {body}");
    assert_eq!(body["order"]["payment_status"], "paid");

    let date = t0() + Duration::days(7);
    let (status, body) = call(
        router(&env),
        patch_json(
            &format!("/v1/orders/{order_id}/schedule-appointment"),
            &pat_token,
            json!({ "appointment_date": date }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "schedule: {body}");
    assert_eq!(body["order"]["appointment_status"], "scheduled");

    // Too early: the appointment date has not arrived.
    let (status, body) = call(
        router(&env),
        patch(&format!("/v1/orders/{order_id}/mark-vaccinated"), &staff_token),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "early confirm: {body}");
    assert!(
        body["error"].as_str().unwrap().contains("not arrived"),
        "descriptive rejection: {body}"
    );

    // Advance the clock past the appointment date and confirm.
    env.clock.advance(Duration::days(7) + Duration::hours(1));
    let (status, body) = call(
        router(&env),
        patch(&format!("/v1/orders/{order_id}/mark-vaccinated"), &staff_token),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "confirm: {body}");
    assert_eq!(body["order"]["vaccination_status"], "vaccinated");
    assert_eq!(body["order"]["appointment_status"], "completed");
    assert_eq!(body["certificate_email_sent"], true);

    // Record linked iff vaccinated.
    let record_id = body["record"]["record_id"].as_str().unwrap();
    assert_eq!(
        body["order"]["vaccination_record_id"].as_str().unwrap(),
        record_id
    );

    // Stock decreased by exactly 1; exactly one record exists.
    assert_eq!(env.store.stock_quantity(hospital, vaccine), Some(4));
    assert_eq!(env.store.record_count(), 1);
    assert_eq!(env.mailer.sent_count(), 1);
}

// ---------------------------------------------------------------------------
// Guard rejections along the way
// ---------------------------------------------------------------------------

#[tokio::test]
async fn approve_twice_is_conflict() {
    let env = make_env();
    let (order_id, .., staff_token) = seeded_order(&env).await;

    let (status, _) = call(
        router(&env),
        patch(&format!("/v1/orders/{order_id}/approve"), &staff_token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        router(&env),
        patch(&format!("/v1/orders/{order_id}/approve"), &staff_token),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let msg = body["error"].as_str().unwrap();
    assert!(msg.contains("pending_vaccination"), "current state: {msg}");
    assert!(msg.contains("pending_approval"), "required state: {msg}");
}

#[tokio::test]
async fn schedule_with_past_date_is_conflict() {
    let env = make_env();
    let (order_id, .., pat_token, staff_token) = seeded_order(&env).await;

    let _ = call(
        router(&env),
        patch(&format!("/v1/orders/{order_id}/approve"), &staff_token),
    )
    .await;
    let _ = call(
        router(&env),
        patch(&format!("/v1/orders/{order_id}/mark-as-paid"), &pat_token),
    )
    .await;

    let past = t0() - Duration::days(1);
    let (status, body) = call(
        router(&env),
        patch_json(
            &format!("/v1/orders/{order_id}/schedule-appointment"),
            &pat_token,
            json!({ "appointment_date": past }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    assert!(body["error"].as_str().unwrap().contains("in the past"));
}

#[tokio::test]
async fn mark_vaccinated_without_appointment_is_conflict() {
    let env = make_env();
    let (order_id, .., pat_token, staff_token) = seeded_order(&env).await;

    let _ = call(
        router(&env),
        patch(&format!("/v1/orders/{order_id}/approve"), &staff_token),
    )
    .await;
    let _ = call(
        router(&env),
        patch(&format!("/v1/orders/{order_id}/mark-as-paid"), &pat_token),
    )
    .await;

    let (status, body) = call(
        router(&env),
        patch(&format!("/v1/orders/{order_id}/mark-vaccinated"), &staff_token),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("appointment status is 'pending_scheduling'"));
}

#[tokio::test]
async fn cancel_by_patient_after_vaccination_is_conflict() {
    let env = make_env();
    let (order_id, .., pat_token, staff_token) = seeded_order(&env).await;

    // Drive to vaccinated.
    let _ = call(
        router(&env),
        patch(&format!("/v1/orders/{order_id}/approve"), &staff_token),
    )
    .await;
    let _ = call(
        router(&env),
        patch(&format!("/v1/orders/{order_id}/mark-as-paid"), &pat_token),
    )
    .await;
    let date = t0() + Duration::days(1);
    let _ = call(
        router(&env),
        patch_json(
            &format!("/v1/orders/{order_id}/schedule-appointment"),
            &pat_token,
            json!({ "appointment_date": date }),
        ),
    )
    .await;
    env.clock.advance(Duration::days(2));
    let (status, _) = call(
        router(&env),
        patch(&format!("/v1/orders/{order_id}/mark-vaccinated"), &staff_token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        router(&env),
        patch(&format!("/v1/orders/{order_id}/cancel-by-patient"), &pat_token),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    assert!(body["error"].as_str().unwrap().contains("vaccinated"));
}

// ---------------------------------------------------------------------------
// Cancel / refund flows
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_by_patient_after_payment_refunds() {
    let env = make_env();
    let (order_id, .., pat_token, staff_token) = seeded_order(&env).await;

    let _ = call(
        router(&env),
        patch(&format!("/v1/orders/{order_id}/approve"), &staff_token),
    )
    .await;
    let _ = call(
        router(&env),
        patch(&format!("/v1/orders/{order_id}/mark-as-paid"), &pat_token),
    )
    .await;

    let (status, body) = call(
        router(&env),
        patch(&format!("/v1/orders/{order_id}/cancel-by-patient"), &pat_token),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["order"]["payment_status"], "refunded");
    assert_eq!(body["order"]["vaccination_status"], "cancelled");
    assert_eq!(body["order"]["appointment_status"], "cancelled");
}

#[tokio::test]
async fn refund_by_staff_requires_paid() {
    let env = make_env();
    let (order_id, .., staff_token) = seeded_order(&env).await;

    let (status, body) = call(
        router(&env),
        patch(&format!("/v1/orders/{order_id}/refund"), &staff_token),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    assert!(body["error"].as_str().unwrap().contains("pending_payment"));
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

#[tokio::test]
async fn listings_scope_to_caller() {
    let env = make_env();
    let (order_id, _patient, hospital, .., pat_token, staff_token) = seeded_order(&env).await;

    let (status, body) = call(
        router(&env),
        Request::builder()
            .method("GET")
            .uri("/v1/orders/patient")
            .header("Authorization", format!("Bearer {pat_token}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["orders"].as_array().unwrap().len(), 1);
    assert_eq!(
        body["orders"][0]["order_id"].as_str().unwrap(),
        order_id.to_string()
    );

    let (status, body) = call(
        router(&env),
        Request::builder()
            .method("GET")
            .uri(format!("/v1/orders/hospital/{hospital}/pending-approval"))
            .header("Authorization", format!("Bearer {staff_token}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["orders"].as_array().unwrap().len(), 1);

    // Approving removes it from the pending-approval queue.
    let _ = call(
        router(&env),
        patch(&format!("/v1/orders/{order_id}/approve"), &staff_token),
    )
    .await;
    let (_, body) = call(
        router(&env),
        Request::builder()
            .method("GET")
            .uri(format!("/v1/orders/hospital/{hospital}/pending-approval"))
            .header("Authorization", format!("Bearer {staff_token}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(body["orders"].as_array().unwrap().len(), 0);
}

// ---------------------------------------------------------------------------
// Notifications are best-effort
// ---------------------------------------------------------------------------

#[tokio::test]
async fn notification_failure_does_not_fail_the_request() {
    let env = make_env();
    let (order_id, .., staff_token) = seeded_order(&env).await;

    env.notifier.fail_next(true);
    let (status, body) = call(
        router(&env),
        patch(&format!("/v1/orders/{order_id}/approve"), &staff_token),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["order"]["vaccination_status"], "pending_vaccination");
    assert!(env.notifier.kinds().is_empty());
}
