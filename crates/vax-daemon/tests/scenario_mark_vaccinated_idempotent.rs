//! Idempotent reconciliation of mark-vaccinated: replays return the same
//! record, never a duplicate, and never a second stock decrement. Also
//! covers the patient self-confirmation stock policy and the certificate
//! soft-failure path.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Duration, Utc};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;

use vax_auth::JwtKeys;
use vax_daemon::{routes, state::AppState};
use vax_db::LifecycleStore;
use vax_schemas::Role;
use vax_testkit::{ManualClock, MemStore, RecordingMailer, RecordingNotifier, TEST_JWT_SECRET};

fn t0() -> DateTime<Utc> {
    "2026-03-01T12:00:00Z".parse().unwrap()
}

struct TestEnv {
    store: Arc<MemStore>,
    clock: Arc<ManualClock>,
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
        notifier as Arc<dyn vax_notify::NotifyChannel>,
        Arc::clone(&mailer) as Arc<dyn vax_notify::CertificateMailer>,
        keys.clone(),
        Arc::clone(&clock) as Arc<dyn vax_lifecycle::Clock>,
    ));
    TestEnv {
        store,
        clock,
        mailer,
        state,
        keys,
    }
}

fn router(env: &TestEnv) -> axum::Router {
    routes::build_router(Arc::clone(&env.state))
}

fn patch(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("PATCH")
        .uri(uri)
        .header("Authorization", format!("Bearer {token}"))
        .body(Body::empty())
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

struct World {
    order_id: Uuid,
    hospital: Uuid,
    vaccine: Uuid,
    pat_token: String,
    staff_token: String,
}

/// Create an order and drive it to (pending_vaccination, paid, scheduled)
/// with the appointment date already reached.
async fn ready_to_confirm(env: &TestEnv) -> World {
    let patient = env.store.add_patient(Some("pat@example.org"));
    let hospital = env.store.add_hospital("General");
    let vaccine = env.store.add_vaccine("VX-1");
    let staff = env.store.add_staff(hospital);
    env.store.set_stock(hospital, vaccine, 3);

    let pat_token = env.keys.mint(patient, Role::Patient, None, 24).unwrap();
    let staff_token = env
        .keys
        .mint(staff, Role::HospitalStaff, Some(hospital), 24)
        .unwrap();

    let (status, body) = call(
        router(env),
        Request::builder()
            .method("POST")
            .uri("/v1/orders")
            .header("Authorization", format!("Bearer {pat_token}"))
            .header("content-type", "application/json")
            .body(Body::from(
                json!({
                    "hospital_id": hospital,
                    "vaccine_id": vaccine,
                    "dose_number": 1,
                    "charge_amount_cents": 2500
                })
                .to_string(),
            ))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let order_id: Uuid = body["order"]["order_id"]
        .as_str()
        .unwrap()
        .parse()
        .unwrap();

    let _ = call(
        router(env),
        patch(&format!("/v1/orders/{order_id}/approve"), &staff_token),
    )
    .await;
    let _ = call(
        router(env),
        patch(&format!("/v1/orders/{order_id}/mark-as-paid"), &pat_token),
    )
    .await;
    let date = t0() + Duration::days(2);
    let _ = call(
        router(env),
        Request::builder()
            .method("PATCH")
            .uri(format!("/v1/orders/{order_id}/schedule-appointment"))
            .header("Authorization", format!("Bearer {pat_token}"))
            .header("content-type", "application/json")
            .body(Body::from(json!({ "appointment_date": date }).to_string()))
            .unwrap(),
    )
    .await;
    env.clock.advance(Duration::days(3));

    World {
        order_id,
        hospital,
        vaccine,
        pat_token,
        staff_token,
    }
}

// ---------------------------------------------------------------------------
// Replay returns the same record
// ---------------------------------------------------------------------------

#[tokio::test]
async fn double_confirm_returns_same_record_without_double_decrement() {
    let env = make_env();
    let w = ready_to_confirm(&env).await;

    let (status, first) = call(
        router(&env),
        patch(
            &format!("/v1/orders/{}/mark-vaccinated", w.order_id),
            &w.staff_token,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{first}");
    let record_id = first["record"]["record_id"].as_str().unwrap().to_string();
    assert_eq!(first["certificate_email_sent"], true);
    assert_eq!(env.store.stock_quantity(w.hospital, w.vaccine), Some(2));

    // Replay: same record, reconciled order, no send attempted, no decrement.
    let (status, second) = call(
        router(&env),
        patch(
            &format!("/v1/orders/{}/mark-vaccinated", w.order_id),
            &w.staff_token,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{second}");
    assert_eq!(second["record"]["record_id"].as_str().unwrap(), record_id);
    assert_eq!(second["order"]["vaccination_status"], "vaccinated");
    assert!(
        second.get("certificate_email_sent").is_none()
            || second["certificate_email_sent"].is_null(),
        "replay must not re-send the certificate: {second}"
    );

    assert_eq!(env.store.stock_quantity(w.hospital, w.vaccine), Some(2));
    assert_eq!(env.store.record_count(), 1);
    assert_eq!(env.mailer.sent_count(), 1);
}

// ---------------------------------------------------------------------------
// Patient self-confirmation: stock untouched, record unattributed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn patient_self_confirmation_skips_stock_decrement() {
    let env = make_env();
    let w = ready_to_confirm(&env).await;

    let (status, body) = call(
        router(&env),
        patch(
            &format!("/v1/orders/{}/mark-vaccinated", w.order_id),
            &w.pat_token,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["order"]["vaccination_status"], "vaccinated");
    assert!(body["record"]["administered_by"].is_null());

    // Documented policy: self-confirmation does not touch inventory.
    assert_eq!(env.store.stock_quantity(w.hospital, w.vaccine), Some(3));
    assert_eq!(env.store.record_count(), 1);
}

// ---------------------------------------------------------------------------
// Insufficient stock aborts before the record is created
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exhausted_stock_aborts_staff_confirmation() {
    let env = make_env();
    let w = ready_to_confirm(&env).await;
    env.store.set_stock(w.hospital, w.vaccine, 0);

    let (status, body) = call(
        router(&env),
        patch(
            &format!("/v1/orders/{}/mark-vaccinated", w.order_id),
            &w.staff_token,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
    assert!(body["error"].as_str().unwrap().contains("stock"));

    // Nothing happened: no record, order still pending_vaccination.
    assert_eq!(env.store.record_count(), 0);
    let order = env
        .store
        .order(w.order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        order.vaccination_status,
        vax_schemas::VaccinationStatus::PendingVaccination
    );
}

// ---------------------------------------------------------------------------
// Certificate failure is a soft failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn certificate_failure_does_not_revert_the_transition() {
    let env = make_env();
    let w = ready_to_confirm(&env).await;
    env.mailer.fail_next(true);

    let (status, body) = call(
        router(&env),
        patch(
            &format!("/v1/orders/{}/mark-vaccinated", w.order_id),
            &w.staff_token,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["order"]["vaccination_status"], "vaccinated");
    assert_eq!(body["certificate_email_sent"], false);

    // Transition stuck: the store agrees with the response.
    let order = env.store.order(w.order_id).await.unwrap().unwrap();
    assert_eq!(
        order.vaccination_status,
        vax_schemas::VaccinationStatus::Vaccinated
    );
    assert!(order.vaccination_record_id.is_some());
    assert_eq!(env.store.stock_quantity(w.hospital, w.vaccine), Some(2));
}
