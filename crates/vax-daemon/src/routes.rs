//! Axum router and all HTTP handlers for vax-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly against an in-memory store.
//!
//! Handler shape for every transition endpoint:
//!   authenticate → policy check → load order → ownership/hospital check →
//!   `vax_lifecycle::apply` → persist (compare-and-swap) → execute effects →
//!   best-effort notification.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use vax_auth::{authenticate, is_allowed, Action, Claims};
use vax_db::StoreError;
use vax_lifecycle::{apply, reconcile_to_completed, LifecycleEvent, OrderPhase};
use vax_notify::NoticeKind;
use vax_schemas::{Role, VaccinationOrder, VaccinationRecord};

use crate::{
    api_types::{
        ApiError, CreateOrderRequest, HealthResponse, OrderListResponse, OrderResponse,
        ScheduleAppointmentRequest, VaccinatedResponse,
    },
    state::AppState,
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/orders", post(create_order))
        .route("/v1/orders/patient", get(list_own_orders))
        .route(
            "/v1/orders/hospital/:hospital_id/pending-approval",
            get(list_pending_approval),
        )
        .route("/v1/orders/:id/approve", patch(approve_order))
        .route("/v1/orders/:id/reject", patch(reject_order))
        .route("/v1/orders/:id/mark-as-paid", patch(mark_as_paid))
        .route(
            "/v1/orders/:id/schedule-appointment",
            patch(schedule_appointment),
        )
        .route("/v1/orders/:id/mark-vaccinated", patch(mark_vaccinated))
        .route("/v1/orders/:id/cancel-by-patient", patch(cancel_by_patient))
        .route("/v1/orders/:id/refund", patch(refund_order))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Authenticate the request and check the (role, action) policy table.
fn authorize(headers: &HeaderMap, st: &AppState, action: Action) -> Result<Claims, ApiError> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let claims = authenticate(header, &st.keys)?;
    if !is_allowed(claims.role, action) {
        return Err(ApiError::Forbidden(format!(
            "role '{}' may not perform '{}'",
            claims.role.as_str(),
            action.as_str()
        )));
    }
    Ok(claims)
}

async fn load_order(st: &AppState, order_id: Uuid) -> Result<VaccinationOrder, ApiError> {
    st.store
        .order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("order {order_id} not found")))
}

/// Only the owning patient. Staff and admin take the hospital-scoped paths;
/// the policy table never routes them here.
fn require_owner(claims: &Claims, order: &VaccinationOrder) -> Result<(), ApiError> {
    if claims.user_id != order.patient_id {
        return Err(ApiError::Forbidden(
            "only the owning patient may perform this action".into(),
        ));
    }
    Ok(())
}

/// Staff must belong to the order's hospital; admin may act anywhere.
fn require_hospital(claims: &Claims, hospital_id: Uuid) -> Result<(), ApiError> {
    if claims.role == Role::Admin {
        return Ok(());
    }
    if claims.hospital_id != Some(hospital_id) {
        return Err(ApiError::Forbidden(
            "caller does not belong to this order's hospital".into(),
        ));
    }
    Ok(())
}

fn phase_of(order: &VaccinationOrder) -> OrderPhase {
    OrderPhase {
        vaccination: order.vaccination_status,
        payment: order.payment_status,
        appointment: order.appointment_status,
        appointment_date: order.appointment_date,
    }
}

fn with_phase(
    mut order: VaccinationOrder,
    phase: OrderPhase,
    record_id: Option<Uuid>,
    updated_at_utc: DateTime<Utc>,
) -> VaccinationOrder {
    order.vaccination_status = phase.vaccination;
    order.payment_status = phase.payment;
    order.appointment_status = phase.appointment;
    order.appointment_date = phase.appointment_date;
    if record_id.is_some() {
        order.vaccination_record_id = record_id;
    }
    order.updated_at_utc = updated_at_utc;
    order
}

/// Fire a notification to the order's patient. Best-effort: failures are
/// logged and swallowed.
async fn notify_patient(st: &AppState, order: &VaccinationOrder, kind: NoticeKind, message: &str) {
    if let Err(e) = st.notifier.notify(order.patient_id, message, kind).await {
        warn!(order_id = %order.order_id, kind = kind.as_str(), error = %e, "notification failed");
    }
}

/// Apply `event`, persist the transition with a compare-and-swap on the
/// current phase, and return the updated order. Used by every transition
/// endpoint except mark-vaccinated (which interleaves effects).
async fn transition(
    st: &AppState,
    order: VaccinationOrder,
    event: LifecycleEvent,
) -> Result<VaccinationOrder, ApiError> {
    let now = st.clock.now();
    let expected = phase_of(&order);
    let outcome = apply(expected, &event, now)?;

    st.store
        .update_order_phase(order.order_id, expected, outcome.phase, None, now)
        .await?;

    Ok(with_phase(order, outcome.phase, None, now))
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/orders
// ---------------------------------------------------------------------------

pub(crate) async fn create_order(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = authorize(&headers, &st, Action::CreateOrder)?;

    if req.dose_number <= 0 {
        return Err(ApiError::BadRequest("dose_number must be positive".into()));
    }
    if req.charge_amount_cents < 0 {
        return Err(ApiError::BadRequest(
            "charge_amount_cents must not be negative".into(),
        ));
    }

    // Patients order for themselves; staff/admin may name any patient.
    let patient_id = match (claims.role, req.patient_id) {
        (Role::Patient, Some(other)) if other != claims.user_id => {
            return Err(ApiError::Forbidden(
                "patients may only create orders for themselves".into(),
            ));
        }
        (Role::Patient, _) => claims.user_id,
        (_, Some(patient_id)) => patient_id,
        (_, None) => {
            return Err(ApiError::BadRequest(
                "patient_id is required when staff creates an order".into(),
            ));
        }
    };

    let patient = st
        .store
        .user(patient_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("patient {patient_id} not found")))?;
    if patient.role != Role::Patient {
        return Err(ApiError::BadRequest(format!(
            "user {patient_id} is not a patient"
        )));
    }
    if !st.store.hospital_exists(req.hospital_id).await? {
        return Err(ApiError::NotFound(format!(
            "hospital {} not found",
            req.hospital_id
        )));
    }
    if !st.store.vaccine_exists(req.vaccine_id).await? {
        return Err(ApiError::NotFound(format!(
            "vaccine {} not found",
            req.vaccine_id
        )));
    }

    let now = st.clock.now();
    let initial = OrderPhase::new();
    let order = VaccinationOrder {
        order_id: Uuid::new_v4(),
        patient_id,
        hospital_id: req.hospital_id,
        vaccine_id: req.vaccine_id,
        dose_number: req.dose_number,
        charge_amount_cents: req.charge_amount_cents,
        payment_status: initial.payment,
        appointment_status: initial.appointment,
        vaccination_status: initial.vaccination,
        appointment_date: None,
        vaccination_record_id: None,
        created_by: claims.user_id,
        created_at_utc: now,
        updated_at_utc: now,
    };

    st.store.insert_order(&order).await?;
    info!(order_id = %order.order_id, patient_id = %patient_id, "order created");

    Ok((StatusCode::CREATED, Json(OrderResponse { order })))
}

// ---------------------------------------------------------------------------
// PATCH /v1/orders/:id/approve
// ---------------------------------------------------------------------------

pub(crate) async fn approve_order(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = authorize(&headers, &st, Action::ApproveOrder)?;
    let order = load_order(&st, order_id).await?;
    require_hospital(&claims, order.hospital_id)?;

    let order = transition(&st, order, LifecycleEvent::Approve).await?;
    info!(order_id = %order.order_id, "order approved");
    notify_patient(
        &st,
        &order,
        NoticeKind::OrderApproved,
        "your vaccination request was approved; please complete payment",
    )
    .await;

    Ok(Json(OrderResponse { order }))
}

// ---------------------------------------------------------------------------
// PATCH /v1/orders/:id/reject
// ---------------------------------------------------------------------------

pub(crate) async fn reject_order(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = authorize(&headers, &st, Action::RejectOrder)?;
    let order = load_order(&st, order_id).await?;
    require_hospital(&claims, order.hospital_id)?;

    let order = transition(&st, order, LifecycleEvent::Reject).await?;
    info!(order_id = %order.order_id, "order rejected");
    notify_patient(
        &st,
        &order,
        NoticeKind::OrderRejected,
        "your vaccination request was rejected",
    )
    .await;

    Ok(Json(OrderResponse { order }))
}

// ---------------------------------------------------------------------------
// PATCH /v1/orders/:id/mark-as-paid
// ---------------------------------------------------------------------------

pub(crate) async fn mark_as_paid(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = authorize(&headers, &st, Action::MarkPaid)?;
    let order = load_order(&st, order_id).await?;
    require_owner(&claims, &order)?;

    let order = transition(&st, order, LifecycleEvent::MarkPaid).await?;
    info!(order_id = %order.order_id, "order paid");
    notify_patient(
        &st,
        &order,
        NoticeKind::PaymentReceived,
        "payment received; you can now schedule your appointment",
    )
    .await;

    Ok(Json(OrderResponse { order }))
}

// ---------------------------------------------------------------------------
// PATCH /v1/orders/:id/schedule-appointment
// ---------------------------------------------------------------------------

pub(crate) async fn schedule_appointment(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
    Json(req): Json<ScheduleAppointmentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = authorize(&headers, &st, Action::ScheduleAppointment)?;
    let order = load_order(&st, order_id).await?;
    require_owner(&claims, &order)?;

    let order = transition(
        &st,
        order,
        LifecycleEvent::ScheduleAppointment {
            date: req.appointment_date,
        },
    )
    .await?;
    info!(order_id = %order.order_id, date = %req.appointment_date, "appointment scheduled");
    notify_patient(
        &st,
        &order,
        NoticeKind::AppointmentScheduled,
        "your vaccination appointment is scheduled",
    )
    .await;

    Ok(Json(OrderResponse { order }))
}

// ---------------------------------------------------------------------------
// PATCH /v1/orders/:id/mark-vaccinated
// ---------------------------------------------------------------------------

/// Confirm the dose was administered.
///
/// Effect order matters: the stock decrement runs first and an insufficient
/// stock aborts the whole transition before any record exists. The
/// certificate email runs last; its failure is reported via
/// `certificate_email_sent: false`, never by reverting the transition.
pub(crate) async fn mark_vaccinated(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = authorize(&headers, &st, Action::MarkVaccinated)?;
    let order = load_order(&st, order_id).await?;

    // Patients confirm their own order; staff confirm for their hospital.
    if claims.role == Role::Patient {
        require_owner(&claims, &order)?;
    } else {
        require_hospital(&claims, order.hospital_id)?;
    }

    // Idempotent reconciliation: a record may already exist for this order
    // (replayed request) or for this (patient, vaccine, dose) via a
    // superseded order. Align the order to it instead of erroring.
    let existing = match st.store.record_for_order(order.order_id).await? {
        Some(r) => Some(r),
        None => {
            st.store
                .record_for_dose(order.patient_id, order.vaccine_id, order.dose_number)
                .await?
        }
    };
    if let Some(record) = existing {
        let order = reconcile_order(&st, order, &record).await?;
        info!(order_id = %order.order_id, record_id = %record.record_id,
              "mark-vaccinated replay reconciled to existing record");
        return Ok(Json(VaccinatedResponse {
            order,
            record,
            certificate_email_sent: None,
        }));
    }

    let now = st.clock.now();
    let expected = phase_of(&order);
    let outcome = apply(
        expected,
        &LifecycleEvent::MarkVaccinated { actor: claims.role },
        now,
    )?;

    // Stock first: an exhausted counter aborts before any record exists.
    if outcome.effects.decrement_stock {
        st.store
            .decrement_stock(order.hospital_id, order.vaccine_id)
            .await?;
    }

    let record = VaccinationRecord {
        record_id: Uuid::new_v4(),
        order_id: order.order_id,
        patient_id: order.patient_id,
        hospital_id: order.hospital_id,
        vaccine_id: order.vaccine_id,
        dose_number: order.dose_number,
        administered_by: claims.role.is_staff().then_some(claims.user_id),
        vaccinated_at_utc: now,
    };

    match st.store.insert_record(&record).await {
        Ok(()) => {}
        // Lost a race with a concurrent confirmation: reconcile to theirs.
        Err(StoreError::DuplicateRecord) => {
            let record = st
                .store
                .record_for_order(order.order_id)
                .await?
                .ok_or_else(|| {
                    ApiError::Internal(anyhow::anyhow!(
                        "record insert conflicted but no record found for order {order_id}"
                    ))
                })?;
            let order = reconcile_order(&st, order, &record).await?;
            return Ok(Json(VaccinatedResponse {
                order,
                record,
                certificate_email_sent: None,
            }));
        }
        Err(e) => return Err(e.into()),
    }

    st.store
        .update_order_phase(
            order.order_id,
            expected,
            outcome.phase,
            Some(record.record_id),
            now,
        )
        .await?;

    let order = with_phase(order, outcome.phase, Some(record.record_id), now);
    info!(order_id = %order.order_id, record_id = %record.record_id,
          stock_decremented = outcome.effects.decrement_stock, "order vaccinated");

    notify_patient(
        &st,
        &order,
        NoticeKind::Vaccinated,
        "your vaccination is confirmed; the certificate is on its way",
    )
    .await;

    // Certificate email is best-effort; a failure is surfaced on the
    // response, not rolled back.
    let email = st
        .store
        .user(order.patient_id)
        .await
        .ok()
        .flatten()
        .and_then(|u| u.email);
    let sent = match st.mailer.send_certificate(email.as_deref(), &record).await {
        Ok(()) => true,
        Err(e) => {
            warn!(order_id = %order.order_id, error = %e, "certificate email failed");
            false
        }
    };

    Ok(Json(VaccinatedResponse {
        order,
        record,
        certificate_email_sent: Some(sent),
    }))
}

/// Align an order whose record already exists into the completed state.
async fn reconcile_order(
    st: &AppState,
    order: VaccinationOrder,
    record: &VaccinationRecord,
) -> Result<VaccinationOrder, ApiError> {
    if order.vaccination_status == vax_schemas::VaccinationStatus::Vaccinated {
        return Ok(order);
    }
    let now = st.clock.now();
    let expected = phase_of(&order);
    let next = reconcile_to_completed(expected);
    st.store
        .update_order_phase(order.order_id, expected, next, Some(record.record_id), now)
        .await?;
    Ok(with_phase(order, next, Some(record.record_id), now))
}

// ---------------------------------------------------------------------------
// PATCH /v1/orders/:id/cancel-by-patient
// ---------------------------------------------------------------------------

pub(crate) async fn cancel_by_patient(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = authorize(&headers, &st, Action::CancelByPatient)?;
    let order = load_order(&st, order_id).await?;
    require_owner(&claims, &order)?;

    let was_paid = order.payment_status == vax_schemas::PaymentStatus::Paid;
    let order = transition(&st, order, LifecycleEvent::CancelByPatient).await?;
    info!(order_id = %order.order_id, refund = was_paid, "order cancelled by patient");

    let (kind, msg) = if was_paid {
        (
            NoticeKind::PaymentRefunded,
            "your order was cancelled and the payment will be refunded",
        )
    } else {
        (NoticeKind::OrderCancelled, "your order was cancelled")
    };
    notify_patient(&st, &order, kind, msg).await;

    Ok(Json(OrderResponse { order }))
}

// ---------------------------------------------------------------------------
// PATCH /v1/orders/:id/refund
// ---------------------------------------------------------------------------

pub(crate) async fn refund_order(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = authorize(&headers, &st, Action::RefundOrder)?;
    let order = load_order(&st, order_id).await?;
    require_hospital(&claims, order.hospital_id)?;

    let order = transition(&st, order, LifecycleEvent::RefundByStaff).await?;
    info!(order_id = %order.order_id, "order refunded by staff");
    notify_patient(
        &st,
        &order,
        NoticeKind::PaymentRefunded,
        "your payment was refunded and the order closed",
    )
    .await;

    Ok(Json(OrderResponse { order }))
}

// ---------------------------------------------------------------------------
// GET /v1/orders/patient
// ---------------------------------------------------------------------------

pub(crate) async fn list_own_orders(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let claims = authorize(&headers, &st, Action::ListOwnOrders)?;
    let orders = st.store.orders_for_patient(claims.user_id).await?;
    Ok(Json(OrderListResponse { orders }))
}

// ---------------------------------------------------------------------------
// GET /v1/orders/hospital/:hospital_id/pending-approval
// ---------------------------------------------------------------------------

pub(crate) async fn list_pending_approval(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(hospital_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let claims = authorize(&headers, &st, Action::ListPendingApproval)?;
    require_hospital(&claims, hospital_id)?;
    let orders = st.store.pending_approval_for_hospital(hospital_id).await?;
    Ok(Json(OrderListResponse { orders }))
}
