//! Request/response DTOs and the API error type for vax-daemon.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use vax_db::StoreError;
use vax_lifecycle::TransitionError;
use vax_schemas::{VaccinationOrder, VaccinationRecord};

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    /// Omitted when a patient orders for themselves; staff/admin set it to
    /// order on a patient's behalf.
    #[serde(default)]
    pub patient_id: Option<Uuid>,
    pub hospital_id: Uuid,
    pub vaccine_id: Uuid,
    pub dose_number: i32,
    pub charge_amount_cents: i64,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleAppointmentRequest {
    /// RFC 3339; must not be in the past.
    pub appointment_date: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub order: VaccinationOrder,
}

/// Response of mark-vaccinated. `certificate_email_sent` is the soft-failure
/// flag: `Some(false)` means the transition committed but the email did not
/// go out; `None` means no send was attempted (idempotent replay of an
/// already-completed order).
#[derive(Debug, Serialize)]
pub struct VaccinatedResponse {
    pub order: VaccinationOrder,
    pub record: VaccinationRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_email_sent: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct OrderListResponse {
    pub orders: Vec<VaccinationOrder>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

// ---------------------------------------------------------------------------
// ApiError
// ---------------------------------------------------------------------------

/// Error taxonomy of the HTTP surface. Everything a handler can fail with
/// converges here and is rendered as `{ "error": "..." }`.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed identifiers, missing fields, out-of-range values → 400.
    BadRequest(String),
    /// Missing/invalid bearer token → 401.
    Unauthorized(String),
    /// Wrong role, wrong hospital, not the order owner → 403.
    Forbidden(String),
    /// Order/patient/hospital/vaccine absent → 404.
    NotFound(String),
    /// Illegal transition, duplicate active order, insufficient stock → 409.
    Conflict(String),
    /// Unexpected persistence failure → 500 with message passthrough.
    Internal(anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            Self::BadRequest(m)
            | Self::Unauthorized(m)
            | Self::Forbidden(m)
            | Self::NotFound(m)
            | Self::Conflict(m) => m,
            Self::Internal(e) => {
                tracing::error!(error = %e, "internal error");
                e.to_string()
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl From<TransitionError> for ApiError {
    fn from(e: TransitionError) -> Self {
        Self::Conflict(e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateActiveOrder
            | StoreError::DuplicateRecord
            | StoreError::InsufficientStock
            | StoreError::PhaseConflict => Self::Conflict(e.to_string()),
            StoreError::Corrupt(_) | StoreError::Backend(_) => Self::Internal(e.into()),
        }
    }
}

impl From<vax_auth::AuthError> for ApiError {
    fn from(e: vax_auth::AuthError) -> Self {
        Self::Unauthorized(e.to_string())
    }
}
