//! vax-auth
//!
//! Bearer-token authentication and the authorization policy table.
//!
//! Tokens are HS256 JWTs carrying `{user_id, role, hospital_id?}`. Instead of
//! ad-hoc role checks scattered per route, every endpoint names an [`Action`]
//! and authorization is one lookup in [`is_allowed`]. Ownership and
//! same-hospital checks remain per-handler because they need the order row.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use vax_schemas::Role;

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

/// JWT payload. `exp` is seconds since the epoch, as jsonwebtoken expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub role: Role,
    /// Present for hospital_staff; the hospital the caller acts for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hospital_id: Option<Uuid>,
    pub exp: i64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing or malformed Authorization header")]
    MissingBearer,

    #[error("invalid or expired token")]
    InvalidToken,
}

/// HS256 key pair derived from the shared secret.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtKeys {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Mint a token valid for `ttl_hours`.
    pub fn mint(
        &self,
        user_id: Uuid,
        role: Role,
        hospital_id: Option<Uuid>,
        ttl_hours: i64,
    ) -> Result<String, AuthError> {
        let claims = Claims {
            user_id,
            role,
            hospital_id,
            exp: (Utc::now() + Duration::hours(ttl_hours)).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding).map_err(|_| AuthError::InvalidToken)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding, &Validation::default())
            .map(|data| data.claims)
            .map_err(|_| AuthError::InvalidToken)
    }
}

/// Extract and verify the bearer token from an `Authorization` header value.
pub fn authenticate(header: Option<&str>, keys: &JwtKeys) -> Result<Claims, AuthError> {
    let header = header.ok_or(AuthError::MissingBearer)?;
    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .ok_or(AuthError::MissingBearer)?;
    keys.verify(token.trim())
}

// ---------------------------------------------------------------------------
// Authorization policy
// ---------------------------------------------------------------------------

/// Every authenticated operation the service exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateOrder,
    ApproveOrder,
    RejectOrder,
    MarkPaid,
    ScheduleAppointment,
    MarkVaccinated,
    CancelByPatient,
    RefundOrder,
    ListOwnOrders,
    ListPendingApproval,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateOrder => "create-order",
            Self::ApproveOrder => "approve",
            Self::RejectOrder => "reject",
            Self::MarkPaid => "mark-as-paid",
            Self::ScheduleAppointment => "schedule-appointment",
            Self::MarkVaccinated => "mark-vaccinated",
            Self::CancelByPatient => "cancel-by-patient",
            Self::RefundOrder => "refund",
            Self::ListOwnOrders => "list-own-orders",
            Self::ListPendingApproval => "list-pending-approval",
        }
    }
}

/// The complete (role, action) grant table. Anything absent is denied.
const POLICY: &[(Role, Action)] = &[
    (Role::Patient, Action::CreateOrder),
    (Role::Patient, Action::MarkPaid),
    (Role::Patient, Action::ScheduleAppointment),
    (Role::Patient, Action::MarkVaccinated),
    (Role::Patient, Action::CancelByPatient),
    (Role::Patient, Action::ListOwnOrders),
    (Role::HospitalStaff, Action::CreateOrder),
    (Role::HospitalStaff, Action::ApproveOrder),
    (Role::HospitalStaff, Action::RejectOrder),
    (Role::HospitalStaff, Action::MarkVaccinated),
    (Role::HospitalStaff, Action::RefundOrder),
    (Role::HospitalStaff, Action::ListPendingApproval),
    (Role::Admin, Action::CreateOrder),
    (Role::Admin, Action::ApproveOrder),
    (Role::Admin, Action::RejectOrder),
    (Role::Admin, Action::MarkVaccinated),
    (Role::Admin, Action::RefundOrder),
    (Role::Admin, Action::ListPendingApproval),
];

pub fn is_allowed(role: Role, action: Action) -> bool {
    POLICY.contains(&(role, action))
}
