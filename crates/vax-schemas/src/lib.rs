//! Shared domain types for the vaccination order service.
//!
//! Everything here is plain data: serde-serializable, no IO, no behavior
//! beyond small status predicates. The lifecycle rules that govern how these
//! statuses may change live in `vax-lifecycle`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Status axes
// ---------------------------------------------------------------------------

/// Vaccination axis of an order's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaccinationStatus {
    /// Created; awaiting staff approval.
    PendingApproval,
    /// Approved; dose not yet administered.
    PendingVaccination,
    /// Dose administered. **Terminal.**
    Vaccinated,
    /// Closed without administering the dose. **Terminal.**
    NotVaccinated,
    /// Rejected or withdrawn. **Terminal.**
    Cancelled,
}

impl VaccinationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Vaccinated | Self::NotVaccinated | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingApproval => "pending_approval",
            Self::PendingVaccination => "pending_vaccination",
            Self::Vaccinated => "vaccinated",
            Self::NotVaccinated => "not_vaccinated",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for VaccinationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VaccinationStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_approval" => Ok(Self::PendingApproval),
            "pending_vaccination" => Ok(Self::PendingVaccination),
            "vaccinated" => Ok(Self::Vaccinated),
            "not_vaccinated" => Ok(Self::NotVaccinated),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownStatus {
                axis: "vaccination_status",
                value: other.to_string(),
            }),
        }
    }
}

/// Payment axis of an order's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    PendingPayment,
    Paid,
    /// Payment returned after being made. **Terminal.**
    Refunded,
    /// Payment abandoned before being made. **Terminal.**
    Cancelled,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Refunded | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::Paid => "paid",
            Self::Refunded => "refunded",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_payment" => Ok(Self::PendingPayment),
            "paid" => Ok(Self::Paid),
            "refunded" => Ok(Self::Refunded),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownStatus {
                axis: "payment_status",
                value: other.to_string(),
            }),
        }
    }
}

/// Appointment axis of an order's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    PendingScheduling,
    Scheduled,
    /// Appointment took place. **Terminal.**
    Completed,
    /// Appointment abandoned. **Terminal.**
    Cancelled,
}

impl AppointmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingScheduling => "pending_scheduling",
            Self::Scheduled => "scheduled",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AppointmentStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_scheduling" => Ok(Self::PendingScheduling),
            "scheduled" => Ok(Self::Scheduled),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(UnknownStatus {
                axis: "appointment_status",
                value: other.to_string(),
            }),
        }
    }
}

/// A status column held a value outside the known set (schema drift).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus {
    pub axis: &'static str,
    pub value: String,
}

impl std::fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown {} value '{}'", self.axis, self.value)
    }
}

impl std::error::Error for UnknownStatus {}

// ---------------------------------------------------------------------------
// Actors
// ---------------------------------------------------------------------------

/// Caller role carried in the bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Patient,
    HospitalStaff,
    Admin,
}

impl Role {
    /// Staff and admin may act on behalf of a hospital.
    pub fn is_staff(&self) -> bool {
        matches!(self, Self::HospitalStaff | Self::Admin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::HospitalStaff => "hospital_staff",
            Self::Admin => "admin",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "patient" => Ok(Self::Patient),
            "hospital_staff" => Ok(Self::HospitalStaff),
            "admin" => Ok(Self::Admin),
            other => Err(UnknownStatus {
                axis: "role",
                value: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// One patient's request for one dose of one vaccine at one hospital.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaccinationOrder {
    pub order_id: Uuid,
    pub patient_id: Uuid,
    pub hospital_id: Uuid,
    pub vaccine_id: Uuid,
    /// 1-based dose number within the vaccine's series.
    pub dose_number: i32,
    /// Money as integer cents; never negative.
    pub charge_amount_cents: i64,
    pub payment_status: PaymentStatus,
    pub appointment_status: AppointmentStatus,
    pub vaccination_status: VaccinationStatus,
    pub appointment_date: Option<DateTime<Utc>>,
    /// Set iff `vaccination_status == Vaccinated`.
    pub vaccination_record_id: Option<Uuid>,
    pub created_by: Uuid,
    pub created_at_utc: DateTime<Utc>,
    pub updated_at_utc: DateTime<Utc>,
}

impl VaccinationOrder {
    /// An order is active while neither the vaccination axis nor the payment
    /// axis has reached a terminal state. Active orders block duplicate
    /// creation for the same (patient, hospital, vaccine, dose).
    pub fn is_active(&self) -> bool {
        !self.vaccination_status.is_terminal() && !self.payment_status.is_terminal()
    }
}

/// Proof that the dose of an order was administered. One per completed order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaccinationRecord {
    pub record_id: Uuid,
    /// Unique: at most one record per order.
    pub order_id: Uuid,
    pub patient_id: Uuid,
    pub hospital_id: Uuid,
    pub vaccine_id: Uuid,
    pub dose_number: i32,
    /// None when the patient self-confirmed.
    pub administered_by: Option<Uuid>,
    pub vaccinated_at_utc: DateTime<Utc>,
}

/// Per (hospital, vaccine) dose inventory. Quantity never goes below zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaccineStock {
    pub hospital_id: Uuid,
    pub vaccine_id: Uuid,
    pub quantity: i64,
}

/// Directory entry for a user known to the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEntry {
    pub user_id: Uuid,
    pub role: Role,
    pub hospital_id: Option<Uuid>,
    pub email: Option<String>,
}
