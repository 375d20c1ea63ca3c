//! Order lifecycle state machine.
//!
//! # Design
//!
//! Explicit state machine for a single vaccination order. Every lifecycle
//! event is applied via [`apply`], which enforces two invariants:
//!
//! 1. **Legal transitions only.** Illegal events return
//!    [`TransitionError`] naming the current state and the state the event
//!    requires. Callers turn this into a 409 response; state is unchanged.
//! 2. **Side effects as data.** A successful transition returns an
//!    [`Effects`] descriptor (stock decrement, record creation, refund); the
//!    caller executes those against the store exactly once. Nothing in this
//!    module performs IO.
//!
//! # State diagram (three axes tracked jointly)
//!
//! ```text
//! vaccination: pending_approval ──► pending_vaccination ──► vaccinated (term.)
//!                     │                     │          └──► not_vaccinated (term.)
//!                     └────────────► cancelled (term.) ◄────┘
//!
//! payment:     pending_payment ──► paid ──► refunded (term.)
//!                     └──────────► cancelled (term.)
//!
//! appointment: pending_scheduling ──► scheduled ──► completed (term.)
//!                     └───────────────────┴──────► cancelled (term.)
//! ```
//!
//! The axes are independent columns on one order, but every event guards
//! across all three (e.g. scheduling requires approval *and* payment first).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vax_schemas::{AppointmentStatus, PaymentStatus, Role, VaccinationStatus};

// ---------------------------------------------------------------------------
// OrderPhase
// ---------------------------------------------------------------------------

/// The lifecycle-relevant slice of an order: the three status axes plus the
/// appointment date they guard on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPhase {
    pub vaccination: VaccinationStatus,
    pub payment: PaymentStatus,
    pub appointment: AppointmentStatus,
    pub appointment_date: Option<DateTime<Utc>>,
}

impl OrderPhase {
    /// Phase of a freshly created order.
    pub fn new() -> Self {
        Self {
            vaccination: VaccinationStatus::PendingApproval,
            payment: PaymentStatus::PendingPayment,
            appointment: AppointmentStatus::PendingScheduling,
            appointment_date: None,
        }
    }

    /// True while the order still blocks duplicate creation for the same
    /// (patient, hospital, vaccine, dose).
    pub fn is_active(&self) -> bool {
        !self.vaccination.is_terminal() && !self.payment.is_terminal()
    }
}

impl Default for OrderPhase {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// LifecycleEvent
// ---------------------------------------------------------------------------

/// Events that drive transitions on an [`OrderPhase`].
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// Staff approves the request (→ `pending_vaccination`).
    Approve,
    /// Staff rejects the request; cascades cancellation across all axes.
    Reject,
    /// Patient pays the charge (→ `paid`).
    MarkPaid,
    /// Patient books the appointment slot (→ `scheduled`).
    ScheduleAppointment { date: DateTime<Utc> },
    /// Dose administered and confirmed. `actor` decides the stock policy:
    /// staff/admin confirmation decrements stock, patient self-confirmation
    /// does not (documented policy, not a bug — see DESIGN.md).
    MarkVaccinated { actor: Role },
    /// Owning patient withdraws the order before vaccination.
    CancelByPatient,
    /// Staff refunds a paid order and closes it.
    RefundByStaff,
}

impl LifecycleEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::MarkPaid => "mark-as-paid",
            Self::ScheduleAppointment { .. } => "schedule-appointment",
            Self::MarkVaccinated { .. } => "mark-vaccinated",
            Self::CancelByPatient => "cancel-by-patient",
            Self::RefundByStaff => "refund",
        }
    }
}

// ---------------------------------------------------------------------------
// TransitionError
// ---------------------------------------------------------------------------

/// Returned when an event cannot legally be applied to the current phase.
///
/// Every variant names the current state and what the event requires, so the
/// HTTP layer can surface a descriptive 409 without further lookups.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("{event}: vaccination status is '{current}', requires '{required}'")]
    VaccinationState {
        event: &'static str,
        current: VaccinationStatus,
        required: &'static str,
    },

    #[error("{event}: payment status is '{current}', requires '{required}'")]
    PaymentState {
        event: &'static str,
        current: PaymentStatus,
        required: &'static str,
    },

    #[error("{event}: appointment status is '{current}', requires '{required}'")]
    AppointmentState {
        event: &'static str,
        current: AppointmentStatus,
        required: &'static str,
    },

    #[error("mark-as-paid: order is already paid")]
    AlreadyPaid,

    #[error("schedule-appointment: date {date} is in the past")]
    AppointmentDateInPast { date: DateTime<Utc> },

    #[error("mark-vaccinated: appointment date {date} has not arrived yet")]
    AppointmentDateInFuture { date: DateTime<Utc> },

    #[error("mark-vaccinated: order has no appointment date")]
    MissingAppointmentDate,
}

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

/// Side effects the caller must execute after persisting a transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Effects {
    /// Decrement (hospital, vaccine) stock by 1 before creating the record.
    /// Set only for staff-confirmed vaccination.
    pub decrement_stock: bool,
    /// Create the VaccinationRecord and link it to the order.
    pub create_record: bool,
    /// The payment axis moved `paid` → `refunded`; a refund must be issued.
    pub issue_refund: bool,
}

/// Result of a successful transition: the new phase plus its side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub phase: OrderPhase,
    pub effects: Effects,
}

// ---------------------------------------------------------------------------
// apply
// ---------------------------------------------------------------------------

/// Apply `event` to `phase` at time `now`.
///
/// # Errors
/// Returns [`TransitionError`] for illegal transitions; `phase` is never
/// mutated (it is taken by value and the input is untouched on error).
pub fn apply(
    phase: OrderPhase,
    event: &LifecycleEvent,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, TransitionError> {
    use LifecycleEvent::*;

    let mut next = phase;
    let mut effects = Effects::default();

    match event {
        Approve => {
            require_vaccination(phase, event, VaccinationStatus::PendingApproval)?;
            next.vaccination = VaccinationStatus::PendingVaccination;
        }

        Reject => {
            require_vaccination(phase, event, VaccinationStatus::PendingApproval)?;
            next.vaccination = VaccinationStatus::Cancelled;
            next.appointment = AppointmentStatus::Cancelled;
            next.payment = PaymentStatus::Cancelled;
        }

        MarkPaid => {
            if phase.payment == PaymentStatus::Paid {
                return Err(TransitionError::AlreadyPaid);
            }
            if phase.payment.is_terminal() {
                return Err(TransitionError::PaymentState {
                    event: event.name(),
                    current: phase.payment,
                    required: "pending_payment",
                });
            }
            if matches!(
                phase.vaccination,
                VaccinationStatus::Vaccinated | VaccinationStatus::Cancelled
            ) {
                return Err(TransitionError::VaccinationState {
                    event: event.name(),
                    current: phase.vaccination,
                    required: "pending_approval or pending_vaccination",
                });
            }
            if phase.appointment == AppointmentStatus::Completed {
                return Err(TransitionError::AppointmentState {
                    event: event.name(),
                    current: phase.appointment,
                    required: "not completed",
                });
            }
            next.payment = PaymentStatus::Paid;
        }

        ScheduleAppointment { date } => {
            require_vaccination(phase, event, VaccinationStatus::PendingVaccination)?;
            require_payment(phase, event, PaymentStatus::Paid)?;
            require_appointment(phase, event, AppointmentStatus::PendingScheduling)?;
            if *date < now {
                return Err(TransitionError::AppointmentDateInPast { date: *date });
            }
            next.appointment = AppointmentStatus::Scheduled;
            next.appointment_date = Some(*date);
        }

        MarkVaccinated { actor } => {
            require_vaccination(phase, event, VaccinationStatus::PendingVaccination)?;
            require_payment(phase, event, PaymentStatus::Paid)?;
            require_appointment(phase, event, AppointmentStatus::Scheduled)?;
            let date = phase
                .appointment_date
                .ok_or(TransitionError::MissingAppointmentDate)?;
            if date > now {
                return Err(TransitionError::AppointmentDateInFuture { date });
            }
            next.vaccination = VaccinationStatus::Vaccinated;
            next.appointment = AppointmentStatus::Completed;
            effects.create_record = true;
            // Patient self-confirmation is not trusted to deduct inventory.
            effects.decrement_stock = actor.is_staff();
        }

        CancelByPatient => {
            if matches!(
                phase.vaccination,
                VaccinationStatus::Vaccinated | VaccinationStatus::NotVaccinated
            ) {
                return Err(TransitionError::VaccinationState {
                    event: event.name(),
                    current: phase.vaccination,
                    required: "pending_approval or pending_vaccination",
                });
            }
            next.vaccination = VaccinationStatus::Cancelled;
            next.appointment = AppointmentStatus::Cancelled;
            if phase.payment == PaymentStatus::Paid {
                next.payment = PaymentStatus::Refunded;
                effects.issue_refund = true;
            } else if !phase.payment.is_terminal() {
                next.payment = PaymentStatus::Cancelled;
            }
        }

        RefundByStaff => {
            require_payment(phase, event, PaymentStatus::Paid)?;
            next.payment = PaymentStatus::Refunded;
            next.vaccination = VaccinationStatus::Cancelled;
            next.appointment = AppointmentStatus::Cancelled;
            effects.issue_refund = true;
        }
    }

    Ok(TransitionOutcome {
        phase: next,
        effects,
    })
}

/// Phase an order is reconciled into when a vaccination record already exists
/// for it (idempotent completion — no new record, no stock decrement).
pub fn reconcile_to_completed(phase: OrderPhase) -> OrderPhase {
    OrderPhase {
        vaccination: VaccinationStatus::Vaccinated,
        appointment: AppointmentStatus::Completed,
        ..phase
    }
}

// ---------------------------------------------------------------------------
// Guard helpers
// ---------------------------------------------------------------------------

fn require_vaccination(
    phase: OrderPhase,
    event: &LifecycleEvent,
    required: VaccinationStatus,
) -> Result<(), TransitionError> {
    if phase.vaccination != required {
        return Err(TransitionError::VaccinationState {
            event: event.name(),
            current: phase.vaccination,
            required: required.as_str(),
        });
    }
    Ok(())
}

fn require_payment(
    phase: OrderPhase,
    event: &LifecycleEvent,
    required: PaymentStatus,
) -> Result<(), TransitionError> {
    if phase.payment != required {
        return Err(TransitionError::PaymentState {
            event: event.name(),
            current: phase.payment,
            required: required.as_str(),
        });
    }
    Ok(())
}

fn require_appointment(
    phase: OrderPhase,
    event: &LifecycleEvent,
    required: AppointmentStatus,
) -> Result<(), TransitionError> {
    if phase.appointment != required {
        return Err(TransitionError::AppointmentState {
            event: event.name(),
            current: phase.appointment,
            required: required.as_str(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
