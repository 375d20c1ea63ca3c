//! vax-testkit
//!
//! Deterministic test doubles for the vaccination order service: an
//! in-memory [`LifecycleStore`], a manually advanced clock, and recording
//! notification/mailer channels. No network, no Postgres, no wall-clock.
//!
//! Scenario tests that drive the HTTP router live in `vax-daemon/tests`;
//! the store-contract tests live here under `tests/`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use vax_db::{LifecycleStore, StoreError};
use vax_lifecycle::{Clock, OrderPhase};
use vax_notify::{CertificateMailer, NoticeKind, NotifyChannel};
use vax_schemas::{
    Role, UserEntry, VaccinationOrder, VaccinationRecord, VaccineStock,
};

/// Shared HS256 secret for test tokens.
pub const TEST_JWT_SECRET: &str = "vax-testkit-secret";

// ---------------------------------------------------------------------------
// MemStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemInner {
    users: HashMap<Uuid, UserEntry>,
    hospitals: HashMap<Uuid, String>,
    vaccines: HashMap<Uuid, String>,
    orders: HashMap<Uuid, VaccinationOrder>,
    /// Keyed by order_id — mirrors the unique constraint.
    records: HashMap<Uuid, VaccinationRecord>,
    stock: HashMap<(Uuid, Uuid), i64>,
}

/// In-memory [`LifecycleStore`] with the same conflict semantics as the
/// Postgres store: duplicate-active rejection, unique record per order,
/// compare-and-swap phase updates, stock floor at zero.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<MemInner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    // -- seeding ------------------------------------------------------------

    pub fn add_user(&self, user: UserEntry) {
        self.inner.lock().unwrap().users.insert(user.user_id, user);
    }

    pub fn add_patient(&self, email: Option<&str>) -> Uuid {
        let id = Uuid::new_v4();
        self.add_user(UserEntry {
            user_id: id,
            role: Role::Patient,
            hospital_id: None,
            email: email.map(str::to_string),
        });
        id
    }

    pub fn add_staff(&self, hospital_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        self.add_user(UserEntry {
            user_id: id,
            role: Role::HospitalStaff,
            hospital_id: Some(hospital_id),
            email: None,
        });
        id
    }

    pub fn add_admin(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.add_user(UserEntry {
            user_id: id,
            role: Role::Admin,
            hospital_id: None,
            email: None,
        });
        id
    }

    pub fn add_hospital(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.inner
            .lock()
            .unwrap()
            .hospitals
            .insert(id, name.to_string());
        id
    }

    pub fn add_vaccine(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.inner
            .lock()
            .unwrap()
            .vaccines
            .insert(id, name.to_string());
        id
    }

    pub fn set_stock(&self, hospital_id: Uuid, vaccine_id: Uuid, quantity: i64) {
        self.inner
            .lock()
            .unwrap()
            .stock
            .insert((hospital_id, vaccine_id), quantity);
    }

    // -- assertions ---------------------------------------------------------

    pub fn stock_quantity(&self, hospital_id: Uuid, vaccine_id: Uuid) -> Option<i64> {
        self.inner
            .lock()
            .unwrap()
            .stock
            .get(&(hospital_id, vaccine_id))
            .copied()
    }

    pub fn record_count(&self) -> usize {
        self.inner.lock().unwrap().records.len()
    }
}

fn phase_of(order: &VaccinationOrder) -> OrderPhase {
    OrderPhase {
        vaccination: order.vaccination_status,
        payment: order.payment_status,
        appointment: order.appointment_status,
        appointment_date: order.appointment_date,
    }
}

#[async_trait]
impl LifecycleStore for MemStore {
    async fn user(&self, user_id: Uuid) -> Result<Option<UserEntry>, StoreError> {
        Ok(self.inner.lock().unwrap().users.get(&user_id).cloned())
    }

    async fn hospital_exists(&self, hospital_id: Uuid) -> Result<bool, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .hospitals
            .contains_key(&hospital_id))
    }

    async fn vaccine_exists(&self, vaccine_id: Uuid) -> Result<bool, StoreError> {
        Ok(self.inner.lock().unwrap().vaccines.contains_key(&vaccine_id))
    }

    async fn insert_order(&self, order: &VaccinationOrder) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let duplicate = inner.orders.values().any(|o| {
            o.patient_id == order.patient_id
                && o.hospital_id == order.hospital_id
                && o.vaccine_id == order.vaccine_id
                && o.dose_number == order.dose_number
                && o.is_active()
        });
        if duplicate {
            return Err(StoreError::DuplicateActiveOrder);
        }
        inner.orders.insert(order.order_id, order.clone());
        Ok(())
    }

    async fn order(&self, order_id: Uuid) -> Result<Option<VaccinationOrder>, StoreError> {
        Ok(self.inner.lock().unwrap().orders.get(&order_id).cloned())
    }

    async fn update_order_phase(
        &self,
        order_id: Uuid,
        expected: OrderPhase,
        next: OrderPhase,
        record_id: Option<Uuid>,
        updated_at_utc: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let order = inner
            .orders
            .get_mut(&order_id)
            .ok_or(StoreError::PhaseConflict)?;

        let current = phase_of(order);
        // CAS on the three status axes, like the SQL WHERE clause.
        if current.vaccination != expected.vaccination
            || current.payment != expected.payment
            || current.appointment != expected.appointment
        {
            return Err(StoreError::PhaseConflict);
        }

        order.vaccination_status = next.vaccination;
        order.payment_status = next.payment;
        order.appointment_status = next.appointment;
        order.appointment_date = next.appointment_date;
        if record_id.is_some() {
            order.vaccination_record_id = record_id;
        }
        order.updated_at_utc = updated_at_utc;
        Ok(())
    }

    async fn orders_for_patient(
        &self,
        patient_id: Uuid,
    ) -> Result<Vec<VaccinationOrder>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut orders: Vec<_> = inner
            .orders
            .values()
            .filter(|o| o.patient_id == patient_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at_utc.cmp(&a.created_at_utc));
        Ok(orders)
    }

    async fn pending_approval_for_hospital(
        &self,
        hospital_id: Uuid,
    ) -> Result<Vec<VaccinationOrder>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut orders: Vec<_> = inner
            .orders
            .values()
            .filter(|o| {
                o.hospital_id == hospital_id
                    && o.vaccination_status == vax_schemas::VaccinationStatus::PendingApproval
            })
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.created_at_utc.cmp(&b.created_at_utc));
        Ok(orders)
    }

    async fn decrement_stock(
        &self,
        hospital_id: Uuid,
        vaccine_id: Uuid,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.stock.get_mut(&(hospital_id, vaccine_id)) {
            Some(qty) if *qty > 0 => {
                *qty -= 1;
                Ok(())
            }
            _ => Err(StoreError::InsufficientStock),
        }
    }

    async fn stock(
        &self,
        hospital_id: Uuid,
        vaccine_id: Uuid,
    ) -> Result<Option<VaccineStock>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .stock
            .get(&(hospital_id, vaccine_id))
            .map(|&quantity| VaccineStock {
                hospital_id,
                vaccine_id,
                quantity,
            }))
    }

    async fn insert_record(&self, record: &VaccinationRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.records.contains_key(&record.order_id) {
            return Err(StoreError::DuplicateRecord);
        }
        inner.records.insert(record.order_id, record.clone());
        Ok(())
    }

    async fn record_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<VaccinationRecord>, StoreError> {
        Ok(self.inner.lock().unwrap().records.get(&order_id).cloned())
    }

    async fn record_for_dose(
        &self,
        patient_id: Uuid,
        vaccine_id: Uuid,
        dose_number: i32,
    ) -> Result<Option<VaccinationRecord>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .records
            .values()
            .find(|r| {
                r.patient_id == patient_id
                    && r.vaccine_id == vaccine_id
                    && r.dose_number == dose_number
            })
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A freshly created order (pending on all three axes).
pub fn sample_order(
    patient_id: Uuid,
    hospital_id: Uuid,
    vaccine_id: Uuid,
    dose_number: i32,
    now: DateTime<Utc>,
) -> VaccinationOrder {
    let phase = OrderPhase::new();
    VaccinationOrder {
        order_id: Uuid::new_v4(),
        patient_id,
        hospital_id,
        vaccine_id,
        dose_number,
        charge_amount_cents: 2_500,
        payment_status: phase.payment,
        appointment_status: phase.appointment,
        vaccination_status: phase.vaccination,
        appointment_date: None,
        vaccination_record_id: None,
        created_by: patient_id,
        created_at_utc: now,
        updated_at_utc: now,
    }
}

// ---------------------------------------------------------------------------
// ManualClock
// ---------------------------------------------------------------------------

/// A clock tests move by hand. "Wait until the appointment date" becomes
/// `clock.advance(Duration::days(7))`.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn at(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// ---------------------------------------------------------------------------
// Recording channels
// ---------------------------------------------------------------------------

/// Captures notifications for assertions; can be flipped to fail to prove
/// notification failures never fail a request.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(Uuid, String, NoticeKind)>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn kinds(&self) -> Vec<NoticeKind> {
        self.sent.lock().unwrap().iter().map(|(_, _, k)| *k).collect()
    }
}

#[async_trait]
impl NotifyChannel for RecordingNotifier {
    async fn notify(&self, user_id: Uuid, message: &str, kind: NoticeKind) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("notification channel down");
        }
        self.sent
            .lock()
            .unwrap()
            .push((user_id, message.to_string(), kind));
        Ok(())
    }
}

/// Captures certificate sends; `fail_next` exercises the soft-failure path.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<Uuid>>,
    fail: AtomicBool,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl CertificateMailer for RecordingMailer {
    async fn send_certificate(
        &self,
        _email: Option<&str>,
        record: &VaccinationRecord,
    ) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("smtp unavailable");
        }
        self.sent.lock().unwrap().push(record.record_id);
        Ok(())
    }
}
