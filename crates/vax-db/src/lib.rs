//! vax-db
//!
//! Postgres persistence for the vaccination order service, plus the
//! [`LifecycleStore`] trait the daemon is written against. Production wires
//! [`PgStore`]; tests wire the in-memory store from `vax-testkit`.
//!
//! Correctness for exactly-once side effects lives in the store, not in
//! application locks:
//! - the partial unique index `uq_active_order_per_dose` rejects duplicate
//!   active orders,
//! - `vaccination_records.order_id unique` rejects duplicate records,
//! - the stock decrement is a single conditional UPDATE that never drives
//!   quantity below zero,
//! - phase updates are guarded on the expected current phase (compare and
//!   swap); a lost race surfaces as [`StoreError::PhaseConflict`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use thiserror::Error;
use uuid::Uuid;

use vax_lifecycle::OrderPhase;
use vax_schemas::{UserEntry, VaccinationOrder, VaccinationRecord, VaccineStock};

mod pg;

pub use pg::PgStore;

pub const ENV_DB_URL: &str = "VAX_DATABASE_URL";

/// Connect to Postgres using VAX_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url =
        std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Connect to Postgres with an explicit connection string (config-driven).
pub async fn connect(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Failures surfaced by a [`LifecycleStore`].
///
/// The first four variants are expected business conflicts the HTTP layer
/// maps to 409; `Corrupt` and `Backend` are 500s.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("an active order already exists for this (patient, hospital, vaccine, dose)")]
    DuplicateActiveOrder,

    #[error("a vaccination record already exists for this order")]
    DuplicateRecord,

    #[error("no stock available for this (hospital, vaccine)")]
    InsufficientStock,

    #[error("order was modified concurrently; transition not applied")]
    PhaseConflict,

    #[error("corrupt row: {0}")]
    Corrupt(#[from] vax_schemas::UnknownStatus),

    #[error(transparent)]
    Backend(#[from] sqlx::Error),
}

// ---------------------------------------------------------------------------
// LifecycleStore
// ---------------------------------------------------------------------------

/// Storage operations the order lifecycle handlers need.
///
/// Implemented by [`PgStore`] (production) and by `vax-testkit`'s
/// deterministic in-memory store (scenario tests).
#[async_trait]
pub trait LifecycleStore: Send + Sync {
    // Directory lookups.
    async fn user(&self, user_id: Uuid) -> Result<Option<UserEntry>, StoreError>;
    async fn hospital_exists(&self, hospital_id: Uuid) -> Result<bool, StoreError>;
    async fn vaccine_exists(&self, vaccine_id: Uuid) -> Result<bool, StoreError>;

    // Orders.
    /// Insert a new order. Fails with [`StoreError::DuplicateActiveOrder`]
    /// when an active order for the same (patient, hospital, vaccine, dose)
    /// exists.
    async fn insert_order(&self, order: &VaccinationOrder) -> Result<(), StoreError>;

    async fn order(&self, order_id: Uuid) -> Result<Option<VaccinationOrder>, StoreError>;

    /// Compare-and-swap the order's phase. The update applies only when the
    /// stored phase still equals `expected`; otherwise
    /// [`StoreError::PhaseConflict`] is returned and nothing changes.
    /// `record_id`, when `Some`, links the vaccination record.
    async fn update_order_phase(
        &self,
        order_id: Uuid,
        expected: OrderPhase,
        next: OrderPhase,
        record_id: Option<Uuid>,
        updated_at_utc: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn orders_for_patient(
        &self,
        patient_id: Uuid,
    ) -> Result<Vec<VaccinationOrder>, StoreError>;

    async fn pending_approval_for_hospital(
        &self,
        hospital_id: Uuid,
    ) -> Result<Vec<VaccinationOrder>, StoreError>;

    // Stock.
    /// Atomically decrement (hospital, vaccine) stock by 1. Fails with
    /// [`StoreError::InsufficientStock`] when the row is absent or already
    /// at zero; quantity never goes negative.
    async fn decrement_stock(
        &self,
        hospital_id: Uuid,
        vaccine_id: Uuid,
    ) -> Result<(), StoreError>;

    async fn stock(
        &self,
        hospital_id: Uuid,
        vaccine_id: Uuid,
    ) -> Result<Option<VaccineStock>, StoreError>;

    // Records.
    /// Insert a vaccination record. Fails with
    /// [`StoreError::DuplicateRecord`] when one already exists for the order.
    async fn insert_record(&self, record: &VaccinationRecord) -> Result<(), StoreError>;

    async fn record_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<VaccinationRecord>, StoreError>;

    /// Fallback idempotency probe: any record for this (patient, vaccine,
    /// dose), regardless of which order produced it.
    async fn record_for_dose(
        &self,
        patient_id: Uuid,
        vaccine_id: Uuid,
        dose_number: i32,
    ) -> Result<Option<VaccinationRecord>, StoreError>;
}
