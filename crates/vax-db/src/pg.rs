//! Postgres implementation of [`LifecycleStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use vax_lifecycle::OrderPhase;
use vax_schemas::{UserEntry, VaccinationOrder, VaccinationRecord, VaccineStock};

use crate::{LifecycleStore, StoreError};

const ORDER_COLUMNS: &str = "order_id, patient_id, hospital_id, vaccine_id, dose_number, \
     charge_amount_cents, payment_status, appointment_status, vaccination_status, \
     appointment_date, vaccination_record_id, created_by, created_at_utc, updated_at_utc";

/// Postgres-backed store. Cheap to clone; wraps the shared pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn order_from_row(row: &PgRow) -> Result<VaccinationOrder, StoreError> {
    let payment: String = row.try_get("payment_status")?;
    let appointment: String = row.try_get("appointment_status")?;
    let vaccination: String = row.try_get("vaccination_status")?;

    Ok(VaccinationOrder {
        order_id: row.try_get("order_id")?,
        patient_id: row.try_get("patient_id")?,
        hospital_id: row.try_get("hospital_id")?,
        vaccine_id: row.try_get("vaccine_id")?,
        dose_number: row.try_get("dose_number")?,
        charge_amount_cents: row.try_get("charge_amount_cents")?,
        payment_status: payment.parse()?,
        appointment_status: appointment.parse()?,
        vaccination_status: vaccination.parse()?,
        appointment_date: row.try_get("appointment_date")?,
        vaccination_record_id: row.try_get("vaccination_record_id")?,
        created_by: row.try_get("created_by")?,
        created_at_utc: row.try_get("created_at_utc")?,
        updated_at_utc: row.try_get("updated_at_utc")?,
    })
}

fn record_from_row(row: &PgRow) -> Result<VaccinationRecord, StoreError> {
    Ok(VaccinationRecord {
        record_id: row.try_get("record_id")?,
        order_id: row.try_get("order_id")?,
        patient_id: row.try_get("patient_id")?,
        hospital_id: row.try_get("hospital_id")?,
        vaccine_id: row.try_get("vaccine_id")?,
        dose_number: row.try_get("dose_number")?,
        administered_by: row.try_get("administered_by")?,
        vaccinated_at_utc: row.try_get("vaccinated_at_utc")?,
    })
}

/// Map a unique-constraint violation onto the given conflict error.
fn map_unique(err: sqlx::Error, constraint: &str, conflict: StoreError) -> StoreError {
    if let sqlx::Error::Database(ref db) = err {
        if db.constraint() == Some(constraint) {
            return conflict;
        }
    }
    StoreError::Backend(err)
}

#[async_trait]
impl LifecycleStore for PgStore {
    async fn user(&self, user_id: Uuid) -> Result<Option<UserEntry>, StoreError> {
        let row = sqlx::query("select user_id, role, hospital_id, email from users where user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else { return Ok(None) };
        let role: String = row.try_get("role")?;
        Ok(Some(UserEntry {
            user_id: row.try_get("user_id")?,
            role: role.parse()?,
            hospital_id: row.try_get("hospital_id")?,
            email: row.try_get("email")?,
        }))
    }

    async fn hospital_exists(&self, hospital_id: Uuid) -> Result<bool, StoreError> {
        let (exists,): (bool,) =
            sqlx::query_as("select exists (select 1 from hospitals where hospital_id = $1)")
                .bind(hospital_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn vaccine_exists(&self, vaccine_id: Uuid) -> Result<bool, StoreError> {
        let (exists,): (bool,) =
            sqlx::query_as("select exists (select 1 from vaccines where vaccine_id = $1)")
                .bind(vaccine_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn insert_order(&self, order: &VaccinationOrder) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            insert into vaccination_orders (
              order_id, patient_id, hospital_id, vaccine_id, dose_number,
              charge_amount_cents, payment_status, appointment_status, vaccination_status,
              appointment_date, vaccination_record_id, created_by, created_at_utc, updated_at_utc
            ) values (
              $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14
            )
            "#,
        )
        .bind(order.order_id)
        .bind(order.patient_id)
        .bind(order.hospital_id)
        .bind(order.vaccine_id)
        .bind(order.dose_number)
        .bind(order.charge_amount_cents)
        .bind(order.payment_status.as_str())
        .bind(order.appointment_status.as_str())
        .bind(order.vaccination_status.as_str())
        .bind(order.appointment_date)
        .bind(order.vaccination_record_id)
        .bind(order.created_by)
        .bind(order.created_at_utc)
        .bind(order.updated_at_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| map_unique(e, "uq_active_order_per_dose", StoreError::DuplicateActiveOrder))?;

        Ok(())
    }

    async fn order(&self, order_id: Uuid) -> Result<Option<VaccinationOrder>, StoreError> {
        let row = sqlx::query(&format!(
            "select {ORDER_COLUMNS} from vaccination_orders where order_id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(order_from_row).transpose()
    }

    async fn update_order_phase(
        &self,
        order_id: Uuid,
        expected: OrderPhase,
        next: OrderPhase,
        record_id: Option<Uuid>,
        updated_at_utc: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        // Compare-and-swap on all three axes; a concurrent writer makes the
        // WHERE clause miss and we report the conflict instead of clobbering.
        let res = sqlx::query(
            r#"
            update vaccination_orders
               set payment_status = $1,
                   appointment_status = $2,
                   vaccination_status = $3,
                   appointment_date = $4,
                   vaccination_record_id = coalesce($5, vaccination_record_id),
                   updated_at_utc = $6
             where order_id = $7
               and payment_status = $8
               and appointment_status = $9
               and vaccination_status = $10
            "#,
        )
        .bind(next.payment.as_str())
        .bind(next.appointment.as_str())
        .bind(next.vaccination.as_str())
        .bind(next.appointment_date)
        .bind(record_id)
        .bind(updated_at_utc)
        .bind(order_id)
        .bind(expected.payment.as_str())
        .bind(expected.appointment.as_str())
        .bind(expected.vaccination.as_str())
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(StoreError::PhaseConflict);
        }
        Ok(())
    }

    async fn orders_for_patient(
        &self,
        patient_id: Uuid,
    ) -> Result<Vec<VaccinationOrder>, StoreError> {
        let rows = sqlx::query(&format!(
            "select {ORDER_COLUMNS} from vaccination_orders \
             where patient_id = $1 order by created_at_utc desc"
        ))
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn pending_approval_for_hospital(
        &self,
        hospital_id: Uuid,
    ) -> Result<Vec<VaccinationOrder>, StoreError> {
        let rows = sqlx::query(&format!(
            "select {ORDER_COLUMNS} from vaccination_orders \
             where hospital_id = $1 and vaccination_status = 'pending_approval' \
             order by created_at_utc asc"
        ))
        .bind(hospital_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(order_from_row).collect()
    }

    async fn decrement_stock(
        &self,
        hospital_id: Uuid,
        vaccine_id: Uuid,
    ) -> Result<(), StoreError> {
        let res = sqlx::query(
            r#"
            update vaccine_stock
               set quantity = quantity - 1
             where hospital_id = $1 and vaccine_id = $2 and quantity > 0
            "#,
        )
        .bind(hospital_id)
        .bind(vaccine_id)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            return Err(StoreError::InsufficientStock);
        }
        Ok(())
    }

    async fn stock(
        &self,
        hospital_id: Uuid,
        vaccine_id: Uuid,
    ) -> Result<Option<VaccineStock>, StoreError> {
        let row = sqlx::query(
            "select hospital_id, vaccine_id, quantity from vaccine_stock \
             where hospital_id = $1 and vaccine_id = $2",
        )
        .bind(hospital_id)
        .bind(vaccine_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(VaccineStock {
            hospital_id: row.try_get("hospital_id")?,
            vaccine_id: row.try_get("vaccine_id")?,
            quantity: row.try_get("quantity")?,
        }))
    }

    async fn insert_record(&self, record: &VaccinationRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            insert into vaccination_records (
              record_id, order_id, patient_id, hospital_id, vaccine_id,
              dose_number, administered_by, vaccinated_at_utc
            ) values ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.record_id)
        .bind(record.order_id)
        .bind(record.patient_id)
        .bind(record.hospital_id)
        .bind(record.vaccine_id)
        .bind(record.dose_number)
        .bind(record.administered_by)
        .bind(record.vaccinated_at_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            map_unique(
                e,
                "vaccination_records_order_id_key",
                StoreError::DuplicateRecord,
            )
        })?;

        Ok(())
    }

    async fn record_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Option<VaccinationRecord>, StoreError> {
        let row = sqlx::query(
            "select record_id, order_id, patient_id, hospital_id, vaccine_id, \
             dose_number, administered_by, vaccinated_at_utc \
             from vaccination_records where order_id = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn record_for_dose(
        &self,
        patient_id: Uuid,
        vaccine_id: Uuid,
        dose_number: i32,
    ) -> Result<Option<VaccinationRecord>, StoreError> {
        let row = sqlx::query(
            "select record_id, order_id, patient_id, hospital_id, vaccine_id, \
             dose_number, administered_by, vaccinated_at_utc \
             from vaccination_records \
             where patient_id = $1 and vaccine_id = $2 and dose_number = $3 \
             limit 1",
        )
        .bind(patient_id)
        .bind(vaccine_id)
        .bind(dose_number)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }
}
