//! Store contract: phase updates are compare-and-swap (a lost race surfaces
//! as PhaseConflict, nothing is clobbered) and at most one vaccination
//! record exists per order.

use uuid::Uuid;
use vax_db::{LifecycleStore, StoreError};
use vax_lifecycle::{apply, LifecycleEvent, OrderPhase};
use vax_schemas::{VaccinationRecord, VaccinationStatus};
use vax_testkit::{sample_order, MemStore};

fn now() -> chrono::DateTime<chrono::Utc> {
    "2026-03-01T09:00:00Z".parse().unwrap()
}

#[tokio::test]
async fn second_writer_with_stale_phase_conflicts() {
    let store = MemStore::new();
    let patient = store.add_patient(None);
    let hospital = store.add_hospital("General");
    let vaccine = store.add_vaccine("VX-1");

    let order = sample_order(patient, hospital, vaccine, 1, now());
    store.insert_order(&order).await.unwrap();

    let expected = OrderPhase::new();
    let approved = apply(expected, &LifecycleEvent::Approve, now()).unwrap().phase;

    // First writer wins.
    store
        .update_order_phase(order.order_id, expected, approved, None, now())
        .await
        .unwrap();

    // Second writer still holds the stale pending_approval phase.
    let err = store
        .update_order_phase(order.order_id, expected, approved, None, now())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::PhaseConflict));

    let stored = store.order(order.order_id).await.unwrap().unwrap();
    assert_eq!(
        stored.vaccination_status,
        VaccinationStatus::PendingVaccination
    );
}

#[tokio::test]
async fn one_record_per_order() {
    let store = MemStore::new();
    let patient = store.add_patient(None);
    let hospital = store.add_hospital("General");
    let vaccine = store.add_vaccine("VX-1");

    let order = sample_order(patient, hospital, vaccine, 1, now());
    store.insert_order(&order).await.unwrap();

    let record = VaccinationRecord {
        record_id: Uuid::new_v4(),
        order_id: order.order_id,
        patient_id: patient,
        hospital_id: hospital,
        vaccine_id: vaccine,
        dose_number: 1,
        administered_by: None,
        vaccinated_at_utc: now(),
    };
    store.insert_record(&record).await.unwrap();

    let dup = VaccinationRecord {
        record_id: Uuid::new_v4(),
        ..record.clone()
    };
    let err = store.insert_record(&dup).await.unwrap_err();
    assert!(matches!(err, StoreError::DuplicateRecord));
    assert_eq!(store.record_count(), 1);

    // Fallback probe finds the record by (patient, vaccine, dose) too.
    let by_dose = store
        .record_for_dose(patient, vaccine, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_dose.record_id, record.record_id);
}
