//! Requires a Postgres instance: `DATABASE_URL=postgres://... cargo test -- --ignored`

use chrono::{NaiveDate, NaiveTime, Utc};
use credit_ledger::*;
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

async fn ledger() -> ClinicLedger {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let repo = PostgresLedgerRepository::connect(&url, 5).await.unwrap();
    ClinicLedger::new(Arc::new(repo), LedgerConfig::default()).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "needs DATABASE_URL"]
async fn postgres_booking_is_serialized_per_patient() {
    let ledger = Arc::new(ledger().await);
    let patient = ledger
        .register_patient(NewPatient {
            professional_id: Uuid::new_v4(),
            name: "Lara".to_string(),
            email: String::new(),
            phone: String::new(),
            cpf: None,
            date_of_birth: None,
            status: None,
            notes: String::new(),
            age_group: None,
            guardian_name: None,
        })
        .await
        .unwrap();
    let recorded = ledger
        .record_payment(NewPayment {
            patient_id: patient.id,
            amount: Decimal::new(800, 0),
            date: Utc::now().date_naive(),
            status: PaymentStatus::Paid,
            service_type: ServiceType::Package,
            method: None,
            notes: None,
        })
        .await
        .unwrap();
    let again = ledger.update_payment(recorded.payment.clone()).await.unwrap();
    assert!(matches!(again.grant, GrantOutcome::AlreadyGranted { .. }));

    let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
    let handles: Vec<_> = (0..3)
        .map(|hour| {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .create_appointments(
                        patient.id,
                        ServiceType::Package,
                        AppointmentSlot::weekly_series(
                            date,
                            NaiveTime::from_hms_opt(8 + hour, 0, 0).unwrap(),
                            2,
                        ),
                        None,
                    )
                    .await
            })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap().success {
            successes += 1;
        }
    }

    assert_eq!(successes, 2);
    assert_eq!(
        ledger
            .get_available_credits(patient.id, ServiceType::Package)
            .await
            .unwrap(),
        0
    );

    ledger.delete_patient(patient.id).await.unwrap();
}
