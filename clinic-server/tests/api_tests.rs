use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use clinic_server::{create_app, ClinicServer, ServerConfig};
use credit_ledger::{
    ClinicLedger, InMemoryLedgerRepository, LedgerRepository, NewPatient, NewPayment,
    NewProfessional, PaymentStatus, ServiceType,
};
use std::sync::Arc;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

/// App over a fresh in-memory ledger, acting as one registered professional
struct TestApp {
    app: Router,
    server: ClinicServer,
    repository: Arc<InMemoryLedgerRepository>,
    professional_id: Uuid,
}

impl TestApp {
    async fn new() -> Self {
        let config = ServerConfig::default();
        let repository = Arc::new(InMemoryLedgerRepository::new());
        let ledger = ClinicLedger::new(repository.clone(), config.ledger.clone())
            .expect("Failed to create test ledger");
        let server = ClinicServer::with_ledger(config, ledger, "memory");
        let professional_id = register_professional(&server, "Dra. Renata Alves").await;
        Self {
            app: create_app(server.clone()),
            server,
            repository,
            professional_id,
        }
    }

    async fn another_professional(&self) -> Uuid {
        register_professional(&self.server, "Dr. Caio Mendes").await
    }

    async fn send_as_admin(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder()
            .uri(uri)
            .method(method)
            .header("X-User-Role", "admin");
        self.dispatch(builder, body).await
    }

    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.send_as(self.professional_id, method, uri, body).await
    }

    async fn send_as(
        &self,
        professional_id: Uuid,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder()
            .uri(uri)
            .method(method)
            .header("X-Professional-Id", professional_id.to_string());
        self.dispatch(builder, body).await
    }

    async fn dispatch(
        &self,
        builder: axum::http::request::Builder,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn patient_named(&self, name: &str) -> String {
        let (status, body) = self
            .send("POST", "/api/v1/patients", Some(json!({ "name": name })))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body["data"]["id"].as_str().unwrap().to_string()
    }

    async fn patient(&self) -> String {
        let (status, body) = self
            .send(
                "POST",
                "/api/v1/patients",
                Some(json!({ "name": "Marina", "email": "marina@example.com" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body["data"]["id"].as_str().unwrap().to_string()
    }

    async fn pay_package(&self, patient_id: &str) -> Value {
        let (status, body) = self
            .send(
                "POST",
                "/api/v1/payments",
                Some(json!({
                    "patient_id": patient_id,
                    "amount": "800.00",
                    "date": "2024-03-01",
                    "status": "paid",
                    "service_type": "package",
                    "method": "pix"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body
    }

    async fn book(&self, patient_id: &str, dates: &[&str]) -> (StatusCode, Value) {
        let slots: Vec<Value> = dates
            .iter()
            .map(|date| json!({ "date": date, "time": "09:00:00" }))
            .collect();
        self.send(
            "POST",
            "/api/v1/appointments",
            Some(json!({
                "patient_id": patient_id,
                "service_type": "package",
                "slots": slots
            })),
        )
        .await
    }
}

async fn register_professional(server: &ClinicServer, name: &str) -> Uuid {
    server
        .ledger
        .register_professional(NewProfessional {
            full_name: name.to_string(),
            registration_number: "CRP 06/40000".to_string(),
            phone: String::new(),
            email: String::new(),
            specialty: None,
            status: None,
        })
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn test_health_check() {
    let app = TestApp::new().await;

    let (status, body) = app.send("GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], "memory");
}

#[tokio::test]
async fn test_missing_professional_header_is_rejected() {
    let app = TestApp::new().await;
    let request = Request::builder()
        .uri("/api/v1/patients")
        .method("GET")
        .body(Body::empty())
        .unwrap();

    let response = app.app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let error: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(error["error_type"], "unauthorized");
    assert!(error["error_id"].is_string());
}

#[tokio::test]
async fn test_package_payment_grants_four_credits() {
    let app = TestApp::new().await;
    let patient_id = app.patient().await;

    let recorded = app.pay_package(&patient_id).await;

    assert_eq!(recorded["data"]["grant"]["outcome"], "issued");
    assert_eq!(recorded["data"]["grant"]["grant"]["total_sessions"], 4);
    let (status, balance) = app
        .send("GET", &format!("/api/v1/patients/{patient_id}/credits"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(balance["data"]["package"], 4);
    assert_eq!(balance["data"]["single"], 0);
}

#[tokio::test]
async fn test_booking_beyond_balance_is_refused() {
    let app = TestApp::new().await;
    let patient_id = app.patient().await;
    app.pay_package(&patient_id).await;

    let (status, body) = app
        .book(
            &patient_id,
            &["2024-03-04", "2024-03-11", "2024-03-18", "2024-03-25", "2024-04-01"],
        )
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert!(body["error_message"]
        .as_str()
        .unwrap()
        .contains("enough credits"));
    let (_, list) = app.send("GET", "/api/v1/appointments", None).await;
    assert_eq!(list["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_cancel_requires_confirmation_and_frees_credit() {
    let app = TestApp::new().await;
    let patient_id = app.patient().await;
    app.pay_package(&patient_id).await;
    let (status, booked) = app.book(&patient_id, &["2024-03-04"]).await;
    assert_eq!(status, StatusCode::OK);
    let appointment_id = booked["data"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .send(
            "POST",
            &format!("/api/v1/appointments/{appointment_id}/cancel"),
            Some(json!({})),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);

    let (status, body) = app
        .send(
            "POST",
            &format!("/api/v1/appointments/{appointment_id}/cancel"),
            Some(json!({ "confirmed": true })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "cancelled");

    let (_, balance) = app
        .send("GET", &format!("/api/v1/patients/{patient_id}/credits"), None)
        .await;
    assert_eq!(balance["data"]["package"], 4);
}

#[tokio::test]
async fn test_reschedule_moves_the_session() {
    let app = TestApp::new().await;
    let patient_id = app.patient().await;
    app.pay_package(&patient_id).await;
    let (_, booked) = app.book(&patient_id, &["2024-03-04"]).await;
    let appointment_id = booked["data"][0]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .send(
            "POST",
            &format!("/api/v1/appointments/{appointment_id}/reschedule"),
            Some(json!({ "date": "2024-03-06", "time": "15:30:00" })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "scheduled");
    assert_eq!(body["data"]["date"], "2024-03-06");
    assert_eq!(body["data"]["grant_id"], booked["data"][0]["grant_id"]);

    let (_, balance) = app
        .send("GET", &format!("/api/v1/patients/{patient_id}/credits"), None)
        .await;
    assert_eq!(balance["data"]["package"], 3);

    let (_, pending) = app.send("GET", "/api/v1/appointments/pending", None).await;
    assert_eq!(pending["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_other_professionals_patients_are_hidden() {
    let app = TestApp::new().await;
    let patient_id = app.patient().await;

    let other = app.another_professional().await;

    let (status, body) = app
        .send_as(other, "GET", &format!("/api/v1/patients/{patient_id}"), None)
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_type"], "not_found");
}

#[tokio::test]
async fn test_invalid_json_is_bad_request() {
    let app = TestApp::new().await;
    let request = Request::builder()
        .uri("/api/v1/patients")
        .method("POST")
        .header("X-Professional-Id", app.professional_id.to_string())
        .header("Content-Type", "application/json")
        .body(Body::from("{\"name\": "))
        .unwrap();

    let response = app.app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_blank_patient_name_is_validation_error() {
    let app = TestApp::new().await;

    let (status, body) = app
        .send("POST", "/api/v1/patients", Some(json!({ "name": "   " })))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_type"], "validation_error");
}

#[tokio::test]
async fn test_financial_report_and_alerts() {
    let app = TestApp::new().await;
    let patient_id = app.patient().await;
    app.pay_package(&patient_id).await;
    app.book(&patient_id, &["2024-03-04", "2024-03-11", "2024-03-18"])
        .await;

    let (status, report) = app
        .send("GET", "/api/v1/reports/financial?period=all", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["data"]["period"], "all");
    assert_eq!(report["data"]["patients"][0]["patient_name"], "Marina");

    let (_, alerts) = app.send("GET", "/api/v1/alerts/low-balance", None).await;
    assert_eq!(alerts["data"][0]["remaining"], 1);
}

#[tokio::test]
async fn test_insight_without_provider_returns_apology() {
    let app = TestApp::new().await;
    let patient_id = app.patient().await;

    let (status, body) = app
        .send(
            "POST",
            &format!("/api/v1/patients/{patient_id}/insight"),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"]["insight"],
        credit_ledger::insight::INSIGHT_PROVIDER_ERROR
    );
}

#[tokio::test]
async fn test_reconciliation_on_clean_ledger() {
    let app = TestApp::new().await;
    let patient_id = app.patient().await;
    app.pay_package(&patient_id).await;

    let (status, body) = app.send("POST", "/api/v1/maintenance/reconcile", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["regranted"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_unregistered_professional_is_rejected() {
    let app = TestApp::new().await;

    let (status, body) = app
        .send_as(Uuid::new_v4(), "GET", "/api/v1/patients", None)
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error_type"], "unauthorized");
}

#[tokio::test]
async fn test_inactive_professional_is_forbidden() {
    let app = TestApp::new().await;
    let (status, _) = app
        .send_as_admin(
            "PATCH",
            &format!("/api/v1/professionals/{}/status", app.professional_id),
            Some(json!({ "status": "inactive" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.send("GET", "/api/v1/patients", None).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error_type"], "professional_inactive");
}

#[tokio::test]
async fn test_registry_requires_admin_role() {
    let app = TestApp::new().await;

    let (status, body) = app.send("GET", "/api/v1/professionals", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error_type"], "unauthorized");

    let request = Request::builder()
        .uri("/api/v1/professionals")
        .method("GET")
        .header("X-User-Role", "receptionist")
        .body(Body::empty())
        .unwrap();
    let response = app.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_professional_registry_lifecycle() {
    let app = TestApp::new().await;

    let (status, created) = app
        .send_as_admin(
            "POST",
            "/api/v1/professionals",
            Some(json!({
                "full_name": "Dra. Beatriz Costa",
                "registration_number": "CRP 06/77777",
                "specialty": "Neuropsicologia"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["data"]["status"], "active");
    let id = created["data"]["id"].as_str().unwrap().to_string();

    let (_, listed) = app.send_as_admin("GET", "/api/v1/professionals", None).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 2);

    let (status, updated) = app
        .send_as_admin(
            "PUT",
            &format!("/api/v1/professionals/{id}"),
            Some(json!({
                "full_name": "Dra. Beatriz Costa Lima",
                "registration_number": "CRP 06/77777",
                "status": "active"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["data"]["full_name"], "Dra. Beatriz Costa Lima");
    assert_eq!(updated["data"]["created_at"], created["data"]["created_at"]);

    let (status, _) = app
        .send_as_admin("DELETE", &format!("/api/v1/professionals/{id}"), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_professional_with_patients_cannot_be_deleted() {
    let app = TestApp::new().await;
    app.patient().await;

    let (status, body) = app
        .send_as_admin(
            "DELETE",
            &format!("/api/v1/professionals/{}", app.professional_id),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_type"], "conflict");
}

#[tokio::test]
async fn test_current_professional() {
    let app = TestApp::new().await;

    let (status, body) = app.send("GET", "/api/v1/professionals/me", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["full_name"], "Dra. Renata Alves");
}

#[tokio::test]
async fn test_patient_history_report() {
    let app = TestApp::new().await;
    let patient_id = app.patient().await;
    app.pay_package(&patient_id).await;
    let (_, booked) = app
        .book(&patient_id, &["2024-03-04", "2024-03-11", "2024-03-18"])
        .await;
    let first = booked["data"][0]["id"].as_str().unwrap().to_string();
    let last = booked["data"][2]["id"].as_str().unwrap().to_string();
    app.send(
        "PATCH",
        &format!("/api/v1/appointments/{first}/status"),
        Some(json!({ "status": "completed" })),
    )
    .await;
    app.send(
        "POST",
        &format!("/api/v1/appointments/{last}/cancel"),
        Some(json!({ "confirmed": true })),
    )
    .await;

    let (status, history) = app
        .send("GET", &format!("/api/v1/patients/{patient_id}/history"), None)
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["data"]["total_sessions"], 2);
    assert_eq!(history["data"]["completed_sessions"], 1);
    assert_eq!(history["data"]["engagement_percent"], 50);
    assert_eq!(history["data"]["sessions"][0]["date"], "2024-03-11");
}

#[tokio::test]
async fn test_history_lists_only_active_patients() {
    let app = TestApp::new().await;
    app.patient_named("Olivia Ramos").await;
    let inactive = app.patient_named("Otto Ramos").await;
    app.send(
        "PATCH",
        &format!("/api/v1/patients/{inactive}/status"),
        Some(json!({ "status": "inactive" })),
    )
    .await;

    let (status, body) = app
        .send("GET", "/api/v1/reports/patients?search=ramos", None)
        .await;

    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Olivia Ramos"]);
}

/// Paid payment stored without going through the credit bridge
async fn ungranted_paid_payment(app: &TestApp, professional_id: Uuid) -> Uuid {
    let patient = app
        .server
        .ledger
        .register_patient(NewPatient {
            professional_id,
            name: "Paulo".to_string(),
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
    let payment = NewPayment {
        patient_id: patient.id,
        amount: "800.00".parse().unwrap(),
        date: "2024-03-01".parse().unwrap(),
        status: PaymentStatus::Paid,
        service_type: ServiceType::Package,
        method: None,
        notes: None,
    }
    .into_payment(professional_id);
    app.repository.insert_payment(payment).await.unwrap().id
}

#[tokio::test]
async fn test_maintenance_is_scoped_to_the_caller() {
    let app = TestApp::new().await;
    let other = app.another_professional().await;
    let mine = ungranted_paid_payment(&app, app.professional_id).await;
    let theirs = ungranted_paid_payment(&app, other).await;

    let (status, body) = app.send("POST", "/api/v1/maintenance/reconcile", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["regranted"], json!([mine.to_string()]));
    let untouched = app.repository.find_grant_for_payment(theirs).await.unwrap();
    assert!(untouched.is_none());

    let (status, _) = app
        .send_as(Uuid::new_v4(), "POST", "/api/v1/maintenance/expire-grants", None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
