//! End-to-end integration test
//!
//! Drives the users service over HTTP:
//! bulk import (multipart) -> list -> read -> update -> status -> deactivate

use async_trait::async_trait;
use medcore_server::{
    build_router,
    config::ServerConfig,
    forwarder::{ForwardError, ForwardSummary, ForwardedPatient, PatientForwarder},
    mailer::{MailError, VerificationMailer},
    AppState,
};
use medcore_store::SqliteStore;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Accepts every address except the ones listed in `reject`.
#[derive(Default)]
struct FakeMailer {
    reject: Vec<String>,
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl VerificationMailer for FakeMailer {
    async fn send_verification(
        &self,
        email: &str,
        _fullname: &str,
        _code: &str,
        _valid_for: chrono::Duration,
    ) -> Result<(), MailError> {
        if self.reject.iter().any(|r| r == email) {
            return Err(MailError::Transport("mailbox unavailable".into()));
        }
        self.sent.lock().unwrap().push(email.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct FakeForwarder {
    received: Mutex<Vec<ForwardedPatient>>,
}

#[async_trait]
impl PatientForwarder for FakeForwarder {
    async fn forward(
        &self,
        patients: &[ForwardedPatient],
        _authorization: Option<&str>,
    ) -> Result<ForwardSummary, ForwardError> {
        self.received.lock().unwrap().extend_from_slice(patients);
        Ok(ForwardSummary {
            accepted: patients.len(),
            rejected: 0,
        })
    }
}

struct TestServer {
    base_url: String,
    forwarder: Arc<FakeForwarder>,
    _dir: TempDir,
}

/// Start a test server on a random port with auth disabled
async fn start_test_server(mailer: FakeMailer) -> TestServer {
    let temp_dir = TempDir::new().unwrap();

    let store = SqliteStore::open(temp_dir.path().join("users.sqlite")).unwrap();
    store.insert_specialty("spec-1", "Cardiología").unwrap();
    store.insert_department("dep-1", "Urgencias").unwrap();

    let mut config = ServerConfig::default();
    config.auth.enabled = false;
    config.bulk.bcrypt_cost = 4;

    let forwarder = Arc::new(FakeForwarder::default());
    let state = Arc::new(AppState {
        store,
        config,
        mailer: Arc::new(mailer),
        forwarder: forwarder.clone(),
        http: reqwest::Client::new(),
    });

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestServer {
        base_url: format!("http://{}", addr),
        forwarder,
        _dir: temp_dir,
    }
}

const HEADER: &str = "email;password;fullname;dateOfBirth;role;especialidad;licencia;genero";

fn csv(lines: &[&str]) -> String {
    let mut out = HEADER.to_string();
    for line in lines {
        out.push('\n');
        out.push_str(line);
    }
    out
}

async fn upload(base_url: &str, filename: &str, content: String) -> reqwest::Response {
    let part = reqwest::multipart::Part::bytes(content.into_bytes())
        .file_name(filename.to_string())
        .mime_str("text/csv")
        .unwrap();
    let form = reqwest::multipart::Form::new().part("file", part);
    reqwest::Client::new()
        .post(format!("{}/api/v1/users/bulk-import", base_url))
        .header("Authorization", "Bearer test-token")
        .multipart(form)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let server = start_test_server(FakeMailer::default()).await;

    let resp = reqwest::get(format!("{}/health", server.base_url))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "medcore-users");
}

#[tokio::test]
async fn test_bulk_import_mixed_batch() {
    let server = start_test_server(FakeMailer::default()).await;
    let data = csv(&[
        "admin@x.com;secret1;Ana Perez;1990-01-01;admin;;;",
        "doc@x.com;secret1;Luis Gómez;1980-03-04;doctor;cardiologia;LIC-9;",
        ";;;;;;;",
        "bad-email;abc;R2D2;1990-01-01;chef;;;",
        "pat@x.com;secret1;María José Ruiz;2000-06-16;paciente;;;F",
        "ADMIN@x.com;secret1;Otra Persona;1991-01-01;admin;;;",
    ]);

    let resp = upload(&server.base_url, "users.csv", data).await;
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["message"], "Import completed");
    assert_eq!(body["summary"]["total"], 6);
    assert_eq!(body["summary"]["successful"], 3);
    assert_eq!(body["summary"]["failed"], 2);
    assert_eq!(body["summary"]["skipped"], 1);

    let failed = body["results"]["failed"].as_array().unwrap();
    assert_eq!(failed[0]["index"], 3);
    assert_eq!(failed[0]["row"]["email"], "bad-email");
    assert_eq!(failed[1]["index"], 5);
    assert!(failed[1]["error"]
        .as_str()
        .unwrap()
        .starts_with("Duplicate email in batch"));

    let received = server.forwarder.received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].email, "pat@x.com");
}

#[tokio::test]
async fn test_bulk_import_email_failure_rolls_back() {
    let server = start_test_server(FakeMailer {
        reject: vec!["lost@x.com".into()],
        ..Default::default()
    })
    .await;
    let data = csv(&["lost@x.com;secret1;Ana Perez;1990-01-01;admin;;;"]);

    let body: Value = upload(&server.base_url, "users.csv", data)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(body["summary"]["failed"], 1);
    assert!(body["results"]["failed"][0]["error"]
        .as_str()
        .unwrap()
        .contains("Failed to send verification email"));

    let list: Value = reqwest::get(format!("{}/api/v1/users", server.base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["pagination"]["total"], 0);
}

#[tokio::test]
async fn test_bulk_reimport_conflicts() {
    let server = start_test_server(FakeMailer::default()).await;
    let data = csv(&[
        "one@x.com;secret1;Ana Perez;1990-01-01;admin;;;",
        "two@x.com;secret1;Luis Gómez;1980-03-04;medico;Cardiología;LIC-9;",
    ]);

    let first: Value = upload(&server.base_url, "users.csv", data.clone())
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(first["summary"]["successful"], 2);

    let second: Value = upload(&server.base_url, "users.csv", data)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(second["summary"]["successful"], 0);
    assert_eq!(second["summary"]["failed"], 2);
}

#[tokio::test]
async fn test_bulk_import_rejects_bad_uploads() {
    let server = start_test_server(FakeMailer::default()).await;

    let resp = upload(&server.base_url, "users.txt", "a;b".to_string()).await;
    assert_eq!(resp.status(), 400);

    // no file part at all
    let form = reqwest::multipart::Form::new().text("note", "nothing here");
    let resp = reqwest::Client::new()
        .post(format!("{}/api/v1/users/bulk-import", server.base_url))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "File required");
}

#[tokio::test]
async fn test_user_crud_flow() {
    let server = start_test_server(FakeMailer::default()).await;
    let client = reqwest::Client::new();
    let base = &server.base_url;

    // CREATE a doctor
    let resp = client
        .post(format!("{}/api/v1/users/doctors", base))
        .json(&json!({
            "email": "house@x.com",
            "password": "secret1",
            "fullname": "Gregory House",
            "dateOfBirth": "1959-06-11",
            "documentNumber": "DOC-1",
            "specialtyId": "spec-1",
            "licenseNumber": "LIC-1"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await.unwrap();
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["role"], "MEDICO");
    assert_eq!(created["status"], "PENDING");
    assert!(created.get("password_hash").is_none());

    // CREATE with the same email -> 409
    let resp = client
        .post(format!("{}/api/v1/users", base))
        .json(&json!({
            "email": "HOUSE@x.com",
            "password": "secret1",
            "fullname": "Otro Nombre",
            "dateOfBirth": "1970-01-01",
            "role": "admin"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    // CREATE with invalid input -> 400
    let resp = client
        .post(format!("{}/api/v1/users/nurses", base))
        .json(&json!({ "email": "nurse@x.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // READ
    let resp = client
        .get(format!("{}/api/v1/users/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let read: Value = resp.json().await.unwrap();
    assert_eq!(read["email"], "house@x.com");

    // LIST doctors
    let list: Value = client
        .get(format!("{}/api/v1/users/doctors?limit=5", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["pagination"]["total"], 1);
    assert_eq!(list["pagination"]["limit"], 5);
    assert_eq!(list["users"][0]["id"], id.as_str());

    // UPDATE
    let resp = client
        .put(format!("{}/api/v1/users/{}", base, id))
        .json(&json!({ "fullName": "Greg House", "telefono": "555-0101" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let updated: Value = resp.json().await.unwrap();
    assert_eq!(updated["fullname"], "Greg House");
    assert_eq!(updated["phone"], "555-0101");

    // STATUS
    let resp = client
        .patch(format!("{}/api/v1/users/{}/status", base, id))
        .json(&json!({ "status": "activo" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["user"]["status"], "ACTIVE");

    // STATS
    let stats: Value = client
        .get(format!("{}/api/v1/users/stats", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["total"], 1);
    assert_eq!(stats["byStatus"]["active"], 1);

    // DELETE is a soft delete
    let resp = client
        .delete(format!("{}/api/v1/users/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["user"]["status"], "INACTIVE");

    let resp = client
        .get(format!("{}/api/v1/users/missing-id", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
