//! End-to-end integration tests
//!
//! Each test starts the full router on a random port over temporary
//! SQLite files and drives it with reqwest.

use axum::{http::HeaderMap, routing::post, Json, Router};
use chrono::{Duration, Utc};
use harbor_server::{
    build_router,
    config::{ServerConfig, WebhookEndpoint},
    AppState, MAX_BODY_BYTES,
};
use harbor_store::{AuditLog, SqliteStore};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Start a test server on a random port, returns (base_url, _temp_dir)
async fn start_test_server() -> (String, TempDir) {
    start_with_config(ServerConfig::default()).await
}

async fn start_with_config(config: ServerConfig) -> (String, TempDir) {
    let temp_dir = TempDir::new().unwrap();

    let store = SqliteStore::open(temp_dir.path().join("records.sqlite")).unwrap();
    let audit = AuditLog::open(temp_dir.path().join("audit.sqlite")).unwrap();
    let state = Arc::new(AppState::new(store, audit, config));

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

    (format!("http://{}", addr), temp_dir)
}

fn days_from_today(days: i64) -> String {
    (Utc::now().date_naive() + Duration::days(days)).to_string()
}

async fn post_json(client: &reqwest::Client, url: String, body: Value) -> (StatusCode, Value) {
    let resp = client.post(url).json(&body).send().await.unwrap();
    let status = resp.status();
    let body = resp.json::<Value>().await.unwrap_or(Value::Null);
    (status, body)
}

async fn patch_json(client: &reqwest::Client, url: String, body: Value) -> (StatusCode, Value) {
    let resp = client.patch(url).json(&body).send().await.unwrap();
    let status = resp.status();
    let body = resp.json::<Value>().await.unwrap_or(Value::Null);
    (status, body)
}

async fn get_json(client: &reqwest::Client, url: String) -> (StatusCode, Value) {
    let resp = client.get(url).send().await.unwrap();
    let status = resp.status();
    let body = resp.json::<Value>().await.unwrap_or(Value::Null);
    (status, body)
}

async fn create_patient(client: &reqwest::Client, base_url: &str) -> String {
    let (status, body) = post_json(
        client,
        format!("{}/api/patients", base_url),
        json!({
            "first_name": "Dana",
            "last_name": "Reyes",
            "date_of_birth": "1984-03-09",
            "phone": "555-0100"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body["id"].as_str().unwrap().to_string()
}

async fn create_methadone(client: &reqwest::Client, base_url: &str, patient_id: &str) -> Value {
    let (status, body) = post_json(
        client,
        format!("{}/api/prescriptions", base_url),
        json!({
            "patient_id": patient_id,
            "medication": "methadone",
            "dose": "80 mg",
            "quantity": 30,
            "schedule": "ii",
            "prescriber": "Dr. Okafor",
            "dea_number": "AB1234563"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body
}

fn adjusted_fields(body: &Value) -> Vec<String> {
    body["adjustments"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["field"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_health_check() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let (status, body) = get_json(&client, format!("{}/health", base_url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["clinic"], "Harbor Clinic");
    assert_eq!(body["assistant"], false);
}

#[tokio::test]
async fn test_patient_crud_with_history_and_audit() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let id = create_patient(&client, &base_url).await;

    // Read returns the version as a weak ETag
    let resp = client
        .get(format!("{}/api/patients/{}", base_url, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("etag").unwrap(), "W/\"1\"");
    let patient: Value = resp.json().await.unwrap();
    assert_eq!(patient["last_name"], "Reyes");
    assert_eq!(patient["active"], true);

    // Update with a matching If-Match
    let resp = client
        .patch(format!("{}/api/patients/{}", base_url, id))
        .header("If-Match", "W/\"1\"")
        .header("X-Staff-Id", "nurse-7")
        .json(&json!({"phone": "555-0199"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("etag").unwrap(), "W/\"2\"");

    // A stale If-Match is refused
    let resp = client
        .patch(format!("{}/api/patients/{}", base_url, id))
        .header("If-Match", "W/\"1\"")
        .json(&json!({"phone": "555-0142"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    // Name search
    let (status, list) = get_json(&client, format!("{}/api/patients?q=rey", base_url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["total"], 1);

    // Both versions are kept
    let (status, history) =
        get_json(&client, format!("{}/api/history/patients/{}", base_url, id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["total"], 2);
    assert_eq!(history["deleted"], false);
    assert_eq!(history["versions"][0]["record"]["phone"], "555-0100");

    let (status, v2) =
        get_json(&client, format!("{}/api/history/patients/{}/2", base_url, id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v2["phone"], "555-0199");

    // Delete, then the record is gone but its history is not
    let resp = client
        .delete(format!("{}/api/patients/{}", base_url, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let (status, _) = get_json(&client, format!("{}/api/patients/{}", base_url, id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, history) =
        get_json(&client, format!("{}/api/history/patients/{}", base_url, id)).await;
    assert_eq!(history["deleted"], true);

    // Audit writes are spawned; give them a moment
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let (status, trail) =
        get_json(&client, format!("{}/api/audit/patients/{}", base_url, id)).await;
    assert_eq!(status, StatusCode::OK);
    let entries = trail["entries"].as_array().unwrap();
    assert!(entries.iter().any(|e| e["operation"] == "update" && e["actor"] == "nurse-7"));
    assert!(entries.iter().any(|e| e["operation"] == "delete"));
}

#[tokio::test]
async fn test_malformed_bodies_are_rejected() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    // Unknown field
    let (status, body) = post_json(
        &client,
        format!("{}/api/patients", base_url),
        json!({"first_name": "A", "last_name": "B", "shoe_size": 9}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid");

    // Not JSON at all
    let resp = client
        .post(format!("{}/api/patients", base_url))
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // Missing required text carries the field name
    let (status, body) = post_json(
        &client,
        format!("{}/api/patients", base_url),
        json!({"first_name": "  ", "last_name": "B"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "first_name");

    // Unknown history collection
    let (status, _) = get_json(&client, format!("{}/api/history/widgets/x", base_url)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_appointment_overlap_and_status() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();
    let patient_id = create_patient(&client, &base_url).await;

    let starts_at = (Utc::now() + Duration::days(2)).format("%Y-%m-%dT10:00:00Z").to_string();
    let overlapping = (Utc::now() + Duration::days(2)).format("%Y-%m-%dT10:15:00Z").to_string();

    let (status, first) = post_json(
        &client,
        format!("{}/api/appointments", base_url),
        json!({
            "patient_id": patient_id,
            "provider": "Dr. Okafor",
            "starts_at": starts_at,
            "duration_minutes": 30,
            "kind": "counseling"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", first);
    assert_eq!(first["status"], "scheduled");

    // Same provider, overlapping slot
    let (status, body) = post_json(
        &client,
        format!("{}/api/appointments", base_url),
        json!({
            "patient_id": patient_id,
            "provider": "Dr. Okafor",
            "starts_at": overlapping,
            "duration_minutes": 30,
            "kind": "dosing"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");

    // Another provider may take the slot
    let (status, _) = post_json(
        &client,
        format!("{}/api/appointments", base_url),
        json!({
            "patient_id": patient_id,
            "provider": "Dr. Lind",
            "starts_at": overlapping,
            "duration_minutes": 30,
            "kind": "dosing"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Unknown patient
    let (status, body) = post_json(
        &client,
        format!("{}/api/appointments", base_url),
        json!({
            "patient_id": "no-such-patient",
            "provider": "Dr. Lind",
            "starts_at": starts_at,
            "kind": "intake"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["field"], "patient_id");

    // Cancel frees the slot
    let id = first["id"].as_str().unwrap();
    let (status, cancelled) = patch_json(
        &client,
        format!("{}/api/appointments/{}", base_url, id),
        json!({"status": "cancelled"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");

    let (status, _) = post_json(
        &client,
        format!("{}/api/appointments", base_url),
        json!({
            "patient_id": patient_id,
            "provider": "Dr. Okafor",
            "starts_at": overlapping,
            "kind": "dosing"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, list) = get_json(
        &client,
        format!("{}/api/appointments?provider=Dr.%20Okafor", base_url),
    )
    .await;
    assert_eq!(list["total"], 2);
}

#[tokio::test]
async fn test_study_create_infers_status() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    // Approval date implies IRB approval; a reached start date activates
    let (status, body) = post_json(
        &client,
        format!("{}/api/research/studies", base_url),
        json!({
            "title": "Buprenorphine taper outcomes",
            "irb_approval_date": days_from_today(-30),
            "irb_expiration_date": days_from_today(335),
            "start_date": days_from_today(-1)
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["study"]["irb_status"], "approved");
    assert_eq!(body["study"]["status"], "active");
    let fields = adjusted_fields(&body);
    assert!(fields.contains(&"irb_status".to_string()));
    assert!(fields.contains(&"status".to_string()));

    // Nothing known yet stays in planning
    let (status, body) = post_json(
        &client,
        format!("{}/api/research/studies", base_url),
        json!({"title": "Contingency management pilot"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["study"]["status"], "planning");
    assert_eq!(body["study"]["irb_status"], "not_submitted");
    assert!(body["adjustments"].as_array().unwrap().is_empty());

    // Title is required
    let (status, body) = post_json(
        &client,
        format!("{}/api/research/studies", base_url),
        json!({"sponsor": "NIDA"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "title");

    let (_, list) = get_json(
        &client,
        format!("{}/api/research/studies?status=active", base_url),
    )
    .await;
    assert_eq!(list["total"], 1);
}

#[tokio::test]
async fn test_study_patch_lifecycle() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let (_, created) = post_json(
        &client,
        format!("{}/api/research/studies", base_url),
        json!({"title": "Naloxone distribution", "enrollment_target": 40}),
    )
    .await;
    let id = created["study"]["id"].as_str().unwrap().to_string();
    let url = format!("{}/api/research/studies/{}", base_url, id);

    // Activation before IRB approval is a business rule failure
    let (status, body) = patch_json(&client, url.clone(), json!({"status": "active"})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["field"], "status");

    // Approving without a date fills in today
    let (status, body) = patch_json(&client, url.clone(), json!({"irb_status": "approved"})).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["study"]["irb_approval_date"], days_from_today(0));
    assert_eq!(body["study"]["status"], "planning");

    // Explicit activation fills in the start date
    let resp = client
        .patch(url.clone())
        .json(&json!({"status": "active"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("etag").unwrap(), "W/\"3\"");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["study"]["status"], "active");
    assert_eq!(body["study"]["start_date"], days_from_today(0));
    assert_eq!(adjusted_fields(&body), vec!["start_date"]);

    // Stale version
    let resp = client
        .patch(url.clone())
        .header("If-Match", "W/\"2\"")
        .json(&json!({"enrolled_count": 3}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    // Enrollment cannot pass the target
    let (status, body) = patch_json(&client, url.clone(), json!({"enrolled_count": 41})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["field"], "enrolled_count");

    // IRB back to pending puts the study on hold and clears the dates
    let (status, body) = patch_json(&client, url.clone(), json!({"irb_status": "pending"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["study"]["status"], "on_hold");
    assert_eq!(body["study"]["irb_approval_date"], Value::Null);
    let fields = adjusted_fields(&body);
    assert!(fields.contains(&"irb_approval_date".to_string()));
    assert!(fields.contains(&"status".to_string()));

    // Re-approval with dates resumes it
    let (status, body) = patch_json(
        &client,
        url.clone(),
        json!({
            "irb_approval_date": days_from_today(0),
            "irb_expiration_date": days_from_today(365)
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["study"]["irb_status"], "approved");
    assert_eq!(body["study"]["status"], "active");

    // End date before start date is a validation failure
    let (status, body) = patch_json(
        &client,
        url.clone(),
        json!({"end_date": days_from_today(-10)}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "end_date");

    // Completing without an end date records today
    let (status, body) = patch_json(&client, url.clone(), json!({"status": "completed"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["study"]["status"], "completed");
    assert_eq!(body["study"]["end_date"], days_from_today(0));

    // Every accepted PATCH is a version
    let (_, history) =
        get_json(&client, format!("{}/api/history/studies/{}", base_url, id)).await;
    assert_eq!(history["total"], 6);
}

#[tokio::test]
async fn test_study_expired_irb_is_detected() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let (status, body) = post_json(
        &client,
        format!("{}/api/research/studies", base_url),
        json!({
            "title": "Retention after induction",
            "irb_approval_date": days_from_today(-400),
            "irb_expiration_date": days_from_today(-35),
            "start_date": days_from_today(-390)
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    assert_eq!(body["study"]["irb_status"], "expired");
    assert_ne!(body["study"]["status"], "active");

    // Marking it approved while the expiration has passed is refused
    let id = body["study"]["id"].as_str().unwrap();
    let (status, body) = patch_json(
        &client,
        format!("{}/api/research/studies/{}", base_url, id),
        json!({"irb_status": "approved"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["field"], "irb_status");

    // Approval in the future is not a valid date
    let (status, body) = post_json(
        &client,
        format!("{}/api/research/studies", base_url),
        json!({"title": "Future", "irb_approval_date": days_from_today(3)}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "irb_approval_date");
}

#[tokio::test]
async fn test_prescription_reports_pdmp_currency() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();
    let patient_id = create_patient(&client, &base_url).await;

    let first = create_methadone(&client, &base_url, &patient_id).await;
    assert_eq!(first["pdmp_current"], false);

    let (status, status_body) =
        get_json(&client, format!("{}/api/pdmp/status/{}", base_url, patient_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(status_body["current"], false);

    let (status, lookup) = post_json(
        &client,
        format!("{}/api/pdmp/lookups", base_url),
        json!({
            "patient_id": patient_id,
            "requested_by": "Dr. Okafor",
            "state": "OR",
            "reason": "prescription",
            "result": "no_findings"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", lookup);

    let (_, status_body) =
        get_json(&client, format!("{}/api/pdmp/status/{}", base_url, patient_id)).await;
    assert_eq!(status_body["current"], true);
    assert_eq!(status_body["latest"]["id"], lookup["id"]);

    let second = create_methadone(&client, &base_url, &patient_id).await;
    assert_eq!(second["pdmp_current"], true);

    // Schedule II cannot carry refills
    let (status, body) = post_json(
        &client,
        format!("{}/api/prescriptions", base_url),
        json!({
            "patient_id": patient_id,
            "medication": "methadone",
            "dose": "80 mg",
            "quantity": 30,
            "refills": 2,
            "schedule": "ii",
            "prescriber": "Dr. Okafor",
            "dea_number": "AB1234563"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["field"], "refills");
}

#[tokio::test]
async fn test_take_home_dispense_and_return() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();
    let patient_id = create_patient(&client, &base_url).await;
    let rx = create_methadone(&client, &base_url, &patient_id).await;
    let rx_id = rx["id"].as_str().unwrap();

    let dispense = |bottles: Vec<&str>| {
        json!({
            "patient_id": patient_id,
            "prescription_id": rx_id,
            "dose_mg": 80.0,
            "doses": bottles.len(),
            "bottle_numbers": bottles,
            "dispensed_by": "RN Patel"
        })
    };

    let (status, take_home) = post_json(
        &client,
        format!("{}/api/take-homes", base_url),
        dispense(vec!["B-101", "B-102", "B-103"]),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", take_home);
    assert_eq!(take_home["status"], "dispensed");
    assert_eq!(take_home["medication"], "methadone");

    // Overlapping supply while the first is still out
    let (status, body) = post_json(
        &client,
        format!("{}/api/take-homes", base_url),
        dispense(vec!["B-201"]),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");

    // Bottle count must match the dose count
    let mut short = dispense(vec!["B-301"]);
    short["doses"] = json!(2);
    let (status, body) = post_json(&client, format!("{}/api/take-homes", base_url), short).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "bottle_numbers");

    // Partial return
    let id = take_home["id"].as_str().unwrap();
    let (status, returned) = post_json(
        &client,
        format!("{}/api/take-homes/{}/return", base_url, id),
        json!({"bottles_returned": ["B-101", "B-102"], "unused_doses": 0}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", returned);
    assert_eq!(returned["status"], "partially_returned");

    // A checked-in take-home cannot be checked in again
    let (status, _) = post_json(
        &client,
        format!("{}/api/take-homes/{}/return", base_url, id),
        json!({"bottles_returned": ["B-103"]}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // No longer outstanding, so a new supply is allowed
    let (status, _) = post_json(
        &client,
        format!("{}/api/take-homes", base_url),
        dispense(vec!["B-201"]),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, list) = get_json(
        &client,
        format!("{}/api/take-homes?patient_id={}", base_url, patient_id),
    )
    .await;
    assert_eq!(list["total"], 2);
}

#[tokio::test]
async fn test_dea222_order_flow() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let order = json!({
        "form_number": "240615001",
        "registrant_dea_number": "AB1234563",
        "supplier": {"name": "Cardinal Health", "dea_number": "RC4567890"},
        "lines": [
            {"line_no": 1, "drug_name": "Methadone oral concentrate 10 mg/mL",
             "ndc": "0054-4571-63", "schedule": "ii", "package_size": "1000 mL",
             "packages_ordered": 4},
            {"line_no": 2, "drug_name": "Methadone 10 mg tablets",
             "ndc": "00406-577-01", "schedule": "ii", "package_size": "100 ct",
             "packages_ordered": 2}
        ]
    });

    let (status, created) =
        post_json(&client, format!("{}/api/dea222/orders", base_url), order.clone()).await;
    assert_eq!(status, StatusCode::CREATED, "{}", created);
    assert_eq!(created["status"], "draft");
    let id = created["id"].as_str().unwrap();

    // Form numbers are unique
    let (status, _) = post_json(&client, format!("{}/api/dea222/orders", base_url), order).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Receiving against a draft is refused
    let (status, _) = post_json(
        &client,
        format!("{}/api/dea222/orders/{}/receive", base_url, id),
        json!([{"line_no": 1, "packages": 1}]),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, submitted) = post_json(
        &client,
        format!("{}/api/dea222/orders/{}/submit", base_url, id),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", submitted);
    assert_eq!(submitted["status"], "submitted");
    assert_eq!(submitted["submitted_on"], days_from_today(0));

    let (status, partial) = post_json(
        &client,
        format!("{}/api/dea222/orders/{}/receive", base_url, id),
        json!([{"line_no": 1, "packages": 4}]),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", partial);
    assert_eq!(partial["status"], "partially_received");

    // More than outstanding
    let (status, body) = post_json(
        &client,
        format!("{}/api/dea222/orders/{}/receive", base_url, id),
        json!([{"line_no": 2, "packages": 3}]),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["field"], "receipts.packages");

    let (status, done) = post_json(
        &client,
        format!("{}/api/dea222/orders/{}/receive", base_url, id),
        json!([{"line_no": 2, "packages": 2}]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["status"], "received");

    // Only drafts may be deleted
    let resp = client
        .delete(format!("{}/api/dea222/orders/{}", base_url, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_reminder_dispatch_without_endpoints() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();
    let patient_id = create_patient(&client, &base_url).await;

    let (status, due) = post_json(
        &client,
        format!("{}/api/reminders", base_url),
        json!({
            "patient_id": patient_id,
            "channel": "sms",
            "message": "Dosing window opens at 7am tomorrow",
            "due_at": (Utc::now() - Duration::minutes(5)).to_rfc3339()
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", due);
    assert_eq!(due["status"], "pending");

    let (status, later) = post_json(
        &client,
        format!("{}/api/reminders", base_url),
        json!({
            "patient_id": patient_id,
            "channel": "email",
            "message": "Counseling next week",
            "due_at": (Utc::now() + Duration::days(3)).to_rfc3339()
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, summary) = post_json(
        &client,
        format!("{}/api/reminders/dispatch", base_url),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["due"], 1);
    assert_eq!(summary["skipped"], 1);
    assert_eq!(summary["sent"], 0);

    // Nothing to deliver to, so the reminder stays pending
    let (_, still) = get_json(
        &client,
        format!("{}/api/reminders/{}", base_url, due["id"].as_str().unwrap()),
    )
    .await;
    assert_eq!(still["status"], "pending");

    let later_id = later["id"].as_str().unwrap();
    let (status, cancelled) = post_json(
        &client,
        format!("{}/api/reminders/{}/cancel", base_url, later_id),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");

    let (_, pending) =
        get_json(&client, format!("{}/api/reminders?status=pending", base_url)).await;
    assert_eq!(pending["total"], 1);
}

#[tokio::test]
async fn test_assistant_not_configured() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let (status, body) = post_json(
        &client,
        format!("{}/api/assistant/chat", base_url),
        json!({"messages": [{"role": "user", "content": "Summarize COWS scoring"}]}),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "not-supported");

    // Validation still comes first
    let (status, _) = post_json(
        &client,
        format!("{}/api/assistant/chat", base_url),
        json!({"messages": []}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_assistant_relays_to_upstream() {
    // Stand-in model endpoint that echoes how many messages it saw
    let upstream = Router::new().route(
        "/v1/chat",
        post(|Json(body): Json<Value>| async move {
            let count = body["messages"].as_array().map(Vec::len).unwrap_or(0);
            Json(json!({"reply": format!("saw {} message(s)", count)}))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, upstream).await.unwrap();
    });

    let mut config = ServerConfig::default();
    config.assistant.endpoint = Some(format!("http://{}/v1/chat", upstream_addr));
    let (base_url, _dir) = start_with_config(config).await;
    let client = reqwest::Client::new();
    let patient_id = create_patient(&client, &base_url).await;

    let (status, body) = post_json(
        &client,
        format!("{}/api/assistant/chat", base_url),
        json!({
            "messages": [
                {"role": "user", "content": "Any interactions with methadone?"},
                {"role": "assistant", "content": "Which medication?"},
                {"role": "user", "content": "Fluconazole"}
            ],
            "patient_id": patient_id
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["reply"], "saw 3 message(s)");

    // Unknown patient context
    let (status, _) = post_json(
        &client,
        format!("{}/api/assistant/chat", base_url),
        json!({
            "messages": [{"role": "user", "content": "Hello"}],
            "patient_id": "missing"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_dashboard_summary() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();
    create_patient(&client, &base_url).await;

    let (status, body) = get_json(&client, format!("{}/api/dashboard", base_url)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["clinic"], "Harbor Clinic");
    assert_eq!(body["today"], days_from_today(0));
    assert_eq!(body["record_counts"]["patients"], 1);
    assert_eq!(body["reminders"]["pending"], 0);
    assert!(body["recent_activity"].is_array());
}

#[tokio::test]
async fn test_oversized_body_rejected_and_cors_allowed() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let padding = "x".repeat(MAX_BODY_BYTES + 1);
    let resp = client
        .post(format!("{}/api/patients", base_url))
        .header("content-type", "application/json")
        .body(format!(
            r#"{{"first_name":"{}","last_name":"Reyes","date_of_birth":"1984-03-09"}}"#,
            padding
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let resp = client
        .get(format!("{}/health", base_url))
        .header("origin", "https://intake.example.org")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
}

#[tokio::test]
async fn test_far_future_appointment_rejected_and_store_stays_usable() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();
    let patient_id = create_patient(&client, &base_url).await;

    let (status, body) = post_json(
        &client,
        format!("{}/api/appointments", base_url),
        json!({
            "patient_id": patient_id,
            "provider": "Dr A",
            "starts_at": "+262142-12-31T23:59:00Z",
            "kind": "intake"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["field"], "starts_at");

    let (status, body) = post_json(
        &client,
        format!("{}/api/appointments", base_url),
        json!({
            "patient_id": patient_id,
            "provider": "Dr A",
            "starts_at": "2030-01-07T15:00:00Z",
            "kind": "intake"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);

    let (status, _) =
        get_json(&client, format!("{}/api/patients/{}", base_url, patient_id)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_study_stale_version_checked_before_rules() {
    let (base_url, _dir) = start_test_server().await;
    let client = reqwest::Client::new();

    let (_, created) = post_json(
        &client,
        format!("{}/api/research/studies", base_url),
        json!({"title": "Contingency management", "enrollment_target": 10}),
    )
    .await;
    let id = created["study"]["id"].as_str().unwrap().to_string();
    let url = format!("{}/api/research/studies/{}", base_url, id);

    let (status, _) = patch_json(&client, url.clone(), json!({"enrolled_count": 2})).await;
    assert_eq!(status, StatusCode::OK);

    // Over target and stale: the version mismatch is reported
    let resp = client
        .patch(url.clone())
        .header("If-Match", "W/\"1\"")
        .json(&json!({"enrolled_count": 11}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "conflict");

    // Same body at the current version hits the rule
    let resp = client
        .patch(url)
        .header("If-Match", "W/\"2\"")
        .json(&json!({"enrolled_count": 11}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

type Received = Arc<Mutex<Vec<(String, Value)>>>;

/// Local webhook receiver recording the event header and body of each call
async fn start_receiver() -> (String, Received) {
    let received: Received = Arc::default();
    let sink = received.clone();
    let app = Router::new().route(
        "/hooks",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let sink = sink.clone();
            async move {
                let event = headers
                    .get("x-harbor-event")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                sink.lock().unwrap().push((event, body));
                Json(json!({"ok": true}))
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/hooks", addr), received)
}

fn events_named(received: &Received, event: &str) -> Vec<Value> {
    received
        .lock()
        .unwrap()
        .iter()
        .filter(|(name, _)| name == event)
        .map(|(_, body)| body.clone())
        .collect()
}

#[tokio::test]
async fn test_webhook_delivery_for_reminders_and_study_status() {
    let (hook_url, received) = start_receiver().await;

    let mut config = ServerConfig::default();
    config.webhook.enabled = true;
    config.webhook.endpoints.push(WebhookEndpoint {
        url: hook_url,
        events: vec!["ReminderDue".to_string(), "StudyStatusChanged".to_string()],
        headers: Default::default(),
    });
    let (base_url, _dir) = start_with_config(config).await;
    let client = reqwest::Client::new();

    let (status, patient) = post_json(
        &client,
        format!("{}/api/patients", base_url),
        json!({
            "first_name": "Luis",
            "last_name": "Ortega",
            "date_of_birth": "1979-11-02",
            "phone": "555-0142",
            "email": "luis.ortega@example.org"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", patient);
    let patient_id = patient["id"].as_str().unwrap();

    let (_, reminder) = post_json(
        &client,
        format!("{}/api/reminders", base_url),
        json!({
            "patient_id": patient_id,
            "channel": "sms",
            "message": "Dosing window opens at 7am tomorrow",
            "due_at": (Utc::now() - Duration::minutes(1)).to_rfc3339()
        }),
    )
    .await;
    let reminder_id = reminder["id"].as_str().unwrap();

    let (status, summary) = post_json(
        &client,
        format!("{}/api/reminders/dispatch", base_url),
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", summary);
    assert_eq!(summary["due"], 1);
    assert_eq!(summary["sent"], 1);

    let (_, sent) = get_json(
        &client,
        format!("{}/api/reminders/{}", base_url, reminder_id),
    )
    .await;
    assert_eq!(sent["status"], "sent");
    assert!(sent["sent_at"].is_string());
    assert_eq!(sent["attempts"], 1);

    let due = events_named(&received, "ReminderDue");
    assert_eq!(due.len(), 1);
    assert_eq!(due[0]["event"], "ReminderDue");
    assert_eq!(due[0]["reminder"]["id"], reminder_id);
    assert_eq!(due[0]["patient"]["name"], "Luis Ortega");
    assert_eq!(due[0]["patient"]["phone"], "555-0142");
    assert_eq!(due[0]["patient"]["email"], "luis.ortega@example.org");

    // Study status changes are announced without blocking the response
    let (_, created) = post_json(
        &client,
        format!("{}/api/research/studies", base_url),
        json!({"title": "Peer recovery coaching"}),
    )
    .await;
    let study_id = created["study"]["id"].as_str().unwrap().to_string();
    let (status, body) = patch_json(
        &client,
        format!("{}/api/research/studies/{}", base_url, study_id),
        json!({
            "irb_approval_date": days_from_today(-10),
            "start_date": days_from_today(-5)
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["study"]["status"], "active");

    let mut changed = Vec::new();
    for _ in 0..50 {
        changed = events_named(&received, "StudyStatusChanged");
        if !changed.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0]["study_id"], study_id.as_str());
    assert_eq!(changed[0]["previous_status"], "planning");
    assert_eq!(changed[0]["status"], "active");
}
