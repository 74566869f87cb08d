#![cfg(feature = "web")]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{HeaderMap, Request, StatusCode, header};
use equipviz::app::{AppState, router};
use equipviz::config::Config;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

const SAMPLE: &str = "Equipment Name,Type,Flowrate,Pressure,Temperature\n\
                      Pump-1,Pump,120,5.2,110\n\
                      Compressor-1,Compressor,95,8.4,95\n";

struct TestApp {
    app: Router,
    state: Arc<AppState>,
    _dir: tempfile::TempDir,
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl Reply {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

fn test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        data_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    let state = Arc::new(AppState::new(config).unwrap());
    TestApp {
        app: router(state.clone()),
        state,
        _dir: dir,
    }
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> Reply {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();
        Reply {
            status,
            headers,
            body,
        }
    }

    async fn register(&self, username: &str) -> String {
        let request = Request::post("/auth/register/")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({
                    "username": username,
                    "email": format!("{username}@example.com"),
                    "password": "s3cret!"
                })
                .to_string(),
            ))
            .unwrap();
        let reply = self.send(request).await;
        assert_eq!(reply.status, StatusCode::CREATED);
        reply.json()["token"].as_str().unwrap().to_string()
    }

    async fn get(&self, uri: &str, token: &str) -> Reply {
        let request = Request::get(uri)
            .header(header::AUTHORIZATION, format!("Token {token}"))
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    async fn upload(&self, token: &str, filename: &str, content: &str) -> Reply {
        self.send(upload_request(token, filename, content)).await
    }
}

fn upload_request(token: &str, filename: &str, content: &str) -> Request<Body> {
    let boundary = "equipviz-test-boundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
         Content-Type: text/csv\r\n\r\n\
         {content}\r\n\
         --{boundary}--\r\n"
    );
    Request::post("/upload/")
        .header(header::AUTHORIZATION, format!("Token {token}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn upload_then_read_back() {
    let app = test_app();
    let token = app.register("alice").await;

    let reply = app.upload(&token, "sample.csv", SAMPLE).await;
    assert_eq!(reply.status, StatusCode::CREATED);
    let upload = reply.json();
    assert_eq!(upload["record_count"], 2);
    assert_eq!(upload["skipped_rows"], 0);
    assert_eq!(upload["summary"]["avg_flowrate"], 107.5);
    let session_id = upload["session_id"].as_u64().unwrap();

    let equipment = app.get("/equipment/", &token).await;
    assert_eq!(equipment.status, StatusCode::OK);
    let records = equipment.json();
    let names: Vec<&str> = records
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Pump-1", "Compressor-1"]);
    assert_eq!(records[0]["session_id"], session_id);

    let summary = app
        .get(&format!("/summary/?session_id={session_id}"), &token)
        .await
        .json();
    assert_eq!(summary["session_id"], session_id);
    assert_eq!(summary["filename"], "sample.csv");
    assert_eq!(summary["total_count"], 2);
    assert_eq!(summary["avg_flowrate"], 107.5);
    assert_eq!(summary["type_distribution"], json!({"Compressor": 1, "Pump": 1}));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn parallel_uploads_all_land() {
    let app = test_app();
    let token = app.register("alice").await;

    let (a, b, c) = tokio::join!(
        app.upload(&token, "a.csv", SAMPLE),
        app.upload(&token, "b.csv", SAMPLE),
        app.upload(&token, "c.csv", SAMPLE),
    );
    let mut ids: Vec<u64> = [a, b, c]
        .iter()
        .map(|reply| {
            assert_eq!(reply.status, StatusCode::CREATED);
            reply.json()["session_id"].as_u64().unwrap()
        })
        .collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 3);
    assert_eq!(app.get("/history/", &token).await.json().as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn malformed_rows_are_counted() {
    let app = test_app();
    let token = app.register("alice").await;
    let csv = format!("{SAMPLE}Broken,Pump,fast,1,1\n,Valve,1,1,1\n");

    let reply = app.upload(&token, "mixed.CSV", &csv).await;
    assert_eq!(reply.status, StatusCode::CREATED);
    assert_eq!(reply.json()["record_count"], 2);
    assert_eq!(reply.json()["skipped_rows"], 2);
}

#[tokio::test]
async fn bad_uploads_are_rejected() {
    let app = test_app();
    let token = app.register("alice").await;

    let wrong_type = app.upload(&token, "sample.txt", SAMPLE).await;
    assert_eq!(wrong_type.status, StatusCode::BAD_REQUEST);
    assert_eq!(wrong_type.json()["error"], "File must be a CSV");

    let missing = app
        .upload(&token, "partial.csv", "Equipment Name,Type\nPump-1,Pump\n")
        .await;
    assert_eq!(missing.status, StatusCode::BAD_REQUEST);
    let message = missing.json()["error"].as_str().unwrap().to_string();
    assert!(message.contains("Flowrate"), "{message}");

    let only_header = app
        .upload(&token, "empty.csv", "Equipment Name,Type,Flowrate,Pressure,Temperature\n")
        .await;
    assert_eq!(only_header.status, StatusCode::BAD_REQUEST);

    // Nothing was stored
    let history = app.get("/history/", &token).await.json();
    assert_eq!(history, json!([]));
}

#[tokio::test]
async fn requests_without_a_valid_token_are_rejected() {
    let app = test_app();

    let anonymous = app
        .send(Request::get("/summary/").body(Body::empty()).unwrap())
        .await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
    assert!(anonymous.json()["error"].is_string());

    let forged = app.get("/equipment/", "not-a-token").await;
    assert_eq!(forged.status, StatusCode::UNAUTHORIZED);

    let upload = app.send(upload_request("nope", "sample.csv", SAMPLE)).await;
    assert_eq!(upload.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_and_logout() {
    let app = test_app();
    let token = app.register("alice").await;

    let login = |password: &str| {
        Request::post("/auth/login/")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({"username": "alice", "password": password}).to_string(),
            ))
            .unwrap()
    };
    let wrong = app.send(login("guess")).await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);

    let ok = app.send(login("s3cret!")).await;
    assert_eq!(ok.status, StatusCode::OK);
    assert_eq!(ok.json()["token"], token);
    assert_eq!(ok.json()["user"]["username"], "alice");
    assert!(ok.json()["user"].get("password_hash").is_none());

    let logout = app
        .send(
            Request::post("/auth/logout/")
                .header(header::AUTHORIZATION, format!("Token {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(logout.status, StatusCode::NO_CONTENT);
    assert_eq!(
        app.get("/history/", &token).await.status,
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let app = test_app();
    app.register("alice").await;

    let request = Request::post("/auth/register/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"username": "alice", "email": "other@example.com", "password": "x"}).to_string(),
        ))
        .unwrap();
    assert_eq!(app.send(request).await.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn sessions_of_other_users_are_not_found() {
    let app = test_app();
    let alice = app.register("alice").await;
    let bob = app.register("bob").await;

    let upload = app.upload(&alice, "sample.csv", SAMPLE).await.json();
    let session_id = upload["session_id"].as_u64().unwrap();

    for path in ["/equipment/", "/summary/", "/report/pdf/", "/chart/types/"] {
        let reply = app
            .get(&format!("{path}?session_id={session_id}"), &bob)
            .await;
        assert_eq!(reply.status, StatusCode::NOT_FOUND, "{path}");
    }

    // Bob's own latest view is empty, not Alice's data
    assert_eq!(app.get("/equipment/", &bob).await.json(), json!([]));
}

#[tokio::test]
async fn empty_state_summary_has_null_session() {
    let app = test_app();
    let token = app.register("alice").await;

    let summary = app.get("/summary/", &token).await;
    assert_eq!(summary.status, StatusCode::OK);
    let summary = summary.json();
    assert_eq!(summary["session_id"], Value::Null);
    assert_eq!(summary["uploaded_at"], Value::Null);
    assert_eq!(summary["total_count"], 0);
    assert_eq!(summary["avg_flowrate"], 0.0);
    assert_eq!(summary["type_distribution"], json!({}));

    assert_eq!(
        app.get("/report/pdf/", &token).await.status,
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn invalid_session_ids_are_validation_errors() {
    let app = test_app();
    let token = app.register("alice").await;

    let reply = app.get("/equipment/?session_id=abc", &token).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    let reply = app.get("/summary/?session_id=999", &token).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn history_lists_five_newest_first() {
    let app = test_app();
    let token = app.register("alice").await;

    let mut ids = Vec::new();
    for i in 0..7 {
        let reply = app.upload(&token, &format!("batch-{i}.csv"), SAMPLE).await;
        ids.push(reply.json()["session_id"].as_u64().unwrap());
    }

    let history = app.get("/history/", &token).await.json();
    let listed: Vec<u64> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["id"].as_u64().unwrap())
        .collect();
    let expected: Vec<u64> = ids.iter().rev().take(5).copied().collect();
    assert_eq!(listed, expected);
    assert_eq!(history[0]["filename"], "batch-6.csv");
    assert_eq!(history[0]["equipment_count"], 2);
    assert_eq!(history[0]["summary"]["total_count"], 2);

    // Sessions beyond the listing stay retrievable
    let oldest = app
        .get(&format!("/equipment/?session_id={}", ids[0]), &token)
        .await;
    assert_eq!(oldest.status, StatusCode::OK);
}

#[tokio::test]
async fn pdf_report_download() {
    let app = test_app();
    let token = app.register("alice").await;
    let upload = app.upload(&token, "sample.csv", SAMPLE).await.json();
    let session_id = upload["session_id"].as_u64().unwrap();

    let reply = app.get("/report/pdf/", &token).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.headers[header::CONTENT_TYPE], "application/pdf");
    assert_eq!(
        reply.headers[header::CONTENT_DISPOSITION],
        format!("attachment; filename=\"equipment_report_{session_id}.pdf\"")
    );
    assert!(reply.body.starts_with(b"%PDF"));
}

#[tokio::test]
async fn empty_sessions_cannot_be_rendered() {
    let app = test_app();
    let token = app.register("alice").await;
    let empty = app
        .state
        .store
        .create_session("alice", "empty.csv", Vec::new())
        .unwrap();

    let report = app
        .get(&format!("/report/pdf/?session_id={}", empty.id), &token)
        .await;
    assert_eq!(report.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(report.json()["error"].is_string());

    let chart = app
        .get(&format!("/chart/flowrate/?session_id={}", empty.id), &token)
        .await;
    assert_eq!(chart.status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn charts_are_served_as_png() {
    let app = test_app();
    let token = app.register("alice").await;
    app.upload(&token, "sample.csv", SAMPLE).await;

    for kind in ["types", "flowrate", "parameters"] {
        let reply = app.get(&format!("/chart/{kind}/"), &token).await;
        assert_eq!(reply.status, StatusCode::OK, "{kind}");
        assert_eq!(reply.headers[header::CONTENT_TYPE], "image/png");
        assert!(reply.body.starts_with(b"\x89PNG"), "{kind}");
    }
}

#[tokio::test]
async fn unknown_chart_kind_is_not_found() {
    let app = test_app();
    let token = app.register("alice").await;
    app.upload(&token, "sample.csv", SAMPLE).await;

    let reply = app.get("/chart/pie/", &token).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.json()["error"], "Unknown chart type: pie");
}

#[tokio::test]
async fn admin_bootstrap_account_can_log_in() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        data_dir: dir.path().to_path_buf(),
        ..Config::default()
    }
    .with_default_admin();
    let state = Arc::new(AppState::new(config).unwrap());
    state.bootstrap_admin().unwrap();
    // A second start leaves the account alone
    state.bootstrap_admin().unwrap();

    assert!(state.auth.login("admin", "admin123").is_ok());
    assert!(dir.path().join("users.json").is_file());
}
