use std::sync::Arc;

use httpmock::prelude::*;
use serde_json::json;

use demand_console::Error;
use demand_console::config::{ConnectionConfig, Role};
use demand_console::datasets::{DatasetId, load_rows};
use demand_console::transport::{HttpTransport, Transport, UploadFile, health};
use demand_console::workflows::upload_ideas;

fn transport(server: &MockServer, api_key: Option<&str>, role: Role) -> HttpTransport {
    let config = ConnectionConfig {
        base_url: server.base_url(),
        api_key: api_key.map(ToOwned::to_owned),
        role,
        config_path: None,
    };
    HttpTransport::new(Arc::new(config)).unwrap()
}

#[test]
fn role_header_is_always_sent_and_api_key_only_when_set() {
    let server = MockServer::start();
    let with_key = server.mock(|when, then| {
        when.method(GET)
            .path("/api/v1/health")
            .header_exists("x-api-key");
        then.status(200).json_body(json!({"status": "keyed"}));
    });
    let without_key = server.mock(|when, then| {
        when.method(GET)
            .path("/api/v1/health")
            .header("x-role", "viewer");
        then.status(200).json_body(json!({"status": "ok"}));
    });

    let t = transport(&server, None, Role::Viewer);
    assert_eq!(health(&t).unwrap(), json!({"status": "ok"}));
    with_key.assert_hits(0);
    without_key.assert_hits(1);
}

#[test]
fn api_key_header_carries_the_configured_value() {
    let server = MockServer::start();
    let m = server.mock(|when, then| {
        when.method(GET)
            .path("/api/v1/version")
            .header("x-api-key", "s3cret")
            .header("x-role", "executor");
        then.status(200).json_body(json!({"version": "1.4.0"}));
    });

    let t = transport(&server, Some("s3cret"), Role::Executor);
    assert_eq!(t.get("/api/v1/version").unwrap(), json!({"version": "1.4.0"}));
    m.assert();
}

#[test]
fn blank_api_key_is_not_sent() {
    let server = MockServer::start();
    let keyed = server.mock(|when, then| {
        when.path("/api/v1/health").header_exists("x-api-key");
        then.status(401).json_body(json!({"detail": "unexpected key"}));
    });
    let plain = server.mock(|when, then| {
        when.path("/api/v1/health");
        then.status(200).json_body(json!({"status": "ok"}));
    });

    let t = transport(&server, Some("   "), Role::Admin);
    assert!(health(&t).is_ok());
    keyed.assert_hits(0);
    plain.assert_hits(1);
}

#[test]
fn error_detail_is_surfaced_with_status() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/v1/workflows/validate");
        then.status(404)
            .header("content-type", "application/json")
            .json_body(json!({"detail": "ideas file not found"}));
    });

    let t = transport(&server, None, Role::Admin);
    let err = t
        .post("/api/v1/workflows/validate", &json!({"ideas_path": "x.csv"}))
        .unwrap_err();
    assert!(matches!(err, Error::Remote { status: 404, .. }));
    assert_eq!(err.to_string(), "HTTP 404 - ideas file not found");
}

#[test]
fn non_json_error_body_is_used_verbatim() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.path("/api/v1/health");
        then.status(503).body("upstream unavailable\n");
    });

    let t = transport(&server, None, Role::Admin);
    let err = health(&t).unwrap_err();
    assert_eq!(err.to_string(), "HTTP 503 - upstream unavailable");
}

#[test]
fn empty_success_body_reads_as_empty_object() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/v1/reference-data/delete");
        then.status(204);
    });

    let t = transport(&server, None, Role::Editor);
    let v = t
        .post("/api/v1/reference-data/delete", &json!({"key_value": "1"}))
        .unwrap();
    assert_eq!(v, json!({}));
}

#[test]
fn non_json_success_body_is_a_decode_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.path("/api/v1/version");
        then.status(200).body("<html>proxy login</html>");
    });

    let t = transport(&server, None, Role::Admin);
    let err = t.get("/api/v1/version").unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
}

#[test]
fn rows_are_requested_with_path_paging_and_config_path() {
    let server = MockServer::start();
    let m = server.mock(|when, then| {
        when.method(GET)
            .path("/api/v1/reference-data/ra-weights")
            .query_param("path", "data/input/weights ra.csv")
            .query_param("limit", "10")
            .query_param("offset", "20")
            .query_param("config_path", "config/prod.yaml");
        then.status(200).json_body(json!({
            "path": "data/input/weights ra.csv",
            "total": 31,
            "rows": [
                {"RequestingArea": "Retail", "Weight": 0.4},
                {"RequestingArea": "Wholesale", "Weight": 0.6, "Notes": null}
            ]
        }));
    });

    let t = transport(&server, None, Role::Viewer);
    let page = load_rows(
        &t,
        DatasetId::Ra,
        "data/input/weights ra.csv",
        10,
        20,
        Some("config/prod.yaml"),
    )
    .unwrap();
    m.assert();
    assert_eq!(page.total, 31);
    assert_eq!(page.rows.len(), 2);
    assert_eq!(
        demand_console::datasets::columns(&page.rows),
        vec!["RequestingArea", "Weight", "Notes"]
    );
}

#[test]
fn ideas_upload_is_sent_as_multipart_file_field() {
    let server = MockServer::start();
    // registered first so a JSON content type would be caught here
    let as_json = server.mock(|when, then| {
        when.method(POST)
            .path("/api/v1/reference-data/upload-ideas")
            .header("content-type", "application/json");
        then.status(415).json_body(json!({"detail": "expected multipart"}));
    });
    let m = server.mock(|when, then| {
        when.method(POST)
            .path("/api/v1/reference-data/upload-ideas")
            .header("x-role", "editor")
            .header_exists("content-type")
            .matches(|req: &HttpMockRequest| {
                req.headers.iter().flatten().any(|(k, v)| {
                    k.eq_ignore_ascii_case("content-type")
                        && v.starts_with("multipart/form-data; boundary=")
                })
            })
            .body_contains("name=\"file\"")
            .body_contains("filename=\"ideas.csv\"")
            .body_contains("ID,Title");
        then.status(200)
            .json_body(json!({"path": "data/uploads/ideas-20240101.csv"}));
    });

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ideas.csv");
    std::fs::write(&path, "ID,Title\n1,Checkout revamp\n").unwrap();

    let t = transport(&server, None, Role::Editor);
    let file = UploadFile::from_path(&path).unwrap();
    let v = upload_ideas(&t, &file).unwrap();
    as_json.assert_hits(0);
    m.assert();
    assert_eq!(v["path"], "data/uploads/ideas-20240101.csv");
}
