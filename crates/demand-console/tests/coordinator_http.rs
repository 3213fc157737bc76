use std::sync::Arc;

use httpmock::prelude::*;
use serde_json::json;

use demand_console::Error;
use demand_console::config::{ConnectionConfig, Role};
use demand_console::datasets::{DatasetCoordinator, DatasetId};
use demand_console::jobs::{JobKind, JobList, JobManager, JobState};
use demand_console::transport::{HttpTransport, version};

fn transport(server: &MockServer) -> HttpTransport {
    HttpTransport::new(Arc::new(ConnectionConfig {
        base_url: format!("{}/", server.base_url()),
        api_key: None,
        role: Role::Editor,
        config_path: None,
    }))
    .unwrap()
}

#[test]
fn crud_round_against_one_dataset() {
    let server = MockServer::start();
    let load = server.mock(|when, then| {
        when.method(GET)
            .path("/api/v1/reference-data/rs-weights")
            .query_param("path", "data/input/weights_rs.csv")
            .query_param("limit", "5")
            .query_param("offset", "0");
        then.status(200).json_body(json!({
            "rows": [{"RevenueStream": "Cloud", "Weight": 3}],
            "total": 1
        }));
    });
    let upsert = server.mock(|when, then| {
        when.method(POST)
            .path("/api/v1/reference-data/upsert")
            .json_body(json!({
                "path": "data/input/weights_rs.csv",
                "key_column": "RevenueStream",
                "row": {"RevenueStream": "Cloud", "Weight": 3}
            }));
        then.status(200).json_body(json!({"updated": true}));
    });
    let delete = server.mock(|when, then| {
        when.method(POST)
            .path("/api/v1/reference-data/delete")
            .json_body(json!({
                "path": "data/input/weights_rs.csv",
                "key_column": "RevenueStream",
                "key_value": "Cloud",
                "config_path": "config/x.yaml"
            }));
        then.status(200).json_body(json!({"deleted": 1}));
    });
    let overwrite = server.mock(|when, then| {
        when.method(POST)
            .path("/api/v1/reference-data/overwrite")
            .json_body(json!({
                "path": "data/input/weights_rs.csv",
                "rows": [{"RevenueStream": "Edge", "Weight": 1}]
            }));
        then.status(200).json_body(json!({"rows": 1}));
    });

    let t = transport(&server);
    let mut c = DatasetCoordinator::default();
    let sel = c.select_dataset(DatasetId::Rs);
    assert_eq!(sel.key_column, "RevenueStream");
    c.limit = "5".into();

    c.load(&t, None).unwrap();
    load.assert();
    assert_eq!(c.total(), 1);

    let draft = c.begin_edit_at(0).unwrap();
    assert_eq!(draft.key_value.as_deref(), Some("Cloud"));
    assert_eq!(c.key_value, "Cloud");

    c.upsert(&t, None).unwrap();
    upsert.assert();
    c.delete(&t, Some("config/x.yaml")).unwrap();
    delete.assert();

    c.overwrite_draft = r#"[{"RevenueStream": "Edge", "Weight": 1}]"#.into();
    c.overwrite_all(&t, Some("  ")).unwrap();
    overwrite.assert();
}

#[test]
fn malformed_overwrite_never_hits_the_server() {
    let server = MockServer::start();
    let any = server.mock(|when, then| {
        when.path_contains("/api/v1/");
        then.status(200).json_body(json!({}));
    });

    let t = transport(&server);
    let mut c = DatasetCoordinator::default();
    c.overwrite_draft = r#"[{"ID": "1"}, 2]"#.into();
    let err = c.overwrite_all(&t, None).unwrap_err();
    assert!(matches!(err, Error::MalformedInput(_)));
    c.row_draft = "[]".into();
    assert!(matches!(c.upsert(&t, None), Err(Error::MalformedInput(_))));
    any.assert_hits(0);
}

#[test]
fn job_manager_submits_polls_and_lists() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/v1/jobs/workflows/validate");
        then.status(202).json_body(json!({"job_id": "j-7", "status": "queued"}));
    });
    let poll = server.mock(|when, then| {
        when.method(GET).path("/api/v1/jobs/j-7");
        then.status(200)
            .json_body(json!({"job_id": "j-7", "status": "failed", "error": "bad csv"}));
    });
    let list = server.mock(|when, then| {
        when.method(GET)
            .path("/api/v1/jobs")
            .query_param("limit", "3");
        then.status(200).json_body(json!({
            "count": 1,
            "jobs": [{"job_id": "j-7", "job_type": "validate", "status": "failed"}]
        }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/v1/version");
        then.status(200).json_body(json!({"version": "2.0.1"}));
    });

    let t = transport(&server);
    let mut m = JobManager::default();
    m.submit(&t, JobKind::Validate, json!({"ideas_path": "a.csv"}))
        .unwrap();
    assert_eq!(m.state(), &JobState::Submitted { job_id: "j-7".into() });

    let status = m.poll(&t, "j-7").unwrap();
    poll.assert();
    assert_eq!(status["error"], "bad csv");
    assert_eq!(
        m.active().and_then(|h| h.last_known_status.as_ref()),
        Some(&status)
    );

    let jobs = JobList::from_value(&m.list(&t, 3).unwrap());
    list.assert();
    assert_eq!(jobs.count, 1);
    assert_eq!(jobs.jobs[0].job_type, "validate");

    assert_eq!(version(&t).unwrap()["version"], "2.0.1");
}

#[test]
fn submit_without_job_id_keeps_the_previous_state() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/v1/jobs/workflows/compare");
        then.status(200).json_body(json!({"status": "rejected"}));
    });

    let t = transport(&server);
    let mut m = JobManager::default();
    let res = m.submit(&t, JobKind::Compare, json!({})).unwrap();
    assert_eq!(res["status"], "rejected");
    assert_eq!(m.state(), &JobState::Idle);
    assert!(m.active().is_none());
}
