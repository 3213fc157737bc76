use std::collections::HashMap;
use std::fs;

use demand_console::config::{self, ENV_API_KEY, ENV_BASE_URL, Overrides, Role, Settings};

#[test]
fn extends_imports_env_and_cli_layer_in_order() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("base.toml"),
        r#"
[connection]
base_url = "http://base:8000"
role = "viewer"
config_path = "config/base.yaml"

[paths]
ideas = "shared/ideas.csv"
ra = "shared/ra.csv"
"#,
    )
    .unwrap();
    fs::create_dir_all(dir.path().join("fragments")).unwrap();
    fs::write(
        dir.path().join("fragments/paths.toml"),
        r#"
[paths]
rs = "fragments/rs.csv"
ra = "fragments/ra.csv"
"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("demand.toml"),
        r#"
extends = "base.toml"
imports = ["fragments/paths.toml"]

[connection]
role = "editor"

[paths]
ideas = "local/ideas.csv"
"#,
    )
    .unwrap();

    let doc = config::load(&dir.path().join("demand.toml")).unwrap();
    assert!(doc.value_path("extends").is_none());
    assert!(doc.value_path("imports").is_none());

    let s = Settings::from_doc(&doc).unwrap();
    assert_eq!(s.connection.base_url, "http://base:8000");
    assert_eq!(s.connection.role, Role::Editor);
    assert_eq!(s.connection.config_path(), Some("config/base.yaml"));
    assert_eq!(s.paths.ideas, "local/ideas.csv");
    assert_eq!(s.paths.ra, "fragments/ra.csv");
    assert_eq!(s.paths.rs, "fragments/rs.csv");

    let env: HashMap<&str, &str> = [(ENV_BASE_URL, "http://env:9000"), (ENV_API_KEY, "from-env")]
        .into_iter()
        .collect();
    let s = s
        .apply_env(|k| env.get(k).map(|v| v.to_string()))
        .unwrap();
    assert_eq!(s.connection.base_url, "http://env:9000");
    assert_eq!(s.connection.api_key(), Some("from-env"));

    let s = s.apply_overrides(&Overrides {
        api_key: Some(String::new()),
        config_path: Some(String::new()),
        role: Some(Role::Admin),
        ..Default::default()
    });
    assert_eq!(s.connection.api_key(), None);
    assert_eq!(s.connection.config_path(), None);
    assert_eq!(s.connection.role, Role::Admin);
    assert_eq!(s.connection.base_url, "http://env:9000");

    let rendered = s.to_toml_masked().unwrap();
    assert!(rendered.contains("http://env:9000"));
    assert!(!rendered.contains("from-env"));
}

#[test]
fn masked_settings_hide_the_api_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("demand.toml");
    fs::write(
        &path,
        r#"
[connection]
api_key = "super-secret"
"#,
    )
    .unwrap();

    let s = Settings::from_doc(&config::load(&path).unwrap()).unwrap();
    assert_eq!(s.connection.api_key(), Some("super-secret"));
    let rendered = s.to_toml_masked().unwrap();
    assert!(rendered.contains("********"));
    assert!(!rendered.contains("super-secret"));
}

#[test]
fn extends_cycles_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.toml"), "extends = \"b.toml\"\n").unwrap();
    fs::write(dir.path().join("b.toml"), "extends = \"a.toml\"\n").unwrap();

    let err = config::load(&dir.path().join("a.toml")).unwrap_err();
    assert!(err.to_string().contains("cycle"), "{err}");
}

#[test]
fn invalid_role_in_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("demand.toml");
    fs::write(&path, "[connection]\nrole = \"root\"\n").unwrap();

    let err = Settings::from_doc(&config::load(&path).unwrap()).unwrap_err();
    assert!(err.to_string().contains("connection"), "{err}");
}
