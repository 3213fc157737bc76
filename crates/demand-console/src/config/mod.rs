use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use toml::Value;

use crate::datasets::DatasetId;
use crate::error::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_SETTINGS_FILE: &str = "demand.toml";

pub const ENV_BASE_URL: &str = "DEMAND_API_BASE_URL";
pub const ENV_API_KEY: &str = "DEMAND_API_KEY";
pub const ENV_ROLE: &str = "DEMAND_API_ROLE";
pub const ENV_CONFIG_PATH: &str = "DEMAND_CONFIG_PATH";

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Editor,
    Executor,
    #[default]
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Viewer, Role::Editor, Role::Executor, Role::Admin];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Editor => "editor",
            Role::Executor => "executor",
            Role::Admin => "admin",
        }
    }

    pub fn next(self) -> Role {
        let idx = Self::ALL.iter().position(|r| *r == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| Error::msg(format!("unknown role '{s}' (expected viewer/editor/executor/admin)")))
    }
}

/// Connection parameters shared by every outbound request.
///
/// Instances are treated as immutable snapshots: a settings edit builds a new
/// value and a new transport, so calls already in flight keep the old one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub role: Role,
    pub config_path: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            role: Role::default(),
            config_path: None,
        }
    }
}

impl ConnectionConfig {
    pub fn api_key(&self) -> Option<&str> {
        non_empty(self.api_key.as_deref())
    }

    pub fn config_path(&self) -> Option<&str> {
        non_empty(self.config_path.as_deref())
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetPaths {
    pub ideas: String,
    pub ra: String,
    pub rs: String,
}

impl Default for DatasetPaths {
    fn default() -> Self {
        Self {
            ideas: DatasetId::Ideas.descriptor().default_path.to_string(),
            ra: DatasetId::Ra.descriptor().default_path.to_string(),
            rs: DatasetId::Rs.descriptor().default_path.to_string(),
        }
    }
}

impl DatasetPaths {
    pub fn get(&self, id: DatasetId) -> &str {
        match id {
            DatasetId::Ideas => &self.ideas,
            DatasetId::Ra => &self.ra,
            DatasetId::Rs => &self.rs,
        }
    }

    pub fn set(&mut self, id: DatasetId, path: String) {
        match id {
            DatasetId::Ideas => self.ideas = path,
            DatasetId::Ra => self.ra = path,
            DatasetId::Rs => self.rs = path,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub connection: Arc<ConnectionConfig>,
    pub paths: DatasetPaths,
    pub source: Option<PathBuf>,
}

impl Settings {
    pub fn with_connection(&self, connection: ConnectionConfig) -> Self {
        Self {
            connection: Arc::new(connection),
            paths: self.paths.clone(),
            source: self.source.clone(),
        }
    }

    pub fn with_paths(&self, paths: DatasetPaths) -> Self {
        Self {
            connection: Arc::clone(&self.connection),
            paths,
            source: self.source.clone(),
        }
    }

    pub fn from_doc(doc: &ConfigDoc) -> Result<Self> {
        let section: ConnectionSection = doc.deserialize_path("connection")?.unwrap_or_default();
        let paths: DatasetPaths = doc.deserialize_path("paths")?.unwrap_or_default();

        let mut connection = ConnectionConfig::default();
        if let Some(url) = non_empty(section.base_url.as_deref()) {
            connection.base_url = url.to_string();
        }
        connection.api_key = non_empty(section.api_key.as_deref())
            .map(ToOwned::to_owned)
            .or_else(|| resolve_env_ref(section.api_key_env.as_deref()));
        if let Some(role) = section.role {
            connection.role = role;
        }
        connection.config_path = non_empty(section.config_path.as_deref()).map(ToOwned::to_owned);

        Ok(Self {
            connection: Arc::new(connection),
            paths,
            source: Some(doc.path.clone()),
        })
    }

    /// Layers environment variables over the loaded values.
    pub fn apply_env<F>(self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut connection = (*self.connection).clone();
        if let Some(url) = get(ENV_BASE_URL) {
            connection.base_url = url;
        }
        if let Some(key) = get(ENV_API_KEY) {
            connection.api_key = Some(key);
        }
        if let Some(role) = get(ENV_ROLE) {
            connection.role = role.parse()?;
        }
        if let Some(cfg) = get(ENV_CONFIG_PATH) {
            connection.config_path = Some(cfg);
        }
        Ok(self.with_connection(connection))
    }

    pub fn apply_overrides(self, o: &Overrides) -> Self {
        let mut connection = (*self.connection).clone();
        if let Some(url) = non_empty(o.base_url.as_deref()) {
            connection.base_url = url.to_string();
        }
        if let Some(key) = o.api_key.as_deref() {
            connection.api_key = non_empty(Some(key)).map(ToOwned::to_owned);
        }
        if let Some(role) = o.role {
            connection.role = role;
        }
        if let Some(cfg) = o.config_path.as_deref() {
            connection.config_path = non_empty(Some(cfg)).map(ToOwned::to_owned);
        }
        self.with_connection(connection)
    }

    /// Resolved settings as TOML, with the api key masked.
    pub fn to_toml_masked(&self) -> Result<String> {
        let c = &self.connection;
        let view = SettingsView {
            connection: ConnectionView {
                base_url: c.base_url.clone(),
                api_key: c.api_key().map(|_| "********".to_string()),
                role: c.role,
                config_path: c.config_path().map(ToOwned::to_owned),
            },
            paths: self.paths.clone(),
        };
        toml::to_string_pretty(&view).map_err(|e| Error::msg(format!("failed to render settings: {e}")))
    }
}

/// CLI-level overrides; `Some("")` clears an optional field.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub role: Option<Role>,
    pub config_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConnectionSection {
    base_url: Option<String>,
    api_key: Option<String>,
    api_key_env: Option<String>,
    role: Option<Role>,
    config_path: Option<String>,
}

#[derive(Serialize)]
struct SettingsView {
    connection: ConnectionView,
    paths: DatasetPaths,
}

#[derive(Serialize)]
struct ConnectionView {
    base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<String>,
    role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    config_path: Option<String>,
}

fn non_empty(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}

fn resolve_env_ref(env_key: Option<&str>) -> Option<String> {
    non_empty(env_key)
        .and_then(|k| std::env::var(k).ok())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Loads settings from `path` (or `demand.toml` when present), then `.env`,
/// the process environment and finally CLI overrides.
pub fn load_settings(path: Option<&Path>, overrides: &Overrides) -> Result<Settings> {
    dotenv::dotenv().ok();

    let base = match path {
        Some(p) => Settings::from_doc(&load(p)?)?,
        None => {
            let default = Path::new(DEFAULT_SETTINGS_FILE);
            if default.is_file() {
                Settings::from_doc(&load(default)?)?
            } else {
                Settings::default()
            }
        }
    };
    let settings = base
        .apply_env(|k| std::env::var(k).ok())?
        .apply_overrides(overrides);
    tracing::debug!(
        source = ?settings.source,
        base_url = %settings.connection.base_url,
        role = %settings.connection.role,
        "settings loaded"
    );
    Ok(settings)
}

#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: PathBuf,
    pub value: Value,
}

impl ConfigDoc {
    pub fn value_path(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if path.is_empty() {
            return Some(&self.value);
        }

        let mut cur = &self.value;
        for seg in path.split('.') {
            let tbl = cur.as_table()?;
            cur = tbl.get(seg)?;
        }
        Some(cur)
    }

    pub fn deserialize_path<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let Some(v) = self.value_path(path) else {
            return Ok(None);
        };
        let parsed = v
            .clone()
            .try_into()
            .map_err(|e| Error::msg(format!("invalid settings at '{}': {e}", path)))?;
        Ok(Some(parsed))
    }
}

fn merge_values(base: &mut Value, child: Value) {
    match (base, child) {
        (Value::Table(base_tbl), Value::Table(child_tbl)) => {
            for (k, v) in child_tbl {
                match base_tbl.get_mut(&k) {
                    Some(existing) => merge_values(existing, v),
                    None => {
                        base_tbl.insert(k, v);
                    }
                }
            }
        }
        (base_slot, child_val) => {
            *base_slot = child_val;
        }
    }
}

fn resolve_ref_path(from_file: &Path, reference: &str) -> PathBuf {
    let p = PathBuf::from(reference);
    if p.is_absolute() {
        p
    } else {
        from_file.parent().unwrap_or_else(|| Path::new(".")).join(p)
    }
}

fn take_imports(path: &Path, value: &mut Value) -> Result<Vec<String>> {
    let Some(tbl) = value.as_table_mut() else {
        return Ok(Vec::new());
    };
    let Some(raw) = tbl.remove("imports") else {
        return Ok(Vec::new());
    };
    let Some(arr) = raw.as_array() else {
        return Err(Error::msg(format!(
            "invalid imports in {} (expected array of strings)",
            path.display()
        )));
    };
    let mut out = Vec::new();
    for v in arr {
        let Some(s) = v.as_str() else {
            return Err(Error::msg(format!(
                "invalid imports entry in {} (expected string)",
                path.display()
            )));
        };
        let s = s.trim();
        if !s.is_empty() {
            out.push(s.to_string());
        }
    }
    Ok(out)
}

// Precedence inside one file: extends < imports (in order) < local keys.
fn load_value_inner(path: &Path, stack: &mut HashSet<PathBuf>) -> Result<Value> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !stack.insert(canonical.clone()) {
        return Err(Error::msg(format!(
            "settings import cycle detected at {}",
            canonical.display()
        )));
    }

    let data = fs::read_to_string(path)
        .map_err(|e| Error::msg(format!("failed to read settings {}: {e}", path.display())))?;
    let mut value: Value = toml::from_str(&data)
        .map_err(|e| Error::msg(format!("TOML parse error in {}: {e}", path.display())))?;

    let mut out = Value::Table(Default::default());
    if let Some(ext) = value.get("extends").and_then(Value::as_str) {
        let base_path = resolve_ref_path(path, ext);
        out = load_value_inner(&base_path, stack)?;
    }
    if let Some(tbl) = value.as_table_mut() {
        tbl.remove("extends");
    }

    for imp in take_imports(path, &mut value)? {
        let loaded = load_value_inner(&resolve_ref_path(path, &imp), stack)?;
        merge_values(&mut out, loaded);
    }

    merge_values(&mut out, value);

    stack.remove(&canonical);
    Ok(out)
}

pub fn load(path: &Path) -> Result<ConfigDoc> {
    let mut stack = HashSet::<PathBuf>::new();
    let value = load_value_inner(path, &mut stack)?;
    Ok(ConfigDoc {
        path: path.to_path_buf(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(raw: &str) -> ConfigDoc {
        ConfigDoc {
            path: PathBuf::from("<mem>"),
            value: toml::from_str(raw).expect("parse toml"),
        }
    }

    #[test]
    fn defaults_match_console_defaults() {
        let s = Settings::default();
        assert_eq!(s.connection.base_url, "http://127.0.0.1:8000");
        assert_eq!(s.connection.role, Role::Admin);
        assert_eq!(s.connection.api_key(), None);
        assert_eq!(s.paths.ra, "data/input/weights_ra.csv");
    }

    #[test]
    fn blank_api_key_and_config_path_are_treated_as_absent() {
        let s = Settings::from_doc(&doc(
            r#"
[connection]
api_key = "  "
config_path = ""
role = "viewer"
"#,
        ))
        .expect("settings");
        assert_eq!(s.connection.api_key(), None);
        assert_eq!(s.connection.config_path(), None);
        assert_eq!(s.connection.role, Role::Viewer);
    }

    #[test]
    fn env_then_overrides_take_precedence() {
        let s = Settings::from_doc(&doc(
            r#"
[connection]
base_url = "http://file:1"
role = "viewer"
"#,
        ))
        .expect("settings");
        let s = s
            .apply_env(|k| match k {
                ENV_BASE_URL => Some("http://env:2".into()),
                ENV_ROLE => Some("Editor".into()),
                _ => None,
            })
            .expect("env");
        assert_eq!(s.connection.base_url, "http://env:2");
        assert_eq!(s.connection.role, Role::Editor);

        let s = s.apply_overrides(&Overrides {
            base_url: Some("http://cli:3".into()),
            ..Default::default()
        });
        assert_eq!(s.connection.base_url, "http://cli:3");
        assert_eq!(s.connection.role, Role::Editor);
    }

    #[test]
    fn unknown_env_role_is_an_error() {
        let err = Settings::default()
            .apply_env(|k| (k == ENV_ROLE).then(|| "root".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("unknown role"));
    }

    #[test]
    fn with_connection_leaves_previous_snapshot_untouched() {
        let s1 = Settings::default();
        let held = Arc::clone(&s1.connection);
        let mut next = (*s1.connection).clone();
        next.base_url = "http://other:9".into();
        let s2 = s1.with_connection(next);
        assert_eq!(held.base_url, DEFAULT_BASE_URL);
        assert_eq!(s2.connection.base_url, "http://other:9");
    }

    #[test]
    fn role_cycles_through_all_values() {
        assert_eq!(Role::Viewer.next(), Role::Editor);
        assert_eq!(Role::Admin.next(), Role::Viewer);
    }

    #[test]
    fn masked_toml_hides_api_key() {
        let s = Settings::default().apply_overrides(&Overrides {
            api_key: Some("secret".into()),
            ..Default::default()
        });
        let out = s.to_toml_masked().expect("toml");
        assert!(!out.contains("secret"));
        assert!(out.contains("********"));
    }
}
