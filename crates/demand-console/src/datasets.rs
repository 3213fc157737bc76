use std::fmt;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::activity::RequestDescriptor;
use crate::error::{Error, Result};
use crate::transport::{Transport, with_query};

pub const UPSERT_ROUTE: &str = "/api/v1/reference-data/upsert";
pub const DELETE_ROUTE: &str = "/api/v1/reference-data/delete";
pub const OVERWRITE_ROUTE: &str = "/api/v1/reference-data/overwrite";

pub const DEFAULT_LIMIT: u32 = 50;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum DatasetId {
    #[default]
    Ideas,
    Ra,
    Rs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetDescriptor {
    pub id: DatasetId,
    pub endpoint: &'static str,
    pub default_path: &'static str,
    pub key_column: &'static str,
}

const REGISTRY: [DatasetDescriptor; 3] = [
    DatasetDescriptor {
        id: DatasetId::Ideas,
        endpoint: "/api/v1/reference-data/ideas",
        default_path: "data/input/ideas.csv",
        key_column: "ID",
    },
    DatasetDescriptor {
        id: DatasetId::Ra,
        endpoint: "/api/v1/reference-data/ra-weights",
        default_path: "data/input/weights_ra.csv",
        key_column: "RequestingArea",
    },
    DatasetDescriptor {
        id: DatasetId::Rs,
        endpoint: "/api/v1/reference-data/rs-weights",
        default_path: "data/input/weights_rs.csv",
        key_column: "RevenueStream",
    },
];

impl DatasetId {
    pub const ALL: [DatasetId; 3] = [DatasetId::Ideas, DatasetId::Ra, DatasetId::Rs];

    pub fn descriptor(self) -> &'static DatasetDescriptor {
        match self {
            DatasetId::Ideas => &REGISTRY[0],
            DatasetId::Ra => &REGISTRY[1],
            DatasetId::Rs => &REGISTRY[2],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DatasetId::Ideas => "ideas",
            DatasetId::Ra => "ra",
            DatasetId::Rs => "rs",
        }
    }

    pub fn next(self) -> DatasetId {
        let idx = Self::ALL.iter().position(|d| *d == self).unwrap_or(0);
        Self::ALL[(idx + 1) % Self::ALL.len()]
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One CSV cell. Anything that is not a string or number is folded into text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, from = "Value")]
pub enum Scalar {
    Text(String),
    Number(serde_json::Number),
    Null,
}

impl From<Value> for Scalar {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => Scalar::Null,
            Value::String(s) => Scalar::Text(s),
            Value::Number(n) => Scalar::Number(n),
            Value::Bool(b) => Scalar::Text(b.to_string()),
            other => Scalar::Text(other.to_string()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Text(s) => f.write_str(s),
            Scalar::Number(n) => write!(f, "{n}"),
            Scalar::Null => Ok(()),
        }
    }
}

pub type RowRecord = IndexMap<String, Scalar>;

/// Union of column names across `rows`, in first-seen order.
pub fn columns(rows: &[RowRecord]) -> Vec<String> {
    let mut seen = IndexSet::new();
    for row in rows {
        for key in row.keys() {
            seen.insert(key.clone());
        }
    }
    seen.into_iter().collect()
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RowsPage {
    pub path: Option<String>,
    pub rows: Vec<RowRecord>,
    pub total: u64,
}

impl RowsPage {
    pub fn from_value(v: &Value) -> Result<Self> {
        // `rows: null` / `total: null` read as empty, like a missing field
        let mut v = v.clone();
        if let Some(obj) = v.as_object_mut() {
            obj.retain(|_, val| !val.is_null());
        }
        serde_json::from_value(v).map_err(|e| Error::Decode(format!("rows payload: {e}")))
    }
}

pub fn rows_request(
    id: DatasetId,
    path: &str,
    limit: &str,
    offset: &str,
    config_path: Option<&str>,
) -> Result<RequestDescriptor> {
    let mut params = vec![("path", path), ("limit", limit), ("offset", offset)];
    if let Some(cfg) = config_path.filter(|s| !s.trim().is_empty()) {
        params.push(("config_path", cfg));
    }
    Ok(RequestDescriptor::get(with_query(
        id.descriptor().endpoint,
        &params,
    )?))
}

pub fn load_rows(
    transport: &dyn Transport,
    id: DatasetId,
    path: &str,
    limit: u32,
    offset: u32,
    config_path: Option<&str>,
) -> Result<RowsPage> {
    let req = rows_request(
        id,
        path,
        &limit.to_string(),
        &offset.to_string(),
        config_path,
    )?;
    RowsPage::from_value(&req.send(transport)?)
}

pub(crate) fn with_config_path(mut payload: Map<String, Value>, config_path: Option<&str>) -> Value {
    if let Some(cfg) = config_path.map(str::trim).filter(|s| !s.is_empty()) {
        payload.insert("config_path".into(), Value::String(cfg.to_string()));
    }
    Value::Object(payload)
}

pub(crate) fn base_payload<const N: usize>(
    fields: [(&str, Value); N],
    config_path: Option<&str>,
) -> Value {
    let map = fields
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect::<Map<_, _>>();
    with_config_path(map, config_path)
}

pub fn upsert_request(
    path: &str,
    key_column: &str,
    row_json: &str,
    config_path: Option<&str>,
) -> Result<RequestDescriptor> {
    let row: Value = serde_json::from_str(row_json)
        .map_err(|e| Error::malformed(format!("upsert row is not valid JSON: {e}")))?;
    if !row.is_object() {
        return Err(Error::malformed("upsert row must be a JSON object"));
    }
    Ok(RequestDescriptor::post(
        UPSERT_ROUTE,
        base_payload(
            [
                ("path", Value::from(path)),
                ("key_column", Value::from(key_column)),
                ("row", row),
            ],
            config_path,
        ),
    ))
}

pub fn delete_request(
    path: &str,
    key_column: &str,
    key_value: &str,
    config_path: Option<&str>,
) -> RequestDescriptor {
    RequestDescriptor::post(
        DELETE_ROUTE,
        base_payload(
            [
                ("path", Value::from(path)),
                ("key_column", Value::from(key_column)),
                ("key_value", Value::from(key_value)),
            ],
            config_path,
        ),
    )
}

pub fn overwrite_request(
    path: &str,
    rows_json: &str,
    config_path: Option<&str>,
) -> Result<RequestDescriptor> {
    let rows: Value = serde_json::from_str(rows_json)
        .map_err(|e| Error::malformed(format!("overwrite rows are not valid JSON: {e}")))?;
    let Some(items) = rows.as_array() else {
        return Err(Error::malformed("overwrite rows must be a JSON array"));
    };
    if items.iter().any(|r| !r.is_object()) {
        return Err(Error::malformed("every overwrite row must be a JSON object"));
    }
    Ok(RequestDescriptor::post(
        OVERWRITE_ROUTE,
        base_payload([("path", Value::from(path)), ("rows", rows)], config_path),
    ))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetSelection {
    pub path: String,
    pub key_column: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditDraft {
    pub draft_json: String,
    pub key_value: Option<String>,
}

/// Seeds edit buffers from a loaded row. A null key cell yields no key.
pub fn begin_edit(row: &RowRecord, key_column: &str) -> EditDraft {
    // serialize the map directly so column order survives
    let draft_json = serde_json::to_string_pretty(row).unwrap_or_else(|_| "{}".to_string());
    EditDraft {
        draft_json,
        key_value: row
            .get(key_column)
            .filter(|v| !matches!(v, Scalar::Null))
            .map(Scalar::to_string),
    }
}

pub fn default_row_draft() -> String {
    "{\n  \"ID\": \"\",\n  \"Name\": \"\"\n}".to_string()
}

pub fn default_overwrite_draft() -> String {
    "[\n  {}\n]".to_string()
}

/// Tracks the selected dataset together with its path, key column and the
/// rows loaded for it.
#[derive(Debug, Clone)]
pub struct DatasetCoordinator {
    current: DatasetId,
    generation: u64,
    pub path: String,
    pub key_column: String,
    pub key_value: String,
    pub limit: String,
    pub offset: String,
    pub row_draft: String,
    pub overwrite_draft: String,
    rows: Vec<RowRecord>,
    total: u64,
}

impl Default for DatasetCoordinator {
    fn default() -> Self {
        let d = DatasetId::Ideas.descriptor();
        Self {
            current: d.id,
            generation: 0,
            path: d.default_path.to_string(),
            key_column: d.key_column.to_string(),
            key_value: String::new(),
            limit: DEFAULT_LIMIT.to_string(),
            offset: "0".to_string(),
            row_draft: default_row_draft(),
            overwrite_draft: default_overwrite_draft(),
            rows: Vec::new(),
            total: 0,
        }
    }
}

impl DatasetCoordinator {
    pub fn current(&self) -> DatasetId {
        self.current
    }

    /// Monotonic counter bumped on every dataset switch.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn rows(&self) -> &[RowRecord] {
        &self.rows
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn select_dataset(&mut self, id: DatasetId) -> DatasetSelection {
        let d = id.descriptor();
        self.current = id;
        self.generation = self.generation.wrapping_add(1);
        self.path = d.default_path.to_string();
        self.key_column = d.key_column.to_string();
        self.rows.clear();
        self.total = 0;
        tracing::debug!(dataset = %id, path = %self.path, "dataset selected");
        DatasetSelection {
            path: self.path.clone(),
            key_column: self.key_column.clone(),
        }
    }

    pub fn rows_request(&self, config_path: Option<&str>) -> Result<RequestDescriptor> {
        let limit = parse_count("limit", &self.limit)?;
        let offset = parse_count("offset", &self.offset)?;
        rows_request(
            self.current,
            &self.path,
            &limit.to_string(),
            &offset.to_string(),
            config_path,
        )
    }

    /// Stores a loaded page unless the dataset changed since the load began.
    pub fn apply_page(&mut self, generation: u64, page: RowsPage) -> bool {
        if generation != self.generation {
            tracing::debug!(
                loaded_for = generation,
                current = self.generation,
                "discarding rows for a previous dataset selection"
            );
            return false;
        }
        self.rows = page.rows;
        self.total = page.total;
        true
    }

    pub fn load(&mut self, transport: &dyn Transport, config_path: Option<&str>) -> Result<Value> {
        let generation = self.generation;
        let raw = self.rows_request(config_path)?.send(transport)?;
        self.apply_page(generation, RowsPage::from_value(&raw)?);
        Ok(raw)
    }

    pub fn begin_edit(&mut self, row: &RowRecord) -> EditDraft {
        let draft = begin_edit(row, &self.key_column);
        self.row_draft = draft.draft_json.clone();
        if let Some(k) = draft.key_value.as_ref() {
            self.key_value = k.clone();
        }
        draft
    }

    pub fn begin_edit_at(&mut self, index: usize) -> Option<EditDraft> {
        let row = self.rows.get(index)?.clone();
        Some(self.begin_edit(&row))
    }

    pub fn upsert_request(&self, config_path: Option<&str>) -> Result<RequestDescriptor> {
        upsert_request(&self.path, &self.key_column, &self.row_draft, config_path)
    }

    pub fn delete_request(&self, config_path: Option<&str>) -> RequestDescriptor {
        delete_request(&self.path, &self.key_column, &self.key_value, config_path)
    }

    pub fn overwrite_request(&self, config_path: Option<&str>) -> Result<RequestDescriptor> {
        overwrite_request(&self.path, &self.overwrite_draft, config_path)
    }

    pub fn upsert(&self, transport: &dyn Transport, config_path: Option<&str>) -> Result<Value> {
        self.upsert_request(config_path)?.send(transport)
    }

    pub fn delete(&self, transport: &dyn Transport, config_path: Option<&str>) -> Result<Value> {
        self.delete_request(config_path).send(transport)
    }

    pub fn overwrite_all(
        &self,
        transport: &dyn Transport,
        config_path: Option<&str>,
    ) -> Result<Value> {
        self.overwrite_request(config_path)?.send(transport)
    }
}

fn parse_count(name: &str, raw: &str) -> Result<u32> {
    raw.trim()
        .parse::<u32>()
        .map_err(|_| Error::malformed(format!("{name} must be a non-negative integer, got '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::interpret_response;
    use serde_json::json;

    fn row(v: Value) -> RowRecord {
        serde_json::from_value(v).expect("row")
    }

    #[test]
    fn switching_dataset_resets_path_key_and_rows() {
        let mut c = DatasetCoordinator::default();
        let g = c.generation();
        assert!(c.apply_page(
            g,
            RowsPage {
                path: None,
                rows: vec![row(json!({"ID": "1"}))],
                total: 1,
            }
        ));
        c.path = "custom.csv".into();
        c.key_column = "Other".into();

        let sel = c.select_dataset(DatasetId::Ra);
        assert_eq!(sel.path, "data/input/weights_ra.csv");
        assert_eq!(sel.key_column, "RequestingArea");
        assert_eq!(c.path, "data/input/weights_ra.csv");
        assert!(c.rows().is_empty());
        assert_eq!(c.total(), 0);
    }

    #[test]
    fn stale_pages_are_discarded() {
        let mut c = DatasetCoordinator::default();
        let g = c.generation();
        c.select_dataset(DatasetId::Rs);
        let applied = c.apply_page(
            g,
            RowsPage {
                path: None,
                rows: vec![row(json!({"ID": "1"}))],
                total: 1,
            },
        );
        assert!(!applied);
        assert!(c.rows().is_empty());
    }

    #[test]
    fn begin_edit_extracts_key_when_present() {
        let r = row(json!({"ID": "7", "Name": "X"}));
        let d = begin_edit(&r, "ID");
        assert!(d.draft_json.contains("\"ID\": \"7\""));
        assert_eq!(d.key_value.as_deref(), Some("7"));

        let d = begin_edit(&r, "RevenueStream");
        assert_eq!(d.key_value, None);
    }

    #[test]
    fn begin_edit_keeps_previous_key_when_column_missing() {
        let mut c = DatasetCoordinator::default();
        c.key_value = "keep".into();
        c.begin_edit(&row(json!({"Name": "X"})));
        assert_eq!(c.key_value, "keep");
        c.begin_edit(&row(json!({"ID": 12, "Name": "X"})));
        assert_eq!(c.key_value, "12");
    }

    #[test]
    fn malformed_upsert_buffer_fails_locally() {
        let err = upsert_request("p.csv", "ID", "{ID:}", None).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
        let err = upsert_request("p.csv", "ID", "[1]", None).unwrap_err();
        assert!(matches!(err, Error::MalformedInput(_)));
    }

    #[test]
    fn overwrite_requires_array_of_objects() {
        assert!(overwrite_request("p", "{}", None).is_err());
        assert!(overwrite_request("p", "[1, 2]", None).is_err());
        let req = overwrite_request("p", "[{\"ID\": \"1\"}]", Some("cfg.yaml")).unwrap();
        assert_eq!(
            req.payload.unwrap(),
            json!({"path": "p", "rows": [{"ID": "1"}], "config_path": "cfg.yaml"})
        );
    }

    #[test]
    fn empty_config_path_is_omitted() {
        let req = delete_request("p", "ID", "7", Some("  "));
        assert_eq!(
            req.payload.unwrap(),
            json!({"path": "p", "key_column": "ID", "key_value": "7"})
        );
    }

    #[test]
    fn rows_request_encodes_query() {
        let mut c = DatasetCoordinator::default();
        c.path = "data/my ideas.csv".into();
        let req = c.rows_request(Some("cfg/a.yaml")).unwrap();
        assert_eq!(
            req.path,
            "/api/v1/reference-data/ideas?path=data%2Fmy+ideas.csv&limit=50&offset=0&config_path=cfg%2Fa.yaml"
        );
        c.limit = "-1".into();
        assert!(matches!(c.rows_request(None), Err(Error::MalformedInput(_))));
    }

    #[test]
    fn columns_are_first_seen_union() {
        let rows = vec![
            row(json!({"ID": "1", "Name": "a"})),
            row(json!({"ID": "2", "Size": 3, "Flag": true, "Note": null})),
        ];
        assert_eq!(columns(&rows), vec!["ID", "Name", "Size", "Flag", "Note"]);
        assert_eq!(rows[1]["Flag"], Scalar::Text("true".into()));
        assert_eq!(rows[1]["Note"].to_string(), "");
    }

    #[test]
    fn rows_page_tolerates_missing_fields() {
        let page = RowsPage::from_value(&json!({"rows": null})).unwrap();
        assert!(page.rows.is_empty());
        assert_eq!(page.total, 0);
    }

    #[test]
    fn null_key_cell_keeps_the_delete_candidate() {
        let r = row(json!({"ID": null, "Name": "X"}));
        assert_eq!(begin_edit(&r, "ID").key_value, None);

        let mut c = DatasetCoordinator::default();
        c.key_value = "41".into();
        c.begin_edit(&r);
        assert_eq!(c.key_value, "41");
    }

    #[test]
    fn server_column_order_survives_parsing() {
        let raw = interpret_response(
            200,
            r#"{"rows":[{"Zeta":"1","Alpha":"2"},{"Mid":3,"Zeta":"4"}],"total":2}"#,
        )
        .unwrap();
        let page = RowsPage::from_value(&raw).unwrap();
        assert_eq!(columns(&page.rows), vec!["Zeta", "Alpha", "Mid"]);

        let draft = begin_edit(&page.rows[0], "Zeta");
        assert_eq!(draft.draft_json, "{\n  \"Zeta\": \"1\",\n  \"Alpha\": \"2\"\n}");
        assert_eq!(crate::activity::pretty(&raw["rows"][0]), draft.draft_json);
    }
}
