use serde_json::{Map, Value};

use crate::activity::RequestDescriptor;
use crate::config::DatasetPaths;
use crate::datasets::with_config_path;
use crate::error::{Error, Result};

pub const RA_LIST_ROUTE: &str = "/api/v1/reference-data/requesting-areas/list";
pub const RA_RENAME_ROUTE: &str = "/api/v1/reference-data/requesting-areas/rename";
pub const RS_LIST_ROUTE: &str = "/api/v1/reference-data/revenue-streams/list";
pub const RS_RENAME_ROUTE: &str = "/api/v1/reference-data/revenue-streams/rename";

/// Entity columns that can be listed and renamed across the related files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    RequestingArea,
    RevenueStream,
}

impl Entity {
    pub fn label(self) -> &'static str {
        match self {
            Entity::RequestingArea => "Requesting Area",
            Entity::RevenueStream => "Revenue Stream",
        }
    }

    fn list_route(self) -> &'static str {
        match self {
            Entity::RequestingArea => RA_LIST_ROUTE,
            Entity::RevenueStream => RS_LIST_ROUTE,
        }
    }

    fn rename_route(self) -> &'static str {
        match self {
            Entity::RequestingArea => RA_RENAME_ROUTE,
            Entity::RevenueStream => RS_RENAME_ROUTE,
        }
    }

    // Requesting areas live in ideas + RA weights; revenue streams also in RS weights.
    fn file_fields(self, paths: &DatasetPaths) -> Vec<(&'static str, Value)> {
        let mut out = vec![
            ("ideas_path", Value::from(paths.ideas.as_str())),
            ("ra_weights_path", Value::from(paths.ra.as_str())),
        ];
        if self == Entity::RevenueStream {
            out.push(("rs_weights_path", Value::from(paths.rs.as_str())));
        }
        out
    }
}

pub fn list_request(entity: Entity, paths: &DatasetPaths, config_path: Option<&str>) -> RequestDescriptor {
    RequestDescriptor::post(entity.list_route(), payload(entity.file_fields(paths), config_path))
}

pub fn rename_request(
    entity: Entity,
    paths: &DatasetPaths,
    old_value: &str,
    new_value: &str,
    config_path: Option<&str>,
) -> Result<RequestDescriptor> {
    if old_value.trim().is_empty() {
        return Err(Error::malformed(format!("{} old value is empty", entity.label())));
    }
    if new_value.trim().is_empty() {
        return Err(Error::malformed(format!("{} new value is empty", entity.label())));
    }
    let mut fields = entity.file_fields(paths);
    fields.push(("old_value", Value::from(old_value)));
    fields.push(("new_value", Value::from(new_value)));
    Ok(RequestDescriptor::post(entity.rename_route(), payload(fields, config_path)))
}

fn payload(fields: Vec<(&'static str, Value)>, config_path: Option<&str>) -> Value {
    let map = fields
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect::<Map<_, _>>();
    with_config_path(map, config_path)
}

/// Old/new value inputs of the entity tools.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityForm {
    pub ra_old: String,
    pub ra_new: String,
    pub rs_old: String,
    pub rs_new: String,
}

impl EntityForm {
    pub fn rename_request(
        &self,
        entity: Entity,
        paths: &DatasetPaths,
        config_path: Option<&str>,
    ) -> Result<RequestDescriptor> {
        let (old, new) = match entity {
            Entity::RequestingArea => (&self.ra_old, &self.ra_new),
            Entity::RevenueStream => (&self.rs_old, &self.rs_new),
        };
        rename_request(entity, paths, old, new, config_path)
    }
}
