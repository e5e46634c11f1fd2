//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "File loaders for requests, boundaries and grid documents."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::{fs, path::Path};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{
    boundary::Boundary,
    errors::{GridPlanError, Result},
    request::OptimizeGridRequest,
    shs::ShsParameters,
    store::{LinkRecord, NodeRecord},
};

/// Node and link tables bundled in one JSON document for import and export.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridDocument {
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub links: Vec<LinkRecord>,
}

/// Parse JSON when the document starts with `{` or `[`, YAML otherwise.
fn load_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read_to_string(path)?;
    let trimmed = data.trim_start();
    let value = if trimmed.starts_with('{') || trimmed.starts_with('[') {
        serde_json::from_str(&data)?
    } else {
        serde_yaml::from_str(&data).map_err(GridPlanError::YamlSerializationFailed)?
    };
    Ok(value)
}

pub fn load_request_from_file(path: impl AsRef<Path>) -> Result<OptimizeGridRequest> {
    let request: OptimizeGridRequest = load_document(path.as_ref())?;
    request.validate()?;
    Ok(request)
}

pub fn load_shs_parameters_from_file(path: impl AsRef<Path>) -> Result<ShsParameters> {
    let params: ShsParameters = load_document(path.as_ref())?;
    params.validate()?;
    Ok(params)
}

pub fn load_boundary_from_file(path: impl AsRef<Path>) -> Result<Boundary> {
    load_document(path.as_ref())
}

pub fn load_grid_document(path: impl AsRef<Path>) -> Result<GridDocument> {
    load_document(path.as_ref())
}

pub fn write_grid_document(path: impl AsRef<Path>, document: &GridDocument) -> Result<()> {
    let serialized = serde_json::to_string_pretty(document)?;
    fs::write(path, serialized)?;
    Ok(())
}
