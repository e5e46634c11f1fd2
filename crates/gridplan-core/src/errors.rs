//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Error taxonomy for grid planning runs."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GridPlanError>;

#[derive(Debug, Error)]
pub enum GridPlanError {
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error(
        "no clustering within {attempts} attempts keeps every pole at or below {pole_max_connection} connections"
    )]
    ClusteringInfeasible {
        attempts: usize,
        pole_max_connection: usize,
    },
    #[error("invalid topology: {0}")]
    InvalidTopology(String),
    #[error("node {0} could not be attached to any pole")]
    DisconnectedNode(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("serialization error: {0}")]
    SerializationFailed(#[from] serde_json::Error),
    #[error("yaml serialization error: {0}")]
    YamlSerializationFailed(#[from] serde_yaml::Error),
}

impl GridPlanError {
    /// Errors caused by the caller's input rather than by an internal fault.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            GridPlanError::InvalidGeometry(_)
                | GridPlanError::InvalidParameter(_)
                | GridPlanError::ClusteringInfeasible { .. }
                | GridPlanError::InvalidTopology(_)
        )
    }
}
