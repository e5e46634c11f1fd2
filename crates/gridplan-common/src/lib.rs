//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared configuration and logging for the planning tools."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Configuration loading and tracing setup shared by the gridplan binaries.

pub mod config;
pub mod logging;

pub use config::{
    ApiConfig, LoadedPlannerConfig, LoggingConfig, OptimizerConfig, PlannerConfig, StorageConfig,
};
pub use logging::{init_tracing, LogFormat};
