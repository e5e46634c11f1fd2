//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Planning subcommands: optimize, SHS identification and boundary removal."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Args};
use gridplan_common::{OptimizerConfig, PlannerConfig};
use gridplan_core::{
    identify_shs_in_store,
    io::{load_boundary_from_file, load_request_from_file, load_shs_parameters_from_file},
    plan_from_store, remove_boundary_in_store,
    store::{assemble_grid, GridStore},
    OptimizeGridRequest,
};
use tracing::{info, warn};

use crate::open_store;

#[derive(Debug, Args)]
pub struct OptimizeCommand {
    /// Request document with cost parameters and optimizer settings (JSON or YAML).
    #[arg(long, value_name = "FILE")]
    request: PathBuf,

    /// Stop the relaxation after this many seconds and keep the best layout so far.
    #[arg(long = "time-limit", value_name = "SECS")]
    time_limit: Option<u64>,

    /// Override the seed of the random first guess.
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,

    /// Directory for the JSON reports (defaults to storage.report_dir).
    #[arg(long = "report-dir", value_name = "DIR")]
    report_dir: Option<PathBuf>,

    /// Skip writing the JSON reports.
    #[arg(long = "no-report", action = ArgAction::SetTrue)]
    no_report: bool,
}

impl OptimizeCommand {
    pub fn execute(self, config: &PlannerConfig) -> Result<()> {
        let mut request = load_request_from_file(&self.request)
            .with_context(|| format!("unable to load request {}", self.request.display()))?;
        apply_optimizer_defaults(&mut request, &config.optimizer);
        if let Some(secs) = self.time_limit {
            request.optimization.time_limit_secs = Some(secs);
        }
        if let Some(seed) = self.seed {
            request.optimization.seed = seed;
        }

        let mut store = open_store(&config.storage);
        let report = plan_from_store(&mut store, &request, None)
            .with_context(|| format!("optimization over {} failed", store.nodes_path().display()))?;
        if report.interrupted {
            warn!(run_id = %report.run_id, "run stopped early, best layout so far was stored");
        }
        info!(
            run_id = %report.run_id,
            n_consumers = report.summary.n_consumers,
            n_poles = report.summary.n_poles,
            cost_grid = report.summary.cost_grid,
            "optimization finished"
        );

        if !self.no_report {
            let links = store.load_links()?;
            let grid = assemble_grid(
                store.load_nodes()?,
                &links,
                request.grid_costs()?,
                request.pole.max_connections,
            )?;
            let output = self
                .report_dir
                .unwrap_or_else(|| config.storage.report_dir.clone());
            report
                .exporter(&grid)
                .export_all(&output)
                .with_context(|| format!("unable to write reports to {}", output.display()))?;
        }

        println!(
            "{} poles, {} consumers, grid cost {:.2} per year",
            report.summary.n_poles, report.summary.n_consumers, report.summary.cost_grid
        );
        Ok(())
    }
}

/// Fill settings the request leaves open from the deployment config.
fn apply_optimizer_defaults(request: &mut OptimizeGridRequest, defaults: &OptimizerConfig) {
    let settings = &mut request.optimization;
    if settings.time_limit_secs.is_none() {
        settings.time_limit_secs = defaults.default_time_limit.map(|limit| limit.as_secs());
    }
    if settings.max_clustering_attempts.is_none() {
        settings.max_clustering_attempts = Some(defaults.max_clustering_attempts);
    }
}

#[derive(Debug, Args)]
pub struct IdentifyShsCommand {
    /// Cable price, grid surcharge and SHS prices per demand tier (JSON or YAML).
    #[arg(long, value_name = "FILE")]
    params: PathBuf,
}

impl IdentifyShsCommand {
    pub fn execute(self, config: &PlannerConfig) -> Result<()> {
        let params = load_shs_parameters_from_file(&self.params)
            .with_context(|| format!("unable to load SHS parameters {}", self.params.display()))?;
        let mut store = open_store(&config.storage);
        let partition = identify_shs_in_store(&mut store, params)?;
        info!(
            grid_connected = partition.grid_connected.len(),
            shs = partition.shs.len(),
            "SHS identification finished"
        );
        println!(
            "{} consumers stay on the grid, {} move to solar-home-systems",
            partition.grid_connected.len(),
            partition.shs.len()
        );
        for id in &partition.shs {
            println!("  {id}");
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct RemoveBoundaryCommand {
    /// Polygon as a list of `[latitude, longitude]` vertices (JSON or YAML).
    #[arg(long, value_name = "FILE")]
    boundary: PathBuf,
}

impl RemoveBoundaryCommand {
    pub fn execute(self, config: &PlannerConfig) -> Result<()> {
        let boundary = load_boundary_from_file(&self.boundary)
            .with_context(|| format!("unable to load boundary {}", self.boundary.display()))?;
        let mut store = open_store(&config.storage);
        let removed = remove_boundary_in_store(&mut store, &boundary)?;
        println!("removed {} nodes", removed.len());
        Ok(())
    }
}
