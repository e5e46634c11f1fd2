//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Table subcommands: import, export and summary listing."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Args};
use gridplan_common::PlannerConfig;
use gridplan_core::{
    io::{load_grid_document, write_grid_document, GridDocument},
    model::GridCosts,
    reports::ReportExporter,
    store::{assemble_grid, GridStore},
};
use tracing::info;

use crate::open_store;

#[derive(Debug, Args)]
pub struct ImportCommand {
    /// Grid document with `nodes` and `links` arrays (JSON or YAML).
    #[arg(long, value_name = "FILE")]
    file: PathBuf,
}

impl ImportCommand {
    pub fn execute(self, config: &PlannerConfig) -> Result<()> {
        let document = load_grid_document(&self.file)
            .with_context(|| format!("unable to load grid document {}", self.file.display()))?;
        // Reject bad coordinates and dangling links before touching the store.
        assemble_grid(document.nodes.clone(), &document.links, GridCosts::default(), 0)
            .with_context(|| format!("{} is not a consistent grid", self.file.display()))?;

        let mut store = open_store(&config.storage);
        store.save_nodes(&document.nodes)?;
        store.save_links(&document.links)?;
        info!(
            nodes = document.nodes.len(),
            links = document.links.len(),
            source = %self.file.display(),
            "grid document imported"
        );
        println!(
            "imported {} nodes and {} links",
            document.nodes.len(),
            document.links.len()
        );
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct ExportCommand {
    /// Directory for layout.json and summary.json (defaults to storage.report_dir).
    #[arg(long, value_name = "DIR", conflicts_with = "document")]
    output: Option<PathBuf>,

    /// Write a plain grid document to this file instead of the reports.
    #[arg(long, value_name = "FILE")]
    document: Option<PathBuf>,
}

impl ExportCommand {
    pub fn execute(self, config: &PlannerConfig) -> Result<()> {
        let store = open_store(&config.storage);
        let nodes = store.load_nodes()?;
        let links = store.load_links()?;

        if let Some(path) = self.document {
            write_grid_document(&path, &GridDocument { nodes, links })
                .with_context(|| format!("unable to write {}", path.display()))?;
            println!("wrote {}", path.display());
            return Ok(());
        }

        let grid = assemble_grid(nodes, &links, GridCosts::default(), 0)?;
        let output = self
            .output
            .unwrap_or_else(|| config.storage.report_dir.clone());
        let written = ReportExporter::new(&grid)
            .export_all(&output)
            .with_context(|| format!("unable to write reports to {}", output.display()))?;
        for path in written {
            println!("wrote {}", path.display());
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct SummaryCommand {
    /// Only show the most recent runs.
    #[arg(long, value_name = "N")]
    last: Option<usize>,

    /// Print the rows as a JSON array.
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

impl SummaryCommand {
    pub fn execute(self, config: &PlannerConfig) -> Result<()> {
        let store = open_store(&config.storage);
        let mut rows = store.load_summaries()?;
        if let Some(last) = self.last {
            let skip = rows.len().saturating_sub(last);
            rows.drain(..skip);
        }

        if self.json {
            println!("{}", serde_json::to_string_pretty(&rows)?);
            return Ok(());
        }
        if rows.is_empty() {
            println!("no runs recorded");
            return Ok(());
        }
        println!(
            "{:<26} {:>10} {:>8} {:>12} {:>12} {:>12}",
            "recorded_at", "consumers", "poles", "hv_cable_m", "lv_cable_m", "cost_grid"
        );
        for row in rows {
            println!(
                "{:<26} {:>10} {:>8} {:>12.1} {:>12.1} {:>12.2}",
                row.recorded_at.format("%Y-%m-%dT%H:%M:%SZ"),
                row.n_consumers,
                row.n_poles,
                row.length_hv_cable,
                row.length_lv_cable,
                row.cost_grid
            );
        }
        Ok(())
    }
}
