//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "JSON report export for grid layouts and run summaries."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::{errors::Result, io::GridDocument, model::Grid, store, OptimizationReport};

#[derive(Debug)]
pub struct ReportExporter<'a> {
    grid: &'a Grid,
    run: Option<&'a OptimizationReport>,
}

impl<'a> ReportExporter<'a> {
    pub fn new(grid: &'a Grid) -> Self {
        Self { grid, run: None }
    }

    pub fn with_run(mut self, run: &'a OptimizationReport) -> Self {
        self.run = Some(run);
        self
    }

    /// Write `layout.json` and `summary.json` (plus `run.json` for a finished
    /// run) into `output_dir` and return the written paths.
    pub fn export_all(&self, output_dir: &Path) -> Result<Vec<PathBuf>> {
        if !output_dir.exists() {
            fs::create_dir_all(output_dir)?;
        }

        let timestamp = self
            .run
            .map_or_else(Utc::now, |run| run.finished_at)
            .to_rfc3339();
        let run_id = self.run.map(|run| run.run_id);

        let (nodes, links) = store::grid_records(self.grid);
        let layout = GridDocument { nodes, links };
        let summary = self.grid.summary();

        let mut written = vec![
            output_dir.join("layout.json"),
            output_dir.join("summary.json"),
        ];
        write_json(
            &written[0],
            &ReportEnvelope::new(&timestamp, run_id, layout_schema(), &layout),
        )?;
        write_json(
            &written[1],
            &ReportEnvelope::new(&timestamp, run_id, summary_schema(), &summary),
        )?;
        if let Some(run) = self.run {
            let path = output_dir.join("run.json");
            write_json(
                &path,
                &ReportEnvelope::new(&timestamp, run_id, run_schema(), run),
            )?;
            written.push(path);
        }

        info!("Reports exported to {}", output_dir.display());
        Ok(written)
    }
}

#[derive(Debug, Serialize)]
struct ReportEnvelope<'a, T: Serialize> {
    timestamp: &'a str,
    run_id: Option<Uuid>,
    schema: serde_json::Value,
    data: &'a T,
}

impl<'a, T: Serialize> ReportEnvelope<'a, T> {
    fn new(
        timestamp: &'a str,
        run_id: Option<Uuid>,
        schema: serde_json::Value,
        data: &'a T,
    ) -> Self {
        Self {
            timestamp,
            run_id,
            schema,
            data,
        }
    }
}

fn write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let serialized = serde_json::to_string_pretty(value)?;
    fs::write(path, serialized)?;
    Ok(())
}

fn layout_schema() -> serde_json::Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "GridLayout",
        "type": "object",
        "properties": {
            "nodes": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "latitude": {"type": "number"},
                        "longitude": {"type": "number"},
                        "role": {"enum": ["consumer", "pole", "shs"]},
                        "peak_demand": {"type": "number"},
                        "average_consumption": {"type": "number"},
                        "demand_tier": {"enum": ["low-demand", "medium-demand", "high-demand"]},
                        "is_connected": {"type": "boolean"},
                        "how_added": {"enum": ["manual", "automatic", "optimization"]}
                    },
                    "required": ["id", "latitude", "longitude", "role", "is_connected"]
                }
            },
            "links": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "from_id": {"type": "string"},
                        "to_id": {"type": "string"},
                        "lat_from": {"type": "number"},
                        "lon_from": {"type": "number"},
                        "lat_to": {"type": "number"},
                        "lon_to": {"type": "number"},
                        "link_type": {"enum": ["interpole", "distribution", "shs"]},
                        "length": {"type": "number", "minimum": 0}
                    },
                    "required": ["from_id", "to_id", "link_type", "length"]
                }
            }
        },
        "required": ["nodes", "links"]
    })
}

fn summary_schema() -> serde_json::Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "GridSummary",
        "type": "object",
        "properties": {
            "n_consumers": {"type": "integer", "minimum": 0},
            "n_poles": {"type": "integer", "minimum": 0},
            "n_shs": {"type": "integer", "minimum": 0},
            "length_hv_cable": {"type": "number", "minimum": 0},
            "length_lv_cable": {"type": "number", "minimum": 0},
            "cost_grid": {"type": "number"}
        },
        "required": [
            "n_consumers",
            "n_poles",
            "n_shs",
            "length_hv_cable",
            "length_lv_cable",
            "cost_grid"
        ]
    })
}

fn run_schema() -> serde_json::Value {
    json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "title": "OptimizationReport",
        "type": "object",
        "properties": {
            "run_id": {"type": "string", "format": "uuid"},
            "started_at": {"type": "string", "format": "date-time"},
            "finished_at": {"type": "string", "format": "date-time"},
            "number_of_poles": {"type": "integer", "minimum": 0},
            "relaxation": {"type": ["object", "null"]},
            "shs": {"type": ["object", "null"]},
            "summary": {"type": "object"},
            "interrupted": {"type": "boolean"}
        },
        "required": ["run_id", "started_at", "finished_at", "summary", "interrupted"]
    })
}
