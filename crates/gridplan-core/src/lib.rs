//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Distribution grid planning for off-grid mini-grids."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
pub mod api;
pub mod boundary;
pub mod clustering;
pub mod cost;
pub mod errors;
pub mod io;
pub mod model;
pub mod projection;
pub mod relaxation;
pub mod reports;
pub mod request;
pub mod shs;
pub mod store;
pub mod tree;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::{
    boundary::Boundary,
    clustering::PoleClusterer,
    model::{GridCosts, GridSummary, HowAdded, NodeRole},
    relaxation::{NetworkRelaxationOptimizer, RelaxationOptions, RelaxationReport},
    reports::ReportExporter,
    shs::{ShsParameters, ShsPartition, ShsSegmenter},
    store::{GridStore, LinkRecord, NodeRecord, SummaryRecord},
};

pub use errors::{GridPlanError, Result};
pub use model::Grid;
pub use relaxation::CancelFlag;
pub use request::{OptimizationParameters, OptimizeGridRequest};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Pole count chosen by the clusterer before relaxation.
    pub number_of_poles: usize,
    pub relaxation: Option<RelaxationReport>,
    pub shs: Option<ShsPartition>,
    pub summary: GridSummary,
    /// The run stopped early and reports the best layout found so far.
    pub interrupted: bool,
}

impl OptimizationReport {
    pub fn exporter<'a>(&'a self, grid: &'a Grid) -> ReportExporter<'a> {
        ReportExporter::new(grid).with_run(self)
    }
}

/// Place poles, wire the grid and optionally move consumers to
/// solar-home-systems.
///
/// Unprojected grids are projected first. Existing poles are discarded.
/// A grid without connected consumers is left as it is.
pub fn optimize(grid: &mut Grid, params: &OptimizationParameters) -> Result<OptimizationReport> {
    let run_id = Uuid::new_v4();
    let span = info_span!("optimize", %run_id);
    let _entered = span.enter();
    let started_at = Utc::now();

    if grid.reference().is_none() || grid.nodes().iter().any(|n| n.planar.is_none()) {
        grid.project_nodes()?;
    }
    grid.clear_poles();

    let consumer_ids = grid.connected_consumer_ids();
    if consumer_ids.is_empty() {
        info!("no connected consumers, skipping optimization");
        return Ok(OptimizationReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            number_of_poles: 0,
            relaxation: None,
            shs: None,
            summary: grid.summary(),
            interrupted: false,
        });
    }
    let positions = consumer_ids
        .iter()
        .map(|id| {
            grid.node(id)
                .ok_or_else(|| GridPlanError::DisconnectedNode(id.clone()))?
                .position()
        })
        .collect::<Result<Vec<_>>>()?;

    let number_of_poles = PoleClusterer::new(grid.pole_max_connection, params.seed)
        .with_max_attempts(params.max_clustering_attempts)
        .find_number_of_poles(&positions)?;
    info!(
        consumers = positions.len(),
        poles = number_of_poles,
        "starting network relaxation"
    );

    let options = RelaxationOptions {
        number_of_poles,
        n_relaxation_steps: params.n_relaxation_steps,
        number_of_hill_climbers_runs: params.number_of_hill_climbers_runs,
        first_guess_strategy: params.first_guess_strategy,
        seed: params.seed,
        time_limit: params.time_limit,
        cancel: params.cancel.clone(),
        reserved_ids: params.reserved_ids.clone(),
    };
    let relaxation = NetworkRelaxationOptimizer::new(options).optimize(grid)?;
    if relaxation.interrupted {
        warn!(runs = relaxation.runs, "relaxation stopped early");
    }

    let shs = params
        .shs
        .map(|shs_params| ShsSegmenter::new(shs_params)?.segment(grid))
        .transpose()?;

    let summary = grid.summary();
    info!(
        poles = summary.n_poles,
        shs = summary.n_shs,
        hv_m = summary.length_hv_cable,
        lv_m = summary.length_lv_cable,
        cost = summary.cost_grid,
        "optimization finished"
    );
    Ok(OptimizationReport {
        run_id,
        started_at,
        finished_at: Utc::now(),
        number_of_poles,
        interrupted: relaxation.interrupted,
        relaxation: Some(relaxation),
        shs,
        summary,
    })
}

/// Poles and standalone nodes stay in the store but sit out the run.
fn eligible(record: &NodeRecord) -> bool {
    record.is_connected && record.role == NodeRole::Consumer
}

/// Optimize the nodes held in `store` and write the result back.
///
/// Nodes added by a previous optimization are dropped. The node table ends up
/// with every kept node plus the new poles, whose ids never collide with a
/// kept node. After a run the link table is replaced and one summary row is
/// appended; when nothing was optimized only links to dropped nodes go.
pub fn plan_from_store(
    store: &mut dyn GridStore,
    request: &OptimizeGridRequest,
    cancel: Option<CancelFlag>,
) -> Result<OptimizationReport> {
    request.validate()?;
    let records = store.load_nodes()?;
    let loaded = records.len();
    let kept: Vec<NodeRecord> = records
        .into_iter()
        .filter(|r| r.how_added != HowAdded::Optimization)
        .collect();
    store::ensure_unique_ids(&kept)?;
    let dropped = loaded - kept.len();
    let (bystanders, participants): (Vec<NodeRecord>, Vec<NodeRecord>) =
        kept.into_iter().partition(|r| !eligible(r));
    info!(
        store = store.name(),
        loaded,
        dropped,
        participants = participants.len(),
        kept_aside = bystanders.len(),
        "loaded nodes for optimization"
    );

    let mut grid = request.new_grid()?;
    for record in participants {
        grid.insert_node(record.into_node()?)?;
    }
    let mut params = request.parameters();
    params.cancel = cancel;
    params.reserved_ids = bystanders.iter().map(|r| r.id.clone()).collect();
    let report = optimize(&mut grid, &params)?;

    let mut nodes = bystanders;
    nodes.extend(grid.nodes().iter().map(NodeRecord::from));
    store.save_nodes(&nodes)?;
    if report.relaxation.is_some() {
        let links: Vec<_> = grid.links().iter().map(LinkRecord::from).collect();
        store.save_links(&links)?;
    } else if dropped > 0 {
        let ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let links: Vec<_> = store
            .load_links()?
            .into_iter()
            .filter(|l| ids.contains(l.from_id.as_str()) && ids.contains(l.to_id.as_str()))
            .collect();
        store.save_links(&links)?;
    }
    if !grid.is_empty() {
        store.append_summary(&SummaryRecord::new(&report.summary, report.finished_at))?;
    }
    Ok(report)
}

/// Run solar-home-system segmentation over the stored layout and write the
/// updated tables back.
pub fn identify_shs_in_store(
    store: &mut dyn GridStore,
    params: ShsParameters,
) -> Result<ShsPartition> {
    let segmenter = ShsSegmenter::new(params)?;
    let links = store.load_links()?;
    let mut grid = store::assemble_grid(store.load_nodes()?, &links, GridCosts::default(), 0)?;
    let partition = segmenter.segment(&mut grid)?;
    let (nodes, links) = store::grid_records(&grid);
    store.save_nodes(&nodes)?;
    store.save_links(&links)?;
    Ok(partition)
}

/// Drop every stored node inside `boundary`. The link table is cleared since
/// the layout no longer matches the node set.
pub fn remove_boundary_in_store(
    store: &mut dyn GridStore,
    boundary: &Boundary,
) -> Result<Vec<String>> {
    let mut grid = store::assemble_grid(store.load_nodes()?, &[], GridCosts::default(), 0)?;
    let removed = crate::boundary::remove_nodes_within(&mut grid, boundary);
    let (nodes, _) = store::grid_records(&grid);
    store.save_nodes(&nodes)?;
    store.save_links(&[])?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{LinkType, Node},
        projection::GeoPoint,
        relaxation::FirstGuessStrategy,
        store::MemoryGridStore,
    };

    const REQUEST: &str = r#"{
        "start_date": "2022-01-01",
        "n_days": 365,
        "project_lifetime": 20,
        "wacc": 0.0,
        "hv_cable": {"capex": 10, "lifetime": 20},
        "lv_cable": {"capex": 4, "lifetime": 20},
        "connection": {"capex": 140, "lifetime": 20},
        "pole": {"capex": 800, "lifetime": 10, "max_connections": 4},
        "optimization": {"n_relaxation_steps": 10}
    }"#;

    fn request() -> OptimizeGridRequest {
        serde_json::from_str(REQUEST).unwrap()
    }

    fn manual_pole(id: &str, latitude: f64, longitude: f64) -> NodeRecord {
        NodeRecord::from(&Node::consumer(id, latitude, longitude).with_role(NodeRole::Pole))
    }

    fn link(from: &str, to: &str, link_type: LinkType) -> LinkRecord {
        LinkRecord {
            from_id: from.into(),
            to_id: to.into(),
            lat_from: -3.0,
            lon_from: 30.0,
            lat_to: -3.0,
            lon_to: 30.0,
            link_type,
            length: 0.0,
        }
    }

    fn costs() -> GridCosts {
        GridCosts {
            epc_hv_cable: 3.0,
            epc_lv_cable: 1.0,
            epc_connection: 10.0,
            epc_pole: 100.0,
        }
    }

    fn square_grid() -> Grid {
        let mut grid = Grid::new(costs(), 4);
        for (i, (x, y)) in [(0.0, 0.0), (10.0, 0.0), (0.0, 10.0), (10.0, 10.0)]
            .iter()
            .enumerate()
        {
            grid.add_node(Node::consumer(format!("c{i}"), 0.0, 0.0).with_planar(*x, *y));
        }
        grid.set_reference(GeoPoint::new(-3.0, 30.0));
        grid
    }

    #[test]
    fn square_gets_one_central_pole() {
        let mut grid = square_grid();
        let params = OptimizationParameters {
            n_relaxation_steps: 20,
            first_guess_strategy: FirstGuessStrategy::KMeans,
            ..OptimizationParameters::default()
        };
        let report = optimize(&mut grid, &params).unwrap();
        assert_eq!(report.number_of_poles, 1);
        assert_eq!(grid.poles().count(), 1);
        let pole = grid.poles().next().unwrap().position().unwrap();
        assert!((pole.x - 5.0).abs() < 1e-6 && (pole.y - 5.0).abs() < 1e-6);
        assert_eq!(grid.distribution_links().count(), 4);
        assert_eq!(grid.interpole_links().count(), 0);
        let expected = 4.0 * (50f64.sqrt() * 1.0 + 10.0) + 100.0;
        assert!((report.summary.cost_grid - expected).abs() < 1e-6);
        assert!(!report.interrupted);
    }

    #[test]
    fn empty_grid_is_a_no_op() {
        let mut grid = Grid::new(costs(), 4);
        let report = optimize(&mut grid, &OptimizationParameters::default()).unwrap();
        assert!(report.relaxation.is_none());
        assert_eq!(report.summary.cost_grid, 0.0);
    }

    #[test]
    fn previous_poles_are_replaced() {
        let mut grid = square_grid();
        grid.add_node(
            Node::consumer("old-pole", 0.0, 0.0)
                .with_role(NodeRole::Pole)
                .with_planar(40.0, 40.0),
        );
        grid.connect("old-pole", "c0", LinkType::Distribution).unwrap();
        optimize(&mut grid, &OptimizationParameters::default()).unwrap();
        assert!(grid.node("old-pole").is_none());
        assert!(grid.links().iter().all(|l| !l.touches("old-pole")));
    }

    #[test]
    fn boundary_removal_clears_links() {
        let mut store = MemoryGridStore::with_nodes(vec![
            NodeRecord::from(&Node::consumer("in", 0.5, 0.5)),
            NodeRecord::from(&Node::consumer("out", 5.0, 5.0)),
        ]);
        let boundary =
            Boundary::new(vec![[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0]]).unwrap();
        let removed = remove_boundary_in_store(&mut store, &boundary).unwrap();
        assert_eq!(removed, vec!["in".to_string()]);
        assert_eq!(store.nodes.len(), 1);
        assert!(store.links.is_empty());
    }

    #[test]
    fn kept_pole_id_is_never_reused() {
        let mut store = MemoryGridStore::with_nodes(vec![
            manual_pole("pole-1", -3.01, 30.01),
            NodeRecord::from(&Node::consumer("h1", -3.0, 30.0)),
            NodeRecord::from(&Node::consumer("h2", -3.0, 30.0001)),
            NodeRecord::from(&Node::consumer("h3", -3.0001, 30.0)),
        ]);
        let report = plan_from_store(&mut store, &request(), None).unwrap();
        assert!(report.relaxation.is_some());
        let occurrences = store.nodes.iter().filter(|n| n.id == "pole-1").count();
        assert_eq!(occurrences, 1);
        let kept = store.nodes.iter().find(|n| n.id == "pole-1").unwrap();
        assert_eq!(kept.how_added, HowAdded::Manual);
        let new_poles: Vec<_> = store
            .nodes
            .iter()
            .filter(|n| n.how_added == HowAdded::Optimization)
            .collect();
        assert!(!new_poles.is_empty());
        assert!(new_poles.iter().all(|n| n.id != "pole-1"));
        assert!(store
            .links
            .iter()
            .all(|l| l.from_id != "pole-1" && l.to_id != "pole-1"));
        assert_eq!(store.summaries.len(), 1);
    }

    #[test]
    fn no_op_run_keeps_links_between_kept_nodes() {
        let mut stale = manual_pole("pole-9", -3.0, 30.0002);
        stale.how_added = HowAdded::Optimization;
        let mut store = MemoryGridStore::with_nodes(vec![
            manual_pole("mp1", -3.0, 30.0),
            manual_pole("mp2", -3.0, 30.0001),
            stale,
        ]);
        store.links = vec![
            link("mp1", "mp2", LinkType::Interpole),
            link("mp2", "pole-9", LinkType::Interpole),
        ];
        let report = plan_from_store(&mut store, &request(), None).unwrap();
        assert!(report.relaxation.is_none());
        assert_eq!(store.nodes.len(), 2);
        assert_eq!(store.links, vec![link("mp1", "mp2", LinkType::Interpole)]);
        assert!(store.summaries.is_empty());
    }

    #[test]
    fn duplicate_ids_in_store_are_rejected() {
        let mut store = MemoryGridStore::with_nodes(vec![
            NodeRecord::from(&Node::consumer("h1", -3.0, 30.0)),
            NodeRecord::from(&Node::consumer("h1", -3.0, 30.0001)),
        ]);
        assert!(matches!(
            plan_from_store(&mut store, &request(), None),
            Err(GridPlanError::InvalidTopology(_))
        ));
        assert_eq!(store.nodes.len(), 2);
    }
}
