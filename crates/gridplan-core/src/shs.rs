//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Solar-home-system versus grid extension segmentation."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Decides which consumers are cheaper to serve with a standalone
//! solar-home-system than with a cable from the grid.
//!
//! The consumers' minimum spanning tree is rooted at the consumer nearest to
//! the load centre and walked leaves first. A branch costs its cables
//! (`edge length × cable price`) plus one connection surcharge per node; when
//! the summed SHS prices of the branch are lower, the whole branch leaves the
//! grid. The tree is then rebuilt over the remaining consumers and the walk
//! repeated until nothing changes. This is a greedy segmentation over one tree
//! at a time, not a search over every possible partition, so it does not
//! guarantee the cheapest overall system.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    errors::{GridPlanError, Result},
    model::{DemandTier, Grid, LinkType, NodeRole},
    projection::PlanarPoint,
    tree::{self, RootedTree},
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShsPrices {
    #[serde(rename = "price_shs_ld")]
    pub low: f64,
    #[serde(rename = "price_shs_md")]
    pub medium: f64,
    #[serde(rename = "price_shs_hd")]
    pub high: f64,
}

impl ShsPrices {
    pub fn for_tier(&self, tier: DemandTier) -> f64 {
        match tier {
            DemandTier::Low => self.low,
            DemandTier::Medium => self.medium,
            DemandTier::High => self.high,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShsParameters {
    #[serde(alias = "cable_price_per_meter_for_shs_mst_identification")]
    pub cable_price_per_meter: f64,
    /// Flat surcharge for connecting one node to the mini-grid.
    pub connection_cost_to_minigrid: f64,
    #[serde(flatten)]
    pub prices: ShsPrices,
}

impl ShsParameters {
    pub fn validate(&self) -> Result<()> {
        let values = [
            ("cable_price_per_meter", self.cable_price_per_meter),
            ("connection_cost_to_minigrid", self.connection_cost_to_minigrid),
            ("price_shs_ld", self.prices.low),
            ("price_shs_md", self.prices.medium),
            ("price_shs_hd", self.prices.high),
        ];
        for (name, value) in values {
            if !value.is_finite() || value < 0.0 {
                return Err(GridPlanError::InvalidParameter(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShsPartition {
    pub grid_connected: Vec<String>,
    pub shs: Vec<String>,
}

pub struct ShsSegmenter {
    params: ShsParameters,
}

struct Candidate {
    id: String,
    position: PlanarPoint,
    price: f64,
}

impl ShsSegmenter {
    pub fn new(params: ShsParameters) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Ids of connected consumers that should move to a solar-home-system.
    /// Does not modify the grid.
    pub fn identify(&self, grid: &Grid) -> Result<Vec<String>> {
        let mut survivors = grid
            .connected_consumer_ids()
            .into_iter()
            .map(|id| {
                let node = grid
                    .node(&id)
                    .ok_or_else(|| GridPlanError::DisconnectedNode(id.clone()))?;
                Ok(Candidate {
                    position: node.position()?,
                    price: self.params.prices.for_tier(node.demand_tier),
                    id,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut disconnected = Vec::new();
        let mut pass = 0;
        loop {
            pass += 1;
            let cut = self.cut_branches(&survivors);
            if cut.is_empty() {
                break;
            }
            debug!(pass, cut = cut.len(), "branches cheaper as solar-home-systems");
            let mut index = 0;
            survivors.retain(|candidate| {
                let keep = !cut.contains(&index);
                if !keep {
                    disconnected.push(candidate.id.clone());
                }
                index += 1;
                keep
            });
        }
        Ok(disconnected)
    }

    /// Indices of candidates whose branch is cheaper standalone.
    fn cut_branches(&self, candidates: &[Candidate]) -> HashSet<usize> {
        if candidates.is_empty() {
            return HashSet::new();
        }
        let positions: Vec<PlanarPoint> = candidates.iter().map(|c| c.position).collect();
        let edges = tree::euclidean_mst(&positions);
        let rooted = RootedTree::orient(candidates.len(), &edges, load_centre_index(&positions));

        let n = candidates.len();
        let mut grid_cost = vec![0.0; n];
        let mut shs_cost = vec![0.0; n];
        let mut cut = vec![false; n];
        for v in rooted.leaves_first() {
            let edge = rooted.parent[v].map_or(0.0, |(_, length)| length);
            grid_cost[v] = edge * self.params.cable_price_per_meter
                + self.params.connection_cost_to_minigrid;
            shs_cost[v] = candidates[v].price;
            for &child in &rooted.children[v] {
                if !cut[child] {
                    grid_cost[v] += grid_cost[child];
                    shs_cost[v] += shs_cost[child];
                }
            }
            cut[v] = shs_cost[v] < grid_cost[v];
        }

        // a cut branch takes every descendant that was still hanging off it
        let mut standalone = vec![false; n];
        for &v in &rooted.order {
            let parent_standalone = rooted.parent[v].is_some_and(|(p, _)| standalone[p]);
            standalone[v] = cut[v] || parent_standalone;
        }
        standalone
            .into_iter()
            .enumerate()
            .filter_map(|(i, s)| s.then_some(i))
            .collect()
    }

    /// Move every consumer that is cheaper standalone off the grid.
    ///
    /// Such consumers become `shs` nodes and lose their links. Poles left
    /// without consumers are removed and the interpole backbone is rebuilt
    /// over the remaining poles.
    pub fn segment(&self, grid: &mut Grid) -> Result<ShsPartition> {
        let disconnected = self.identify(grid)?;
        for id in &disconnected {
            grid.remove_links_touching(id);
            if let Some(node) = grid.node_mut(id) {
                node.role = NodeRole::Shs;
                node.is_connected = false;
            }
        }
        if !disconnected.is_empty() && grid.poles().next().is_some() {
            rebuild_backbone(grid)?;
        }

        let partition = ShsPartition {
            grid_connected: grid.connected_consumer_ids(),
            shs: grid.shs_nodes().map(|n| n.id.clone()).collect(),
        };
        info!(
            grid_connected = partition.grid_connected.len(),
            shs = partition.shs.len(),
            newly_disconnected = disconnected.len(),
            "solar-home-system segmentation finished"
        );
        Ok(partition)
    }
}

fn load_centre_index(positions: &[PlanarPoint]) -> usize {
    let n = positions.len() as f64;
    let centre = PlanarPoint::new(
        positions.iter().map(|p| p.x).sum::<f64>() / n,
        positions.iter().map(|p| p.y).sum::<f64>() / n,
    );
    positions
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            a.distance_squared(&centre)
                .total_cmp(&b.distance_squared(&centre))
        })
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Drop poles that no longer serve anybody and re-span the remaining ones.
fn rebuild_backbone(grid: &mut Grid) -> Result<()> {
    let served: HashSet<String> = grid
        .distribution_links()
        .flat_map(|l| [l.from.node_id.clone(), l.to.node_id.clone()])
        .collect();
    let idle: Vec<String> = grid
        .poles()
        .filter(|p| !served.contains(&p.id))
        .map(|p| p.id.clone())
        .collect();
    for id in &idle {
        grid.remove_node(id);
    }

    grid.clear_links_of_type(LinkType::Interpole);
    let poles: Vec<(String, PlanarPoint)> = grid
        .poles()
        .map(|p| Ok((p.id.clone(), p.position()?)))
        .collect::<Result<_>>()?;
    let positions: Vec<PlanarPoint> = poles.iter().map(|(_, p)| *p).collect();
    for edge in tree::euclidean_mst(&positions) {
        grid.connect(&poles[edge.a].0, &poles[edge.b].0, LinkType::Interpole)?;
    }
    debug!(removed_poles = idle.len(), poles = poles.len(), "rebuilt backbone");
    Ok(())
}
