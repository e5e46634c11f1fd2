//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "In-memory network model of nodes and links."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    errors::{GridPlanError, Result},
    projection::{self, GeoPoint, PlanarPoint},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    #[default]
    Consumer,
    Pole,
    Shs,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum HowAdded {
    #[default]
    Manual,
    Automatic,
    Optimization,
}

/// Demand class used to price a standalone solar-home-system.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum DemandTier {
    #[serde(rename = "low-demand", alias = "low")]
    Low,
    #[default]
    #[serde(rename = "medium-demand", alias = "medium")]
    Medium,
    #[serde(rename = "high-demand", alias = "high")]
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    Interpole,
    Distribution,
    Shs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub geo: GeoPoint,
    /// Local planar position; `None` until the grid has been projected.
    #[serde(default)]
    pub planar: Option<PlanarPoint>,
    pub role: NodeRole,
    #[serde(default)]
    pub peak_demand: f64,
    #[serde(default)]
    pub average_consumption: f64,
    #[serde(default)]
    pub demand_tier: DemandTier,
    pub is_connected: bool,
    pub how_added: HowAdded,
}

impl Node {
    pub fn consumer(id: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            id: id.into(),
            geo: GeoPoint::new(latitude, longitude),
            planar: None,
            role: NodeRole::Consumer,
            peak_demand: 0.0,
            average_consumption: 0.0,
            demand_tier: DemandTier::default(),
            is_connected: true,
            how_added: HowAdded::Manual,
        }
    }

    /// Pole placed by the optimizer at a known position.
    pub fn pole(id: impl Into<String>, geo: GeoPoint, planar: PlanarPoint) -> Self {
        Self {
            id: id.into(),
            geo,
            planar: Some(planar),
            role: NodeRole::Pole,
            peak_demand: 0.0,
            average_consumption: 0.0,
            demand_tier: DemandTier::default(),
            is_connected: true,
            how_added: HowAdded::Optimization,
        }
    }

    pub fn with_planar(mut self, x: f64, y: f64) -> Self {
        self.planar = Some(PlanarPoint::new(x, y));
        self
    }

    pub fn with_role(mut self, role: NodeRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_demand(
        mut self,
        peak_demand: f64,
        average_consumption: f64,
        tier: DemandTier,
    ) -> Self {
        self.peak_demand = peak_demand;
        self.average_consumption = average_consumption;
        self.demand_tier = tier;
        self
    }

    pub fn with_how_added(mut self, how_added: HowAdded) -> Self {
        self.how_added = how_added;
        self
    }

    pub fn position(&self) -> Result<PlanarPoint> {
        self.planar.ok_or_else(|| {
            GridPlanError::InvalidGeometry(format!("node {} has not been projected", self.id))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkEnd {
    pub node_id: String,
    pub geo: GeoPoint,
    pub planar: PlanarPoint,
}

impl LinkEnd {
    fn of(node: &Node) -> Result<Self> {
        Ok(Self {
            node_id: node.id.clone(),
            geo: node.geo,
            planar: node.position()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub from: LinkEnd,
    pub to: LinkEnd,
    pub link_type: LinkType,
}

impl Link {
    pub fn between(from: &Node, to: &Node, link_type: LinkType) -> Result<Self> {
        Ok(Self {
            from: LinkEnd::of(from)?,
            to: LinkEnd::of(to)?,
            link_type,
        })
    }

    /// Planar Euclidean length in metres.
    pub fn length(&self) -> f64 {
        self.from.planar.distance(&self.to.planar)
    }

    pub fn touches(&self, node_id: &str) -> bool {
        self.from.node_id == node_id || self.to.node_id == node_id
    }
}

/// Levelized per-unit costs used to price a grid layout.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GridCosts {
    /// Per metre of interpole (backbone) cable.
    pub epc_hv_cable: f64,
    /// Per metre of distribution cable.
    pub epc_lv_cable: f64,
    /// Per distribution link (house connection).
    pub epc_connection: f64,
    pub epc_pole: f64,
}

impl GridCosts {
    pub fn per_metre(&self, link_type: LinkType) -> f64 {
        match link_type {
            LinkType::Interpole => self.epc_hv_cable,
            LinkType::Distribution => self.epc_lv_cable,
            LinkType::Shs => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSummary {
    pub n_consumers: usize,
    pub n_poles: usize,
    pub n_shs: usize,
    pub length_hv_cable: f64,
    pub length_lv_cable: f64,
    pub cost_grid: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Grid {
    nodes: Vec<Node>,
    links: Vec<Link>,
    reference: Option<GeoPoint>,
    pub costs: GridCosts,
    /// Maximum consumers per pole; 0 means unconstrained.
    pub pole_max_connection: usize,
}

impl Grid {
    pub fn new(costs: GridCosts, pole_max_connection: usize) -> Self {
        Self {
            nodes: Vec::new(),
            links: Vec::new(),
            reference: None,
            costs,
            pole_max_connection,
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn reference(&self) -> Option<GeoPoint> {
        self.reference
    }

    /// Use `reference` as the planar origin without reprojecting nodes.
    pub fn set_reference(&mut self, reference: GeoPoint) {
        self.reference = Some(reference);
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Insert a node, replacing any existing node with the same id together
    /// with the links that referenced it.
    pub fn add_node(&mut self, node: Node) {
        if self.node(&node.id).is_some() {
            debug!(node = %node.id, "replacing existing node");
            self.remove_node(&node.id);
        }
        self.nodes.push(node);
    }

    /// Insert a node whose id is not taken yet.
    pub fn insert_node(&mut self, node: Node) -> Result<()> {
        if self.node(&node.id).is_some() {
            return Err(GridPlanError::InvalidTopology(format!(
                "duplicate node id {}",
                node.id
            )));
        }
        self.nodes.push(node);
        Ok(())
    }

    pub fn add_link(&mut self, link: Link) -> Result<()> {
        for end in [&link.from, &link.to] {
            if self.node(&end.node_id).is_none() {
                return Err(GridPlanError::InvalidTopology(format!(
                    "link endpoint {} is not part of the grid",
                    end.node_id
                )));
            }
        }
        self.links.push(link);
        Ok(())
    }

    /// Link two existing nodes by id.
    pub fn connect(&mut self, from: &str, to: &str, link_type: LinkType) -> Result<()> {
        let lookup = |id: &str| {
            self.node(id).ok_or_else(|| {
                GridPlanError::InvalidTopology(format!("unknown node {id} in link"))
            })
        };
        let link = Link::between(lookup(from)?, lookup(to)?, link_type)?;
        self.links.push(link);
        Ok(())
    }

    pub fn remove_node(&mut self, id: &str) -> Option<Node> {
        let position = self.nodes.iter().position(|n| n.id == id)?;
        self.links.retain(|l| !l.touches(id));
        Some(self.nodes.remove(position))
    }

    pub fn remove_links_touching(&mut self, id: &str) -> usize {
        let before = self.links.len();
        self.links.retain(|l| !l.touches(id));
        before - self.links.len()
    }

    pub fn clear_nodes(&mut self) {
        self.nodes.clear();
        self.links.clear();
        self.reference = None;
    }

    pub fn clear_links(&mut self) {
        self.links.clear();
    }

    pub fn clear_links_of_type(&mut self, link_type: LinkType) {
        self.links.retain(|l| l.link_type != link_type);
    }

    /// Drop every pole and every link touching a pole in one step.
    pub fn clear_poles(&mut self) {
        let poles: HashSet<String> = self
            .nodes
            .iter()
            .filter(|n| n.role == NodeRole::Pole)
            .map(|n| n.id.clone())
            .collect();
        if poles.is_empty() {
            return;
        }
        self.links
            .retain(|l| !poles.contains(&l.from.node_id) && !poles.contains(&l.to.node_id));
        self.nodes.retain(|n| n.role != NodeRole::Pole);
    }

    pub fn consumers(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.role == NodeRole::Consumer)
    }

    pub fn poles(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.role == NodeRole::Pole)
    }

    pub fn shs_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.role == NodeRole::Shs)
    }

    pub fn links_of_type(&self, link_type: LinkType) -> impl Iterator<Item = &Link> {
        self.links.iter().filter(move |l| l.link_type == link_type)
    }

    pub fn interpole_links(&self) -> impl Iterator<Item = &Link> {
        self.links_of_type(LinkType::Interpole)
    }

    pub fn distribution_links(&self) -> impl Iterator<Item = &Link> {
        self.links_of_type(LinkType::Distribution)
    }

    pub fn total_cable_length(&self, link_type: LinkType) -> f64 {
        self.links_of_type(link_type).map(Link::length).sum()
    }

    /// Levelized cost of the current layout.
    pub fn cost(&self) -> f64 {
        let cable: f64 = self
            .links
            .iter()
            .map(|l| l.length() * self.costs.per_metre(l.link_type))
            .sum();
        let connections = self.distribution_links().count() as f64 * self.costs.epc_connection;
        let poles = self.poles().count() as f64 * self.costs.epc_pole;
        cable + connections + poles
    }

    pub fn summary(&self) -> GridSummary {
        GridSummary {
            n_consumers: self.consumers().count(),
            n_poles: self.poles().count(),
            n_shs: self.shs_nodes().count(),
            length_hv_cable: self.total_cable_length(LinkType::Interpole),
            length_lv_cable: self.total_cable_length(LinkType::Distribution),
            cost_grid: self.cost(),
        }
    }

    /// Anchor the local plane at the south-west corner of all nodes and
    /// project every node onto it.
    pub fn project_nodes(&mut self) -> Result<()> {
        let Some(reference) = projection::reference_point(self.nodes.iter().map(|n| &n.geo))
        else {
            return Ok(());
        };
        self.project_with_reference(reference)
    }

    pub fn project_with_reference(&mut self, reference: GeoPoint) -> Result<()> {
        for node in &mut self.nodes {
            node.planar = Some(projection::project(node.geo, reference)?);
        }
        self.reference = Some(reference);
        self.refresh_link_positions();
        debug!(
            nodes = self.nodes.len(),
            ref_lat = reference.latitude,
            ref_lon = reference.longitude,
            "projected grid nodes"
        );
        Ok(())
    }

    /// Geodetic position of a planar point in this grid's frame.
    pub fn unproject(&self, point: PlanarPoint) -> Result<GeoPoint> {
        match self.reference {
            Some(reference) => projection::unproject(point, reference),
            None => Err(GridPlanError::InvalidGeometry(
                "grid has no projection reference".into(),
            )),
        }
    }

    /// Rewrite the stored endpoint positions from the current node positions.
    pub fn refresh_link_positions(&mut self) {
        let positions: HashMap<&str, (GeoPoint, Option<PlanarPoint>)> = self
            .nodes
            .iter()
            .map(|n| (n.id.as_str(), (n.geo, n.planar)))
            .collect();
        for link in &mut self.links {
            for end in [&mut link.from, &mut link.to] {
                if let Some((geo, Some(planar))) = positions.get(end.node_id.as_str()) {
                    end.geo = *geo;
                    end.planar = *planar;
                }
            }
        }
    }

    /// Ids of connected consumers eligible for a grid connection.
    pub(crate) fn connected_consumer_ids(&self) -> Vec<String> {
        self.consumers()
            .filter(|n| n.is_connected)
            .map(|n| n.id.clone())
            .collect()
    }
}
