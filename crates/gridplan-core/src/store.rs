//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Node, link and summary tables behind a storage port."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! The optimizer never touches files itself. Callers hand it a [`GridStore`]
//! and the tables are exchanged as flat records, so renamed columns from
//! older exports are absorbed here through serde aliases. Legacy exports also
//! carry an unnamed index column, capitalised booleans and consumer types
//! that are not demand tiers; those are read leniently below.

use std::{
    collections::HashSet,
    fmt,
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use csv::{ReaderBuilder, WriterBuilder};
use serde::{
    de::{self, value::Error as ValueError, DeserializeOwned, IntoDeserializer, Visitor},
    Deserialize, Deserializer, Serialize,
};
use tracing::debug;

use crate::{
    errors::{GridPlanError, Result},
    model::{DemandTier, Grid, GridCosts, GridSummary, HowAdded, Link, LinkType, Node, NodeRole},
    projection::GeoPoint,
};

const fn default_connected() -> bool {
    true
}

/// Unknown or empty tiers, such as a legacy `household`, fall back to the default.
fn lenient_demand_tier<'de, D>(deserializer: D) -> std::result::Result<DemandTier, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(DemandTier::default());
    }
    let parsed: std::result::Result<DemandTier, ValueError> =
        DemandTier::deserialize(trimmed.into_deserializer());
    Ok(parsed.unwrap_or_else(|_| {
        debug!(value = trimmed, "unknown demand tier, using default");
        DemandTier::default()
    }))
}

struct LenientBool;

impl<'de> Visitor<'de> for LenientBool {
    type Value = bool;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a boolean, 0/1 or yes/no")
    }

    fn visit_bool<E: de::Error>(self, value: bool) -> std::result::Result<bool, E> {
        Ok(value)
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> std::result::Result<bool, E> {
        match value {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(E::invalid_value(de::Unexpected::Unsigned(value), &self)),
        }
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> std::result::Result<bool, E> {
        match value {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(E::invalid_value(de::Unexpected::Signed(value), &self)),
        }
    }

    fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<bool, E> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" => Ok(default_connected()),
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(E::invalid_value(de::Unexpected::Str(value), &self)),
        }
    }
}

/// Accepts `True`/`False` as written by pandas, besides plain booleans.
fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(LenientBool)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Empty when the table has no id column; the CSV store fills in the row index.
    #[serde(default, alias = "label", alias = "")]
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(alias = "node_type")]
    pub role: NodeRole,
    #[serde(default)]
    pub peak_demand: f64,
    #[serde(default)]
    pub average_consumption: f64,
    #[serde(
        default,
        alias = "consumer_type",
        deserialize_with = "lenient_demand_tier"
    )]
    pub demand_tier: DemandTier,
    #[serde(default = "default_connected", deserialize_with = "lenient_bool")]
    pub is_connected: bool,
    #[serde(default)]
    pub how_added: HowAdded,
}

impl From<&Node> for NodeRecord {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id.clone(),
            latitude: node.geo.latitude,
            longitude: node.geo.longitude,
            role: node.role,
            peak_demand: node.peak_demand,
            average_consumption: node.average_consumption,
            demand_tier: node.demand_tier,
            is_connected: node.is_connected,
            how_added: node.how_added,
        }
    }
}

impl NodeRecord {
    /// Unprojected node; fails on coordinates outside the geodetic range.
    pub fn into_node(self) -> Result<Node> {
        if self.id.trim().is_empty() {
            return Err(GridPlanError::InvalidTopology(format!(
                "node at ({}, {}) has no id",
                self.latitude, self.longitude
            )));
        }
        let geo = GeoPoint::new(self.latitude, self.longitude);
        geo.validate()?;
        Ok(Node {
            id: self.id,
            geo,
            planar: None,
            role: self.role,
            peak_demand: self.peak_demand,
            average_consumption: self.average_consumption,
            demand_tier: self.demand_tier,
            is_connected: self.is_connected,
            how_added: self.how_added,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRecord {
    #[serde(alias = "from")]
    pub from_id: String,
    #[serde(alias = "to")]
    pub to_id: String,
    pub lat_from: f64,
    pub lon_from: f64,
    pub lat_to: f64,
    pub lon_to: f64,
    pub link_type: LinkType,
    /// Planar length in metres when the link was stored.
    #[serde(default)]
    pub length: f64,
}

impl From<&Link> for LinkRecord {
    fn from(link: &Link) -> Self {
        Self {
            from_id: link.from.node_id.clone(),
            to_id: link.to.node_id.clone(),
            lat_from: link.from.geo.latitude,
            lon_from: link.from.geo.longitude,
            lat_to: link.to.geo.latitude,
            lon_to: link.to.geo.longitude,
            link_type: link.link_type,
            length: link.length(),
        }
    }
}

/// One row of the results table, appended after every optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub recorded_at: DateTime<Utc>,
    pub n_consumers: usize,
    pub n_poles: usize,
    pub length_hv_cable: f64,
    pub length_lv_cable: f64,
    pub cost_grid: f64,
}

impl SummaryRecord {
    pub fn new(summary: &GridSummary, recorded_at: DateTime<Utc>) -> Self {
        Self {
            recorded_at,
            n_consumers: summary.n_consumers,
            n_poles: summary.n_poles,
            length_hv_cable: summary.length_hv_cable,
            length_lv_cable: summary.length_lv_cable,
            cost_grid: summary.cost_grid,
        }
    }
}

/// Storage port for the node, link and summary tables.
pub trait GridStore {
    fn load_nodes(&self) -> Result<Vec<NodeRecord>>;
    /// Replace the node table.
    fn save_nodes(&mut self, nodes: &[NodeRecord]) -> Result<()>;
    fn load_links(&self) -> Result<Vec<LinkRecord>>;
    /// Replace the link table.
    fn save_links(&mut self, links: &[LinkRecord]) -> Result<()>;
    fn append_summary(&mut self, summary: &SummaryRecord) -> Result<()>;
    fn load_summaries(&self) -> Result<Vec<SummaryRecord>>;
    /// Human-readable store name for logging.
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryGridStore {
    pub nodes: Vec<NodeRecord>,
    pub links: Vec<LinkRecord>,
    pub summaries: Vec<SummaryRecord>,
}

impl MemoryGridStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes(nodes: Vec<NodeRecord>) -> Self {
        Self {
            nodes,
            ..Self::default()
        }
    }
}

impl GridStore for MemoryGridStore {
    fn load_nodes(&self) -> Result<Vec<NodeRecord>> {
        Ok(self.nodes.clone())
    }

    fn save_nodes(&mut self, nodes: &[NodeRecord]) -> Result<()> {
        self.nodes = nodes.to_vec();
        Ok(())
    }

    fn load_links(&self) -> Result<Vec<LinkRecord>> {
        Ok(self.links.clone())
    }

    fn save_links(&mut self, links: &[LinkRecord]) -> Result<()> {
        self.links = links.to_vec();
        Ok(())
    }

    fn append_summary(&mut self, summary: &SummaryRecord) -> Result<()> {
        self.summaries.push(summary.clone());
        Ok(())
    }

    fn load_summaries(&self) -> Result<Vec<SummaryRecord>> {
        Ok(self.summaries.clone())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// CSV tables on disk. Missing files read as empty tables.
#[derive(Debug, Clone)]
pub struct CsvGridStore {
    nodes_path: PathBuf,
    links_path: PathBuf,
    summary_path: PathBuf,
}

impl CsvGridStore {
    /// `nodes.csv`, `links.csv` and `summary.csv` inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::new(
            dir.join("nodes.csv"),
            dir.join("links.csv"),
            dir.join("summary.csv"),
        )
    }

    pub fn new(
        nodes_path: impl Into<PathBuf>,
        links_path: impl Into<PathBuf>,
        summary_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            nodes_path: nodes_path.into(),
            links_path: links_path.into(),
            summary_path: summary_path.into(),
        }
    }

    pub fn nodes_path(&self) -> &Path {
        &self.nodes_path
    }

    pub fn links_path(&self) -> &Path {
        &self.links_path
    }

    pub fn summary_path(&self) -> &Path {
        &self.summary_path
    }
}

fn read_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        debug!(path = %path.display(), "table missing, reading as empty");
        return Ok(Vec::new());
    }
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let rows = reader
        .deserialize::<T>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn write_table<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = WriterBuilder::new().has_headers(true).from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            fs::create_dir_all(parent)?;
            Ok(())
        }
        _ => Ok(()),
    }
}

impl GridStore for CsvGridStore {
    fn load_nodes(&self) -> Result<Vec<NodeRecord>> {
        let mut rows: Vec<NodeRecord> = read_table(&self.nodes_path)?;
        for (index, row) in rows.iter_mut().enumerate() {
            if row.id.is_empty() {
                row.id = index.to_string();
            }
        }
        Ok(rows)
    }

    fn save_nodes(&mut self, nodes: &[NodeRecord]) -> Result<()> {
        write_table(&self.nodes_path, nodes)
    }

    fn load_links(&self) -> Result<Vec<LinkRecord>> {
        read_table(&self.links_path)
    }

    fn save_links(&mut self, links: &[LinkRecord]) -> Result<()> {
        write_table(&self.links_path, links)
    }

    fn append_summary(&mut self, summary: &SummaryRecord) -> Result<()> {
        ensure_parent(&self.summary_path)?;
        let fresh = fs::metadata(&self.summary_path)
            .map(|meta| meta.len() == 0)
            .unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.summary_path)?;
        let mut writer = WriterBuilder::new().has_headers(fresh).from_writer(file);
        writer.serialize(summary)?;
        writer.flush()?;
        Ok(())
    }

    fn load_summaries(&self) -> Result<Vec<SummaryRecord>> {
        read_table(&self.summary_path)
    }

    fn name(&self) -> &'static str {
        "csv"
    }
}

/// Reject a node table in which two rows share an id.
pub fn ensure_unique_ids(records: &[NodeRecord]) -> Result<()> {
    let mut seen = HashSet::with_capacity(records.len());
    match records.iter().find(|r| !seen.insert(r.id.as_str())) {
        Some(duplicate) => Err(GridPlanError::InvalidTopology(format!(
            "duplicate node id {} in node table",
            duplicate.id
        ))),
        None => Ok(()),
    }
}

/// Flatten a grid into table rows.
pub fn grid_records(grid: &Grid) -> (Vec<NodeRecord>, Vec<LinkRecord>) {
    (
        grid.nodes().iter().map(NodeRecord::from).collect(),
        grid.links().iter().map(LinkRecord::from).collect(),
    )
}

/// Build a projected grid from table rows. Links are re-derived from their
/// endpoint nodes so lengths always follow the current positions.
pub fn assemble_grid(
    nodes: Vec<NodeRecord>,
    links: &[LinkRecord],
    costs: GridCosts,
    pole_max_connection: usize,
) -> Result<Grid> {
    let mut grid = Grid::new(costs, pole_max_connection);
    for record in nodes {
        grid.insert_node(record.into_node()?)?;
    }
    grid.project_nodes()?;
    for link in links {
        grid.connect(&link.from_id, &link.to_id, link.link_type)
            .map_err(|err| match err {
                GridPlanError::InvalidTopology(msg) => GridPlanError::InvalidTopology(format!(
                    "stored {:?} link {} -> {}: {msg}",
                    link.link_type, link.from_id, link.to_id
                )),
                other => other,
            })?;
    }
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_record_accepts_renamed_columns() {
        let data = "label,latitude,longitude,node_type,consumer_type,is_connected,how_added\n\
                    h1,-3.1,30.2,consumer,high-demand,true,automatic\n\
                    p1,-3.1,30.3,pole,medium-demand,true,optimization\n";
        let mut reader = ReaderBuilder::new().from_reader(data.as_bytes());
        let rows: Vec<NodeRecord> = reader
            .deserialize()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "h1");
        assert_eq!(rows[0].role, NodeRole::Consumer);
        assert_eq!(rows[0].demand_tier, DemandTier::High);
        assert_eq!(rows[1].how_added, HowAdded::Optimization);
        assert_eq!(rows[1].peak_demand, 0.0);
    }

    #[test]
    fn out_of_range_record_is_rejected() {
        let record = NodeRecord::from(&Node::consumer("x", 0.0, 0.0));
        let bad = NodeRecord {
            latitude: 123.0,
            ..record
        };
        assert!(matches!(
            bad.into_node(),
            Err(GridPlanError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn assemble_rejects_dangling_links() {
        let nodes = vec![NodeRecord::from(&Node::consumer("a", -3.0, 30.0))];
        let link = LinkRecord {
            from_id: "a".into(),
            to_id: "ghost".into(),
            lat_from: -3.0,
            lon_from: 30.0,
            lat_to: -3.0,
            lon_to: 30.1,
            link_type: LinkType::Distribution,
            length: 0.0,
        };
        let err = assemble_grid(nodes, &[link], GridCosts::default(), 0).unwrap_err();
        assert!(matches!(err, GridPlanError::InvalidTopology(_)));
    }

    #[test]
    fn memory_store_replaces_tables() {
        let node = Node::consumer("a", -3.0, 30.0);
        let mut store = MemoryGridStore::with_nodes(vec![NodeRecord::from(&node)]);
        store.save_nodes(&[]).unwrap();
        assert!(store.load_nodes().unwrap().is_empty());
        assert_eq!(store.name(), "memory");
    }

    #[test]
    fn legacy_node_table_is_read() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("nodes.csv"),
            ",latitude,longitude,node_type,consumer_type,consumer_detail,surface_area,\
             peak_demand,average_consumption,is_connected,how_added\n\
             0,-3.1,30.2,consumer,household,default,120.0,1.2,3.4,True,automatic\n\
             1,-3.1,30.3,consumer,enterprise,default,80.0,0.5,1.0,False,automatic\n",
        )
        .unwrap();
        let store = CsvGridStore::in_dir(dir.path());
        let rows = store.load_nodes().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "0");
        assert_eq!(rows[0].demand_tier, DemandTier::Medium);
        assert!(rows[0].is_connected);
        assert!(!rows[1].is_connected);
        assert_eq!(rows[0].how_added, HowAdded::Automatic);
        assert_eq!(rows[0].peak_demand, 1.2);
        assert!(rows.into_iter().all(|r| r.into_node().is_ok()));
    }

    #[test]
    fn missing_id_column_uses_row_index() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("nodes.csv"),
            "latitude,longitude,node_type,is_connected\n\
             -3.1,30.2,consumer,1\n\
             -3.1,30.3,pole,\n",
        )
        .unwrap();
        let rows = CsvGridStore::in_dir(dir.path()).load_nodes().unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["0", "1"]);
        assert!(rows[0].is_connected);
        assert!(rows[1].is_connected);
        assert_eq!(rows[1].role, NodeRole::Pole);
    }

    #[test]
    fn unreadable_connection_flag_is_an_error() {
        let data = "label,latitude,longitude,node_type,is_connected\n\
                    h1,-3.1,30.2,consumer,maybe\n";
        let mut reader = ReaderBuilder::new().from_reader(data.as_bytes());
        let rows: std::result::Result<Vec<NodeRecord>, _> = reader.deserialize().collect();
        assert!(rows.is_err());
    }

    #[test]
    fn record_without_id_is_rejected() {
        let record = NodeRecord {
            id: String::new(),
            ..NodeRecord::from(&Node::consumer("x", -3.0, 30.0))
        };
        assert!(matches!(
            record.into_node(),
            Err(GridPlanError::InvalidTopology(_))
        ));
    }

    #[test]
    fn assemble_rejects_duplicate_rows() {
        let nodes = vec![
            NodeRecord::from(&Node::consumer("a", -3.0, 30.0)),
            NodeRecord::from(&Node::consumer("a", -3.0, 30.1)),
        ];
        assert!(matches!(
            ensure_unique_ids(&nodes),
            Err(GridPlanError::InvalidTopology(_))
        ));
        let err = assemble_grid(nodes, &[], GridCosts::default(), 0).unwrap_err();
        assert!(matches!(err, GridPlanError::InvalidTopology(_)));
    }
}
