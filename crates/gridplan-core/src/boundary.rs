//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Polygon boundaries drawn over the site map."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    errors::{GridPlanError, Result},
    model::Grid,
    projection::GeoPoint,
};

/// Closed polygon given as `[latitude, longitude]` vertices. The last vertex
/// connects back to the first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<[f64; 2]>", into = "Vec<[f64; 2]>")]
pub struct Boundary {
    vertices: Vec<[f64; 2]>,
}

impl TryFrom<Vec<[f64; 2]>> for Boundary {
    type Error = GridPlanError;

    fn try_from(vertices: Vec<[f64; 2]>) -> Result<Self> {
        Self::new(vertices)
    }
}

impl From<Boundary> for Vec<[f64; 2]> {
    fn from(boundary: Boundary) -> Self {
        boundary.vertices
    }
}

impl Boundary {
    pub fn new(vertices: Vec<[f64; 2]>) -> Result<Self> {
        if vertices.len() < 3 {
            return Err(GridPlanError::InvalidGeometry(format!(
                "a boundary needs at least three vertices, got {}",
                vertices.len()
            )));
        }
        for [lat, lon] in &vertices {
            GeoPoint::new(*lat, *lon).validate()?;
        }
        Ok(Self { vertices })
    }

    pub fn vertices(&self) -> &[[f64; 2]] {
        &self.vertices
    }

    /// Even-odd ray casting along the latitude axis. Points exactly on an
    /// edge may fall on either side.
    pub fn contains(&self, point: GeoPoint) -> bool {
        let (x, y) = (point.latitude, point.longitude);
        let mut inside = false;
        let mut j = self.vertices.len() - 1;
        for i in 0..self.vertices.len() {
            let [xi, yi] = self.vertices[i];
            let [xj, yj] = self.vertices[j];
            if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}

/// Remove every node inside `boundary` together with its links and return the
/// removed ids.
pub fn remove_nodes_within(grid: &mut Grid, boundary: &Boundary) -> Vec<String> {
    let inside: Vec<String> = grid
        .nodes()
        .iter()
        .filter(|n| boundary.contains(n.geo))
        .map(|n| n.id.clone())
        .collect();
    for id in &inside {
        grid.remove_node(id);
    }
    info!(
        removed = inside.len(),
        remaining = grid.nodes().len(),
        "removed nodes inside boundary"
    );
    inside
}
