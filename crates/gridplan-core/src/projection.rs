//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Geodetic to local planar coordinate conversion."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Equirectangular projection around a local reference point.
//!
//! The approximation is accurate to well below a metre over village-sized
//! extents, which is all the planner deals with. The reference point is the
//! south-west corner of the node set so every projected coordinate is
//! non-negative.

use serde::{Deserialize, Serialize};

use crate::errors::{GridPlanError, Result};

/// Mean Earth radius in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_geodetic(self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlanarPoint {
    pub x: f64,
    pub y: f64,
}

impl PlanarPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &PlanarPoint) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn distance_squared(&self, other: &PlanarPoint) -> f64 {
        (self.x - other.x).powi(2) + (self.y - other.y).powi(2)
    }
}

fn validate_geodetic(latitude: f64, longitude: f64) -> Result<()> {
    if !latitude.is_finite() || !longitude.is_finite() {
        return Err(GridPlanError::InvalidGeometry(format!(
            "non-finite coordinate ({latitude}, {longitude})"
        )));
    }
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(GridPlanError::InvalidGeometry(format!(
            "latitude {latitude} outside [-90, 90]"
        )));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(GridPlanError::InvalidGeometry(format!(
            "longitude {longitude} outside [-180, 180]"
        )));
    }
    Ok(())
}

/// Project a geodetic position onto the local plane anchored at `reference`.
pub fn project(point: GeoPoint, reference: GeoPoint) -> Result<PlanarPoint> {
    point.validate()?;
    reference.validate()?;
    let ref_lat = reference.latitude.to_radians();
    let d_lat = (point.latitude - reference.latitude).to_radians();
    let d_lon = (point.longitude - reference.longitude).to_radians();
    Ok(PlanarPoint {
        x: EARTH_RADIUS_M * d_lon * ref_lat.cos(),
        y: EARTH_RADIUS_M * d_lat,
    })
}

/// Inverse of [`project`].
pub fn unproject(point: PlanarPoint, reference: GeoPoint) -> Result<GeoPoint> {
    if !point.x.is_finite() || !point.y.is_finite() {
        return Err(GridPlanError::InvalidGeometry(format!(
            "non-finite planar coordinate ({}, {})",
            point.x, point.y
        )));
    }
    reference.validate()?;
    let cos_ref = reference.latitude.to_radians().cos();
    if cos_ref.abs() < f64::EPSILON {
        return Err(GridPlanError::InvalidGeometry(
            "reference latitude at a pole cannot be inverted".into(),
        ));
    }
    let latitude = reference.latitude + (point.y / EARTH_RADIUS_M).to_degrees();
    let longitude = reference.longitude + (point.x / (EARTH_RADIUS_M * cos_ref)).to_degrees();
    let result = GeoPoint::new(latitude, longitude);
    result.validate()?;
    Ok(result)
}

/// South-west corner of a point set: minimum latitude and minimum longitude.
pub fn reference_point<'a, I>(points: I) -> Option<GeoPoint>
where
    I: IntoIterator<Item = &'a GeoPoint>,
{
    points.into_iter().fold(None, |acc: Option<GeoPoint>, p| {
        Some(match acc {
            None => *p,
            Some(r) => GeoPoint::new(r.latitude.min(p.latitude), r.longitude.min(p.longitude)),
        })
    })
}
