//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Capacity-constrained k-means for pole placement."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use rand::{prelude::*, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    errors::{GridPlanError, Result},
    projection::PlanarPoint,
};

pub const DEFAULT_MAX_ATTEMPTS: usize = 100;
const LLOYD_ITERATIONS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clustering {
    /// Cluster index per input point.
    pub assignment: Vec<usize>,
    pub centroids: Vec<PlanarPoint>,
}

impl Clustering {
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.centroids.len()];
        for &cluster in &self.assignment {
            sizes[cluster] += 1;
        }
        sizes
    }

    pub fn largest_cluster(&self) -> usize {
        self.cluster_sizes().into_iter().max().unwrap_or(0)
    }
}

/// Lower bound on the number of poles needed to serve `consumers`.
pub fn min_number_of_poles(consumers: usize, pole_max_connection: usize) -> usize {
    if pole_max_connection == 0 || consumers == 0 {
        1
    } else {
        consumers.div_ceil(pole_max_connection)
    }
}

/// Plain k-means: k-means++ seeding followed by Lloyd iterations.
pub fn k_means(points: &[PlanarPoint], k: usize, rng: &mut StdRng) -> Clustering {
    let k = k.min(points.len());
    if k == 0 {
        return Clustering {
            assignment: vec![0; points.len()],
            centroids: Vec::new(),
        };
    }

    let mut centroids = seed_plus_plus(points, k, rng);
    let mut assignment = vec![usize::MAX; points.len()];

    for iteration in 0..LLOYD_ITERATIONS {
        let mut changed = false;
        for (i, point) in points.iter().enumerate() {
            let nearest = nearest_centroid(point, &centroids);
            if assignment[i] != nearest {
                assignment[i] = nearest;
                changed = true;
            }
        }
        if !changed {
            debug!(k, iteration, "k-means converged");
            break;
        }

        let mut sums = vec![(0.0, 0.0); k];
        let mut counts = vec![0usize; k];
        for (point, &cluster) in points.iter().zip(&assignment) {
            sums[cluster].0 += point.x;
            sums[cluster].1 += point.y;
            counts[cluster] += 1;
        }
        for cluster in 0..k {
            if counts[cluster] > 0 {
                let n = counts[cluster] as f64;
                centroids[cluster] = PlanarPoint::new(sums[cluster].0 / n, sums[cluster].1 / n);
            } else {
                // re-seed an empty cluster at the point worst served by its centroid
                let worst = points
                    .iter()
                    .enumerate()
                    .max_by(|(ia, a), (ib, b)| {
                        a.distance_squared(&centroids[assignment[*ia]])
                            .total_cmp(&b.distance_squared(&centroids[assignment[*ib]]))
                    })
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                centroids[cluster] = points[worst];
            }
        }
    }

    Clustering {
        assignment,
        centroids,
    }
}

fn nearest_centroid(point: &PlanarPoint, centroids: &[PlanarPoint]) -> usize {
    centroids
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            point
                .distance_squared(a)
                .total_cmp(&point.distance_squared(b))
        })
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn seed_plus_plus(points: &[PlanarPoint], k: usize, rng: &mut StdRng) -> Vec<PlanarPoint> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..points.len())]);
    let mut weights: Vec<f64> = points
        .iter()
        .map(|p| p.distance_squared(&centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = weights.iter().sum();
        let next = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = points.len() - 1;
            for (i, w) in weights.iter().enumerate() {
                if target < *w {
                    chosen = i;
                    break;
                }
                target -= w;
            }
            chosen
        } else {
            // every point already coincides with a centroid
            rng.gen_range(0..points.len())
        };
        let centroid = points[next];
        centroids.push(centroid);
        for (w, p) in weights.iter_mut().zip(points) {
            *w = w.min(p.distance_squared(&centroid));
        }
    }
    centroids
}

/// Searches for the smallest cluster count whose k-means partition keeps every
/// cluster within the per-pole connection limit.
#[derive(Debug, Clone)]
pub struct PoleClusterer {
    pub pole_max_connection: usize,
    pub max_attempts: usize,
    pub seed: u64,
}

impl PoleClusterer {
    pub fn new(pole_max_connection: usize, seed: u64) -> Self {
        Self {
            pole_max_connection,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            seed,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    fn is_feasible(&self, clustering: &Clustering) -> bool {
        self.pole_max_connection == 0 || clustering.largest_cluster() <= self.pole_max_connection
    }

    /// Smallest feasible k-means clustering, adding one pole per attempt.
    ///
    /// k-means never splits consumers sharing a position, so more than
    /// `pole_max_connection` of them at one spot end in
    /// [`GridPlanError::ClusteringInfeasible`]. Such input has to be spread
    /// out by the caller.
    pub fn cluster(&self, consumers: &[PlanarPoint]) -> Result<Clustering> {
        if consumers.is_empty() {
            return Ok(Clustering {
                assignment: Vec::new(),
                centroids: Vec::new(),
            });
        }

        let mut k = min_number_of_poles(consumers.len(), self.pole_max_connection);
        let mut rng = StdRng::seed_from_u64(self.seed);
        for attempt in 1..=self.max_attempts {
            if k > consumers.len() {
                break;
            }
            let clustering = k_means(consumers, k, &mut rng);
            let largest = clustering.largest_cluster();
            if self.is_feasible(&clustering) {
                info!(
                    poles = k,
                    attempt,
                    largest_cluster = largest,
                    "pole clustering satisfies connection limit"
                );
                return Ok(clustering);
            }
            debug!(
                poles = k,
                attempt,
                largest_cluster = largest,
                limit = self.pole_max_connection,
                "cluster over capacity, adding a pole"
            );
            k += 1;
        }

        Err(GridPlanError::ClusteringInfeasible {
            attempts: self.max_attempts,
            pole_max_connection: self.pole_max_connection,
        })
    }

    /// Number of poles the relaxation should start from.
    pub fn find_number_of_poles(&self, consumers: &[PlanarPoint]) -> Result<usize> {
        Ok(self.cluster(consumers)?.centroids.len().max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn village(n: usize) -> Vec<PlanarPoint> {
        (0..n)
            .map(|i| {
                let row = (i / 4) as f64;
                let col = (i % 4) as f64;
                PlanarPoint::new(col * 25.0 + row * 3.0, row * 40.0)
            })
            .collect()
    }

    #[test]
    fn lower_bound_from_capacity() {
        assert_eq!(min_number_of_poles(10, 3), 4);
        assert_eq!(min_number_of_poles(9, 3), 3);
        assert_eq!(min_number_of_poles(10, 0), 1);
    }

    #[test]
    fn never_exceeds_connection_limit() {
        let points = village(10);
        let clustering = PoleClusterer::new(3, 7).cluster(&points).unwrap();
        assert!(clustering.centroids.len() >= 4);
        assert!(clustering.cluster_sizes().iter().all(|size| *size <= 3));
        assert_eq!(clustering.assignment.len(), 10);
    }

    #[test]
    fn unconstrained_uses_single_centroid() {
        let points = vec![
            PlanarPoint::new(0.0, 0.0),
            PlanarPoint::new(10.0, 0.0),
            PlanarPoint::new(0.0, 10.0),
            PlanarPoint::new(10.0, 10.0),
        ];
        let clustering = PoleClusterer::new(0, 1).cluster(&points).unwrap();
        assert_eq!(clustering.centroids, vec![PlanarPoint::new(5.0, 5.0)]);
    }

    #[test]
    fn coincident_consumers_over_capacity_are_infeasible() {
        let points = vec![PlanarPoint::new(1.0, 1.0); 5];
        let err = PoleClusterer::new(2, 3)
            .with_max_attempts(10)
            .cluster(&points)
            .unwrap_err();
        assert!(matches!(
            err,
            GridPlanError::ClusteringInfeasible {
                pole_max_connection: 2,
                ..
            }
        ));
    }

    #[test]
    fn deterministic_for_a_given_seed() {
        let points = village(16);
        let a = PoleClusterer::new(5, 42).cluster(&points).unwrap();
        let b = PoleClusterer::new(5, 42).cluster(&points).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_input_is_not_an_error() {
        let clustering = PoleClusterer::new(3, 0).cluster(&[]).unwrap();
        assert!(clustering.centroids.is_empty());
    }
}
