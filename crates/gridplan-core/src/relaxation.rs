//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Network relaxation of pole positions and wiring."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Greedy descent over pole positions and consumer-to-pole wiring.
//!
//! Each run seeds the poles, wires them (interpole minimum spanning tree plus
//! capacity-aware nearest-pole distribution links) and then spends a fixed
//! number of relaxation steps on local moves. A move is kept only when it
//! strictly lowers the levelized cost; there is no uphill acceptance, so the
//! result is a local optimum at best. Extra hill-climber runs restart from new
//! random seeds and the cheapest run wins, the earliest one on ties.

use std::collections::HashSet;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use rand::{prelude::*, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    clustering,
    errors::{GridPlanError, Result},
    model::{Grid, GridCosts, LinkType, Node},
    projection::PlanarPoint,
    tree::{self, TreeEdge},
};

const STEP_GROWTH: f64 = 1.2;
const STEP_SHRINK: f64 = 0.5;
const MIN_STEP_M: f64 = 1e-3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FirstGuessStrategy {
    #[default]
    Random,
    KMeans,
}

/// Shared flag used to stop a run between relaxation steps.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct RelaxationOptions {
    pub number_of_poles: usize,
    pub n_relaxation_steps: usize,
    pub number_of_hill_climbers_runs: usize,
    pub first_guess_strategy: FirstGuessStrategy,
    pub seed: u64,
    pub time_limit: Option<Duration>,
    pub cancel: Option<CancelFlag>,
    /// Ids new poles must not take, e.g. nodes kept outside the grid.
    pub reserved_ids: HashSet<String>,
}

impl RelaxationOptions {
    pub fn new(number_of_poles: usize, n_relaxation_steps: usize) -> Self {
        Self {
            number_of_poles,
            n_relaxation_steps,
            number_of_hill_climbers_runs: 0,
            first_guess_strategy: FirstGuessStrategy::default(),
            seed: 0,
            time_limit: None,
            cancel: None,
            reserved_ids: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelaxationReport {
    pub runs: usize,
    pub best_run: usize,
    pub cost: f64,
    pub number_of_poles: usize,
    pub accepted_moves: usize,
    /// Set when cancellation or the time limit cut the relaxation short.
    pub interrupted: bool,
}

#[derive(Debug, Clone)]
struct Layout {
    poles: Vec<PlanarPoint>,
    /// Pole index per consumer.
    assignment: Vec<usize>,
    backbone: Vec<TreeEdge>,
    cost: f64,
}

struct Problem<'a> {
    consumers: &'a [PlanarPoint],
    costs: GridCosts,
    capacity: usize,
}

impl Problem<'_> {
    fn fixed_cost(&self, n_poles: usize) -> f64 {
        self.consumers.len() as f64 * self.costs.epc_connection
            + n_poles as f64 * self.costs.epc_pole
    }

    fn distribution_cost(&self, poles: &[PlanarPoint], assignment: &[usize]) -> f64 {
        self.consumers
            .iter()
            .zip(assignment)
            .map(|(c, &p)| c.distance(&poles[p]))
            .sum::<f64>()
            * self.costs.epc_lv_cable
    }

    fn evaluate(&self, poles: Vec<PlanarPoint>, assignment: Vec<usize>) -> Layout {
        let backbone = tree::euclidean_mst(&poles);
        let cost = tree::tree_length(&backbone) * self.costs.epc_hv_cable
            + self.distribution_cost(&poles, &assignment)
            + self.fixed_cost(poles.len());
        Layout {
            poles,
            assignment,
            backbone,
            cost,
        }
    }

    /// Capacity-aware nearest-pole wiring: closest consumer/pole pairs first.
    fn assign(&self, poles: &[PlanarPoint]) -> Result<Vec<usize>> {
        let mut pairs: Vec<(f64, usize, usize)> =
            Vec::with_capacity(self.consumers.len() * poles.len());
        for (ci, consumer) in self.consumers.iter().enumerate() {
            for (pi, pole) in poles.iter().enumerate() {
                pairs.push((consumer.distance_squared(pole), ci, pi));
            }
        }
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let mut assignment = vec![usize::MAX; self.consumers.len()];
        let mut load = vec![0usize; poles.len()];
        let mut remaining = self.consumers.len();
        for (_, ci, pi) in pairs {
            if remaining == 0 {
                break;
            }
            if assignment[ci] == usize::MAX && load[pi] < self.capacity {
                assignment[ci] = pi;
                load[pi] += 1;
                remaining -= 1;
            }
        }

        match assignment.iter().position(|p| *p == usize::MAX) {
            Some(ci) => Err(GridPlanError::DisconnectedNode(format!("consumer #{ci}"))),
            None => Ok(assignment),
        }
    }

    fn bounding_box(&self) -> (PlanarPoint, PlanarPoint) {
        let mut min = PlanarPoint::new(f64::INFINITY, f64::INFINITY);
        let mut max = PlanarPoint::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
        for c in self.consumers {
            min.x = min.x.min(c.x);
            min.y = min.y.min(c.y);
            max.x = max.x.max(c.x);
            max.y = max.y.max(c.y);
        }
        (min, max)
    }

    fn random_poles(&self, count: usize, rng: &mut StdRng) -> Vec<PlanarPoint> {
        let (min, max) = self.bounding_box();
        (0..count)
            .map(|_| {
                PlanarPoint::new(
                    sample_between(rng, min.x, max.x),
                    sample_between(rng, min.y, max.y),
                )
            })
            .collect()
    }

    fn seed(&self, strategy: FirstGuessStrategy, count: usize, rng: &mut StdRng) -> Vec<PlanarPoint> {
        match strategy {
            FirstGuessStrategy::Random => self.random_poles(count, rng),
            FirstGuessStrategy::KMeans => {
                let mut poles = clustering::k_means(self.consumers, count, rng).centroids;
                if poles.len() < count {
                    let missing = count - poles.len();
                    poles.extend(self.random_poles(missing, rng));
                }
                poles
            }
        }
    }

    fn initial_step(&self, n_poles: usize) -> f64 {
        let (min, max) = self.bounding_box();
        min.distance(&max) / (n_poles.max(1) as f64).sqrt() / 4.0
    }

    /// One pass of consumer reassignments. Only the distribution term
    /// changes, so any strictly shorter feasible wire is an improvement.
    fn reassign_consumers(&self, layout: &mut Layout) -> usize {
        let mut load = vec![0usize; layout.poles.len()];
        for &p in &layout.assignment {
            load[p] += 1;
        }
        let mut moves = 0;
        for (ci, consumer) in self.consumers.iter().enumerate() {
            let current = layout.assignment[ci];
            let current_distance = consumer.distance(&layout.poles[current]);
            let better = layout
                .poles
                .iter()
                .enumerate()
                .filter(|(pi, _)| *pi != current && load[*pi] < self.capacity)
                .map(|(pi, pole)| (pi, consumer.distance(pole)))
                .filter(|(_, d)| *d < current_distance)
                .min_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((pi, _)) = better {
                load[current] -= 1;
                load[pi] += 1;
                layout.assignment[ci] = pi;
                moves += 1;
            }
        }
        if moves > 0 {
            *layout = self.evaluate(
                std::mem::take(&mut layout.poles),
                std::mem::take(&mut layout.assignment),
            );
        }
        moves
    }

    /// Direction in which moving `pole` shortens the cables attached to it.
    fn pull(&self, layout: &Layout, pole: usize) -> Option<(f64, f64)> {
        let origin = layout.poles[pole];
        let mut fx = 0.0;
        let mut fy = 0.0;
        let mut add = |target: &PlanarPoint, weight: f64| {
            let d = origin.distance(target);
            if d > 0.0 {
                fx += weight * (target.x - origin.x) / d;
                fy += weight * (target.y - origin.y) / d;
            }
        };
        for (ci, &p) in layout.assignment.iter().enumerate() {
            if p == pole {
                add(&self.consumers[ci], self.costs.epc_lv_cable);
            }
        }
        for edge in &layout.backbone {
            if edge.a == pole {
                add(&layout.poles[edge.b], self.costs.epc_hv_cable);
            } else if edge.b == pole {
                add(&layout.poles[edge.a], self.costs.epc_hv_cable);
            }
        }
        let norm = fx.hypot(fy);
        (norm > 1e-12).then(|| (fx / norm, fy / norm))
    }

    fn shift_poles(&self, layout: &mut Layout, steps: &mut [f64]) -> usize {
        let mut moves = 0;
        for pole in 0..layout.poles.len() {
            if steps[pole] < MIN_STEP_M {
                continue;
            }
            let Some((dx, dy)) = self.pull(layout, pole) else {
                continue;
            };
            let mut poles = layout.poles.clone();
            poles[pole] = PlanarPoint::new(
                poles[pole].x + dx * steps[pole],
                poles[pole].y + dy * steps[pole],
            );
            let candidate = self.evaluate(poles, layout.assignment.clone());
            if candidate.cost < layout.cost {
                *layout = candidate;
                steps[pole] *= STEP_GROWTH;
                moves += 1;
            } else {
                steps[pole] *= STEP_SHRINK;
            }
        }
        moves
    }

    /// Drop poles nobody is wired to when that lowers the cost.
    fn prune_unused_poles(&self, layout: Layout) -> Layout {
        let mut used = vec![false; layout.poles.len()];
        for &p in &layout.assignment {
            used[p] = true;
        }
        if used.iter().all(|u| *u) {
            return layout;
        }
        let mut remap = vec![usize::MAX; layout.poles.len()];
        let mut poles = Vec::new();
        for (i, pole) in layout.poles.iter().enumerate() {
            if used[i] {
                remap[i] = poles.len();
                poles.push(*pole);
            }
        }
        let assignment = layout.assignment.iter().map(|p| remap[*p]).collect();
        let pruned = self.evaluate(poles, assignment);
        if pruned.cost < layout.cost {
            debug!(
                removed = layout.poles.len() - pruned.poles.len(),
                "dropped poles without consumers"
            );
            pruned
        } else {
            layout
        }
    }
}

fn sample_between(rng: &mut StdRng, low: f64, high: f64) -> f64 {
    if high > low {
        rng.gen_range(low..=high)
    } else {
        low
    }
}

struct RunOutcome {
    layout: Layout,
    accepted_moves: usize,
    interrupted: bool,
}

pub struct NetworkRelaxationOptimizer {
    options: RelaxationOptions,
}

impl NetworkRelaxationOptimizer {
    pub fn new(options: RelaxationOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RelaxationOptions {
        &self.options
    }

    fn should_stop(&self, deadline: Option<Instant>) -> bool {
        let cancelled = self
            .options
            .cancel
            .as_ref()
            .is_some_and(CancelFlag::is_cancelled);
        cancelled || deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn run(
        &self,
        problem: &Problem<'_>,
        strategy: FirstGuessStrategy,
        seed: u64,
        deadline: Option<Instant>,
    ) -> Result<RunOutcome> {
        let mut rng = StdRng::seed_from_u64(seed);
        let poles = problem.seed(strategy, self.options.number_of_poles, &mut rng);
        let assignment = problem.assign(&poles)?;
        let mut layout = problem.evaluate(poles, assignment);
        let mut steps = vec![problem.initial_step(layout.poles.len()); layout.poles.len()];
        let mut accepted_moves = 0;
        let mut interrupted = false;

        for step in 0..self.options.n_relaxation_steps {
            if self.should_stop(deadline) {
                warn!(step, "relaxation interrupted, keeping best layout so far");
                interrupted = true;
                break;
            }
            let moved =
                problem.reassign_consumers(&mut layout) + problem.shift_poles(&mut layout, &mut steps);
            accepted_moves += moved;
            debug!(step, moved, cost = layout.cost, "relaxation step");
        }

        Ok(RunOutcome {
            layout: problem.prune_unused_poles(layout),
            accepted_moves,
            interrupted,
        })
    }

    /// Place poles and wire every connected consumer of `grid`.
    ///
    /// Existing poles and their links are replaced. Consumers that are not
    /// connected (standalone systems) are left untouched.
    pub fn optimize(&self, grid: &mut Grid) -> Result<RelaxationReport> {
        if self.options.number_of_poles == 0 {
            return Err(GridPlanError::InvalidTopology(
                "number of poles must be positive".into(),
            ));
        }

        let consumer_ids = grid.connected_consumer_ids();
        if consumer_ids.is_empty() {
            info!("no connected consumers, nothing to relax");
            return Ok(RelaxationReport {
                runs: 0,
                best_run: 0,
                cost: grid.cost(),
                number_of_poles: 0,
                accepted_moves: 0,
                interrupted: false,
            });
        }
        let consumers = consumer_ids
            .iter()
            .map(|id| {
                grid.node(id)
                    .ok_or_else(|| GridPlanError::DisconnectedNode(id.clone()))?
                    .position()
            })
            .collect::<Result<Vec<_>>>()?;

        let problem = Problem {
            consumers: &consumers,
            costs: grid.costs,
            capacity: match grid.pole_max_connection {
                0 => usize::MAX,
                c => c,
            },
        };

        let deadline = self.options.time_limit.map(|limit| Instant::now() + limit);
        let runs = 1 + self.options.number_of_hill_climbers_runs;
        let mut best: Option<(usize, RunOutcome)> = None;
        let mut runs_done = 0;
        let mut accepted_moves = 0;
        let mut interrupted = false;

        for run in 0..runs {
            if run > 0 && self.should_stop(deadline) {
                interrupted = true;
                break;
            }
            let strategy = if run == 0 {
                self.options.first_guess_strategy
            } else {
                FirstGuessStrategy::Random
            };
            let outcome = self.run(
                &problem,
                strategy,
                self.options.seed.wrapping_add(run as u64),
                deadline,
            )?;
            runs_done += 1;
            info!(
                run,
                ?strategy,
                cost = outcome.layout.cost,
                poles = outcome.layout.poles.len(),
                moves = outcome.accepted_moves,
                "relaxation run finished"
            );
            accepted_moves += outcome.accepted_moves;
            interrupted |= outcome.interrupted;
            let improves = best
                .as_ref()
                .map_or(true, |(_, b)| outcome.layout.cost < b.layout.cost);
            if improves {
                best = Some((run, outcome));
            }
            if interrupted {
                break;
            }
        }

        let Some((best_run, outcome)) = best else {
            return Err(GridPlanError::InvalidTopology(
                "relaxation produced no layout".into(),
            ));
        };
        apply_layout(
            grid,
            &consumer_ids,
            &outcome.layout,
            &self.options.reserved_ids,
        )?;

        Ok(RelaxationReport {
            runs: runs_done,
            best_run,
            cost: grid.cost(),
            number_of_poles: outcome.layout.poles.len(),
            accepted_moves,
            interrupted,
        })
    }
}

/// Replace the grid's poles and links with `layout`.
fn apply_layout(
    grid: &mut Grid,
    consumer_ids: &[String],
    layout: &Layout,
    reserved_ids: &HashSet<String>,
) -> Result<()> {
    grid.clear_poles();
    grid.clear_links_of_type(LinkType::Distribution);
    grid.clear_links_of_type(LinkType::Interpole);

    let mut pole_ids = Vec::with_capacity(layout.poles.len());
    let mut counter = 0;
    for position in &layout.poles {
        let id = loop {
            counter += 1;
            let candidate = format!("pole-{counter}");
            if grid.node(&candidate).is_none() && !reserved_ids.contains(&candidate) {
                break candidate;
            }
        };
        let geo = grid.unproject(*position)?;
        grid.insert_node(Node::pole(id.clone(), geo, *position))?;
        pole_ids.push(id);
    }
    for edge in &layout.backbone {
        grid.connect(&pole_ids[edge.a], &pole_ids[edge.b], LinkType::Interpole)?;
    }
    for (consumer, &pole) in consumer_ids.iter().zip(&layout.assignment) {
        grid.connect(&pole_ids[pole], consumer, LinkType::Distribution)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::GeoPoint;

    fn costs() -> GridCosts {
        GridCosts {
            epc_hv_cable: 4.0,
            epc_lv_cable: 2.0,
            epc_connection: 15.0,
            epc_pole: 60.0,
        }
    }

    fn grid_from(points: &[(f64, f64)], pole_max_connection: usize) -> Grid {
        let mut grid = Grid::new(costs(), pole_max_connection);
        for (i, (x, y)) in points.iter().enumerate() {
            grid.add_node(Node::consumer(format!("c{i}"), 0.0, 0.0).with_planar(*x, *y));
        }
        grid.set_reference(GeoPoint::new(-3.0, 30.0));
        grid
    }

    fn two_hamlets() -> Vec<(f64, f64)> {
        vec![
            (0.0, 0.0),
            (8.0, 1.0),
            (3.0, 7.0),
            (5.0, 3.0),
            (120.0, 80.0),
            (126.0, 84.0),
            (118.0, 90.0),
            (124.0, 77.0),
        ]
    }

    #[test]
    fn zero_poles_is_invalid_topology() {
        let mut grid = grid_from(&two_hamlets(), 4);
        let err = NetworkRelaxationOptimizer::new(RelaxationOptions::new(0, 10))
            .optimize(&mut grid)
            .unwrap_err();
        assert!(matches!(err, GridPlanError::InvalidTopology(_)));
    }

    #[test]
    fn insufficient_capacity_disconnects_a_consumer() {
        let mut grid = grid_from(&two_hamlets(), 3);
        let err = NetworkRelaxationOptimizer::new(RelaxationOptions::new(2, 5))
            .optimize(&mut grid)
            .unwrap_err();
        assert!(matches!(err, GridPlanError::DisconnectedNode(_)));
    }

    #[test]
    fn every_consumer_is_wired_within_capacity() {
        let mut grid = grid_from(&two_hamlets(), 4);
        let mut options = RelaxationOptions::new(2, 30);
        options.seed = 11;
        let report = NetworkRelaxationOptimizer::new(options)
            .optimize(&mut grid)
            .unwrap();
        assert_eq!(report.number_of_poles, 2);
        assert_eq!(grid.distribution_links().count(), 8);
        assert_eq!(grid.interpole_links().count(), 1);
        for pole in grid.poles() {
            let served = grid
                .distribution_links()
                .filter(|l| l.from.node_id == pole.id)
                .count();
            assert!(served <= 4);
        }
        assert!((report.cost - grid.cost()).abs() < 1e-6);
    }

    #[test]
    fn relaxation_never_increases_cost() {
        let points = two_hamlets();
        let mut idle = grid_from(&points, 4);
        let mut options = RelaxationOptions::new(2, 0);
        options.seed = 5;
        let idle_report = NetworkRelaxationOptimizer::new(options.clone())
            .optimize(&mut idle)
            .unwrap();

        let mut relaxed = grid_from(&points, 4);
        options.n_relaxation_steps = 50;
        let relaxed_report = NetworkRelaxationOptimizer::new(options)
            .optimize(&mut relaxed)
            .unwrap();
        assert!(relaxed_report.cost <= idle_report.cost + 1e-9);
    }

    #[test]
    fn hill_climbing_keeps_the_cheapest_run() {
        let points = two_hamlets();
        let mut single = grid_from(&points, 4);
        let mut options = RelaxationOptions::new(2, 20);
        options.seed = 3;
        let single_report = NetworkRelaxationOptimizer::new(options.clone())
            .optimize(&mut single)
            .unwrap();

        let mut multi = grid_from(&points, 4);
        options.number_of_hill_climbers_runs = 4;
        let multi_report = NetworkRelaxationOptimizer::new(options)
            .optimize(&mut multi)
            .unwrap();
        assert_eq!(multi_report.runs, 5);
        assert!(multi_report.cost <= single_report.cost + 1e-9);
    }

    #[test]
    fn cancelled_run_still_leaves_a_fully_linked_grid() {
        let mut grid = grid_from(&two_hamlets(), 4);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let mut options = RelaxationOptions::new(2, 1_000);
        options.cancel = Some(cancel);
        let report = NetworkRelaxationOptimizer::new(options)
            .optimize(&mut grid)
            .unwrap();
        assert!(report.interrupted);
        assert_eq!(report.accepted_moves, 0);
        assert_eq!(grid.distribution_links().count(), 8);
    }

    #[test]
    fn coincident_consumers_cost_no_cable() {
        let mut grid = grid_from(&[(5.0, 5.0), (5.0, 5.0), (5.0, 5.0)], 0);
        let mut options = RelaxationOptions::new(1, 10);
        options.first_guess_strategy = FirstGuessStrategy::KMeans;
        let report = NetworkRelaxationOptimizer::new(options)
            .optimize(&mut grid)
            .unwrap();
        assert!((report.cost - (3.0 * 15.0 + 60.0)).abs() < 1e-9);
        assert!(grid.links().iter().all(|l| l.length() == 0.0));
    }

    #[test]
    fn equal_cost_restarts_keep_the_first_run() {
        // every run lands its single pole on the shared position
        let mut grid = grid_from(&[(5.0, 5.0), (5.0, 5.0), (5.0, 5.0)], 0);
        let mut options = RelaxationOptions::new(1, 5);
        options.number_of_hill_climbers_runs = 3;
        options.seed = 9;
        let report = NetworkRelaxationOptimizer::new(options)
            .optimize(&mut grid)
            .unwrap();
        assert_eq!(report.runs, 4);
        assert_eq!(report.best_run, 0);
        assert!((report.cost - (3.0 * 15.0 + 60.0)).abs() < 1e-9);
    }

    #[test]
    fn new_poles_never_take_an_existing_id() {
        let mut grid = Grid::new(costs(), 4);
        for (id, x, y) in [
            ("pole-1", 0.0, 0.0),
            ("h2", 10.0, 0.0),
            ("h3", 0.0, 10.0),
            ("h4", 10.0, 10.0),
        ] {
            grid.insert_node(Node::consumer(id, 0.0, 0.0).with_planar(x, y))
                .unwrap();
        }
        grid.set_reference(GeoPoint::new(-3.0, 30.0));

        let mut options = RelaxationOptions::new(1, 10);
        options.reserved_ids.insert("pole-2".to_string());
        NetworkRelaxationOptimizer::new(options)
            .optimize(&mut grid)
            .unwrap();

        assert_eq!(grid.consumers().count(), 4);
        let poles: Vec<_> = grid.poles().map(|p| p.id.as_str()).collect();
        assert_eq!(poles, vec!["pole-3"]);
        assert_eq!(grid.distribution_links().count(), 4);
        assert!(grid.links().iter().all(|l| l.from.node_id != l.to.node_id));
        assert!(grid
            .distribution_links()
            .any(|l| l.touches("pole-1") && l.touches("pole-3")));
    }
}
