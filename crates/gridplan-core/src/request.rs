//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Request object for a grid optimization run."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    clustering::DEFAULT_MAX_ATTEMPTS,
    cost::{ComponentCost, CostModel},
    errors::{GridPlanError, Result},
    model::{Grid, GridCosts},
    relaxation::{CancelFlag, FirstGuessStrategy},
    shs::ShsParameters,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoleCost {
    #[serde(flatten)]
    pub cost: ComponentCost,
    /// 0 means unconstrained.
    #[serde(default)]
    pub max_connections: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationSettings {
    pub n_relaxation_steps: usize,
    #[serde(default)]
    pub number_of_hill_climbers_runs: usize,
    #[serde(default)]
    pub first_guess_strategy: FirstGuessStrategy,
    #[serde(default)]
    pub seed: u64,
    /// Falls back to the deployment default when absent.
    #[serde(default)]
    pub max_clustering_attempts: Option<usize>,
    #[serde(default)]
    pub time_limit_secs: Option<u64>,
}

impl Default for OptimizationSettings {
    fn default() -> Self {
        Self {
            n_relaxation_steps: 10,
            number_of_hill_climbers_runs: 0,
            first_guess_strategy: FirstGuessStrategy::default(),
            seed: 0,
            max_clustering_attempts: None,
            time_limit_secs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizeGridRequest {
    pub start_date: NaiveDate,
    pub n_days: u32,
    pub project_lifetime: f64,
    pub wacc: f64,
    #[serde(default)]
    pub tax: f64,
    pub hv_cable: ComponentCost,
    pub lv_cable: ComponentCost,
    pub connection: ComponentCost,
    pub pole: PoleCost,
    #[serde(default)]
    pub optimization: OptimizationSettings,
    #[serde(default)]
    pub shs: Option<ShsParameters>,
}

impl OptimizeGridRequest {
    pub fn validate(&self) -> Result<()> {
        if self.n_days == 0 {
            return Err(GridPlanError::InvalidParameter(
                "n_days must be at least one".into(),
            ));
        }
        self.cost_model()?;
        let components = [
            ("hv_cable", &self.hv_cable),
            ("lv_cable", &self.lv_cable),
            ("connection", &self.connection),
            ("pole", &self.pole.cost),
        ];
        for (name, component) in components {
            validate_component(name, component)?;
        }
        if self.optimization.max_clustering_attempts == Some(0) {
            return Err(GridPlanError::InvalidParameter(
                "max_clustering_attempts must be positive".into(),
            ));
        }
        if let Some(shs) = &self.shs {
            shs.validate()?;
        }
        Ok(())
    }

    pub fn cost_model(&self) -> Result<CostModel> {
        CostModel::new(self.project_lifetime, self.wacc, self.tax)
    }

    /// Levelized per-unit costs for every component.
    pub fn grid_costs(&self) -> Result<GridCosts> {
        let model = self.cost_model()?;
        Ok(GridCosts {
            epc_hv_cable: model.epc(&self.hv_cable)?,
            epc_lv_cable: model.epc(&self.lv_cable)?,
            epc_connection: model.epc(&self.connection)?,
            epc_pole: model.epc(&self.pole.cost)?,
        })
    }

    /// Empty grid priced for this request.
    pub fn new_grid(&self) -> Result<Grid> {
        Ok(Grid::new(self.grid_costs()?, self.pole.max_connections))
    }

    pub fn parameters(&self) -> OptimizationParameters {
        let settings = &self.optimization;
        OptimizationParameters {
            n_relaxation_steps: settings.n_relaxation_steps,
            number_of_hill_climbers_runs: settings.number_of_hill_climbers_runs,
            first_guess_strategy: settings.first_guess_strategy,
            seed: settings.seed,
            max_clustering_attempts: settings
                .max_clustering_attempts
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            time_limit: settings.time_limit_secs.map(Duration::from_secs),
            shs: self.shs,
            cancel: None,
            reserved_ids: HashSet::new(),
        }
    }
}

fn validate_component(name: &str, component: &ComponentCost) -> Result<()> {
    if !component.capex.is_finite() || component.capex < 0.0 {
        return Err(GridPlanError::InvalidParameter(format!(
            "{name}.capex must be non-negative, got {}",
            component.capex
        )));
    }
    if !component.opex.is_finite() || component.opex < 0.0 {
        return Err(GridPlanError::InvalidParameter(format!(
            "{name}.opex must be non-negative, got {}",
            component.opex
        )));
    }
    if !component.lifetime.is_finite() || component.lifetime <= 0.0 {
        return Err(GridPlanError::InvalidParameter(format!(
            "{name}.lifetime must be positive, got {}",
            component.lifetime
        )));
    }
    Ok(())
}

/// Run-scoped settings for [`crate::optimize`].
#[derive(Debug, Clone)]
pub struct OptimizationParameters {
    pub n_relaxation_steps: usize,
    pub number_of_hill_climbers_runs: usize,
    pub first_guess_strategy: FirstGuessStrategy,
    pub seed: u64,
    pub max_clustering_attempts: usize,
    pub time_limit: Option<Duration>,
    /// Segment solar-home-systems after relaxation when set.
    pub shs: Option<ShsParameters>,
    pub cancel: Option<CancelFlag>,
    /// Ids held by nodes outside the grid; new poles avoid them.
    pub reserved_ids: HashSet<String>,
}

impl Default for OptimizationParameters {
    fn default() -> Self {
        let settings = OptimizationSettings::default();
        Self {
            n_relaxation_steps: settings.n_relaxation_steps,
            number_of_hill_climbers_runs: settings.number_of_hill_climbers_runs,
            first_guess_strategy: settings.first_guess_strategy,
            seed: settings.seed,
            max_clustering_attempts: DEFAULT_MAX_ATTEMPTS,
            time_limit: None,
            shs: None,
            cancel: None,
            reserved_ids: HashSet::new(),
        }
    }
}

impl OptimizationParameters {
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUEST: &str = r#"{
        "start_date": "2022-01-01",
        "n_days": 365,
        "project_lifetime": 20,
        "wacc": 0.0,
        "tax": 0.0,
        "hv_cable": {"capex": 10, "opex": 0, "lifetime": 20},
        "lv_cable": {"capex": 4, "opex": 0, "lifetime": 20},
        "connection": {"capex": 140, "opex": 1, "lifetime": 20},
        "pole": {"capex": 800, "opex": 0, "lifetime": 10, "max_connections": 5},
        "optimization": {"n_relaxation_steps": 25, "first_guess_strategy": "k_means"},
        "shs": {
            "cable_price_per_meter_for_shs_mst_identification": 6,
            "connection_cost_to_minigrid": 20,
            "price_shs_ld": 100,
            "price_shs_md": 200,
            "price_shs_hd": 400
        }
    }"#;

    #[test]
    fn parses_request_with_defaults() {
        let request: OptimizeGridRequest = serde_json::from_str(REQUEST).unwrap();
        request.validate().unwrap();
        assert_eq!(request.pole.max_connections, 5);
        assert_eq!(request.optimization.max_clustering_attempts, None);
        assert_eq!(request.parameters().max_clustering_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(request.optimization.first_guess_strategy, FirstGuessStrategy::KMeans);
        let shs = request.shs.unwrap();
        assert_eq!(shs.cable_price_per_meter, 6.0);
        assert_eq!(shs.prices.high, 400.0);
    }

    #[test]
    fn levelized_costs_without_discounting() {
        let request: OptimizeGridRequest = serde_json::from_str(REQUEST).unwrap();
        let costs = request.grid_costs().unwrap();
        assert!((costs.epc_hv_cable - 0.5).abs() < 1e-9);
        assert!((costs.epc_lv_cable - 0.2).abs() < 1e-9);
        assert!((costs.epc_connection - 8.0).abs() < 1e-9);
        // two poles over the horizon, no residual value
        assert!((costs.epc_pole - 80.0).abs() < 1e-9);
        assert_eq!(request.new_grid().unwrap().pole_max_connection, 5);
    }

    #[test]
    fn rejects_non_positive_lifetime() {
        let mut request: OptimizeGridRequest = serde_json::from_str(REQUEST).unwrap();
        request.lv_cable.lifetime = 0.0;
        assert!(matches!(
            request.validate(),
            Err(GridPlanError::InvalidParameter(_))
        ));
    }

    #[test]
    fn parameters_carry_time_limit() {
        let mut request: OptimizeGridRequest = serde_json::from_str(REQUEST).unwrap();
        request.optimization.time_limit_secs = Some(3);
        let params = request.parameters();
        assert_eq!(params.time_limit, Some(Duration::from_secs(3)));
        assert_eq!(params.n_relaxation_steps, 25);
        assert!(params.shs.is_some());
    }
}
