//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Levelized cost model for grid components."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Annuity arithmetic turning one-off component purchases into an equivalent
//! annual cost over the project horizon.

use serde::{Deserialize, Serialize};

use crate::errors::{GridPlanError, Result};

/// Capex, opex and service life of a single grid component type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentCost {
    pub capex: f64,
    #[serde(default)]
    pub opex: f64,
    pub lifetime: f64,
}

/// Capital recovery factor `wacc(1+wacc)^n / ((1+wacc)^n - 1)`.
///
/// With `wacc == 0` the factor degenerates to `1/n`.
pub fn capital_recovery_factor(wacc: f64, project_lifetime: f64) -> Result<f64> {
    if !wacc.is_finite() || wacc <= -1.0 {
        return Err(GridPlanError::InvalidParameter(format!(
            "wacc must be finite and greater than -1, got {wacc}"
        )));
    }
    if !project_lifetime.is_finite() || project_lifetime <= 0.0 {
        return Err(GridPlanError::InvalidParameter(format!(
            "project lifetime must be positive, got {project_lifetime}"
        )));
    }
    if wacc.abs() < 1e-12 {
        return Ok(1.0 / project_lifetime);
    }
    let growth = (1.0 + wacc).powf(project_lifetime);
    Ok(wacc * growth / (growth - 1.0))
}

/// Project-wide economic parameters shared by every component type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    pub project_lifetime: f64,
    pub wacc: f64,
    #[serde(default)]
    pub tax: f64,
}

impl CostModel {
    pub fn new(project_lifetime: f64, wacc: f64, tax: f64) -> Result<Self> {
        let model = Self {
            project_lifetime,
            wacc,
            tax,
        };
        model.crf()?;
        if !tax.is_finite() || tax < 0.0 {
            return Err(GridPlanError::InvalidParameter(format!(
                "tax must be non-negative, got {tax}"
            )));
        }
        Ok(model)
    }

    pub fn crf(&self) -> Result<f64> {
        capital_recovery_factor(self.wacc, self.project_lifetime)
    }

    /// Present value of buying a component and replacing it whenever it wears
    /// out before the end of the project, net of the residual value of the
    /// last unit.
    pub fn capex_multi_investment(&self, capex_0: f64, component_lifetime: f64) -> Result<f64> {
        if !component_lifetime.is_finite() || component_lifetime <= 0.0 {
            return Err(GridPlanError::InvalidParameter(format!(
                "component lifetime must be positive, got {component_lifetime}"
            )));
        }
        if !capex_0.is_finite() {
            return Err(GridPlanError::InvalidParameter(format!(
                "capex must be finite, got {capex_0}"
            )));
        }
        self.crf()?;

        let horizon = self.project_lifetime;
        let discount = |year: f64| (1.0 + self.wacc).powf(year);
        let purchases = (horizon / component_lifetime).ceil().max(1.0) as u32;
        let first_investment = capex_0 * (1.0 + self.tax);

        let mut capex = first_investment;
        for replacement in 1..purchases {
            let year = f64::from(replacement) * component_lifetime;
            if year < horizon {
                capex += first_investment / discount(year);
            }
        }

        let covered = f64::from(purchases) * component_lifetime;
        if covered > horizon {
            let last_year = f64::from(purchases - 1) * component_lifetime;
            let last_investment = first_investment / discount(last_year);
            let yearly_depreciation = last_investment / component_lifetime;
            capex -= yearly_depreciation * (covered - horizon) / discount(horizon);
        }
        Ok(capex)
    }

    pub fn levelized_annual_cost(
        &self,
        capex_0: f64,
        opex: f64,
        component_lifetime: f64,
    ) -> Result<f64> {
        Ok(self.crf()? * self.capex_multi_investment(capex_0, component_lifetime)? + opex)
    }

    /// Equivalent periodic cost of a component.
    pub fn epc(&self, component: &ComponentCost) -> Result<f64> {
        self.levelized_annual_cost(component.capex, component.opex, component.lifetime)
    }
}
