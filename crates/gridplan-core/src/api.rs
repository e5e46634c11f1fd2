//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "HTTP surface for grid optimization and SHS identification."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

use crate::{
    errors::Result,
    model::GridCosts,
    relaxation::CancelFlag,
    request::OptimizeGridRequest,
    shs::{ShsParameters, ShsPartition, ShsSegmenter},
    store::{self, LinkRecord, MemoryGridStore, NodeRecord},
    OptimizationReport,
};

#[cfg(feature = "rest-api")]
pub use rest::{router, ApiState};

#[cfg(feature = "rest-api")]
mod rest {
    use std::{sync::Arc, time::Duration};

    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use tracing::{error, warn};

    use crate::{errors::GridPlanError, relaxation::CancelFlag};

    use super::{
        identify_shs, optimize_grid, OptimizeGridPayload, OptimizeGridResponse, ShsPayload,
        ShsResponse,
    };

    #[derive(Debug, Clone)]
    pub struct ApiState {
        /// Wall-clock budget per request before the run is told to stop.
        pub request_timeout: Duration,
    }

    impl Default for ApiState {
        fn default() -> Self {
            Self {
                request_timeout: Duration::from_secs(60),
            }
        }
    }

    pub fn router(state: ApiState) -> Router {
        Router::new()
            .route("/api/grid/optimize", post(optimize))
            .route("/api/grid/shs", post(shs))
            .with_state(Arc::new(state))
    }

    async fn optimize(
        State(state): State<Arc<ApiState>>,
        Json(payload): Json<OptimizeGridPayload>,
    ) -> std::result::Result<Json<OptimizeGridResponse>, StatusCode> {
        let cancel = CancelFlag::new();
        let worker_cancel = cancel.clone();
        let mut handle =
            tokio::task::spawn_blocking(move || optimize_grid(payload, Some(worker_cancel)));

        let joined = match tokio::time::timeout(state.request_timeout, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(
                    timeout_secs = state.request_timeout.as_secs(),
                    "optimization timed out, keeping best layout so far"
                );
                cancel.cancel();
                handle.await
            }
        };
        let result = joined.map_err(|err| {
            error!(%err, "optimization task failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        result.map(Json).map_err(map_err)
    }

    async fn shs(
        State(_): State<Arc<ApiState>>,
        Json(payload): Json<ShsPayload>,
    ) -> std::result::Result<Json<ShsResponse>, StatusCode> {
        identify_shs(payload).map(Json).map_err(map_err)
    }

    fn map_err(err: GridPlanError) -> StatusCode {
        if err.is_input_error() {
            StatusCode::BAD_REQUEST
        } else {
            error!(%err, "grid planning failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeGridPayload {
    pub request: OptimizeGridRequest,
    pub nodes: Vec<NodeRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizeGridResponse {
    pub report: OptimizationReport,
    pub nodes: Vec<NodeRecord>,
    pub links: Vec<LinkRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShsPayload {
    #[serde(flatten)]
    pub params: ShsParameters,
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub links: Vec<LinkRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShsResponse {
    pub partition: ShsPartition,
    pub nodes: Vec<NodeRecord>,
    pub links: Vec<LinkRecord>,
}

/// Blocking body of `POST /api/grid/optimize`.
pub fn optimize_grid(
    payload: OptimizeGridPayload,
    cancel: Option<CancelFlag>,
) -> Result<OptimizeGridResponse> {
    let mut store = MemoryGridStore::with_nodes(payload.nodes);
    let report = crate::plan_from_store(&mut store, &payload.request, cancel)?;
    Ok(OptimizeGridResponse {
        report,
        nodes: store.nodes,
        links: store.links,
    })
}

/// Body of `POST /api/grid/shs`.
pub fn identify_shs(payload: ShsPayload) -> Result<ShsResponse> {
    let segmenter = ShsSegmenter::new(payload.params)?;
    let mut grid = store::assemble_grid(payload.nodes, &payload.links, GridCosts::default(), 0)?;
    let partition = segmenter.segment(&mut grid)?;
    let (nodes, links) = store::grid_records(&grid);
    Ok(ShsResponse {
        partition,
        nodes,
        links,
    })
}
