//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "HTTP front end for the planning API."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Args;
use gridplan_common::PlannerConfig;
use gridplan_core::api::{router, ApiState};
use tokio::{net::TcpListener, signal};
use tracing::info;

#[derive(Debug, Args)]
pub struct ServeCommand {
    /// Override the listen address (defaults to api.listen).
    #[arg(long, value_name = "ADDR")]
    listen: Option<SocketAddr>,
}

impl ServeCommand {
    pub fn execute(self, config: &PlannerConfig) -> Result<()> {
        let listen = self.listen.unwrap_or(config.api.listen);
        let state = ApiState {
            request_timeout: config.api.request_timeout,
        };
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to build tokio runtime")?;

        runtime.block_on(async move {
            let listener = TcpListener::bind(listen)
                .await
                .with_context(|| format!("unable to bind {listen}"))?;
            info!(%listen, timeout_secs = state.request_timeout.as_secs(), "planning API listening");
            axum::serve(listener, router(state))
                .with_graceful_shutdown(async {
                    let _ = signal::ctrl_c().await;
                    info!("shutdown signal received");
                })
                .await
                .context("planning API server failed")
        })
    }
}
