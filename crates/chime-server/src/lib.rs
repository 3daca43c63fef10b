// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP surface for the chime callback scheduler.
//!
//! Thin axum handlers over the store traits and the scheduling engine.
//! Tenant identity arrives in the `X-Tenant-ID` header; absence means the
//! nil tenant.

pub mod config;
pub mod error;
pub mod response;
pub mod routes;
pub mod tenant;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;

use chime_db::{ExecutionStore, HistoryStore, JobStore};
use chime_scheduler::Scheduler;

pub use config::{load_config, ConfigError, ServerConfig};
pub use error::ServerError;

/// Defaults applied to job-creation requests that omit policy fields,
/// resolved from the scheduler configuration.
#[derive(Debug, Clone)]
pub struct JobDefaults {
	pub timeout_secs: i32,
	pub max_retries: i32,
	pub retry_delay_secs: i32,
	pub timezone: String,
}

impl Default for JobDefaults {
	fn default() -> Self {
		Self {
			timeout_secs: chime_core::job::DEFAULT_TIMEOUT_SECS,
			max_retries: chime_core::job::DEFAULT_MAX_RETRIES,
			retry_delay_secs: chime_core::job::DEFAULT_RETRY_DELAY_SECS,
			timezone: chime_core::job::DEFAULT_TIMEZONE.to_string(),
		}
	}
}

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
	pub jobs: Arc<dyn JobStore>,
	pub executions: Arc<dyn ExecutionStore>,
	pub history: Arc<dyn HistoryStore>,
	pub scheduler: Arc<Scheduler>,
	/// The relational pool, used by readiness probes. `None` means the
	/// process runs on in-memory stores and the probe only checks the
	/// scheduler.
	pub pool: Option<PgPool>,
	pub job_defaults: JobDefaults,
}

/// Build the full router.
pub fn create_router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(routes::health::health))
		.route("/ready", get(routes::health::ready))
		.route("/live", get(routes::health::live))
		.nest("/api/v1", api_routes())
		.with_state(state)
}

fn api_routes() -> Router<AppState> {
	Router::new()
		.route("/jobs", get(routes::jobs::list).post(routes::jobs::create))
		.route("/jobs/stats", get(routes::jobs::stats))
		.route(
			"/jobs/{id}",
			get(routes::jobs::get)
				.put(routes::jobs::update)
				.delete(routes::jobs::delete),
		)
		.route("/jobs/{id}/trigger", post(routes::jobs::trigger))
		.route("/jobs/{id}/pause", post(routes::jobs::pause))
		.route("/jobs/{id}/resume", post(routes::jobs::resume))
		.route("/jobs/{id}/executions", get(routes::executions::list_by_job))
		.route("/jobs/{id}/history", get(routes::history::by_job))
		.route(
			"/executions",
			get(routes::executions::list),
		)
		.route("/executions/stats", get(routes::executions::stats))
		.route("/executions/{id}", get(routes::executions::get))
		.route("/executions/{id}/cancel", post(routes::executions::cancel))
		.route("/history", get(routes::history::date_range))
		.route("/history/stats", get(routes::history::aggregated))
}
