// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Health, readiness and liveness handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use serde_json::json;

use crate::response;
use crate::AppState;

async fn database_ok(state: &AppState) -> bool {
	match &state.pool {
		Some(pool) => sqlx::query("SELECT 1").execute(pool).await.is_ok(),
		// In-memory deployments have no database to probe.
		None => true,
	}
}

/// GET /health - overall service health.
pub async fn health(State(state): State<AppState>) -> Response {
	let database_ok = database_ok(&state).await;
	let scheduler_running = state.scheduler.is_running();

	let healthy = database_ok && scheduler_running;
	let body = json!({
		"status": if healthy { "healthy" } else { "unhealthy" },
		"scheduler": scheduler_running,
		"database": if database_ok { "connected" } else { "disconnected" },
		"queue_size": state.scheduler.queue_size(),
		"worker_count": state.scheduler.worker_count(),
	});

	if healthy {
		response::ok(body)
	} else {
		response::error(
			StatusCode::SERVICE_UNAVAILABLE,
			"SERVICE_UNAVAILABLE",
			"service is unhealthy",
		)
	}
}

/// GET /ready - 503 unless the scheduler runs and the store answers.
pub async fn ready(State(state): State<AppState>) -> Response {
	if !state.scheduler.is_running() {
		return response::error(
			StatusCode::SERVICE_UNAVAILABLE,
			"SERVICE_UNAVAILABLE",
			"scheduler is not running",
		);
	}

	if !database_ok(&state).await {
		return response::error(
			StatusCode::SERVICE_UNAVAILABLE,
			"SERVICE_UNAVAILABLE",
			"database ping failed",
		);
	}

	response::ok(json!({"status": "ready"}))
}

/// GET /live - process liveness.
pub async fn live() -> Response {
	response::ok(json!({"status": "alive"}))
}
