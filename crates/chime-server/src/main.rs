// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! chime server binary.

use std::sync::Arc;

use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chime_db::{PgExecutionStore, PgHistoryStore, PgJobStore};
use chime_scheduler::{RedisCoordinationStore, Scheduler};
use chime_server::{create_router, AppState, JobDefaults};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	// Load .env file if present
	dotenvy::dotenv().ok();

	let config = chime_server::load_config()?;

	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| "info".into()),
		)
		.with(tracing_subscriber::fmt::layer())
		.init();

	tracing::info!(
		host = %config.http.host,
		port = config.http.port,
		"starting chime-server"
	);

	// Database pool and migrations
	let pool = chime_db::create_pool(&config.postgres.url(), config.postgres.max_open_conns)
		.await?;
	chime_db::run_migrations(&pool).await?;

	let jobs = Arc::new(PgJobStore::new(pool.clone()));
	let executions = Arc::new(PgExecutionStore::new(pool.clone()));
	let history = Arc::new(PgHistoryStore::new(pool.clone()));

	// Coordination store for the leader lock
	let redis_client = redis::Client::open(config.redis.url())?;
	let coordination = Arc::new(RedisCoordinationStore::connect(redis_client).await?);

	let scheduler = Arc::new(Scheduler::new(
		config.scheduler.engine_config(),
		jobs.clone(),
		executions.clone(),
		history.clone(),
		coordination,
	));
	Arc::clone(&scheduler).start().await;

	let state = AppState {
		jobs,
		executions,
		history,
		scheduler: Arc::clone(&scheduler),
		pool: Some(pool),
		job_defaults: JobDefaults {
			timeout_secs: chime_core::job::DEFAULT_TIMEOUT_SECS,
			max_retries: config.scheduler.max_retries,
			retry_delay_secs: config.scheduler.retry_delay_seconds,
			timezone: config.scheduler.timezone.clone(),
		},
	};

	let app = create_router(state)
		.layer(TraceLayer::new_for_http())
		.layer(
			CorsLayer::new()
				.allow_origin(Any)
				.allow_methods(Any)
				.allow_headers(Any),
		);

	let addr = config.socket_addr();
	tracing::info!("listening on {}", addr);
	let listener = tokio::net::TcpListener::bind(&addr).await?;

	// Run server with graceful shutdown
	tokio::select! {
		result = axum::serve(listener, app) => {
			if let Err(e) = result {
				tracing::error!(error = %e, "server error");
			}
		}
		_ = tokio::signal::ctrl_c() => {
			tracing::info!("received shutdown signal");
			scheduler.stop().await;
		}
	}

	tracing::info!("server shutdown complete");
	Ok(())
}
