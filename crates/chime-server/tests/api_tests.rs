// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP surface tests against in-memory stores.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::post;
use axum::Router;
use serde_json::{json, Value};

use chime_core::TenantId;
use chime_db::testing::{MemoryExecutionStore, MemoryHistoryStore, MemoryJobStore};
use chime_db::{ExecutionStore, HistoryStore, JobStore};
use chime_scheduler::{MemoryCoordinationStore, Scheduler, SchedulerConfig};
use chime_server::{create_router, AppState, JobDefaults};

struct TestApp {
	base_url: String,
	client: reqwest::Client,
	tenant: TenantId,
	jobs: Arc<MemoryJobStore>,
	executions: Arc<MemoryExecutionStore>,
	history: Arc<MemoryHistoryStore>,
	scheduler: Arc<Scheduler>,
}

impl TestApp {
	async fn spawn(start_scheduler: bool) -> Self {
		let jobs = Arc::new(MemoryJobStore::new());
		let executions = Arc::new(MemoryExecutionStore::new());
		let history = Arc::new(MemoryHistoryStore::new());
		let coordination = Arc::new(MemoryCoordinationStore::new());

		let scheduler = Arc::new(Scheduler::new(
			SchedulerConfig {
				worker_count: 2,
				..SchedulerConfig::default()
			},
			jobs.clone(),
			executions.clone(),
			history.clone(),
			coordination,
		));
		if start_scheduler {
			scheduler.clone().start().await;
		}

		let state = AppState {
			jobs: jobs.clone(),
			executions: executions.clone(),
			history: history.clone(),
			scheduler: Arc::clone(&scheduler),
			pool: None,
			job_defaults: JobDefaults::default(),
		};

		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			axum::serve(listener, create_router(state)).await.unwrap();
		});

		Self {
			base_url: format!("http://{addr}"),
			client: reqwest::Client::new(),
			tenant: TenantId::new(),
			jobs,
			executions,
			history,
			scheduler,
		}
	}

	async fn post(&self, path: &str, body: Value) -> reqwest::Response {
		self
			.client
			.post(format!("{}{path}", self.base_url))
			.header("X-Tenant-ID", self.tenant.to_string())
			.json(&body)
			.send()
			.await
			.unwrap()
	}

	async fn post_empty(&self, path: &str) -> reqwest::Response {
		self
			.client
			.post(format!("{}{path}", self.base_url))
			.header("X-Tenant-ID", self.tenant.to_string())
			.send()
			.await
			.unwrap()
	}

	async fn get(&self, path: &str) -> reqwest::Response {
		self
			.client
			.get(format!("{}{path}", self.base_url))
			.header("X-Tenant-ID", self.tenant.to_string())
			.send()
			.await
			.unwrap()
	}

	async fn delete(&self, path: &str) -> reqwest::Response {
		self
			.client
			.delete(format!("{}{path}", self.base_url))
			.header("X-Tenant-ID", self.tenant.to_string())
			.send()
			.await
			.unwrap()
	}

	async fn create_job(&self, body: Value) -> Value {
		let response = self.post("/api/v1/jobs", body).await;
		assert_eq!(response.status(), 201);
		let envelope: Value = response.json().await.unwrap();
		assert_eq!(envelope["success"], true);
		envelope["data"].clone()
	}
}

fn interval_job(name: &str) -> Value {
	json!({
		"name": name,
		"type": "interval",
		"schedule": "3600",
		"endpoint": "https://example.com/hook",
	})
}

async fn spawn_target() -> SocketAddr {
	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(async move {
		let router = Router::new().route("/hook", post(|| async { "ok" }));
		axum::serve(listener, router).await.unwrap();
	});
	addr
}

#[tokio::test]
async fn create_and_fetch_job() {
	let app = TestApp::spawn(false).await;

	let job = app.create_job(interval_job("nightly-sync")).await;
	assert_eq!(job["status"], "active");
	assert_eq!(job["method"], "POST");
	assert_eq!(job["timeout_secs"], 30);
	assert!(job["next_run_at"].is_string());

	let id = job["id"].as_str().unwrap();
	let response = app.get(&format!("/api/v1/jobs/{id}")).await;
	assert_eq!(response.status(), 200);

	// A different tenant cannot see it.
	let response = app
		.client
		.get(format!("{}/api/v1/jobs/{id}", app.base_url))
		.header("X-Tenant-ID", TenantId::new().to_string())
		.send()
		.await
		.unwrap();
	assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn create_rejects_invalid_schedule() {
	let app = TestApp::spawn(false).await;

	let response = app
		.post(
			"/api/v1/jobs",
			json!({
				"name": "broken",
				"type": "cron",
				"schedule": "not a cron",
				"endpoint": "https://example.com/hook",
			}),
		)
		.await;
	assert_eq!(response.status(), 400);
	let envelope: Value = response.json().await.unwrap();
	assert_eq!(envelope["success"], false);
	assert_eq!(envelope["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn create_rejects_out_of_range_priority() {
	let app = TestApp::spawn(false).await;

	let mut body = interval_job("pushy");
	body["priority"] = json!(11);
	let response = app.post("/api/v1/jobs", body).await;
	assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn list_paginates_and_scopes_by_tenant() {
	let app = TestApp::spawn(false).await;

	for i in 0..3 {
		app.create_job(interval_job(&format!("job-{i}"))).await;
	}

	let response = app.get("/api/v1/jobs?page_size=2").await;
	assert_eq!(response.status(), 200);
	let envelope: Value = response.json().await.unwrap();
	assert_eq!(envelope["data"].as_array().unwrap().len(), 2);
	assert_eq!(envelope["meta"]["total_count"], 3);
	assert_eq!(envelope["meta"]["has_more"], true);

	// Another tenant sees nothing.
	let response = app
		.client
		.get(format!("{}/api/v1/jobs", app.base_url))
		.header("X-Tenant-ID", TenantId::new().to_string())
		.send()
		.await
		.unwrap();
	let envelope: Value = response.json().await.unwrap();
	assert_eq!(envelope["meta"]["total_count"], 0);
}

#[tokio::test]
async fn pause_and_resume_roundtrip() {
	let app = TestApp::spawn(false).await;
	let job = app.create_job(interval_job("pausable")).await;
	let id = job["id"].as_str().unwrap().to_string();

	let response = app.post_empty(&format!("/api/v1/jobs/{id}/pause")).await;
	assert_eq!(response.status(), 200);
	let envelope: Value = response.json().await.unwrap();
	assert_eq!(envelope["data"]["status"], "paused");

	let response = app.post_empty(&format!("/api/v1/jobs/{id}/resume")).await;
	assert_eq!(response.status(), 200);
	let envelope: Value = response.json().await.unwrap();
	assert_eq!(envelope["data"]["status"], "active");
	assert!(envelope["data"]["next_run_at"].is_string());
}

#[tokio::test]
async fn soft_delete_is_terminal() {
	let app = TestApp::spawn(false).await;
	let job = app.create_job(interval_job("doomed")).await;
	let id = job["id"].as_str().unwrap().to_string();

	let response = app.delete(&format!("/api/v1/jobs/{id}")).await;
	assert_eq!(response.status(), 204);

	// No transition out of deleted.
	let response = app.post_empty(&format!("/api/v1/jobs/{id}/resume")).await;
	assert_eq!(response.status(), 409);

	// Deleted jobs drop out of listings.
	let response = app.get("/api/v1/jobs").await;
	let envelope: Value = response.json().await.unwrap();
	assert_eq!(envelope["meta"]["total_count"], 0);
}

#[tokio::test]
async fn update_revalidates_schedule() {
	let app = TestApp::spawn(false).await;
	let job = app.create_job(interval_job("editable")).await;
	let id = job["id"].as_str().unwrap().to_string();

	let response = app
		.client
		.put(format!("{}/api/v1/jobs/{id}", app.base_url))
		.header("X-Tenant-ID", app.tenant.to_string())
		.json(&json!({"schedule": "bogus"}))
		.send()
		.await
		.unwrap();
	assert_eq!(response.status(), 400);

	let response = app
		.client
		.put(format!("{}/api/v1/jobs/{id}", app.base_url))
		.header("X-Tenant-ID", app.tenant.to_string())
		.json(&json!({"schedule": "120", "priority": 9}))
		.send()
		.await
		.unwrap();
	assert_eq!(response.status(), 200);
	let envelope: Value = response.json().await.unwrap();
	assert_eq!(envelope["data"]["schedule"], "120");
	assert_eq!(envelope["data"]["priority"], 9);
}

#[tokio::test]
async fn trigger_fires_the_callback() {
	let target = spawn_target().await;
	let app = TestApp::spawn(true).await;

	let mut body = interval_job("manual");
	body["endpoint"] = json!(format!("http://{target}/hook"));
	let job = app.create_job(body).await;
	let id = job["id"].as_str().unwrap().to_string();

	let response = app.post_empty(&format!("/api/v1/jobs/{id}/trigger")).await;
	assert_eq!(response.status(), 201);
	let envelope: Value = response.json().await.unwrap();
	let execution_id = envelope["data"]["id"].as_str().unwrap().to_string();

	// Poll until the worker lands the execution.
	let mut status = String::new();
	for _ in 0..40 {
		tokio::time::sleep(Duration::from_millis(100)).await;
		let response = app.get(&format!("/api/v1/executions/{execution_id}")).await;
		let envelope: Value = response.json().await.unwrap();
		status = envelope["data"]["status"].as_str().unwrap().to_string();
		if status == "completed" {
			break;
		}
	}
	assert_eq!(status, "completed");

	app.scheduler.stop().await;
}

#[tokio::test]
async fn trigger_rejected_for_disabled_job() {
	let app = TestApp::spawn(true).await;
	let job = app.create_job(interval_job("disabled")).await;
	let id: chime_core::JobId = job["id"].as_str().unwrap().parse().unwrap();

	app
		.jobs
		.update_status(id, chime_core::JobStatus::Disabled)
		.await
		.unwrap();

	let response = app.post_empty(&format!("/api/v1/jobs/{id}/trigger")).await;
	assert_eq!(response.status(), 409);

	app.scheduler.stop().await;
}

#[tokio::test]
async fn cancel_pending_execution() {
	let app = TestApp::spawn(false).await;
	let job = app.create_job(interval_job("cancellable")).await;
	let job_id: chime_core::JobId = job["id"].as_str().unwrap().parse().unwrap();

	let execution =
		chime_core::JobExecution::pending(job_id, app.tenant, chrono::Utc::now());
	app.executions.create(&execution).await.unwrap();

	let response = app
		.post_empty(&format!("/api/v1/executions/{}/cancel", execution.id))
		.await;
	assert_eq!(response.status(), 200);
	let envelope: Value = response.json().await.unwrap();
	assert_eq!(envelope["data"]["status"], "cancelled");

	// Terminal: a second cancel conflicts.
	let response = app
		.post_empty(&format!("/api/v1/executions/{}/cancel", execution.id))
		.await;
	assert_eq!(response.status(), 409);
}

#[tokio::test]
async fn history_endpoints() {
	let app = TestApp::spawn(false).await;
	let job = app.create_job(interval_job("historied")).await;
	let job_id: chime_core::JobId = job["id"].as_str().unwrap().parse().unwrap();
	let id = job["id"].as_str().unwrap();

	let today = chrono::Utc::now().date_naive();
	app
		.history
		.increment_success(job_id, app.tenant, today, 120)
		.await
		.unwrap();
	app
		.history
		.increment_failure(job_id, app.tenant, today)
		.await
		.unwrap();

	let response = app.get(&format!("/api/v1/jobs/{id}/history")).await;
	assert_eq!(response.status(), 200);
	let envelope: Value = response.json().await.unwrap();
	let rows = envelope["data"].as_array().unwrap();
	assert_eq!(rows.len(), 1);
	assert_eq!(rows[0]["success_count"], 1);
	assert_eq!(rows[0]["failure_count"], 1);

	let response = app
		.get(&format!(
			"/api/v1/history/stats?start_date={today}&end_date={today}"
		))
		.await;
	assert_eq!(response.status(), 200);
	let envelope: Value = response.json().await.unwrap();
	assert_eq!(envelope["data"]["total_success"], 1);
	assert_eq!(envelope["data"]["total_failure"], 1);
	assert_eq!(envelope["data"]["success_rate"], 50.0);

	// The date range is mandatory for aggregation.
	let response = app.get("/api/v1/history/stats").await;
	assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn readiness_tracks_scheduler_state() {
	let app = TestApp::spawn(false).await;

	let response = app.get("/ready").await;
	assert_eq!(response.status(), 503);

	let response = app.get("/live").await;
	assert_eq!(response.status(), 200);

	app.scheduler.clone().start().await;
	let response = app.get("/ready").await;
	assert_eq!(response.status(), 200);

	let response = app.get("/health").await;
	assert_eq!(response.status(), 200);

	app.scheduler.stop().await;
	let response = app.get("/ready").await;
	assert_eq!(response.status(), 503);
}

#[tokio::test]
async fn executions_by_job_enforces_tenant() {
	let app = TestApp::spawn(false).await;
	let job = app.create_job(interval_job("scoped")).await;
	let id = job["id"].as_str().unwrap();

	let response = app.get(&format!("/api/v1/jobs/{id}/executions")).await;
	assert_eq!(response.status(), 200);

	let response = app
		.client
		.get(format!("{}/api/v1/jobs/{id}/executions", app.base_url))
		.header("X-Tenant-ID", TenantId::new().to_string())
		.send()
		.await
		.unwrap();
	assert_eq!(response.status(), 404);
}
