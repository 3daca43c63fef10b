// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP executor: turns a job into exactly one outbound callback attempt.
//!
//! The executor never returns an error; every attempt produces an
//! [`Outcome`] whose [`OutcomeKind`] drives the state machine. Response
//! bodies are read through a 1 MiB cap so a hostile callback cannot balloon
//! memory; truncation is silent.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use tracing::{instrument, warn};

use chime_core::Job;

/// Response bodies are truncated to this many bytes.
pub const MAX_RESPONSE_BYTES: usize = 1 << 20;

const USER_AGENT: &str = concat!("chime/", env!("CARGO_PKG_VERSION"));

/// Classification of one attempt's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
	/// HTTP status below 400.
	Success,
	/// Transport error, HTTP 5xx, or HTTP 429. Worth another attempt.
	Retryable,
	/// HTTP 4xx other than 429. Retrying would not help.
	Permanent,
	/// The per-attempt deadline elapsed. Retryable until attempts run out,
	/// but recorded with its own terminal status.
	TimedOut,
}

/// What one HTTP attempt produced.
#[derive(Debug, Clone)]
pub struct Outcome {
	/// HTTP status, or 0 when the transport failed before a response.
	pub status_code: i32,
	/// Response body, truncated to [`MAX_RESPONSE_BYTES`].
	pub body: String,
	pub headers: HashMap<String, String>,
	/// Wall clock from just before send to after the body read finished.
	pub duration_ms: i64,
	pub error: Option<String>,
	pub kind: OutcomeKind,
}

impl Outcome {
	pub fn is_success(&self) -> bool {
		self.kind == OutcomeKind::Success
	}
}

/// Fires HTTP callbacks for jobs.
pub struct HttpExecutor {
	client: Client,
}

impl HttpExecutor {
	/// `client_timeout` is the fallback deadline for requests that carry no
	/// per-job timeout; every job attempt overrides it with `job.timeout`.
	pub fn new(client_timeout: Duration) -> Self {
		let client = Client::builder()
			.user_agent(USER_AGENT)
			.timeout(client_timeout)
			.build()
			.expect("failed to build HTTP client");
		Self { client }
	}

	/// Execute one callback attempt for `job`.
	#[instrument(skip(self, job), fields(job_id = %job.id, endpoint = %job.endpoint))]
	pub async fn execute(&self, job: &Job) -> Outcome {
		let start = Instant::now();

		let method =
			Method::from_bytes(job.method.as_bytes()).unwrap_or(Method::POST);

		// Later entries replace earlier ones, so job headers can override
		// anything the scheduler sets. A malformed headers object never
		// fails the attempt.
		let mut header_map = HeaderMap::new();
		if let Ok(value) = HeaderValue::try_from(job.id.to_string()) {
			header_map.insert("x-scheduler-job-id", value);
		}
		if let Ok(value) = HeaderValue::try_from(job.tenant_id.to_string()) {
			header_map.insert("x-scheduler-tenant-id", value);
		}

		let payload = job.payload_bytes();
		if !payload.is_empty() {
			header_map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
		}

		if let Some(headers) = &job.headers {
			match serde_json::from_value::<HashMap<String, String>>(headers.clone()) {
				Ok(map) => {
					for (key, value) in map {
						match (
							HeaderName::try_from(key.as_str()),
							HeaderValue::try_from(value.as_str()),
						) {
							(Ok(name), Ok(value)) => {
								header_map.insert(name, value);
							}
							_ => warn!(job_id = %job.id, header = %key, "skipping invalid header"),
						}
					}
				}
				Err(e) => {
					warn!(job_id = %job.id, error = %e, "malformed headers JSON, ignoring")
				}
			}
		}

		let mut request = self
			.client
			.request(method, &job.endpoint)
			.timeout(Duration::from_secs(job.timeout_secs.max(1) as u64))
			.headers(header_map);
		if !payload.is_empty() {
			request = request.body(payload);
		}

		let mut response = match request.send().await {
			Ok(response) => response,
			Err(e) => return Self::transport_outcome(e, start),
		};

		let status = response.status();
		let headers: HashMap<String, String> = response
			.headers()
			.iter()
			.map(|(name, value)| {
				(
					name.to_string(),
					value.to_str().unwrap_or_default().to_string(),
				)
			})
			.collect();

		let mut body = Vec::new();
		loop {
			match response.chunk().await {
				Ok(Some(chunk)) => {
					let remaining = MAX_RESPONSE_BYTES - body.len();
					if chunk.len() >= remaining {
						body.extend_from_slice(&chunk[..remaining]);
						break;
					}
					body.extend_from_slice(&chunk);
				}
				Ok(None) => break,
				Err(e) => return Self::transport_outcome(e, start),
			}
		}

		let duration_ms = start.elapsed().as_millis() as i64;
		let body = String::from_utf8_lossy(&body).into_owned();

		let (kind, error) = Self::classify(status);

		Outcome {
			status_code: status.as_u16() as i32,
			body,
			headers,
			duration_ms,
			error,
			kind,
		}
	}

	fn classify(status: StatusCode) -> (OutcomeKind, Option<String>) {
		if status.as_u16() >= 500 || status == StatusCode::TOO_MANY_REQUESTS {
			(OutcomeKind::Retryable, Some(http_error(status)))
		} else if status.is_client_error() {
			(OutcomeKind::Permanent, Some(http_error(status)))
		} else {
			(OutcomeKind::Success, None)
		}
	}

	fn transport_outcome(e: reqwest::Error, start: Instant) -> Outcome {
		let kind = if e.is_timeout() {
			OutcomeKind::TimedOut
		} else {
			OutcomeKind::Retryable
		};
		Outcome {
			status_code: 0,
			body: String::new(),
			headers: HashMap::new(),
			duration_ms: start.elapsed().as_millis() as i64,
			error: Some(e.to_string()),
			kind,
		}
	}
}

fn http_error(status: StatusCode) -> String {
	format!(
		"HTTP {}: {}",
		status.as_u16(),
		status.canonical_reason().unwrap_or("Unknown")
	)
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::extract::Request;
	use axum::http::StatusCode as AxumStatus;
	use axum::routing::{any, get, post};
	use axum::{Json, Router};
	use chime_core::{CreateJobRequest, JobType, TenantId};
	use std::net::SocketAddr;

	async fn spawn_server(router: Router) -> SocketAddr {
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			axum::serve(listener, router).await.unwrap();
		});
		addr
	}

	fn job_for(endpoint: String) -> chime_core::Job {
		CreateJobRequest {
			name: "executor-test".to_string(),
			description: None,
			job_type: JobType::Interval,
			schedule: "60".to_string(),
			timezone: None,
			endpoint,
			method: None,
			headers: None,
			payload: None,
			timeout: Some(2),
			max_retries: None,
			retry_delay: None,
			priority: None,
			tags: None,
			metadata: None,
		}
		.into_job(TenantId::nil(), chrono::Utc::now())
	}

	#[tokio::test]
	async fn success_below_400() {
		let addr = spawn_server(Router::new().route("/hook", post(|| async { "ok" }))).await;
		let executor = HttpExecutor::new(Duration::from_secs(30));
		let job = job_for(format!("http://{addr}/hook"));

		let outcome = executor.execute(&job).await;
		assert_eq!(outcome.kind, OutcomeKind::Success);
		assert_eq!(outcome.status_code, 200);
		assert_eq!(outcome.body, "ok");
		assert!(outcome.error.is_none());
		assert!(outcome.duration_ms >= 0);
	}

	#[tokio::test]
	async fn client_error_is_permanent() {
		let addr = spawn_server(Router::new().route(
			"/hook",
			post(|| async { AxumStatus::NOT_FOUND }),
		))
		.await;
		let executor = HttpExecutor::new(Duration::from_secs(30));
		let job = job_for(format!("http://{addr}/hook"));

		let outcome = executor.execute(&job).await;
		assert_eq!(outcome.kind, OutcomeKind::Permanent);
		assert_eq!(outcome.status_code, 404);
		assert_eq!(outcome.error.as_deref(), Some("HTTP 404: Not Found"));
	}

	#[tokio::test]
	async fn server_error_and_rate_limit_are_retryable() {
		let addr = spawn_server(
			Router::new()
				.route("/unavailable", post(|| async { AxumStatus::SERVICE_UNAVAILABLE }))
				.route("/throttled", post(|| async { AxumStatus::TOO_MANY_REQUESTS })),
		)
		.await;
		let executor = HttpExecutor::new(Duration::from_secs(30));

		let outcome = executor.execute(&job_for(format!("http://{addr}/unavailable"))).await;
		assert_eq!(outcome.kind, OutcomeKind::Retryable);
		assert_eq!(outcome.status_code, 503);

		let outcome = executor.execute(&job_for(format!("http://{addr}/throttled"))).await;
		assert_eq!(outcome.kind, OutcomeKind::Retryable);
		assert_eq!(outcome.status_code, 429);
	}

	#[tokio::test]
	async fn connection_refused_is_retryable_transport_error() {
		let executor = HttpExecutor::new(Duration::from_secs(30));
		// Port 9 (discard) is almost certainly closed.
		let job = job_for("http://127.0.0.1:9/hook".to_string());

		let outcome = executor.execute(&job).await;
		assert_eq!(outcome.kind, OutcomeKind::Retryable);
		assert_eq!(outcome.status_code, 0);
		assert!(outcome.error.is_some());
	}

	#[tokio::test]
	async fn deadline_elapsed_is_timeout() {
		let addr = spawn_server(Router::new().route(
			"/slow",
			post(|| async {
				tokio::time::sleep(Duration::from_secs(10)).await;
				"late"
			}),
		))
		.await;
		let executor = HttpExecutor::new(Duration::from_secs(30));
		let mut job = job_for(format!("http://{addr}/slow"));
		job.timeout_secs = 1;

		let started = Instant::now();
		let outcome = executor.execute(&job).await;
		assert_eq!(outcome.kind, OutcomeKind::TimedOut);
		assert_eq!(outcome.status_code, 0);
		assert!(started.elapsed() < Duration::from_secs(5));
	}

	#[tokio::test]
	async fn response_body_is_capped() {
		let addr = spawn_server(Router::new().route(
			"/big",
			post(|| async { "x".repeat(3 * MAX_RESPONSE_BYTES) }),
		))
		.await;
		let executor = HttpExecutor::new(Duration::from_secs(30));
		let job = job_for(format!("http://{addr}/big"));

		let outcome = executor.execute(&job).await;
		assert_eq!(outcome.kind, OutcomeKind::Success);
		assert_eq!(outcome.body.len(), MAX_RESPONSE_BYTES);
	}

	#[tokio::test]
	async fn headers_are_applied_in_order() {
		async fn echo_headers(request: Request) -> Json<serde_json::Value> {
			let map: serde_json::Map<String, serde_json::Value> = request
				.headers()
				.iter()
				.map(|(name, value)| {
					(
						name.to_string(),
						serde_json::Value::String(value.to_str().unwrap_or_default().to_string()),
					)
				})
				.collect();
			Json(serde_json::Value::Object(map))
		}

		let addr = spawn_server(Router::new().route("/echo", any(echo_headers))).await;
		let executor = HttpExecutor::new(Duration::from_secs(30));
		let mut job = job_for(format!("http://{addr}/echo"));
		job.payload = Some(serde_json::json!({"hello": "world"}));
		job.headers = Some(serde_json::json!({
			"X-Custom": "yes",
			"Content-Type": "application/vnd.custom+json"
		}));

		let outcome = executor.execute(&job).await;
		assert_eq!(outcome.kind, OutcomeKind::Success);

		let echoed: serde_json::Value = serde_json::from_str(&outcome.body).unwrap();
		assert_eq!(echoed["user-agent"], USER_AGENT);
		assert_eq!(echoed["x-scheduler-job-id"], job.id.to_string());
		assert_eq!(echoed["x-scheduler-tenant-id"], job.tenant_id.to_string());
		assert_eq!(echoed["x-custom"], "yes");
		// The job's own header wins over the implicit content type.
		assert_eq!(echoed["content-type"], "application/vnd.custom+json");
	}

	#[tokio::test]
	async fn malformed_headers_json_is_ignored() {
		let addr = spawn_server(Router::new().route("/hook", post(|| async { "ok" }))).await;
		let executor = HttpExecutor::new(Duration::from_secs(30));
		let mut job = job_for(format!("http://{addr}/hook"));
		// An array is not a header map; the attempt still goes out.
		job.headers = Some(serde_json::json!(["not", "a", "map"]));

		let outcome = executor.execute(&job).await;
		assert_eq!(outcome.kind, OutcomeKind::Success);
	}

	#[tokio::test]
	async fn get_method_is_respected() {
		let addr = spawn_server(Router::new().route("/hook", get(|| async { "got" }))).await;
		let executor = HttpExecutor::new(Duration::from_secs(30));
		let mut job = job_for(format!("http://{addr}/hook"));
		job.method = "GET".to_string();

		let outcome = executor.execute(&job).await;
		assert_eq!(outcome.kind, OutcomeKind::Success);
		assert_eq!(outcome.body, "got");
	}
}
