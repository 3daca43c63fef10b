// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Server error type and its HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use chime_scheduler::SchedulerError;

use crate::response;

#[derive(Debug, Error)]
pub enum ServerError {
	#[error("{0}")]
	Validation(String),

	#[error("{0}")]
	NotFound(String),

	#[error("{0}")]
	Conflict(String),

	#[error(transparent)]
	Db(#[from] chime_db::DbError),

	#[error(transparent)]
	Scheduler(#[from] SchedulerError),
}

impl From<chime_core::CoreError> for ServerError {
	fn from(e: chime_core::CoreError) -> Self {
		Self::Validation(e.to_string())
	}
}

impl IntoResponse for ServerError {
	fn into_response(self) -> Response {
		match self {
			Self::Validation(message) => {
				response::error(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
			}
			Self::NotFound(message) => {
				response::error(StatusCode::NOT_FOUND, "NOT_FOUND", message)
			}
			Self::Conflict(message) => {
				response::error(StatusCode::CONFLICT, "CONFLICT", message)
			}
			Self::Scheduler(SchedulerError::JobNotFound(id)) => response::error(
				StatusCode::NOT_FOUND,
				"NOT_FOUND",
				format!("job not found: {id}"),
			),
			Self::Scheduler(SchedulerError::NotTriggerable(status)) => response::error(
				StatusCode::CONFLICT,
				"CONFLICT",
				format!("job cannot be triggered in status: {status}"),
			),
			Self::Db(e) => {
				tracing::error!(error = %e, "persistence error");
				response::error(
					StatusCode::INTERNAL_SERVER_ERROR,
					"INTERNAL_ERROR",
					"internal error",
				)
			}
			Self::Scheduler(e) => {
				tracing::error!(error = %e, "scheduler error");
				response::error(
					StatusCode::INTERNAL_SERVER_ERROR,
					"INTERNAL_ERROR",
					"internal error",
				)
			}
		}
	}
}
