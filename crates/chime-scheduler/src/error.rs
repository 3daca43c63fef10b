// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the scheduling engine.

use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Errors that can occur inside the scheduling engine. None of these are
/// fatal to the process: dispatch skips the tick, workers log and move on.
#[derive(Debug, Error)]
pub enum SchedulerError {
	#[error("persistence error: {0}")]
	Db(#[from] chime_db::DbError),

	#[error("domain error: {0}")]
	Core(#[from] chime_core::CoreError),

	#[error("coordination store error: {0}")]
	Coordination(#[from] redis::RedisError),

	#[error("job not found: {0}")]
	JobNotFound(String),

	#[error("job cannot be triggered in status: {0}")]
	NotTriggerable(String),

	#[error("internal: {0}")]
	Internal(String),
}
