// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the chime domain model.

use thiserror::Error;

/// Result type for domain operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while validating or evaluating the domain model.
#[derive(Debug, Error)]
pub enum CoreError {
	#[error("invalid cron expression: {0}")]
	InvalidCronExpression(String),

	#[error("invalid interval (seconds as integer >= 1): {0}")]
	InvalidInterval(String),

	#[error("invalid timezone: {0}")]
	InvalidTimezone(String),

	#[error("invalid fire time (RFC 3339 instant): {0}")]
	InvalidRunAt(String),

	#[error("unknown job type: {0}")]
	UnknownJobType(String),

	#[error("validation failed: {0}")]
	Validation(String),
}
