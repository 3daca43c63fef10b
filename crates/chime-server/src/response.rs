// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Standard API response envelope and helpers.
//!
//! Every endpoint answers `{success, data?, error?, meta?}`; list endpoints
//! carry pagination in `meta`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// The response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
	pub success: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<T>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorInfo>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub meta: Option<Meta>,
}

/// Error details for failed requests.
#[derive(Debug, Serialize)]
pub struct ErrorInfo {
	pub code: String,
	pub message: String,
}

/// Pagination metadata for list responses.
#[derive(Debug, Serialize)]
pub struct Meta {
	pub page: u32,
	pub page_size: u32,
	pub total_count: i64,
	pub has_more: bool,
}

/// 200 with data.
pub fn ok<T: Serialize>(data: T) -> Response {
	(
		StatusCode::OK,
		Json(ApiResponse {
			success: true,
			data: Some(data),
			error: None,
			meta: None,
		}),
	)
		.into_response()
}

/// 200 with data and pagination metadata.
pub fn ok_with_meta<T: Serialize>(data: T, meta: Meta) -> Response {
	(
		StatusCode::OK,
		Json(ApiResponse {
			success: true,
			data: Some(data),
			error: None,
			meta: Some(meta),
		}),
	)
		.into_response()
}

/// 201 with the created resource.
pub fn created<T: Serialize>(data: T) -> Response {
	(
		StatusCode::CREATED,
		Json(ApiResponse {
			success: true,
			data: Some(data),
			error: None,
			meta: None,
		}),
	)
		.into_response()
}

/// 204 without a body.
pub fn no_content() -> Response {
	StatusCode::NO_CONTENT.into_response()
}

/// An error envelope with the given status.
pub fn error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
	(
		status,
		Json(ApiResponse::<()> {
			success: false,
			data: None,
			error: Some(ErrorInfo {
				code: code.to_string(),
				message: message.into(),
			}),
			meta: None,
		}),
	)
		.into_response()
}
