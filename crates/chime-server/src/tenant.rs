// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Tenant identity extraction.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::convert::Infallible;

use chime_core::TenantId;

pub const TENANT_HEADER: &str = "x-tenant-id";

/// Tenant identity from the `X-Tenant-ID` header. A missing or unparseable
/// header yields the nil tenant rather than a rejection.
#[derive(Debug, Clone, Copy)]
pub struct Tenant(pub TenantId);

impl<S> FromRequestParts<S> for Tenant
where
	S: Send + Sync,
{
	type Rejection = Infallible;

	async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
		let tenant = parts
			.headers
			.get(TENANT_HEADER)
			.and_then(|value| value.to_str().ok())
			.and_then(|value| value.parse().ok())
			.unwrap_or_else(TenantId::nil);
		Ok(Tenant(tenant))
	}
}
