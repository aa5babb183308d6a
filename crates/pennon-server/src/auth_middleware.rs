// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use axum::{
	extract::{Request, State},
	middleware::Next,
	response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::api::AppState;
use crate::api_response::unauthorized;

/// Shared-secret gate for the control plane. Accepts `X-API-Key: <secret>`
/// or `Authorization: Bearer <secret>`, compared in constant time.
pub async fn admin_auth_middleware(
	State(state): State<AppState>,
	request: Request,
	next: Next,
) -> Response {
	let Some(expected) = state.api_key.as_deref() else {
		warn!("admin auth failed: no API key configured");
		return unauthorized("no API key configured").into_response();
	};

	let headers = request.headers();
	let provided = headers
		.get("x-api-key")
		.and_then(|h| h.to_str().ok())
		.or_else(|| {
			headers
				.get("authorization")
				.and_then(|h| h.to_str().ok())
				.and_then(|v| v.strip_prefix("Bearer "))
				.map(|v| v.trim())
		});

	let Some(token) = provided else {
		warn!("admin auth failed: missing credential header");
		return unauthorized("missing credential").into_response();
	};

	let expected_bytes = expected.as_bytes();
	let token_bytes = token.as_bytes();

	if expected_bytes.len() != token_bytes.len() {
		warn!("admin auth failed: credential length mismatch");
		return unauthorized("invalid credential").into_response();
	}

	if expected_bytes.ct_eq(token_bytes).into() {
		next.run(request).await
	} else {
		warn!("admin auth failed: invalid credential");
		unauthorized("invalid credential").into_response()
	}
}
