// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Data-plane HTTP handlers.
//!
//! `/evaluate` and `/evaluate/batch` never answer 5xx for a well-formed
//! body; upstream faults surface as the caller's default value with a
//! diagnostic reason. The only non-200 answers are 400 (malformed request)
//! and 408 (service deadline).

use axum::{
	extract::{Path, Query, State},
	http::{header, HeaderMap, StatusCode},
	response::IntoResponse,
	Json,
};
use serde::{Deserialize, Serialize};

use pennon_server_flags::{EvaluateRequest, EVALUATION_DEADLINE, MAX_BATCH_SIZE};

use crate::api::AppState;
use crate::api_response::{bad_request, from_error, timeout};

#[derive(Debug, Deserialize)]
pub struct EnvironmentQuery {
	#[serde(default)]
	pub environment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse<T> {
	pub results: Vec<T>,
}

fn has_flag_key(body: &serde_json::Value) -> bool {
	body
		.get("flag_key")
		.and_then(|v| v.as_str())
		.map(|s| !s.is_empty())
		.unwrap_or(false)
}

#[utoipa::path(
	post,
	path = "/evaluate",
	responses(
		(status = 200, description = "Evaluation result, possibly degraded to the caller default"),
		(status = 400, description = "Missing flag_key or malformed body"),
		(status = 408, description = "Service deadline exceeded")
	),
	tag = "evaluation"
)]
#[tracing::instrument(skip(state, body))]
pub async fn evaluate(
	State(state): State<AppState>,
	Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
	if !has_flag_key(&body) {
		return bad_request("missing_flag_key", "flag_key is required").into_response();
	}

	let request: EvaluateRequest = match serde_json::from_value(body) {
		Ok(request) => request,
		Err(e) => return bad_request("invalid_request", e.to_string()).into_response(),
	};

	match tokio::time::timeout(EVALUATION_DEADLINE, state.evaluation.evaluate(&request)).await {
		Ok(response) => (StatusCode::OK, Json(response)).into_response(),
		Err(_) => timeout("evaluation deadline exceeded").into_response(),
	}
}

#[derive(Debug, Deserialize)]
pub struct BatchBody {
	#[serde(default)]
	pub requests: Vec<serde_json::Value>,
}

#[utoipa::path(
	post,
	path = "/evaluate/batch",
	responses(
		(status = 200, description = "Per-element evaluation results"),
		(status = 400, description = "More than 50 items, or an element without flag_key"),
		(status = 408, description = "Service deadline exceeded")
	),
	tag = "evaluation"
)]
#[tracing::instrument(skip(state, body), fields(count = body.requests.len()))]
pub async fn evaluate_batch(
	State(state): State<AppState>,
	Json(body): Json<BatchBody>,
) -> impl IntoResponse {
	// Validated up front: an oversized or malformed batch evaluates nothing.
	if body.requests.len() > MAX_BATCH_SIZE {
		return bad_request(
			"batch_too_large",
			format!("batch size {} exceeds {MAX_BATCH_SIZE}", body.requests.len()),
		)
		.into_response();
	}

	let mut requests = Vec::with_capacity(body.requests.len());
	for element in body.requests {
		if !has_flag_key(&element) {
			return bad_request("missing_flag_key", "every request needs a flag_key").into_response();
		}
		match serde_json::from_value::<EvaluateRequest>(element) {
			Ok(request) => requests.push(request),
			Err(e) => return bad_request("invalid_request", e.to_string()).into_response(),
		}
	}

	match tokio::time::timeout(
		EVALUATION_DEADLINE,
		state.evaluation.evaluate_batch(&requests),
	)
	.await
	{
		Ok(results) => (StatusCode::OK, Json(BatchResponse { results })).into_response(),
		Err(_) => timeout("evaluation deadline exceeded").into_response(),
	}
}

#[utoipa::path(
	get,
	path = "/stats",
	responses((status = 200, description = "Cached and total flag counts")),
	tag = "evaluation"
)]
pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
	match state.evaluation.stats().await {
		Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
		Err(e) => from_error(&e).into_response(),
	}
}

#[derive(Debug, Serialize)]
pub struct CacheListing {
	pub keys: Vec<String>,
	pub count: usize,
}

#[utoipa::path(
	get,
	path = "/cache",
	responses((status = 200, description = "Cached snapshot keys")),
	tag = "evaluation"
)]
pub async fn list_cache(State(state): State<AppState>) -> impl IntoResponse {
	match state.evaluation.list_cached().await {
		Ok(keys) => {
			let count = keys.len();
			(StatusCode::OK, Json(CacheListing { keys, count })).into_response()
		}
		Err(e) => from_error(&e).into_response(),
	}
}

#[utoipa::path(
	delete,
	path = "/cache/{flag_key}",
	params(("flag_key" = String, Path, description = "Flag key")),
	responses((status = 200, description = "Keys invalidated")),
	tag = "evaluation"
)]
#[tracing::instrument(skip(state), fields(flag_key = %flag_key))]
pub async fn invalidate_cache(
	State(state): State<AppState>,
	Path(flag_key): Path<String>,
	Query(query): Query<EnvironmentQuery>,
) -> impl IntoResponse {
	match state
		.evaluation
		.invalidate(&flag_key, query.environment.as_deref())
		.await
	{
		Ok(invalidated) => (
			StatusCode::OK,
			Json(serde_json::json!({"invalidated": invalidated})),
		)
			.into_response(),
		Err(e) => from_error(&e).into_response(),
	}
}

#[utoipa::path(
	get,
	path = "/sdk/config",
	params(("environment" = Option<String>, Query, description = "Environment name")),
	responses(
		(status = 200, description = "Polling descriptor and the environment's snapshot set"),
		(status = 304, description = "ETag still current")
	),
	tag = "evaluation"
)]
#[tracing::instrument(skip(state, headers))]
pub async fn sdk_config(
	State(state): State<AppState>,
	Query(query): Query<EnvironmentQuery>,
	headers: HeaderMap,
) -> impl IntoResponse {
	let environment = query.environment.as_deref().unwrap_or("production");
	let if_none_match = headers
		.get(header::IF_NONE_MATCH)
		.and_then(|h| h.to_str().ok())
		.map(|v| v.trim_matches('"').to_string());

	match state
		.evaluation
		.sdk_config(environment, if_none_match.as_deref())
		.await
	{
		Ok(Some(config)) => {
			let etag = config.etag.clone();
			(
				StatusCode::OK,
				[(header::ETAG, format!("\"{etag}\""))],
				Json(config),
			)
				.into_response()
		}
		Ok(None) => {
			let etag = if_none_match.unwrap_or_default();
			(
				StatusCode::NOT_MODIFIED,
				[(header::ETAG, format!("\"{etag}\""))],
			)
				.into_response()
		}
		Err(e) => from_error(&e).into_response(),
	}
}
