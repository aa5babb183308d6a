// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Control-plane HTTP handlers.
//!
//! Every mutation runs the same pipeline: validate, run the store
//! transaction, invalidate the config cache for every (flag, env) touched,
//! record metrics, respond. The response is not sent until invalidation
//! returns, and invalidation failure fails the request - a mutation must
//! never claim success while readers could still serve the old snapshot
//! from cache.

use axum::{
	extract::{Path, Query, State},
	http::{HeaderMap, StatusCode},
	response::{IntoResponse, Response},
	Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use pennon_flags_core::Flag;
use pennon_server_flags::{CreateFlagRequest, FlagConfigPatch, FlagPatch};

use crate::api::AppState;
use crate::api_response::{bad_request, from_error, not_found, service_unavailable};

/// Actor recorded in audit entries; the admin credential is shared, so the
/// caller identifies itself via header.
fn actor(headers: &HeaderMap) -> String {
	headers
		.get("x-actor")
		.and_then(|h| h.to_str().ok())
		.filter(|s| !s.is_empty())
		.unwrap_or("admin")
		.to_string()
}

/// Fail-closed cache invalidation: an error here turns the whole mutation
/// into a 503 so the client retries instead of trusting stale reads.
async fn invalidate_or_fail(
	state: &AppState,
	flag_key: &str,
	environment: Option<&str>,
) -> Result<(), Response> {
	if let Err(e) = state.evaluation.invalidate(flag_key, environment).await {
		tracing::error!(flag_key, error = %e, "cache invalidation failed after commit");
		return Err(
			service_unavailable("cache invalidation failed; retry the mutation").into_response(),
		);
	}
	Ok(())
}

async fn known_environment(state: &AppState, environment: &str) -> Result<bool, Response> {
	match state.repo.list_environments().await {
		Ok(environments) => Ok(environments.iter().any(|e| e.name == environment)),
		Err(e) => Err(from_error(&e).into_response()),
	}
}

// ============================================================================
// Flags
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListFlagsQuery {
	#[serde(default = "default_page")]
	pub page: u32,
	#[serde(default = "default_per_page")]
	pub per_page: u32,
	#[serde(default = "default_active_only")]
	pub active_only: bool,
}

fn default_page() -> u32 {
	1
}

fn default_per_page() -> u32 {
	20
}

fn default_active_only() -> bool {
	true
}

#[derive(Debug, Serialize)]
pub struct ListFlagsResponse {
	pub flags: Vec<Flag>,
	pub total: u64,
	pub page: u32,
	pub per_page: u32,
}

#[utoipa::path(
	get,
	path = "/api/flags",
	responses(
		(status = 200, description = "Paginated flag listing"),
		(status = 401, description = "Missing or invalid credential")
	),
	tag = "admin-flags"
)]
#[instrument(skip(state))]
pub async fn list_flags(
	State(state): State<AppState>,
	Query(query): Query<ListFlagsQuery>,
) -> impl IntoResponse {
	match state
		.repo
		.list_flags(query.page, query.per_page, query.active_only)
		.await
	{
		Ok((flags, total)) => (
			StatusCode::OK,
			Json(ListFlagsResponse {
				flags,
				total,
				page: query.page.max(1),
				per_page: query.per_page.clamp(1, pennon_server_flags::MAX_PAGE_SIZE),
			}),
		)
			.into_response(),
		Err(e) => from_error(&e).into_response(),
	}
}

#[utoipa::path(
	post,
	path = "/api/flags",
	responses(
		(status = 201, description = "Flag created with variants and per-environment configs"),
		(status = 400, description = "Invalid flag key"),
		(status = 401, description = "Missing or invalid credential"),
		(status = 409, description = "Flag key already exists")
	),
	tag = "admin-flags"
)]
#[instrument(skip(state, headers, payload), fields(flag_key = %payload.key))]
pub async fn create_flag(
	State(state): State<AppState>,
	headers: HeaderMap,
	Json(payload): Json<CreateFlagRequest>,
) -> Response {
	if !Flag::validate_key(&payload.key) {
		return bad_request("invalid_key", "flag keys match [a-z0-9_]+").into_response();
	}

	let flag = match state.repo.create_flag(&payload, &actor(&headers)).await {
		Ok(flag) => flag,
		Err(e) => return from_error(&e).into_response(),
	};

	if let Err(response) = invalidate_or_fail(&state, &flag.key, None).await {
		return response;
	}
	state.metrics.record_config_change("create");

	(StatusCode::CREATED, Json(flag)).into_response()
}

#[utoipa::path(
	get,
	path = "/api/flags/{key}",
	params(("key" = String, Path, description = "Flag key")),
	responses(
		(status = 200, description = "Flag"),
		(status = 404, description = "No active flag with this key")
	),
	tag = "admin-flags"
)]
#[instrument(skip(state), fields(flag_key = %key))]
pub async fn get_flag(State(state): State<AppState>, Path(key): Path<String>) -> Response {
	match state.repo.get_flag(&key).await {
		Ok(Some(flag)) => (StatusCode::OK, Json(flag)).into_response(),
		Ok(None) => not_found(format!("flag not found: {key}")).into_response(),
		Err(e) => from_error(&e).into_response(),
	}
}

#[utoipa::path(
	put,
	path = "/api/flags/{key}",
	params(("key" = String, Path, description = "Flag key")),
	responses(
		(status = 200, description = "Updated flag"),
		(status = 404, description = "No active flag with this key")
	),
	tag = "admin-flags"
)]
#[instrument(skip(state, headers, payload), fields(flag_key = %key))]
pub async fn update_flag(
	State(state): State<AppState>,
	Path(key): Path<String>,
	headers: HeaderMap,
	Json(payload): Json<FlagPatch>,
) -> Response {
	let flag = match state.repo.update_flag(&key, &payload, &actor(&headers)).await {
		Ok(flag) => flag,
		Err(e) => return from_error(&e).into_response(),
	};

	// Snapshots embed flag metadata, so every environment's key is stale.
	if let Err(response) = invalidate_or_fail(&state, &key, None).await {
		return response;
	}
	state.metrics.record_config_change("update");

	(StatusCode::OK, Json(flag)).into_response()
}

#[utoipa::path(
	delete,
	path = "/api/flags/{key}",
	params(("key" = String, Path, description = "Flag key")),
	responses(
		(status = 200, description = "Flag soft-deleted"),
		(status = 404, description = "No active flag with this key")
	),
	tag = "admin-flags"
)]
#[instrument(skip(state, headers), fields(flag_key = %key))]
pub async fn delete_flag(
	State(state): State<AppState>,
	Path(key): Path<String>,
	headers: HeaderMap,
) -> Response {
	match state.repo.delete_flag(&key, &actor(&headers)).await {
		Ok(true) => {}
		Ok(false) => return not_found(format!("flag not found: {key}")).into_response(),
		Err(e) => return from_error(&e).into_response(),
	}

	if let Err(response) = invalidate_or_fail(&state, &key, None).await {
		return response;
	}
	state.metrics.record_config_change("delete");

	(StatusCode::OK, Json(json!({"deleted": true, "flag_key": key}))).into_response()
}

// ============================================================================
// Per-environment configuration
// ============================================================================

#[utoipa::path(
	put,
	path = "/api/flags/{key}/environments/{env}",
	params(
		("key" = String, Path, description = "Flag key"),
		("env" = String, Path, description = "Environment name")
	),
	responses(
		(status = 200, description = "Updated config"),
		(status = 400, description = "Unknown environment"),
		(status = 404, description = "No config for this (flag, environment) pair")
	),
	tag = "admin-flags"
)]
#[instrument(skip(state, headers, payload), fields(flag_key = %key, environment = %env))]
pub async fn update_flag_config(
	State(state): State<AppState>,
	Path((key, env)): Path<(String, String)>,
	headers: HeaderMap,
	Json(payload): Json<FlagConfigPatch>,
) -> Response {
	match known_environment(&state, &env).await {
		Ok(true) => {}
		Ok(false) => {
			return bad_request("unknown_environment", format!("unknown environment: {env}"))
				.into_response();
		}
		Err(response) => return response,
	}

	let config = match state
		.repo
		.update_flag_config(&key, &env, &payload, &actor(&headers))
		.await
	{
		Ok(config) => config,
		Err(e) => return from_error(&e).into_response(),
	};

	if let Err(response) = invalidate_or_fail(&state, &key, Some(&env)).await {
		return response;
	}
	state.metrics.record_config_change("update_config");

	(StatusCode::OK, Json(config)).into_response()
}

#[utoipa::path(
	patch,
	path = "/api/flags/{key}/environments/{env}/toggle",
	params(
		("key" = String, Path, description = "Flag key"),
		("env" = String, Path, description = "Environment name")
	),
	responses(
		(status = 200, description = "Toggled config"),
		(status = 400, description = "Unknown environment or non-boolean enabled"),
		(status = 404, description = "No config for this (flag, environment) pair")
	),
	tag = "admin-flags"
)]
#[instrument(skip(state, headers, payload), fields(flag_key = %key, environment = %env))]
pub async fn toggle_flag(
	State(state): State<AppState>,
	Path((key, env)): Path<(String, String)>,
	headers: HeaderMap,
	Json(payload): Json<serde_json::Value>,
) -> Response {
	let Some(enabled) = payload.get("enabled").and_then(|v| v.as_bool()) else {
		return bad_request("invalid_toggle", "enabled must be a boolean").into_response();
	};

	match known_environment(&state, &env).await {
		Ok(true) => {}
		Ok(false) => {
			return bad_request("unknown_environment", format!("unknown environment: {env}"))
				.into_response();
		}
		Err(response) => return response,
	}

	let config = match state
		.repo
		.toggle_flag(&key, &env, enabled, &actor(&headers))
		.await
	{
		Ok(config) => config,
		Err(e) => return from_error(&e).into_response(),
	};

	if let Err(response) = invalidate_or_fail(&state, &key, Some(&env)).await {
		return response;
	}
	state.metrics.record_config_change("toggle");

	(StatusCode::OK, Json(config)).into_response()
}

// ============================================================================
// Kill switch
// ============================================================================

#[utoipa::path(
	post,
	path = "/api/flags/{key}/kill-switch",
	params(("key" = String, Path, description = "Flag key")),
	responses(
		(status = 200, description = "Flag disabled in every environment"),
		(status = 404, description = "No active flag with this key")
	),
	tag = "admin-flags"
)]
#[instrument(skip(state, headers, payload), fields(flag_key = %key))]
pub async fn kill_switch(
	State(state): State<AppState>,
	Path(key): Path<String>,
	headers: HeaderMap,
	Json(payload): Json<serde_json::Value>,
) -> Response {
	let reason = payload
		.get("reason")
		.and_then(|v| v.as_str())
		.unwrap_or("unspecified")
		.to_string();

	let environments = match state.repo.kill_flag(&key, &actor(&headers), &reason).await {
		Ok(environments) => environments,
		Err(e) => return from_error(&e).into_response(),
	};

	// One logical operation: the kill is not acknowledged until every
	// environment's cached snapshot is gone.
	if let Err(response) = invalidate_or_fail(&state, &key, None).await {
		return response;
	}
	state.metrics.record_config_change("kill_switch");
	state.metrics.kill_switch_activations.inc();

	(
		StatusCode::OK,
		Json(json!({
			"flag_key": key,
			"disabled_environments": environments,
			"reason": reason,
		})),
	)
		.into_response()
}

// ============================================================================
// Diagnostics
// ============================================================================

#[utoipa::path(
	get,
	path = "/api/system/overview",
	responses((status = 200, description = "Flag, environment, and cache counts")),
	tag = "admin-system"
)]
#[instrument(skip(state))]
pub async fn system_overview(State(state): State<AppState>) -> Response {
	let total_flags = match state.repo.count_flags(false).await {
		Ok(count) => count,
		Err(e) => return from_error(&e).into_response(),
	};
	let active_flags = match state.repo.count_flags(true).await {
		Ok(count) => count,
		Err(e) => return from_error(&e).into_response(),
	};
	let environments = match state.repo.list_environments().await {
		Ok(environments) => environments
			.into_iter()
			.map(|e| e.name)
			.collect::<Vec<String>>(),
		Err(e) => return from_error(&e).into_response(),
	};
	let cached_snapshots = state.cache.count().await.unwrap_or(0);

	(
		StatusCode::OK,
		Json(json!({
			"total_flags": total_flags,
			"active_flags": active_flags,
			"environments": environments,
			"cached_snapshots": cached_snapshots,
		})),
	)
		.into_response()
}

#[utoipa::path(
	get,
	path = "/api/cache/status",
	responses((status = 200, description = "Cache health and key count")),
	tag = "admin-system"
)]
#[instrument(skip(state))]
pub async fn cache_status(State(state): State<AppState>) -> Response {
	let healthy = state.cache.ping().await.is_ok();
	let cached_keys = state.cache.count().await.unwrap_or(0);

	(
		StatusCode::OK,
		Json(json!({"healthy": healthy, "cached_keys": cached_keys})),
	)
		.into_response()
}

#[utoipa::path(
	delete,
	path = "/api/cache/flags/{key}",
	params(("key" = String, Path, description = "Flag key")),
	responses((status = 200, description = "Cached snapshots dropped for the flag")),
	tag = "admin-system"
)]
#[instrument(skip(state), fields(flag_key = %key))]
pub async fn invalidate_flag_cache(
	State(state): State<AppState>,
	Path(key): Path<String>,
) -> Response {
	match state.evaluation.invalidate(&key, None).await {
		Ok(invalidated) => (
			StatusCode::OK,
			Json(json!({"flag_key": key, "invalidated": invalidated})),
		)
			.into_response(),
		Err(e) => from_error(&e).into_response(),
	}
}
