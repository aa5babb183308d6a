// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Application state and router assembly for the three HTTP surfaces.

use std::sync::Arc;

use axum::{
	middleware,
	routing::{delete, get, patch, post, put},
	Router,
};
use tower_http::{
	cors::{Any, CorsLayer},
	trace::TraceLayer,
};

use pennon_server_flags::{ConfigCache, EvaluationService, FlagsMetrics, FlagsRepository};

use crate::auth_middleware::admin_auth_middleware;
use crate::config::HttpConfig;
use crate::routes::{admin, evaluation, health};

/// Shared state behind every handler. The repository and cache are the
/// process-wide singletons; they are constructed once in `main` and torn
/// down when the process exits.
#[derive(Clone)]
pub struct AppState {
	pub repo: Arc<dyn FlagsRepository>,
	pub cache: Arc<dyn ConfigCache>,
	pub evaluation: Arc<EvaluationService>,
	pub metrics: Arc<FlagsMetrics>,
	pub api_key: Option<String>,
}

impl AppState {
	pub fn new(
		repo: Arc<dyn FlagsRepository>,
		cache: Arc<dyn ConfigCache>,
		metrics: Arc<FlagsMetrics>,
		api_key: Option<String>,
	) -> Self {
		let evaluation = Arc::new(EvaluationService::new(
			Arc::clone(&repo),
			Arc::clone(&cache),
			Arc::clone(&metrics),
		));

		Self {
			repo,
			cache,
			evaluation,
			metrics,
			api_key,
		}
	}
}

fn apply_layers(router: Router, http: &HttpConfig) -> Router {
	let router = if http.cors_enabled {
		router.layer(
			CorsLayer::new()
				.allow_origin(Any)
				.allow_methods(Any)
				.allow_headers(Any),
		)
	} else {
		router
	};

	if http.request_logging {
		router.layer(TraceLayer::new_for_http())
	} else {
		router
	}
}

/// Admin surface. Everything under `/api` requires the shared secret;
/// `/health` does not.
pub fn control_plane_router(state: AppState, http: &HttpConfig) -> Router {
	let admin_routes = Router::new()
		.route("/api/flags", get(admin::list_flags).post(admin::create_flag))
		.route(
			"/api/flags/{key}",
			get(admin::get_flag)
				.put(admin::update_flag)
				.delete(admin::delete_flag),
		)
		.route(
			"/api/flags/{key}/environments/{env}",
			put(admin::update_flag_config),
		)
		.route(
			"/api/flags/{key}/environments/{env}/toggle",
			patch(admin::toggle_flag),
		)
		.route("/api/flags/{key}/kill-switch", post(admin::kill_switch))
		.route("/api/system/overview", get(admin::system_overview))
		.route("/api/cache/status", get(admin::cache_status))
		.route("/api/cache/flags/{key}", delete(admin::invalidate_flag_cache))
		.route_layer(middleware::from_fn_with_state(
			state.clone(),
			admin_auth_middleware,
		));

	let router = Router::new()
		.route("/health", get(health::control_plane_health))
		.route("/test-db", get(health::test_db))
		.merge(admin_routes)
		.with_state(state);

	apply_layers(router, http)
}

/// Data-plane surface.
pub fn evaluation_router(state: AppState, http: &HttpConfig) -> Router {
	let router = Router::new()
		.route("/health", get(health::evaluation_health))
		.route("/stats", get(evaluation::stats))
		.route("/evaluate", post(evaluation::evaluate))
		.route("/evaluate/batch", post(evaluation::evaluate_batch))
		.route("/cache", get(evaluation::list_cache))
		.route("/cache/{flag_key}", delete(evaluation::invalidate_cache))
		.route("/sdk/config", get(evaluation::sdk_config))
		.with_state(state);

	apply_layers(router, http)
}

/// Metrics sidecar surface.
pub fn metrics_router(state: AppState) -> Router {
	Router::new()
		.route("/metrics", get(health::prometheus_metrics))
		.route("/health", get(health::metrics_health))
		.with_state(state)
}
