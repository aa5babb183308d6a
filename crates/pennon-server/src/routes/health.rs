// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Health and metrics HTTP handlers.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::api::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
	pub status: String,
	pub service: String,
	pub timestamp: String,
}

fn health_response(service: &str, healthy: bool) -> (StatusCode, Json<HealthResponse>) {
	let status = if healthy {
		StatusCode::OK
	} else {
		StatusCode::SERVICE_UNAVAILABLE
	};

	(
		status,
		Json(HealthResponse {
			status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
			service: service.to_string(),
			timestamp: chrono::Utc::now().to_rfc3339(),
		}),
	)
}

#[utoipa::path(
	get,
	path = "/health",
	responses(
		(status = 200, description = "Evaluation service is healthy"),
		(status = 503, description = "Store or cache unreachable")
	),
	tag = "health"
)]
/// GET /health on the evaluation listener.
pub async fn evaluation_health(State(state): State<AppState>) -> impl IntoResponse {
	let (store, cache) =
		tokio::join!(state.evaluation.store_healthy(), state.evaluation.cache_healthy());
	health_response("evaluation", store && cache)
}

#[utoipa::path(
	get,
	path = "/health",
	responses(
		(status = 200, description = "Control plane is healthy"),
		(status = 503, description = "Store unreachable")
	),
	tag = "health"
)]
/// GET /health on the control-plane listener. Unauthenticated, like
/// /test-db.
pub async fn control_plane_health(State(state): State<AppState>) -> impl IntoResponse {
	let healthy = state.repo.health_check().await.is_ok();
	health_response("control-plane", healthy)
}

/// GET /health on the metrics listener.
pub async fn metrics_health() -> impl IntoResponse {
	health_response("metrics", true)
}

/// GET /test-db - store connectivity probe on the control plane, outside
/// the auth gate.
pub async fn test_db(State(state): State<AppState>) -> impl IntoResponse {
	match state.repo.health_check().await {
		Ok(()) => (
			StatusCode::OK,
			Json(serde_json::json!({"connected": true})),
		),
		Err(e) => {
			tracing::warn!(error = %e, "database connectivity probe failed");
			(
				StatusCode::SERVICE_UNAVAILABLE,
				Json(serde_json::json!({"connected": false})),
			)
		}
	}
}

#[utoipa::path(
	get,
	path = "/metrics",
	responses(
		(status = 200, description = "Prometheus text exposition", content_type = "text/plain")
	),
	tag = "health"
)]
/// GET /metrics - Prometheus text exposition.
pub async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
	(
		StatusCode::OK,
		[("content-type", "text/plain; version=0.0.4")],
		state.metrics.encode(),
	)
}
