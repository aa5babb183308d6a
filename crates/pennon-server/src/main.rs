// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pennon feature flags server binary.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pennon_server::{
	api::{control_plane_router, evaluation_router, metrics_router, AppState},
	config::ServerConfig,
};
use pennon_server_flags::{
	cache::{ConfigCache, RedisConfigCache, DEFAULT_TTL},
	metrics::FlagsMetrics,
	pool::create_pool,
	repository::{FlagsRepository, PgFlagsRepository},
};

/// Pennon server - feature flag control plane and evaluation service.
#[derive(Parser, Debug)]
#[command(name = "pennon-server", about = "Pennon feature flags server", version)]
struct Args {}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let _args = Args::parse();

	// Load .env file if present.
	dotenvy::dotenv().ok();

	let config = ServerConfig::from_env()?;

	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| config.runtime.log_level.clone().into()),
		)
		.with(tracing_subscriber::fmt::layer())
		.init();

	tracing::info!(
		control_plane_port = config.http.control_plane_port,
		evaluation_service_port = config.http.evaluation_service_port,
		metrics_port = config.http.metrics_port,
		environment = %config.runtime.environment,
		"starting pennon-server"
	);

	if config.auth.api_key.is_none() {
		tracing::warn!("API_KEY is not set; every admin request will be rejected");
	}

	// Process-wide singletons: the database pool and the cache client.
	let pool = create_pool(&config.database.url(), config.database.max_connections).await?;
	let repo: Arc<dyn FlagsRepository> = Arc::new(PgFlagsRepository::new(pool.clone()));

	let cache: Arc<dyn ConfigCache> = Arc::new(
		RedisConfigCache::connect(&config.redis.url(), config.redis.prefix.clone(), DEFAULT_TTL)
			.await?,
	);

	let metrics = Arc::new(FlagsMetrics::new());
	let state = AppState::new(repo, cache, metrics, config.auth.api_key.clone());

	let control_plane = control_plane_router(state.clone(), &config.http);
	let evaluation = evaluation_router(state.clone(), &config.http);
	let metrics_app = metrics_router(state);

	let control_listener =
		tokio::net::TcpListener::bind(("0.0.0.0", config.http.control_plane_port)).await?;
	let evaluation_listener =
		tokio::net::TcpListener::bind(("0.0.0.0", config.http.evaluation_service_port)).await?;
	let metrics_listener =
		tokio::net::TcpListener::bind(("0.0.0.0", config.http.metrics_port)).await?;

	tracing::info!("listening");

	tokio::select! {
		result = axum::serve(control_listener, control_plane) => {
			if let Err(e) = result {
				tracing::error!(error = %e, "control plane server error");
			}
		}
		result = axum::serve(evaluation_listener, evaluation) => {
			if let Err(e) = result {
				tracing::error!(error = %e, "evaluation server error");
			}
		}
		result = axum::serve(metrics_listener, metrics_app) => {
			if let Err(e) = result {
				tracing::error!(error = %e, "metrics server error");
			}
		}
		_ = tokio::signal::ctrl_c() => {
			tracing::info!("received shutdown signal");
		}
	}

	pool.close().await;
	tracing::info!("server shutdown complete");
	Ok(())
}
