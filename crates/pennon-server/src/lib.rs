// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pennon feature flags server.
//!
//! Three HTTP surfaces share one [`api::AppState`]:
//!
//! - the control plane (flag authoring, guarded by the admin secret),
//! - the evaluation service (the data-plane hot path),
//! - the metrics sidecar (Prometheus exposition).
//!
//! The binary in `main.rs` wires configuration, the database pool, and the
//! Redis cache into the routers built here; integration tests build the
//! same routers over in-memory doubles.

pub mod api;
pub mod api_response;
pub mod auth_middleware;
pub mod config;
pub mod routes;

pub use api::{control_plane_router, evaluation_router, metrics_router, AppState};
pub use config::{ConfigError, ServerConfig};
