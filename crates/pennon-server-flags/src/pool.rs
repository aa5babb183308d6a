// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::error::Result;

/// Default size of the database connection pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 20;

/// Create a bounded PgPool.
///
/// The repository layer owns one connection per transaction from acquire to
/// commit/rollback, so the pool bound is the concurrency bound for store
/// writes.
#[tracing::instrument(skip(database_url))]
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
	let pool = PgPoolOptions::new()
		.max_connections(max_connections)
		.acquire_timeout(Duration::from_secs(5))
		.connect(database_url)
		.await?;

	tracing::debug!(max_connections, "database pool created");
	Ok(pool)
}
