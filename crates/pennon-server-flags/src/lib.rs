// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Server-side implementation of the Pennon feature flags platform.
//!
//! This crate provides everything behind the HTTP surfaces:
//!
//! - `repository` - the authoritative flag store (Postgres)
//! - `cache` - the distributed config cache (Redis) with a test double
//! - `evaluation` - the data-plane evaluation service
//! - `metrics` - Prometheus collectors for both planes
//! - `audit` - write-only audit records for control-plane mutations
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pennon_server_flags::{
//!     cache::{ConfigCache, RedisConfigCache, DEFAULT_TTL},
//!     evaluation::{EvaluateRequest, EvaluationService},
//!     metrics::FlagsMetrics,
//!     pool::create_pool,
//!     repository::{FlagsRepository, PgFlagsRepository},
//! };
//!
//! let pool = create_pool(&database_url, 20).await?;
//! let repo: Arc<dyn FlagsRepository> = Arc::new(PgFlagsRepository::new(pool));
//! let cache: Arc<dyn ConfigCache> =
//!     Arc::new(RedisConfigCache::connect(&redis_url, "", DEFAULT_TTL).await?);
//! let service = EvaluationService::new(repo, cache, Arc::new(FlagsMetrics::new()));
//!
//! let response = service
//!     .evaluate(&EvaluateRequest {
//!         flag_key: "dark_mode".to_string(),
//!         user_context: Default::default(),
//!         environment: None,
//!         default_value: None,
//!     })
//!     .await;
//! ```

pub mod audit;
pub mod cache;
pub mod error;
pub mod evaluation;
pub mod metrics;
pub mod pool;
pub mod repository;

pub use audit::{AuditAction, AuditEntry, AuditSeverity};
pub use cache::{ConfigCache, InMemoryConfigCache, RedisConfigCache, DEFAULT_TTL};
pub use error::{FlagsServerError, Result};
pub use evaluation::{
	EvaluateRequest, EvaluateResponse, EvaluationService, EvaluationStats, SdkConfig,
	EVALUATION_DEADLINE, MAX_BATCH_SIZE,
};
pub use metrics::FlagsMetrics;
pub use pool::{create_pool, DEFAULT_MAX_CONNECTIONS};
pub use repository::{
	CreateFlagRequest, FlagConfigPatch, FlagPatch, FlagsRepository, PgFlagsRepository, RuleSpec,
	VariantSpec, MAX_PAGE_SIZE,
};

// Re-export core types for convenience.
pub use pennon_flags_core::*;
