// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The evaluation service: cache-miss → store → cache-fill → rule engine.
//!
//! The evaluation path is degradation-first. Every upstream fault is
//! observable (metric, log) but never fatal to the client: a well-formed
//! request always gets a response, falling back to the caller's default
//! value with a diagnostic reason.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use pennon_flags_core::{engine, EvaluationReason, FlagSnapshot, UserContext};

use crate::cache::ConfigCache;
use crate::error::Result;
use crate::metrics::FlagsMetrics;
use crate::repository::FlagsRepository;

/// Maximum number of requests in one batch evaluation.
pub const MAX_BATCH_SIZE: usize = 50;

/// Upper service-time bound for one evaluation request.
pub const EVALUATION_DEADLINE: Duration = Duration::from_secs(5);

/// Default SDK poll interval advertised by the config endpoint.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// One evaluation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateRequest {
	pub flag_key: String,
	#[serde(default)]
	pub user_context: UserContext,
	#[serde(default)]
	pub environment: Option<String>,
	#[serde(default)]
	pub default_value: Option<serde_json::Value>,
}

/// One evaluation result, returned even when upstreams are down.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateResponse {
	pub flag_key: String,
	pub value: serde_json::Value,
	pub variant_key: Option<String>,
	pub reason: EvaluationReason,
	pub timestamp: DateTime<Utc>,
}

/// SDK polling descriptor plus the environment's full snapshot set, so SDK
/// local evaluation needs no out-of-band hydration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdkConfig {
	pub environment: String,
	pub etag: String,
	pub poll_interval_ms: u64,
	pub flags: Vec<FlagSnapshot>,
}

/// Cache/store counts for the stats endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationStats {
	pub cached_flags: u64,
	pub total_flags: u64,
}

/// Orchestrates cache, store, and the rule engine for the data plane.
pub struct EvaluationService {
	repo: Arc<dyn FlagsRepository>,
	cache: Arc<dyn ConfigCache>,
	metrics: Arc<FlagsMetrics>,
	poll_interval: Duration,
}

impl EvaluationService {
	pub fn new(
		repo: Arc<dyn FlagsRepository>,
		cache: Arc<dyn ConfigCache>,
		metrics: Arc<FlagsMetrics>,
	) -> Self {
		Self {
			repo,
			cache,
			metrics,
			poll_interval: DEFAULT_POLL_INTERVAL,
		}
	}

	pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
		self.poll_interval = poll_interval;
		self
	}

	/// Evaluates one flag. Infallible for a well-formed request: upstream
	/// faults degrade to the caller's default with reason
	/// `evaluation_error`.
	#[instrument(skip(self, request), fields(flag_key = %request.flag_key))]
	pub async fn evaluate(&self, request: &EvaluateRequest) -> EvaluateResponse {
		let started = Instant::now();
		let environment = request
			.environment
			.clone()
			.unwrap_or_else(|| "production".to_string());
		let default = request
			.default_value
			.clone()
			.unwrap_or(serde_json::Value::Bool(false));

		let (value, variant_key, reason, enabled) = match self
			.evaluate_inner(&request.flag_key, &request.user_context, &environment, &default)
			.await
		{
			Ok(outcome) => outcome,
			Err(e) => {
				warn!(flag_key = %request.flag_key, error = %e, "evaluation degraded to default");
				(default, None, EvaluationReason::EvaluationError, false)
			}
		};

		self
			.metrics
			.record_evaluation(&request.flag_key, &environment, enabled, reason);
		self
			.metrics
			.evaluation_duration
			.observe(started.elapsed().as_secs_f64());

		EvaluateResponse {
			flag_key: request.flag_key.clone(),
			value,
			variant_key,
			reason,
			timestamp: Utc::now(),
		}
	}

	async fn evaluate_inner(
		&self,
		flag_key: &str,
		ctx: &UserContext,
		environment: &str,
		default: &serde_json::Value,
	) -> Result<(
		serde_json::Value,
		Option<String>,
		EvaluationReason,
		bool,
	)> {
		if environment.is_empty() {
			return Ok((default.clone(), None, EvaluationReason::InvalidContext, false));
		}

		let snapshot = match self.load_snapshot(flag_key, environment).await? {
			Some(snapshot) => snapshot,
			None => return Ok((default.clone(), None, EvaluationReason::FlagNotFound, false)),
		};

		let decision = engine::evaluate(
			&snapshot.flag,
			&snapshot.config,
			&snapshot.variants,
			&snapshot.rules,
			ctx,
			environment,
		);
		let value = engine::typed_value(&snapshot.flag, &snapshot.variants, &decision, default);

		// Store-side evaluation record, off the hot path.
		{
			let repo = Arc::clone(&self.repo);
			let flag_id = snapshot.flag.id;
			let flag_key = flag_key.to_string();
			let environment = environment.to_string();
			let variant = decision.variant.clone();
			let reason = decision.reason;
			tokio::spawn(async move {
				if let Err(e) = repo
					.record_evaluation(flag_id, &flag_key, &environment, &variant, reason.as_str())
					.await
				{
					warn!(flag_key = %flag_key, error = %e, "failed to record evaluation");
				}
			});
		}

		Ok((
			value,
			Some(decision.variant.clone()),
			decision.reason,
			decision.enabled,
		))
	}

	/// Cache read with store fallback. A cache read error counts as a miss;
	/// the cache fill after a store read is fire-and-forget.
	async fn load_snapshot(
		&self,
		flag_key: &str,
		environment: &str,
	) -> Result<Option<FlagSnapshot>> {
		match self.cache.get(flag_key, environment).await {
			Ok(Some(snapshot)) => {
				self.metrics.cache_hits.inc();
				return Ok(Some(snapshot));
			}
			Ok(None) => {
				self.metrics.cache_misses.inc();
			}
			Err(e) => {
				self.metrics.cache_misses.inc();
				warn!(flag_key, environment, error = %e, "cache read failed");
			}
		}

		let Some(snapshot) = self.repo.get_flag_config(flag_key, environment).await? else {
			return Ok(None);
		};

		let cache = Arc::clone(&self.cache);
		let fill = snapshot.clone();
		let environment = environment.to_string();
		tokio::spawn(async move {
			if let Err(e) = cache.put(&fill, &environment).await {
				warn!(flag_key = %fill.flag.key, error = %e, "cache fill failed");
			}
		});

		Ok(Some(snapshot))
	}

	/// Evaluates a batch concurrently. Size validation (≤ 50) happens before
	/// any element is evaluated.
	#[instrument(skip(self, requests), fields(count = requests.len()))]
	pub async fn evaluate_batch(&self, requests: &[EvaluateRequest]) -> Vec<EvaluateResponse> {
		futures::future::join_all(requests.iter().map(|request| self.evaluate(request))).await
	}

	/// ETag-conditional SDK config. Returns `None` when the caller's ETag
	/// still matches.
	#[instrument(skip(self), fields(environment = %environment))]
	pub async fn sdk_config(
		&self,
		environment: &str,
		if_none_match: Option<&str>,
	) -> Result<Option<SdkConfig>> {
		let etag = self.repo.environment_fingerprint(environment).await?;
		if if_none_match == Some(etag.as_str()) {
			return Ok(None);
		}

		let flags = self.repo.list_snapshots(environment).await?;
		Ok(Some(SdkConfig {
			environment: environment.to_string(),
			etag,
			poll_interval_ms: self.poll_interval.as_millis() as u64,
			flags,
		}))
	}

	pub async fn stats(&self) -> Result<EvaluationStats> {
		let cached_flags = self.cache.count().await?;
		let total_flags = self.repo.count_flags(true).await?;
		Ok(EvaluationStats {
			cached_flags,
			total_flags,
		})
	}

	pub async fn list_cached(&self) -> Result<Vec<String>> {
		self.cache.list_keys().await
	}

	/// Admin hook: drop one key, or every key for the flag.
	#[instrument(skip(self), fields(flag_key = %flag_key))]
	pub async fn invalidate(&self, flag_key: &str, environment: Option<&str>) -> Result<u64> {
		match environment {
			Some(env) => {
				self.cache.invalidate(flag_key, env).await?;
				Ok(1)
			}
			None => self.cache.invalidate_flag(flag_key).await,
		}
	}

	pub async fn cache_healthy(&self) -> bool {
		self.cache.ping().await.is_ok()
	}

	pub async fn store_healthy(&self) -> bool {
		self.repo.health_check().await.is_ok()
	}
}
