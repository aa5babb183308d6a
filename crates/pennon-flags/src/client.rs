// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Feature flags client.
//!
//! The client keeps a local snapshot of the environment's flags, refreshed
//! by an ETag-conditional poll, and evaluates locally with the same rule
//! engine the server runs. Flags missing from the snapshot are evaluated
//! remotely; any failure degrades to the caller's default.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pennon_flags_core::{engine, Decision, EvaluationReason, FlagSnapshot, UserContext};

use crate::analytics::{context_token, AnalyticsBuffer, AnalyticsEvent};
use crate::error::{FlagsError, Result};
use crate::events::{EventBus, SdkEvent};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
	pub api_key: Option<String>,
	pub base_url: String,
	pub environment: String,
	pub poll_interval: Duration,
	pub timeout: Duration,
	pub enable_analytics: bool,
	pub enable_local_evaluation: bool,
	/// Per-flag fallbacks that take precedence over the caller default on
	/// failure.
	pub fallback_values: HashMap<String, serde_json::Value>,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			api_key: None,
			base_url: String::new(),
			environment: "production".to_string(),
			poll_interval: Duration::from_secs(30),
			timeout: Duration::from_secs(5),
			enable_analytics: true,
			enable_local_evaluation: true,
			fallback_values: HashMap::new(),
		}
	}
}

/// Lifecycle states of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
	Initializing,
	Ready,
	Polling,
	Destroyed,
}

/// Builder for constructing a [`FlagsClient`].
pub struct FlagsClientBuilder {
	config: ClientConfig,
}

impl FlagsClientBuilder {
	pub fn new() -> Self {
		Self {
			config: ClientConfig::default(),
		}
	}

	pub fn api_key(mut self, key: impl Into<String>) -> Self {
		self.config.api_key = Some(key.into());
		self
	}

	pub fn base_url(mut self, url: impl Into<String>) -> Self {
		self.config.base_url = url.into();
		self
	}

	pub fn environment(mut self, environment: impl Into<String>) -> Self {
		self.config.environment = environment.into();
		self
	}

	pub fn poll_interval(mut self, interval: Duration) -> Self {
		self.config.poll_interval = interval;
		self
	}

	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.config.timeout = timeout;
		self
	}

	pub fn enable_analytics(mut self, enable: bool) -> Self {
		self.config.enable_analytics = enable;
		self
	}

	pub fn enable_local_evaluation(mut self, enable: bool) -> Self {
		self.config.enable_local_evaluation = enable;
		self
	}

	pub fn fallback_value(mut self, flag_key: impl Into<String>, value: serde_json::Value) -> Self {
		self.config.fallback_values.insert(flag_key.into(), value);
		self
	}

	/// Builds the client, performs the initial config fetch, and starts
	/// polling. A failed initial fetch emits `error` and leaves the client
	/// usable through remote evaluation.
	pub async fn build(self) -> Result<FlagsClient> {
		if self.config.base_url.is_empty() {
			return Err(FlagsError::InvalidBaseUrl);
		}

		let mut config = self.config;
		config.base_url = config.base_url.trim_end_matches('/').to_string();

		let http = reqwest::Client::builder()
			.timeout(config.timeout)
			.build()
			.map_err(FlagsError::RequestFailed)?;

		let client = FlagsClient {
			inner: Arc::new(ClientInner {
				config,
				http,
				state: RwLock::new(ClientState::Initializing),
				snapshots: RwLock::new(HashMap::new()),
				etag: RwLock::new(None),
				events: EventBus::default(),
				analytics: AnalyticsBuffer::new(),
				destroyed: AtomicBool::new(false),
			}),
			poll_handle: Arc::new(Mutex::new(None)),
		};

		match client.inner.refresh_config().await {
			Ok(_) => {
				*client.inner.state.write().await = ClientState::Ready;
				let flag_count = client.inner.snapshots.read().await.len();
				client.inner.events.emit(SdkEvent::Ready { flag_count });
				info!(flag_count, "flags client ready");
			}
			Err(e) => {
				// Remote fallback keeps the client usable; polling will
				// recover the snapshot when the server does.
				*client.inner.state.write().await = ClientState::Polling;
				client.inner.events.emit(SdkEvent::Error {
					message: e.to_string(),
				});
				warn!(error = %e, "initial config fetch failed; continuing with remote fallback");
			}
		}

		let inner = Arc::clone(&client.inner);
		let handle = tokio::spawn(poll_loop(inner));
		*client.poll_handle.lock().await = Some(handle);

		Ok(client)
	}
}

impl Default for FlagsClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

struct ClientInner {
	config: ClientConfig,
	http: reqwest::Client,
	state: RwLock<ClientState>,
	snapshots: RwLock<HashMap<String, FlagSnapshot>>,
	etag: RwLock<Option<String>>,
	events: EventBus,
	analytics: AnalyticsBuffer,
	destroyed: AtomicBool,
}

/// Client for evaluating feature flags against a Pennon deployment.
pub struct FlagsClient {
	inner: Arc<ClientInner>,
	poll_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

/// Body shape of `GET /sdk/config`.
#[derive(Debug, Deserialize)]
struct SdkConfigPayload {
	etag: String,
	#[allow(dead_code)]
	poll_interval_ms: u64,
	flags: Vec<FlagSnapshot>,
}

/// Body shape of `POST /evaluate`.
#[derive(Debug, Deserialize)]
struct EvaluationPayload {
	value: serde_json::Value,
	variant_key: Option<String>,
	reason: EvaluationReason,
}

#[derive(Debug, Serialize)]
struct EvaluateBody<'a> {
	flag_key: &'a str,
	user_context: &'a UserContext,
	environment: &'a str,
	default_value: &'a serde_json::Value,
}

impl ClientInner {
	/// Conditional config fetch. Returns true when the snapshot changed.
	async fn refresh_config(&self) -> Result<bool> {
		let url = format!("{}/sdk/config", self.config.base_url);
		let mut request = self
			.http
			.get(&url)
			.query(&[("environment", self.config.environment.as_str())]);

		if let Some(etag) = self.etag.read().await.as_deref() {
			request = request.header(header::IF_NONE_MATCH, format!("\"{etag}\""));
		}
		if let Some(api_key) = &self.config.api_key {
			request = request.header("x-api-key", api_key);
		}

		let response = request.send().await?;

		if response.status() == reqwest::StatusCode::NOT_MODIFIED {
			debug!("sdk config unchanged");
			return Ok(false);
		}

		if !response.status().is_success() {
			return Err(FlagsError::ServerError {
				status: response.status().as_u16(),
				message: response.text().await.unwrap_or_default(),
			});
		}

		let payload: SdkConfigPayload = response
			.json()
			.await
			.map_err(|e| FlagsError::ParseFailed(e.to_string()))?;

		let flag_count = payload.flags.len();
		let snapshots: HashMap<String, FlagSnapshot> = payload
			.flags
			.into_iter()
			.map(|snapshot| (snapshot.flag.key.clone(), snapshot))
			.collect();

		*self.snapshots.write().await = snapshots;
		*self.etag.write().await = Some(payload.etag.clone());

		self.events.emit(SdkEvent::ConfigUpdated {
			etag: payload.etag,
			flag_count,
		});
		debug!(flag_count, "sdk config updated");

		Ok(true)
	}

	async fn remote_evaluate(
		&self,
		flag_key: &str,
		ctx: &UserContext,
		default: &serde_json::Value,
	) -> Result<EvaluationPayload> {
		let url = format!("{}/evaluate", self.config.base_url);
		let mut request = self.http.post(&url).json(&EvaluateBody {
			flag_key,
			user_context: ctx,
			environment: &self.config.environment,
			default_value: default,
		});

		if let Some(api_key) = &self.config.api_key {
			request = request.header("x-api-key", api_key);
		}

		let response = request.send().await?;
		if !response.status().is_success() {
			return Err(FlagsError::ServerError {
				status: response.status().as_u16(),
				message: response.text().await.unwrap_or_default(),
			});
		}

		response
			.json()
			.await
			.map_err(|e| FlagsError::ParseFailed(e.to_string()))
	}

	fn record_analytics(
		&self,
		flag_key: &str,
		variant: Option<String>,
		reason: EvaluationReason,
		ctx: &UserContext,
	) {
		if !self.config.enable_analytics {
			return;
		}
		self
			.analytics
			.push(AnalyticsEvent::new(flag_key, variant, reason, context_token(ctx)));
	}
}

/// Evaluates a snapshot locally with the shared rule engine.
fn evaluate_local(
	snapshot: &FlagSnapshot,
	ctx: &UserContext,
	environment: &str,
	default: &serde_json::Value,
) -> (serde_json::Value, Decision) {
	let decision = engine::evaluate(
		&snapshot.flag,
		&snapshot.config,
		&snapshot.variants,
		&snapshot.rules,
		ctx,
		environment,
	);
	let value = engine::typed_value(&snapshot.flag, &snapshot.variants, &decision, default);
	(value, decision)
}

async fn poll_loop(inner: Arc<ClientInner>) {
	let mut ticker = tokio::time::interval(inner.config.poll_interval);
	ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
	// The first tick fires immediately; the initial fetch already ran.
	ticker.tick().await;

	loop {
		ticker.tick().await;
		if inner.destroyed.load(Ordering::SeqCst) {
			break;
		}

		match inner.refresh_config().await {
			Ok(updated) => {
				if updated {
					let mut state = inner.state.write().await;
					if *state == ClientState::Polling {
						*state = ClientState::Ready;
					}
				}
			}
			Err(e) => {
				// Non-fatal: the next tick retries.
				inner.events.emit(SdkEvent::PollError {
					message: e.to_string(),
				});
				warn!(error = %e, "config poll failed");
			}
		}
	}
}

impl FlagsClient {
	/// Creates a new builder.
	pub fn builder() -> FlagsClientBuilder {
		FlagsClientBuilder::new()
	}

	/// Subscribes to the client's lifecycle event streams.
	pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SdkEvent> {
		self.inner.events.subscribe()
	}

	pub async fn state(&self) -> ClientState {
		*self.inner.state.read().await
	}

	/// Number of flags in the local snapshot.
	pub async fn snapshot_size(&self) -> usize {
		self.inner.snapshots.read().await.len()
	}

	/// Evaluates a flag, never failing: local snapshot first, then the
	/// remote evaluation service, then the configured fallback or the
	/// caller's default.
	pub async fn evaluate_flag(
		&self,
		flag_key: &str,
		ctx: &UserContext,
		default: serde_json::Value,
	) -> serde_json::Value {
		if self.inner.destroyed.load(Ordering::SeqCst) {
			return self.failure_value(flag_key, ctx, &default, "client destroyed");
		}

		if self.inner.config.enable_local_evaluation {
			let snapshots = self.inner.snapshots.read().await;
			if let Some(snapshot) = snapshots.get(flag_key) {
				let (value, decision) =
					evaluate_local(snapshot, ctx, &self.inner.config.environment, &default);
				drop(snapshots);

				self.inner.events.emit(SdkEvent::Evaluation {
					flag_key: flag_key.to_string(),
					variant: Some(decision.variant.clone()),
					reason: decision.reason,
					local: true,
				});
				self
					.inner
					.record_analytics(flag_key, Some(decision.variant), decision.reason, ctx);
				return value;
			}
		}

		match self.inner.remote_evaluate(flag_key, ctx, &default).await {
			Ok(payload) => {
				self.inner.events.emit(SdkEvent::Evaluation {
					flag_key: flag_key.to_string(),
					variant: payload.variant_key.clone(),
					reason: payload.reason,
					local: false,
				});
				self
					.inner
					.record_analytics(flag_key, payload.variant_key, payload.reason, ctx);
				payload.value
			}
			Err(e) => self.failure_value(flag_key, ctx, &default, &e.to_string()),
		}
	}

	/// Resolves the value for a failed evaluation: a configured fallback
	/// wins over the caller's default. Emits `evaluationError` with a
	/// redacted context token.
	fn failure_value(
		&self,
		flag_key: &str,
		ctx: &UserContext,
		default: &serde_json::Value,
		cause: &str,
	) -> serde_json::Value {
		let value = self
			.inner
			.config
			.fallback_values
			.get(flag_key)
			.cloned()
			.unwrap_or_else(|| default.clone());

		self.inner.events.emit(SdkEvent::EvaluationError {
			flag_key: flag_key.to_string(),
			cause: cause.to_string(),
			default: value.clone(),
			context_token: context_token(ctx),
		});
		self
			.inner
			.record_analytics(flag_key, None, EvaluationReason::EvaluationError, ctx);

		value
	}

	/// Evaluates many flags concurrently; the result is keyed by flag key.
	pub async fn evaluate_batch(
		&self,
		requests: Vec<(String, UserContext, serde_json::Value)>,
	) -> HashMap<String, serde_json::Value> {
		let evaluations = requests.into_iter().map(|(flag_key, ctx, default)| async move {
			let value = self.evaluate_flag(&flag_key, &ctx, default).await;
			(flag_key, value)
		});

		futures::future::join_all(evaluations).await.into_iter().collect()
	}

	/// Buffered analytics event count.
	pub fn analytics_len(&self) -> usize {
		self.inner.analytics.len()
	}

	/// Flushes the analytics buffer, emitting a snapshot event.
	pub fn flush_analytics(&self) -> Vec<AnalyticsEvent> {
		let events = self.inner.analytics.flush();
		self.inner.events.emit(SdkEvent::AnalyticsFlush {
			count: events.len(),
		});
		events
	}

	/// Stops polling, flushes analytics, and makes further evaluation
	/// degrade to defaults. Idempotent.
	pub async fn destroy(&self) {
		if self.inner.destroyed.swap(true, Ordering::SeqCst) {
			return;
		}

		if let Some(handle) = self.poll_handle.lock().await.take() {
			handle.abort();
		}

		self.flush_analytics();
		*self.inner.state.write().await = ClientState::Destroyed;
		info!("flags client destroyed");
	}
}
