// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Shared test support: an in-memory repository implementing the store
//! contract, state/router builders, and request helpers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
	body::Body,
	http::{Request, Response},
	Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use tokio::sync::RwLock;
use tower::ServiceExt;
use uuid::Uuid;

use pennon_flags_core::{
	Environment, EnvironmentId, Flag, FlagConfig, FlagConfigId, FlagId, FlagSnapshot, Rule, RuleId,
	Variant, VariantId, DEFAULT_ENVIRONMENTS,
};
use pennon_server::{
	api::{control_plane_router, evaluation_router, AppState},
	config::HttpConfig,
};
use pennon_server_flags::{
	CreateFlagRequest, FlagConfigPatch, FlagPatch, FlagsMetrics, FlagsRepository, FlagsServerError,
	InMemoryConfigCache, Result,
};

pub const TEST_API_KEY: &str = "test-admin-secret";

#[derive(Default)]
struct Inner {
	environments: Vec<Environment>,
	flags: HashMap<String, Flag>,
	configs: HashMap<(String, String), FlagConfig>,
	variants: HashMap<String, Vec<Variant>>,
	rules: HashMap<Uuid, Vec<Rule>>,
	version: u64,
}

/// In-memory implementation of the store contract, enough for router-level
/// tests without a database.
pub struct InMemoryFlagsRepository {
	inner: RwLock<Inner>,
}

impl InMemoryFlagsRepository {
	pub fn with_default_environments() -> Self {
		let environments = DEFAULT_ENVIRONMENTS
			.iter()
			.map(|name| Environment {
				id: EnvironmentId::new(),
				name: name.to_string(),
				created_at: Utc::now(),
			})
			.collect();

		Self {
			inner: RwLock::new(Inner {
				environments,
				..Default::default()
			}),
		}
	}
}

#[async_trait]
impl FlagsRepository for InMemoryFlagsRepository {
	async fn create_flag(&self, req: &CreateFlagRequest, _actor: &str) -> Result<Flag> {
		let mut inner = self.inner.write().await;
		if inner.flags.contains_key(&req.key) {
			return Err(FlagsServerError::Conflict(format!(
				"flag key already exists: {}",
				req.key
			)));
		}

		let now = Utc::now();
		let flag = Flag {
			id: FlagId::new(),
			key: req.key.clone(),
			name: req.name.clone(),
			description: req.description.clone(),
			flag_type: req.flag_type,
			active: true,
			created_at: now,
			updated_at: now,
		};

		let variants: Vec<Variant> = match &req.variants {
			Some(specs) => specs
				.iter()
				.map(|spec| Variant {
					id: VariantId::new(),
					flag_id: flag.id,
					key: spec.key.clone(),
					value: spec.value.clone(),
					weight: spec.weight,
				})
				.collect(),
			None => vec![
				Variant {
					id: VariantId::new(),
					flag_id: flag.id,
					key: "true".to_string(),
					value: "true".to_string(),
					weight: 50,
				},
				Variant {
					id: VariantId::new(),
					flag_id: flag.id,
					key: "false".to_string(),
					value: "false".to_string(),
					weight: 50,
				},
			],
		};

		let environments: Vec<(EnvironmentId, String)> = inner
			.environments
			.iter()
			.map(|e| (e.id, e.name.clone()))
			.collect();
		for (environment_id, environment) in environments {
			let config = FlagConfig {
				id: FlagConfigId::new(),
				flag_id: flag.id,
				environment_id,
				enabled: false,
				default_variant: "false".to_string(),
				rollout_percentage: 0,
				config: serde_json::json!({}),
				created_at: now,
				updated_at: now,
			};
			inner.configs.insert((req.key.clone(), environment), config);
		}

		inner.variants.insert(req.key.clone(), variants);
		inner.flags.insert(req.key.clone(), flag.clone());
		inner.version += 1;

		Ok(flag)
	}

	async fn get_flag(&self, key: &str) -> Result<Option<Flag>> {
		let inner = self.inner.read().await;
		Ok(inner.flags.get(key).filter(|f| f.active).cloned())
	}

	async fn list_flags(
		&self,
		page: u32,
		per_page: u32,
		active_only: bool,
	) -> Result<(Vec<Flag>, u64)> {
		let inner = self.inner.read().await;
		let mut flags: Vec<Flag> = inner
			.flags
			.values()
			.filter(|f| !active_only || f.active)
			.cloned()
			.collect();
		flags.sort_by(|a, b| a.key.cmp(&b.key));

		let total = flags.len() as u64;
		let per_page = per_page.clamp(1, 100) as usize;
		let offset = ((page.max(1) - 1) as usize) * per_page;
		let page: Vec<Flag> = flags.into_iter().skip(offset).take(per_page).collect();

		Ok((page, total))
	}

	async fn update_flag(&self, key: &str, patch: &FlagPatch, _actor: &str) -> Result<Flag> {
		let mut inner = self.inner.write().await;
		let Some(flag) = inner.flags.get_mut(key).filter(|f| f.active) else {
			return Err(FlagsServerError::NotFound(format!("flag not found: {key}")));
		};

		if let Some(name) = &patch.name {
			flag.name = name.clone();
		}
		if let Some(description) = &patch.description {
			flag.description = Some(description.clone());
		}
		flag.updated_at = Utc::now();
		let updated = flag.clone();
		inner.version += 1;

		Ok(updated)
	}

	async fn get_flag_config(
		&self,
		flag_key: &str,
		environment: &str,
	) -> Result<Option<FlagSnapshot>> {
		let inner = self.inner.read().await;
		let Some(flag) = inner.flags.get(flag_key).filter(|f| f.active) else {
			return Ok(None);
		};
		let Some(config) = inner
			.configs
			.get(&(flag_key.to_string(), environment.to_string()))
		else {
			return Ok(None);
		};

		Ok(Some(FlagSnapshot {
			flag: flag.clone(),
			config: config.clone(),
			variants: inner.variants.get(flag_key).cloned().unwrap_or_default(),
			rules: inner.rules.get(&config.id.0).cloned().unwrap_or_default(),
		}))
	}

	async fn update_flag_config(
		&self,
		flag_key: &str,
		environment: &str,
		patch: &FlagConfigPatch,
		_actor: &str,
	) -> Result<FlagConfig> {
		let mut inner = self.inner.write().await;
		if !inner.flags.get(flag_key).map(|f| f.active).unwrap_or(false) {
			return Err(FlagsServerError::NotFound(format!(
				"flag not found: {flag_key}"
			)));
		}

		let Some(config) = inner
			.configs
			.get_mut(&(flag_key.to_string(), environment.to_string()))
		else {
			return Err(FlagsServerError::NotFound(format!(
				"no config for flag {flag_key} in {environment}"
			)));
		};

		if let Some(enabled) = patch.enabled {
			config.enabled = enabled;
		}
		if let Some(default_variant) = &patch.default_variant {
			config.default_variant = default_variant.clone();
		}
		if let Some(rollout) = patch.rollout_percentage {
			if rollout > 100 {
				return Err(FlagsServerError::Validation(format!(
					"rollout percentage out of range: {rollout}"
				)));
			}
			config.rollout_percentage = rollout;
		}
		if let Some(blob) = &patch.config {
			config.config = blob.clone();
		}
		config.updated_at = Utc::now();
		let updated = config.clone();

		if let Some(rule_specs) = &patch.rules {
			let rules: Vec<Rule> = rule_specs
				.iter()
				.map(|spec| Rule {
					id: RuleId::new(),
					flag_config_id: updated.id,
					rule_type: spec.rule_type,
					attribute_name: spec.attribute_name.clone(),
					operator: spec.operator,
					attribute_value: spec.attribute_value.clone(),
					percentage: spec.percentage,
					variant_key: spec.variant_key.clone(),
					priority: spec.priority,
				})
				.collect();
			inner.rules.insert(updated.id.0, rules);
		}
		inner.version += 1;

		Ok(updated)
	}

	async fn toggle_flag(
		&self,
		flag_key: &str,
		environment: &str,
		enabled: bool,
		actor: &str,
	) -> Result<FlagConfig> {
		let patch = FlagConfigPatch {
			enabled: Some(enabled),
			..Default::default()
		};
		self
			.update_flag_config(flag_key, environment, &patch, actor)
			.await
	}

	async fn delete_flag(&self, flag_key: &str, _actor: &str) -> Result<bool> {
		let mut inner = self.inner.write().await;
		match inner.flags.get_mut(flag_key).filter(|f| f.active) {
			Some(flag) => {
				flag.active = false;
				flag.updated_at = Utc::now();
				inner.version += 1;
				Ok(true)
			}
			None => Ok(false),
		}
	}

	async fn kill_flag(&self, flag_key: &str, _actor: &str, _reason: &str) -> Result<Vec<String>> {
		let mut inner = self.inner.write().await;
		if !inner.flags.get(flag_key).map(|f| f.active).unwrap_or(false) {
			return Err(FlagsServerError::NotFound(format!(
				"flag not found: {flag_key}"
			)));
		}

		let mut environments = Vec::new();
		for ((key, environment), config) in inner.configs.iter_mut() {
			if key == flag_key {
				config.enabled = false;
				config.updated_at = Utc::now();
				environments.push(environment.clone());
			}
		}
		environments.sort();
		inner.version += 1;

		Ok(environments)
	}

	async fn list_environments(&self) -> Result<Vec<Environment>> {
		Ok(self.inner.read().await.environments.clone())
	}

	async fn count_flags(&self, active_only: bool) -> Result<u64> {
		let inner = self.inner.read().await;
		Ok(
			inner
				.flags
				.values()
				.filter(|f| !active_only || f.active)
				.count() as u64,
		)
	}

	async fn list_snapshots(&self, environment: &str) -> Result<Vec<FlagSnapshot>> {
		let inner = self.inner.read().await;
		let mut keys: Vec<String> = inner
			.flags
			.values()
			.filter(|f| f.active)
			.map(|f| f.key.clone())
			.collect();
		keys.sort();
		drop(inner);

		let mut snapshots = Vec::new();
		for key in keys {
			if let Some(snapshot) = self.get_flag_config(&key, environment).await? {
				snapshots.push(snapshot);
			}
		}
		Ok(snapshots)
	}

	async fn environment_fingerprint(&self, environment: &str) -> Result<String> {
		let inner = self.inner.read().await;
		Ok(format!("{environment}-v{}", inner.version))
	}

	async fn record_evaluation(
		&self,
		_flag_id: FlagId,
		_flag_key: &str,
		_environment: &str,
		_variant: &str,
		_reason: &str,
	) -> Result<()> {
		Ok(())
	}

	async fn health_check(&self) -> Result<()> {
		Ok(())
	}
}

/// Builds state over the in-memory repo and cache; both routers share it.
pub fn test_state() -> AppState {
	AppState::new(
		Arc::new(InMemoryFlagsRepository::with_default_environments()),
		Arc::new(InMemoryConfigCache::new(Duration::from_secs(300))),
		Arc::new(FlagsMetrics::new()),
		Some(TEST_API_KEY.to_string()),
	)
}

pub fn test_routers() -> (Router, Router) {
	let state = test_state();
	let http = HttpConfig::default();
	(
		control_plane_router(state.clone(), &http),
		evaluation_router(state, &http),
	)
}

/// One-shot request against a router clone.
pub async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
	router.clone().oneshot(request).await.unwrap()
}

pub fn admin_request(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
	let builder = Request::builder()
		.method(method)
		.uri(uri)
		.header("x-api-key", TEST_API_KEY);

	match body {
		Some(body) => builder
			.header("content-type", "application/json")
			.body(Body::from(body.to_string()))
			.unwrap(),
		None => builder.body(Body::empty()).unwrap(),
	}
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
	Request::builder()
		.method(method)
		.uri(uri)
		.header("content-type", "application/json")
		.body(Body::from(body.to_string()))
		.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
	let bytes = response.into_body().collect().await.unwrap().to_bytes();
	serde_json::from_slice(&bytes).unwrap()
}
