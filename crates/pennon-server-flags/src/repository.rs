// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::instrument;
use uuid::Uuid;

use pennon_flags_core::{
	Environment, Flag, FlagConfig, FlagId, FlagSnapshot, FlagType, Rule, RuleKind, RuleOperator,
	Variant,
};

use crate::audit::{AuditAction, AuditEntry};
use crate::error::{FlagsServerError, Result};

/// Upper bound on page size for flag listings.
pub const MAX_PAGE_SIZE: u32 = 100;

/// A variant supplied at flag creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantSpec {
	pub key: String,
	pub value: String,
	#[serde(default)]
	pub weight: u32,
}

/// Request to create a flag. When `variants` is absent the store
/// materializes the default boolean pair (`true`/`false`, weight 50 each).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateFlagRequest {
	pub key: String,
	pub name: String,
	#[serde(default)]
	pub description: Option<String>,
	pub flag_type: FlagType,
	#[serde(default)]
	pub variants: Option<Vec<VariantSpec>>,
}

/// A rule supplied on config update. Rules are replaced wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
	pub rule_type: RuleKind,
	#[serde(default)]
	pub attribute_name: Option<String>,
	#[serde(default)]
	pub operator: Option<RuleOperator>,
	#[serde(default)]
	pub attribute_value: Option<String>,
	#[serde(default)]
	pub percentage: Option<u32>,
	#[serde(default)]
	pub variant_key: Option<String>,
	#[serde(default)]
	pub priority: i32,
}

/// Partial update of a flag config. Only present keys are modified; a
/// present `rules` key deletes and re-inserts the config's rules in the
/// same transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlagConfigPatch {
	#[serde(default)]
	pub enabled: Option<bool>,
	#[serde(default)]
	pub default_variant: Option<String>,
	#[serde(default)]
	pub rollout_percentage: Option<u32>,
	#[serde(default)]
	pub config: Option<serde_json::Value>,
	#[serde(default)]
	pub rules: Option<Vec<RuleSpec>>,
}

/// Partial update of flag metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlagPatch {
	#[serde(default)]
	pub name: Option<String>,
	#[serde(default)]
	pub description: Option<String>,
}

/// Repository for the authoritative flag state.
#[async_trait]
pub trait FlagsRepository: Send + Sync {
	/// Atomically creates the flag, its variants, and one config per known
	/// environment. Fails with `Conflict` on key collision; partial creates
	/// are impossible.
	async fn create_flag(&self, req: &CreateFlagRequest, actor: &str) -> Result<Flag>;

	/// Returns an active flag by key.
	async fn get_flag(&self, key: &str) -> Result<Option<Flag>>;

	/// Paginated listing; `per_page` is clamped to [`MAX_PAGE_SIZE`].
	/// Returns the page and the total count.
	async fn list_flags(&self, page: u32, per_page: u32, active_only: bool)
		-> Result<(Vec<Flag>, u64)>;

	/// Updates flag metadata.
	async fn update_flag(&self, key: &str, patch: &FlagPatch, actor: &str) -> Result<Flag>;

	/// Returns the pre-joined snapshot for one (flag, environment) pair, or
	/// `None` when the flag is inactive or unknown.
	async fn get_flag_config(&self, flag_key: &str, environment: &str)
		-> Result<Option<FlagSnapshot>>;

	/// Applies a partial config update; `NotFound` when the pair is absent.
	async fn update_flag_config(
		&self,
		flag_key: &str,
		environment: &str,
		patch: &FlagConfigPatch,
		actor: &str,
	) -> Result<FlagConfig>;

	/// Shorthand for an enabled-bit update.
	async fn toggle_flag(
		&self,
		flag_key: &str,
		environment: &str,
		enabled: bool,
		actor: &str,
	) -> Result<FlagConfig>;

	/// Soft delete: clears the active bit. Returns false when already gone.
	async fn delete_flag(&self, flag_key: &str, actor: &str) -> Result<bool>;

	/// Disables the flag in every environment in one transaction and writes
	/// a high-severity audit entry carrying the operator's reason. Returns
	/// the affected environment names.
	async fn kill_flag(&self, flag_key: &str, actor: &str, reason: &str) -> Result<Vec<String>>;

	async fn list_environments(&self) -> Result<Vec<Environment>>;

	async fn count_flags(&self, active_only: bool) -> Result<u64>;

	/// Full snapshot set for an environment, for the SDK config endpoint.
	async fn list_snapshots(&self, environment: &str) -> Result<Vec<FlagSnapshot>>;

	/// Change fingerprint for an environment's flag state; the SDK config
	/// endpoint uses it as the ETag.
	async fn environment_fingerprint(&self, environment: &str) -> Result<String>;

	/// Records one evaluation for reporting. Callers invoke this
	/// fire-and-forget off the hot path.
	async fn record_evaluation(
		&self,
		flag_id: FlagId,
		flag_key: &str,
		environment: &str,
		variant: &str,
		reason: &str,
	) -> Result<()>;

	/// Cheap store liveness probe.
	async fn health_check(&self) -> Result<()>;
}

/// Postgres implementation of the flags repository.
#[derive(Clone)]
pub struct PgFlagsRepository {
	pool: PgPool,
}

impl PgFlagsRepository {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}

	async fn write_audit(tx: &mut Transaction<'_, Postgres>, entry: &AuditEntry) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO audit_log (id, entity_type, entity_id, action, actor, diff, severity, created_at)
			VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
			"#,
		)
		.bind(entry.id)
		.bind(&entry.entity_type)
		.bind(&entry.entity_id)
		.bind(entry.action.as_str())
		.bind(&entry.actor)
		.bind(&entry.diff)
		.bind(entry.severity.as_str())
		.bind(entry.created_at)
		.execute(&mut **tx)
		.await?;

		Ok(())
	}

	async fn variants_for(&self, flag_id: FlagId) -> Result<Vec<Variant>> {
		let rows = sqlx::query_as::<_, VariantRow>(
			r#"
			SELECT id, flag_id, key, value, weight
			FROM flag_variants
			WHERE flag_id = $1
			ORDER BY key ASC
			"#,
		)
		.bind(flag_id.0)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(TryInto::try_into).collect()
	}

	async fn rules_for(&self, config_id: Uuid) -> Result<Vec<Rule>> {
		let rows = sqlx::query_as::<_, RuleRow>(
			r#"
			SELECT id, flag_config_id, rule_type, attribute_name, operator,
			       attribute_value, percentage, variant_key, priority
			FROM rollout_rules
			WHERE flag_config_id = $1
			ORDER BY priority ASC, id ASC
			"#,
		)
		.bind(config_id)
		.fetch_all(&self.pool)
		.await?;

		rows.into_iter().map(TryInto::try_into).collect()
	}

	/// Shared body of `update_flag_config` and `toggle_flag`; they differ
	/// only in the audit action they record.
	async fn apply_config_patch(
		&self,
		flag_key: &str,
		environment: &str,
		patch: &FlagConfigPatch,
		actor: &str,
		action: AuditAction,
	) -> Result<FlagConfig> {
		if let Some(pct) = patch.rollout_percentage {
			if pct > 100 {
				return Err(FlagsServerError::Validation(format!(
					"rollout percentage out of range: {pct}"
				)));
			}
		}

		let mut tx = self.pool.begin().await?;

		let config_row = sqlx::query_as::<_, ConfigRow>(
			r#"
			SELECT fc.id, fc.flag_id, fc.environment_id, fc.enabled, fc.default_variant,
			       fc.rollout_percentage, fc.config, fc.created_at, fc.updated_at
			FROM flag_configs fc
			JOIN feature_flags f ON f.id = fc.flag_id
			JOIN environments e ON e.id = fc.environment_id
			WHERE f.key = $1 AND f.active AND e.name = $2
			FOR UPDATE
			"#,
		)
		.bind(flag_key)
		.bind(environment)
		.fetch_optional(&mut *tx)
		.await?;

		let before: FlagConfig = match config_row {
			Some(row) => row.try_into()?,
			None => {
				return Err(FlagsServerError::NotFound(format!(
					"no config for flag {flag_key} in {environment}"
				)));
			}
		};

		let enabled = patch.enabled.unwrap_or(before.enabled);
		let default_variant = patch
			.default_variant
			.clone()
			.unwrap_or_else(|| before.default_variant.clone());
		let rollout = patch.rollout_percentage.unwrap_or(before.rollout_percentage);
		let config_blob = patch.config.clone().unwrap_or_else(|| before.config.clone());
		let now = Utc::now();

		sqlx::query(
			r#"
			UPDATE flag_configs
			SET enabled = $1, default_variant = $2, rollout_percentage = $3,
			    config = $4, updated_at = $5
			WHERE id = $6
			"#,
		)
		.bind(enabled)
		.bind(&default_variant)
		.bind(rollout as i32)
		.bind(&config_blob)
		.bind(now)
		.bind(before.id.0)
		.execute(&mut *tx)
		.await?;

		// Rules are replaced wholesale, never patched in place.
		if let Some(rules) = &patch.rules {
			sqlx::query("DELETE FROM rollout_rules WHERE flag_config_id = $1")
				.bind(before.id.0)
				.execute(&mut *tx)
				.await?;

			for spec in rules {
				if let Some(pct) = spec.percentage {
					if pct > 100 {
						return Err(FlagsServerError::Validation(format!(
							"rule percentage out of range: {pct}"
						)));
					}
				}
				sqlx::query(
					r#"
					INSERT INTO rollout_rules (id, flag_config_id, rule_type, attribute_name,
					                           operator, attribute_value, percentage, variant_key, priority)
					VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
					"#,
				)
				.bind(Uuid::new_v4())
				.bind(before.id.0)
				.bind(spec.rule_type.as_str())
				.bind(&spec.attribute_name)
				.bind(spec.operator.map(|op| op.as_str()))
				.bind(&spec.attribute_value)
				.bind(spec.percentage.map(|p| p as i32))
				.bind(&spec.variant_key)
				.bind(spec.priority)
				.execute(&mut *tx)
				.await?;
			}
		}

		let entry = AuditEntry::new(
			"flag_config",
			before.id.to_string(),
			action,
			actor,
			json!({
				"flag_key": flag_key,
				"environment": environment,
				"before": {
					"enabled": before.enabled,
					"default_variant": before.default_variant,
					"rollout_percentage": before.rollout_percentage,
				},
				"after": {
					"enabled": enabled,
					"default_variant": default_variant,
					"rollout_percentage": rollout,
				},
				"rules_replaced": patch.rules.as_ref().map(|r| r.len()),
			}),
		);
		Self::write_audit(&mut tx, &entry).await?;

		tx.commit().await?;

		Ok(FlagConfig {
			id: before.id,
			flag_id: before.flag_id,
			environment_id: before.environment_id,
			enabled,
			default_variant,
			rollout_percentage: rollout,
			config: config_blob,
			created_at: before.created_at,
			updated_at: now,
		})
	}
}

#[async_trait]
impl FlagsRepository for PgFlagsRepository {
	#[instrument(skip(self, req), fields(flag_key = %req.key))]
	async fn create_flag(&self, req: &CreateFlagRequest, actor: &str) -> Result<Flag> {
		if !Flag::validate_key(&req.key) {
			return Err(FlagsServerError::Validation(format!(
				"invalid flag key: {}",
				req.key
			)));
		}

		let mut tx = self.pool.begin().await?;

		let existing: Option<(Uuid,)> =
			sqlx::query_as("SELECT id FROM feature_flags WHERE key = $1")
				.bind(&req.key)
				.fetch_optional(&mut *tx)
				.await?;
		if existing.is_some() {
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

		sqlx::query(
			r#"
			INSERT INTO feature_flags (id, key, name, description, flag_type, active, created_at, updated_at)
			VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
			"#,
		)
		.bind(flag.id.0)
		.bind(&flag.key)
		.bind(&flag.name)
		.bind(&flag.description)
		.bind(flag.flag_type.as_str())
		.bind(flag.active)
		.bind(flag.created_at)
		.bind(flag.updated_at)
		.execute(&mut *tx)
		.await?;

		// Supplied variants, or the default boolean pair.
		let default_pair = vec![
			VariantSpec {
				key: "true".to_string(),
				value: "true".to_string(),
				weight: 50,
			},
			VariantSpec {
				key: "false".to_string(),
				value: "false".to_string(),
				weight: 50,
			},
		];
		let specs = req.variants.as_ref().unwrap_or(&default_pair);
		for spec in specs {
			if spec.weight > 100 {
				return Err(FlagsServerError::Validation(format!(
					"variant weight out of range: {}",
					spec.weight
				)));
			}
			sqlx::query(
				r#"
				INSERT INTO flag_variants (id, flag_id, key, value, weight)
				VALUES ($1, $2, $3, $4, $5)
				"#,
			)
			.bind(Uuid::new_v4())
			.bind(flag.id.0)
			.bind(&spec.key)
			.bind(&spec.value)
			.bind(spec.weight as i32)
			.execute(&mut *tx)
			.await?;
		}

		// One config per known environment; a partial create is forbidden,
		// and the transaction guarantees it.
		let environments = sqlx::query_as::<_, EnvironmentRow>(
			"SELECT id, name, created_at FROM environments ORDER BY created_at ASC",
		)
		.fetch_all(&mut *tx)
		.await?;

		for env in &environments {
			sqlx::query(
				r#"
				INSERT INTO flag_configs (id, flag_id, environment_id, enabled, default_variant,
				                          rollout_percentage, config, created_at, updated_at)
				VALUES ($1, $2, $3, false, 'false', 0, '{}'::jsonb, $4, $5)
				"#,
			)
			.bind(Uuid::new_v4())
			.bind(flag.id.0)
			.bind(env.id)
			.bind(now)
			.bind(now)
			.execute(&mut *tx)
			.await?;
		}

		let entry = AuditEntry::new(
			"flag",
			flag.id.to_string(),
			AuditAction::FlagCreated,
			actor,
			json!({
				"after": {
					"key": flag.key,
					"name": flag.name,
					"flag_type": flag.flag_type.as_str(),
					"variants": specs.len(),
					"environments": environments.len(),
				}
			}),
		);
		Self::write_audit(&mut tx, &entry).await?;

		tx.commit().await?;

		tracing::info!(flag_id = %flag.id, flag_key = %flag.key, "flag created");
		Ok(flag)
	}

	#[instrument(skip(self), fields(flag_key = %key))]
	async fn get_flag(&self, key: &str) -> Result<Option<Flag>> {
		let row = sqlx::query_as::<_, FlagRow>(
			r#"
			SELECT id, key, name, description, flag_type, active, created_at, updated_at
			FROM feature_flags
			WHERE key = $1 AND active
			"#,
		)
		.bind(key)
		.fetch_optional(&self.pool)
		.await?;

		row.map(TryInto::try_into).transpose()
	}

	#[instrument(skip(self))]
	async fn list_flags(
		&self,
		page: u32,
		per_page: u32,
		active_only: bool,
	) -> Result<(Vec<Flag>, u64)> {
		let per_page = per_page.clamp(1, MAX_PAGE_SIZE);
		let page = page.max(1);
		let offset = (page - 1) * per_page;

		let rows = if active_only {
			sqlx::query_as::<_, FlagRow>(
				r#"
				SELECT id, key, name, description, flag_type, active, created_at, updated_at
				FROM feature_flags
				WHERE active
				ORDER BY key ASC
				LIMIT $1 OFFSET $2
				"#,
			)
			.bind(per_page as i64)
			.bind(offset as i64)
			.fetch_all(&self.pool)
			.await?
		} else {
			sqlx::query_as::<_, FlagRow>(
				r#"
				SELECT id, key, name, description, flag_type, active, created_at, updated_at
				FROM feature_flags
				ORDER BY key ASC
				LIMIT $1 OFFSET $2
				"#,
			)
			.bind(per_page as i64)
			.bind(offset as i64)
			.fetch_all(&self.pool)
			.await?
		};

		let total = self.count_flags(active_only).await?;
		let flags = rows
			.into_iter()
			.map(TryInto::try_into)
			.collect::<Result<Vec<_>>>()?;

		Ok((flags, total))
	}

	#[instrument(skip(self, patch), fields(flag_key = %key))]
	async fn update_flag(&self, key: &str, patch: &FlagPatch, actor: &str) -> Result<Flag> {
		let mut tx = self.pool.begin().await?;

		let row = sqlx::query_as::<_, FlagRow>(
			r#"
			SELECT id, key, name, description, flag_type, active, created_at, updated_at
			FROM feature_flags
			WHERE key = $1 AND active
			FOR UPDATE
			"#,
		)
		.bind(key)
		.fetch_optional(&mut *tx)
		.await?;

		let before: Flag = match row {
			Some(row) => row.try_into()?,
			None => return Err(FlagsServerError::NotFound(format!("flag not found: {key}"))),
		};

		let name = patch.name.clone().unwrap_or_else(|| before.name.clone());
		let description = patch
			.description
			.clone()
			.or_else(|| before.description.clone());
		let now = Utc::now();

		sqlx::query(
			r#"
			UPDATE feature_flags
			SET name = $1, description = $2, updated_at = $3
			WHERE id = $4
			"#,
		)
		.bind(&name)
		.bind(&description)
		.bind(now)
		.bind(before.id.0)
		.execute(&mut *tx)
		.await?;

		let entry = AuditEntry::new(
			"flag",
			before.id.to_string(),
			AuditAction::FlagUpdated,
			actor,
			json!({
				"before": {"name": before.name, "description": before.description},
				"after": {"name": name, "description": description},
			}),
		);
		Self::write_audit(&mut tx, &entry).await?;

		tx.commit().await?;

		Ok(Flag {
			name,
			description,
			updated_at: now,
			..before
		})
	}

	#[instrument(skip(self), fields(flag_key = %flag_key, environment = %environment))]
	async fn get_flag_config(
		&self,
		flag_key: &str,
		environment: &str,
	) -> Result<Option<FlagSnapshot>> {
		let flag = match self.get_flag(flag_key).await? {
			Some(flag) => flag,
			None => return Ok(None),
		};

		let config_row = sqlx::query_as::<_, ConfigRow>(
			r#"
			SELECT fc.id, fc.flag_id, fc.environment_id, fc.enabled, fc.default_variant,
			       fc.rollout_percentage, fc.config, fc.created_at, fc.updated_at
			FROM flag_configs fc
			JOIN environments e ON e.id = fc.environment_id
			WHERE fc.flag_id = $1 AND e.name = $2
			"#,
		)
		.bind(flag.id.0)
		.bind(environment)
		.fetch_optional(&self.pool)
		.await?;

		let config: FlagConfig = match config_row {
			Some(row) => row.try_into()?,
			None => return Ok(None),
		};

		let variants = self.variants_for(flag.id).await?;
		let rules = self.rules_for(config.id.0).await?;

		Ok(Some(FlagSnapshot {
			flag,
			config,
			variants,
			rules,
		}))
	}

	#[instrument(skip(self, patch), fields(flag_key = %flag_key, environment = %environment))]
	async fn update_flag_config(
		&self,
		flag_key: &str,
		environment: &str,
		patch: &FlagConfigPatch,
		actor: &str,
	) -> Result<FlagConfig> {
		self
			.apply_config_patch(flag_key, environment, patch, actor, AuditAction::ConfigUpdated)
			.await
	}

	#[instrument(skip(self), fields(flag_key = %flag_key, environment = %environment, enabled))]
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
			.apply_config_patch(flag_key, environment, &patch, actor, AuditAction::FlagToggled)
			.await
	}

	#[instrument(skip(self), fields(flag_key = %flag_key))]
	async fn delete_flag(&self, flag_key: &str, actor: &str) -> Result<bool> {
		let mut tx = self.pool.begin().await?;

		let row: Option<(Uuid,)> =
			sqlx::query_as("SELECT id FROM feature_flags WHERE key = $1 AND active FOR UPDATE")
				.bind(flag_key)
				.fetch_optional(&mut *tx)
				.await?;

		let Some((flag_id,)) = row else {
			return Ok(false);
		};

		sqlx::query("UPDATE feature_flags SET active = false, updated_at = $1 WHERE id = $2")
			.bind(Utc::now())
			.bind(flag_id)
			.execute(&mut *tx)
			.await?;

		let entry = AuditEntry::new(
			"flag",
			flag_id.to_string(),
			AuditAction::FlagDeleted,
			actor,
			json!({"before": {"active": true}, "after": {"active": false}, "key": flag_key}),
		);
		Self::write_audit(&mut tx, &entry).await?;

		tx.commit().await?;
		Ok(true)
	}

	#[instrument(skip(self, reason), fields(flag_key = %flag_key))]
	async fn kill_flag(&self, flag_key: &str, actor: &str, reason: &str) -> Result<Vec<String>> {
		let mut tx = self.pool.begin().await?;

		let row: Option<(Uuid,)> =
			sqlx::query_as("SELECT id FROM feature_flags WHERE key = $1 AND active FOR UPDATE")
				.bind(flag_key)
				.fetch_optional(&mut *tx)
				.await?;

		let Some((flag_id,)) = row else {
			return Err(FlagsServerError::NotFound(format!(
				"flag not found: {flag_key}"
			)));
		};

		let environments: Vec<(String,)> = sqlx::query_as(
			r#"
			SELECT e.name
			FROM flag_configs fc
			JOIN environments e ON e.id = fc.environment_id
			WHERE fc.flag_id = $1
			ORDER BY e.name ASC
			"#,
		)
		.bind(flag_id)
		.fetch_all(&mut *tx)
		.await?;

		sqlx::query("UPDATE flag_configs SET enabled = false, updated_at = $1 WHERE flag_id = $2")
			.bind(Utc::now())
			.bind(flag_id)
			.execute(&mut *tx)
			.await?;

		let names: Vec<String> = environments.into_iter().map(|(n,)| n).collect();
		let entry = AuditEntry::new(
			"flag",
			flag_id.to_string(),
			AuditAction::KillSwitch,
			actor,
			json!({
				"key": flag_key,
				"reason": reason,
				"environments": names,
			}),
		);
		Self::write_audit(&mut tx, &entry).await?;

		tx.commit().await?;

		tracing::warn!(flag_key, reason, "kill switch activated");
		Ok(names)
	}

	#[instrument(skip(self))]
	async fn list_environments(&self) -> Result<Vec<Environment>> {
		let rows = sqlx::query_as::<_, EnvironmentRow>(
			"SELECT id, name, created_at FROM environments ORDER BY created_at ASC",
		)
		.fetch_all(&self.pool)
		.await?;

		Ok(rows.into_iter().map(Into::into).collect())
	}

	#[instrument(skip(self))]
	async fn count_flags(&self, active_only: bool) -> Result<u64> {
		let (count,): (i64,) = if active_only {
			sqlx::query_as("SELECT COUNT(*) FROM feature_flags WHERE active")
				.fetch_one(&self.pool)
				.await?
		} else {
			sqlx::query_as("SELECT COUNT(*) FROM feature_flags")
				.fetch_one(&self.pool)
				.await?
		};

		Ok(count as u64)
	}

	#[instrument(skip(self), fields(environment = %environment))]
	async fn list_snapshots(&self, environment: &str) -> Result<Vec<FlagSnapshot>> {
		let flags = sqlx::query_as::<_, FlagRow>(
			r#"
			SELECT id, key, name, description, flag_type, active, created_at, updated_at
			FROM feature_flags
			WHERE active
			ORDER BY key ASC
			"#,
		)
		.fetch_all(&self.pool)
		.await?;

		let mut snapshots = Vec::with_capacity(flags.len());
		for row in flags {
			let flag: Flag = row.try_into()?;
			if let Some(snapshot) = self.get_flag_config(&flag.key, environment).await? {
				snapshots.push(snapshot);
			}
		}

		Ok(snapshots)
	}

	#[instrument(skip(self), fields(environment = %environment))]
	async fn environment_fingerprint(&self, environment: &str) -> Result<String> {
		use sha2::{Digest, Sha256};

		let row: (i64, Option<DateTime<Utc>>) = sqlx::query_as(
			r#"
			SELECT COUNT(*), MAX(GREATEST(fc.updated_at, f.updated_at))
			FROM flag_configs fc
			JOIN feature_flags f ON f.id = fc.flag_id
			JOIN environments e ON e.id = fc.environment_id
			WHERE e.name = $1 AND f.active
			"#,
		)
		.bind(environment)
		.fetch_one(&self.pool)
		.await?;

		let basis = format!(
			"{environment}:{}:{}",
			row.0,
			row.1.map(|t| t.to_rfc3339()).unwrap_or_default()
		);
		Ok(hex::encode(Sha256::digest(basis.as_bytes())))
	}

	#[instrument(skip(self), fields(flag_key = %flag_key, environment = %environment))]
	async fn record_evaluation(
		&self,
		flag_id: FlagId,
		flag_key: &str,
		environment: &str,
		variant: &str,
		reason: &str,
	) -> Result<()> {
		sqlx::query(
			r#"
			INSERT INTO flag_evaluations (id, flag_id, flag_key, environment, variant, reason, created_at)
			VALUES ($1, $2, $3, $4, $5, $6, $7)
			"#,
		)
		.bind(Uuid::new_v4())
		.bind(flag_id.0)
		.bind(flag_key)
		.bind(environment)
		.bind(variant)
		.bind(reason)
		.bind(Utc::now())
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[instrument(skip(self))]
	async fn health_check(&self) -> Result<()> {
		sqlx::query("SELECT 1").execute(&self.pool).await?;
		Ok(())
	}
}

// Database row types for sqlx.

#[derive(sqlx::FromRow)]
struct FlagRow {
	id: Uuid,
	key: String,
	name: String,
	description: Option<String>,
	flag_type: String,
	active: bool,
	created_at: DateTime<Utc>,
	updated_at: DateTime<Utc>,
}

impl TryFrom<FlagRow> for Flag {
	type Error = FlagsServerError;

	fn try_from(row: FlagRow) -> Result<Self> {
		Ok(Flag {
			id: FlagId(row.id),
			key: row.key,
			name: row.name,
			description: row.description,
			flag_type: row
				.flag_type
				.parse::<FlagType>()
				.map_err(FlagsServerError::Internal)?,
			active: row.active,
			created_at: row.created_at,
			updated_at: row.updated_at,
		})
	}
}

#[derive(sqlx::FromRow)]
struct EnvironmentRow {
	id: Uuid,
	name: String,
	created_at: DateTime<Utc>,
}

impl From<EnvironmentRow> for Environment {
	fn from(row: EnvironmentRow) -> Self {
		Environment {
			id: pennon_flags_core::EnvironmentId(row.id),
			name: row.name,
			created_at: row.created_at,
		}
	}
}

#[derive(sqlx::FromRow)]
struct ConfigRow {
	id: Uuid,
	flag_id: Uuid,
	environment_id: Uuid,
	enabled: bool,
	default_variant: String,
	rollout_percentage: i32,
	config: serde_json::Value,
	created_at: DateTime<Utc>,
	updated_at: DateTime<Utc>,
}

impl TryFrom<ConfigRow> for FlagConfig {
	type Error = FlagsServerError;

	fn try_from(row: ConfigRow) -> Result<Self> {
		if !(0..=100).contains(&row.rollout_percentage) {
			return Err(FlagsServerError::Internal(format!(
				"rollout percentage out of range in store: {}",
				row.rollout_percentage
			)));
		}

		Ok(FlagConfig {
			id: pennon_flags_core::FlagConfigId(row.id),
			flag_id: FlagId(row.flag_id),
			environment_id: pennon_flags_core::EnvironmentId(row.environment_id),
			enabled: row.enabled,
			default_variant: row.default_variant,
			rollout_percentage: row.rollout_percentage as u32,
			config: row.config,
			created_at: row.created_at,
			updated_at: row.updated_at,
		})
	}
}

#[derive(sqlx::FromRow)]
struct VariantRow {
	id: Uuid,
	flag_id: Uuid,
	key: String,
	value: String,
	weight: i32,
}

impl TryFrom<VariantRow> for Variant {
	type Error = FlagsServerError;

	fn try_from(row: VariantRow) -> Result<Self> {
		Ok(Variant {
			id: pennon_flags_core::VariantId(row.id),
			flag_id: FlagId(row.flag_id),
			key: row.key,
			value: row.value,
			weight: row.weight.max(0) as u32,
		})
	}
}

#[derive(sqlx::FromRow)]
struct RuleRow {
	id: Uuid,
	flag_config_id: Uuid,
	rule_type: String,
	attribute_name: Option<String>,
	operator: Option<String>,
	attribute_value: Option<String>,
	percentage: Option<i32>,
	variant_key: Option<String>,
	priority: i32,
}

impl TryFrom<RuleRow> for Rule {
	type Error = FlagsServerError;

	fn try_from(row: RuleRow) -> Result<Self> {
		Ok(Rule {
			id: pennon_flags_core::RuleId(row.id),
			flag_config_id: pennon_flags_core::FlagConfigId(row.flag_config_id),
			rule_type: row
				.rule_type
				.parse::<RuleKind>()
				.map_err(FlagsServerError::Internal)?,
			attribute_name: row.attribute_name,
			operator: row
				.operator
				.map(|op| op.parse::<RuleOperator>().map_err(FlagsServerError::Internal))
				.transpose()?,
			attribute_value: row.attribute_value,
			percentage: row.percentage.map(|p| p.max(0) as u32),
			variant_key: row.variant_key,
			priority: row.priority,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_page_size_is_clamped() {
		assert_eq!(500u32.clamp(1, MAX_PAGE_SIZE), 100);
		assert_eq!(0u32.clamp(1, MAX_PAGE_SIZE), 1);
		assert_eq!(25u32.clamp(1, MAX_PAGE_SIZE), 25);
	}

	#[test]
	fn test_config_patch_deserializes_partial_bodies() {
		let patch: FlagConfigPatch =
			serde_json::from_str(r#"{"enabled": true, "rollout_percentage": 25}"#).unwrap();
		assert_eq!(patch.enabled, Some(true));
		assert_eq!(patch.rollout_percentage, Some(25));
		assert!(patch.default_variant.is_none());
		assert!(patch.rules.is_none());

		let with_rules: FlagConfigPatch = serde_json::from_str(
			r#"{"rules": [{"rule_type": "attribute", "attribute_name": "country",
			     "operator": "equals", "attribute_value": "US", "priority": 10,
			     "variant_key": "true"}]}"#,
		)
		.unwrap();
		let rules = with_rules.rules.unwrap();
		assert_eq!(rules.len(), 1);
		assert_eq!(rules[0].rule_type, RuleKind::Attribute);
		assert_eq!(rules[0].operator, Some(RuleOperator::Equals));
	}

	#[test]
	fn test_create_request_defaults_variants_to_none() {
		let req: CreateFlagRequest = serde_json::from_str(
			r#"{"key": "dark_mode", "name": "Dark Mode", "flag_type": "boolean"}"#,
		)
		.unwrap();
		assert!(req.variants.is_none());
		assert_eq!(req.flag_type, FlagType::Boolean);
	}
}
