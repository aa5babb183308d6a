// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::environment::EnvironmentId;
use crate::rule::Rule;

/// Unique identifier for a feature flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlagId(pub Uuid);

impl FlagId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for FlagId {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Display for FlagId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl std::str::FromStr for FlagId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self(Uuid::parse_str(s)?))
	}
}

/// Unique identifier for a per-environment flag configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlagConfigId(pub Uuid);

impl FlagConfigId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for FlagConfigId {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Display for FlagConfigId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl std::str::FromStr for FlagConfigId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self(Uuid::parse_str(s)?))
	}
}

/// Unique identifier for a flag variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariantId(pub Uuid);

impl VariantId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for VariantId {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Display for VariantId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl std::str::FromStr for VariantId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self(Uuid::parse_str(s)?))
	}
}

/// The value type of a flag, controlling how variant values are parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagType {
	Boolean,
	String,
	Number,
	Json,
}

impl FlagType {
	pub fn as_str(&self) -> &'static str {
		match self {
			FlagType::Boolean => "boolean",
			FlagType::String => "string",
			FlagType::Number => "number",
			FlagType::Json => "json",
		}
	}
}

impl std::fmt::Display for FlagType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for FlagType {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"boolean" => Ok(FlagType::Boolean),
			"string" => Ok(FlagType::String),
			"number" => Ok(FlagType::Number),
			"json" => Ok(FlagType::Json),
			other => Err(format!("unknown flag type: {other}")),
		}
	}
}

/// A feature flag. Per-environment behavior lives in [`FlagConfig`];
/// the flag row itself carries identity, type, and the active bit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flag {
	pub id: FlagId,
	/// Globally unique key: `[a-z0-9_]+`
	pub key: String,
	/// Human-readable name
	pub name: String,
	pub description: Option<String>,
	pub flag_type: FlagType,
	/// Cleared on soft delete; inactive flags are invisible to evaluation.
	pub active: bool,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

impl Flag {
	/// Validates the flag key format.
	///
	/// Valid keys are 1-100 characters of lowercase alphanumerics and
	/// underscores: `[a-z0-9_]+`.
	pub fn validate_key(key: &str) -> bool {
		if key.is_empty() || key.len() > 100 {
			return false;
		}

		key
			.chars()
			.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
	}
}

/// A variant of a feature flag. The raw `value` is an opaque string parsed
/// according to the owning flag's type at evaluation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
	pub id: VariantId,
	pub flag_id: FlagId,
	/// Unique within the flag, e.g. "true", "control", "treatment_a"
	pub key: String,
	pub value: String,
	/// For weighted distribution among in-rollout users, 0-100
	pub weight: u32,
}

/// Per-environment configuration for a flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagConfig {
	pub id: FlagConfigId,
	pub flag_id: FlagId,
	pub environment_id: EnvironmentId,
	pub enabled: bool,
	/// Variant key used when nothing else selects one
	pub default_variant: String,
	/// Fraction of user buckets admitted, 0-100
	pub rollout_percentage: u32,
	/// Opaque per-environment configuration blob
	pub config: serde_json::Value,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

/// The pre-joined `{flag, config, variants, rules}` tuple for one
/// (flag, environment) pair. This is the unit the config cache stores and
/// the SDK ships; it must round-trip equal through serde_json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagSnapshot {
	pub flag: Flag,
	pub config: FlagConfig,
	pub variants: Vec<Variant>,
	pub rules: Vec<Rule>,
}

impl FlagSnapshot {
	/// Cache key for a (flag, environment) pair: `flag_config:<key>:<env>`.
	pub fn cache_key(flag_key: &str, environment: &str) -> String {
		format!("flag_config:{flag_key}:{environment}")
	}
}
