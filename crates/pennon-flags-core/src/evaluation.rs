// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::bucket::ANONYMOUS_ID;

/// Context passed by callers for flag evaluation. Runtime-only; never
/// persisted. Custom attributes override base attributes on name collision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserContext {
	pub user_id: Option<String>,
	#[serde(default)]
	pub attributes: HashMap<String, serde_json::Value>,
	#[serde(default)]
	pub custom_attributes: HashMap<String, serde_json::Value>,
}

impl UserContext {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
		self.user_id = Some(user_id.into());
		self
	}

	pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
		self.attributes.insert(key.into(), value);
		self
	}

	pub fn with_custom_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
		self.custom_attributes.insert(key.into(), value);
		self
	}

	/// Looks up an attribute in the merged view, custom attributes winning.
	pub fn attribute(&self, name: &str) -> Option<&serde_json::Value> {
		self
			.custom_attributes
			.get(name)
			.or_else(|| self.attributes.get(name))
	}

	/// The stable identifier used for bucketing: the user id, or the
	/// literal `anonymous` when absent.
	pub fn bucket_id(&self) -> &str {
		self.user_id.as_deref().unwrap_or(ANONYMOUS_ID)
	}
}

/// The reason attached to every evaluation outcome. Reason tags are part of
/// the wire contract and surfaced in metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationReason {
	FlagDisabled,
	ZeroPercentage,
	PercentageMatch,
	PercentageNoMatch,
	InvalidAttributeRule,
	AttributeNotFound,
	AttributeMatch,
	AttributeNoMatch,
	InvalidUserIdRule,
	UserIdMatch,
	UserIdNoMatch,
	ZeroRollout,
	FullRollout,
	RolloutMatch,
	RolloutNoMatch,
	UnknownRuleType,
	FlagNotFound,
	InvalidContext,
	EvaluationError,
}

impl EvaluationReason {
	pub fn as_str(&self) -> &'static str {
		match self {
			EvaluationReason::FlagDisabled => "flag_disabled",
			EvaluationReason::ZeroPercentage => "zero_percentage",
			EvaluationReason::PercentageMatch => "percentage_match",
			EvaluationReason::PercentageNoMatch => "percentage_no_match",
			EvaluationReason::InvalidAttributeRule => "invalid_attribute_rule",
			EvaluationReason::AttributeNotFound => "attribute_not_found",
			EvaluationReason::AttributeMatch => "attribute_match",
			EvaluationReason::AttributeNoMatch => "attribute_no_match",
			EvaluationReason::InvalidUserIdRule => "invalid_user_id_rule",
			EvaluationReason::UserIdMatch => "user_id_match",
			EvaluationReason::UserIdNoMatch => "user_id_no_match",
			EvaluationReason::ZeroRollout => "zero_rollout",
			EvaluationReason::FullRollout => "full_rollout",
			EvaluationReason::RolloutMatch => "rollout_match",
			EvaluationReason::RolloutNoMatch => "rollout_no_match",
			EvaluationReason::UnknownRuleType => "unknown_rule_type",
			EvaluationReason::FlagNotFound => "flag_not_found",
			EvaluationReason::InvalidContext => "invalid_context",
			EvaluationReason::EvaluationError => "evaluation_error",
		}
	}
}

impl std::fmt::Display for EvaluationReason {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// The rule engine's verdict for one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
	pub enabled: bool,
	pub variant: String,
	pub reason: EvaluationReason,
}

impl Decision {
	pub fn new(enabled: bool, variant: impl Into<String>, reason: EvaluationReason) -> Self {
		Self {
			enabled,
			variant: variant.into(),
			reason,
		}
	}

	/// A disabled decision carrying the config's default variant.
	pub fn off(variant: impl Into<String>, reason: EvaluationReason) -> Self {
		Self::new(false, variant, reason)
	}

	/// An enabled decision for the given variant.
	pub fn on(variant: impl Into<String>, reason: EvaluationReason) -> Self {
		Self::new(true, variant, reason)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_custom_attributes_override_base() {
		let ctx = UserContext::new()
			.with_attribute("plan", json!("free"))
			.with_attribute("country", json!("US"))
			.with_custom_attribute("plan", json!("enterprise"));

		assert_eq!(ctx.attribute("plan"), Some(&json!("enterprise")));
		assert_eq!(ctx.attribute("country"), Some(&json!("US")));
		assert_eq!(ctx.attribute("missing"), None);
	}

	#[test]
	fn test_bucket_id_falls_back_to_anonymous() {
		assert_eq!(UserContext::new().bucket_id(), "anonymous");
		assert_eq!(UserContext::new().with_user_id("u1").bucket_id(), "u1");
	}

	#[test]
	fn test_reason_serializes_snake_case() {
		let json = serde_json::to_string(&EvaluationReason::RolloutNoMatch).unwrap();
		assert_eq!(json, "\"rollout_no_match\"");

		let parsed: EvaluationReason = serde_json::from_str("\"flag_disabled\"").unwrap();
		assert_eq!(parsed, EvaluationReason::FlagDisabled);
	}

	#[test]
	fn test_reason_as_str_matches_serde() {
		for reason in [
			EvaluationReason::FlagDisabled,
			EvaluationReason::ZeroPercentage,
			EvaluationReason::PercentageMatch,
			EvaluationReason::PercentageNoMatch,
			EvaluationReason::InvalidAttributeRule,
			EvaluationReason::AttributeNotFound,
			EvaluationReason::AttributeMatch,
			EvaluationReason::AttributeNoMatch,
			EvaluationReason::InvalidUserIdRule,
			EvaluationReason::UserIdMatch,
			EvaluationReason::UserIdNoMatch,
			EvaluationReason::ZeroRollout,
			EvaluationReason::FullRollout,
			EvaluationReason::RolloutMatch,
			EvaluationReason::RolloutNoMatch,
			EvaluationReason::UnknownRuleType,
			EvaluationReason::FlagNotFound,
			EvaluationReason::InvalidContext,
			EvaluationReason::EvaluationError,
		] {
			let json = serde_json::to_string(&reason).unwrap();
			assert_eq!(json, format!("\"{}\"", reason.as_str()));
		}
	}
}
