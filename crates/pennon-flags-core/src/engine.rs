// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The rule engine: a pure, synchronous function from a flag snapshot and a
//! user context to a [`Decision`].
//!
//! Both the evaluation service and the SDK call this same code, so local and
//! remote evaluation cannot drift. Rule dispatch is a single match on
//! [`RuleKind`], so a new kind (segments) slots in without touching the
//! surrounding flow.

use rand::Rng;
use tracing::{trace, warn};

use crate::bucket::bucket;
use crate::evaluation::{Decision, EvaluationReason, UserContext};
use crate::flag::{Flag, FlagConfig, FlagType, Variant};
use crate::rule::{canonical_string, Rule, RuleKind};

/// Outcome of evaluating a single rule. Non-matches carry a reason for
/// logging and metrics but never terminate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleOutcome {
	pub matched: bool,
	pub reason: EvaluationReason,
}

impl RuleOutcome {
	fn matched(reason: EvaluationReason) -> Self {
		Self {
			matched: true,
			reason,
		}
	}

	fn no_match(reason: EvaluationReason) -> Self {
		Self {
			matched: false,
			reason,
		}
	}
}

/// Evaluates a flag for a given context.
///
/// The evaluation order is:
/// 1. Disabled config wins outright.
/// 2. Rules in ascending priority (stable on ties); the first match decides.
/// 3. Otherwise the config-level rollout percentage against
///    `bucket(user, flag_id)`.
pub fn evaluate(
	flag: &Flag,
	config: &FlagConfig,
	variants: &[Variant],
	rules: &[Rule],
	ctx: &UserContext,
	environment: &str,
) -> Decision {
	if !config.enabled {
		return Decision::off(&config.default_variant, EvaluationReason::FlagDisabled);
	}

	let mut ordered: Vec<&Rule> = rules.iter().collect();
	ordered.sort_by_key(|r| r.priority);

	for rule in ordered {
		let outcome = evaluate_rule(rule, ctx);
		if outcome.matched {
			let variant = rule
				.variant_key
				.clone()
				.unwrap_or_else(|| config.default_variant.clone());
			return Decision::on(variant, outcome.reason);
		}
		trace!(
			flag_key = %flag.key,
			environment,
			rule_id = %rule.id,
			rule_type = %rule.rule_type,
			reason = %outcome.reason,
			"rule did not match"
		);
	}

	let salt = flag.id.to_string();
	match config.rollout_percentage {
		0 => Decision::off(&config.default_variant, EvaluationReason::ZeroRollout),
		100 => Decision::on(
			select_variant(flag, config, variants),
			EvaluationReason::FullRollout,
		),
		pct if bucket(ctx.bucket_id(), &salt) < pct => Decision::on(
			select_variant(flag, config, variants),
			EvaluationReason::RolloutMatch,
		),
		_ => Decision::off(&config.default_variant, EvaluationReason::RolloutNoMatch),
	}
}

/// Evaluates one rule against the context.
pub fn evaluate_rule(rule: &Rule, ctx: &UserContext) -> RuleOutcome {
	match rule.rule_type {
		RuleKind::Percentage => {
			let percentage = rule.percentage.unwrap_or(0);
			if percentage == 0 {
				return RuleOutcome::no_match(EvaluationReason::ZeroPercentage);
			}
			if bucket(ctx.bucket_id(), &rule.id.to_string()) < percentage {
				RuleOutcome::matched(EvaluationReason::PercentageMatch)
			} else {
				RuleOutcome::no_match(EvaluationReason::PercentageNoMatch)
			}
		}
		RuleKind::Attribute => {
			let (name, operator, expected) =
				match (&rule.attribute_name, rule.operator, &rule.attribute_value) {
					(Some(name), Some(operator), Some(expected)) => (name, operator, expected),
					_ => return RuleOutcome::no_match(EvaluationReason::InvalidAttributeRule),
				};

			let Some(actual) = ctx.attribute(name) else {
				return RuleOutcome::no_match(EvaluationReason::AttributeNotFound);
			};

			if operator.evaluate(&canonical_string(actual), expected) {
				RuleOutcome::matched(EvaluationReason::AttributeMatch)
			} else {
				RuleOutcome::no_match(EvaluationReason::AttributeNoMatch)
			}
		}
		RuleKind::UserId => {
			let (Some(user_id), Some(expected)) = (&ctx.user_id, &rule.attribute_value) else {
				return RuleOutcome::no_match(EvaluationReason::InvalidUserIdRule);
			};

			// Case-sensitive membership over a comma-separated list.
			let is_member = expected
				.split(',')
				.any(|token| token.trim() == user_id.as_str());
			if is_member {
				RuleOutcome::matched(EvaluationReason::UserIdMatch)
			} else {
				RuleOutcome::no_match(EvaluationReason::UserIdNoMatch)
			}
		}
		RuleKind::Segment => {
			warn!(rule_id = %rule.id, "segment rules are not evaluated yet");
			RuleOutcome::no_match(EvaluationReason::UnknownRuleType)
		}
	}
}

/// Selects a variant by weight for an in-rollout user.
///
/// Draws a fresh uniform value in `[0, total_weight)` per evaluation and
/// walks the variants in store order, returning the first whose cumulative
/// weight strictly exceeds the draw. Assignment of the variant within the
/// rollout is therefore not sticky per user; only the rollout inclusion
/// decision is. (A sticky draw would come from
/// `bucket(user, "<flag_id>:variant")` instead.)
pub fn select_variant(flag: &Flag, config: &FlagConfig, variants: &[Variant]) -> String {
	if variants.is_empty() {
		if flag.flag_type == FlagType::Boolean {
			return "true".to_string();
		}
		return config.default_variant.clone();
	}

	let total: u32 = variants.iter().map(|v| v.weight).sum();
	if total == 0 {
		// Deterministic fallback: lexicographically-first variant key.
		return variants
			.iter()
			.map(|v| v.key.as_str())
			.min()
			.unwrap_or(config.default_variant.as_str())
			.to_string();
	}

	let draw = rand::thread_rng().gen_range(0..total);
	let mut cumulative = 0u32;
	for variant in variants {
		cumulative += variant.weight;
		if cumulative > draw {
			return variant.key.clone();
		}
	}

	config.default_variant.clone()
}

/// Translates a decision into the typed value the caller receives, parsing
/// the chosen variant's raw value according to the flag type.
pub fn typed_value(
	flag: &Flag,
	variants: &[Variant],
	decision: &Decision,
	default: &serde_json::Value,
) -> serde_json::Value {
	if flag.flag_type == FlagType::Boolean {
		return if decision.enabled {
			serde_json::Value::Bool(decision.variant == "true")
		} else {
			default.clone()
		};
	}

	let Some(variant) = variants.iter().find(|v| v.key == decision.variant) else {
		return default.clone();
	};

	match flag.flag_type {
		FlagType::Boolean => serde_json::Value::Bool(variant.value == "true"),
		FlagType::String => serde_json::Value::String(variant.value.clone()),
		FlagType::Number => match variant.value.parse::<f64>() {
			Ok(n) => serde_json::Number::from_f64(n)
				.map(serde_json::Value::Number)
				.unwrap_or_else(|| default.clone()),
			Err(_) => default.clone(),
		},
		// Unparseable JSON falls back to the raw string.
		FlagType::Json => serde_json::from_str(&variant.value)
			.unwrap_or_else(|_| serde_json::Value::String(variant.value.clone())),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::environment::EnvironmentId;
	use crate::flag::{FlagConfigId, FlagId, VariantId};
	use crate::rule::{RuleId, RuleOperator};
	use chrono::Utc;
	use serde_json::json;

	fn test_flag(flag_type: FlagType) -> Flag {
		Flag {
			id: FlagId::new(),
			key: "dark_mode".to_string(),
			name: "Dark Mode".to_string(),
			description: None,
			flag_type,
			active: true,
			created_at: Utc::now(),
			updated_at: Utc::now(),
		}
	}

	fn test_config(flag: &Flag, enabled: bool, rollout: u32) -> FlagConfig {
		FlagConfig {
			id: FlagConfigId::new(),
			flag_id: flag.id,
			environment_id: EnvironmentId::new(),
			enabled,
			default_variant: "false".to_string(),
			rollout_percentage: rollout,
			config: json!({}),
			created_at: Utc::now(),
			updated_at: Utc::now(),
		}
	}

	fn bool_variants(flag: &Flag) -> Vec<Variant> {
		vec![
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
		]
	}

	fn attribute_rule(config: &FlagConfig, priority: i32) -> Rule {
		Rule {
			id: RuleId::new(),
			flag_config_id: config.id,
			rule_type: RuleKind::Attribute,
			attribute_name: Some("country".to_string()),
			operator: Some(RuleOperator::Equals),
			attribute_value: Some("US".to_string()),
			percentage: None,
			variant_key: Some("true".to_string()),
			priority,
		}
	}

	#[test]
	fn test_disabled_dominates() {
		let flag = test_flag(FlagType::Boolean);
		let config = test_config(&flag, false, 100);
		let variants = bool_variants(&flag);
		let rules = vec![attribute_rule(&config, 10)];
		let ctx = UserContext::new()
			.with_user_id("u1")
			.with_attribute("country", json!("US"));

		let decision = evaluate(&flag, &config, &variants, &rules, &ctx, "production");
		assert!(!decision.enabled);
		assert_eq!(decision.variant, "false");
		assert_eq!(decision.reason, EvaluationReason::FlagDisabled);
	}

	#[test]
	fn test_zero_rollout() {
		let flag = test_flag(FlagType::Boolean);
		let config = test_config(&flag, true, 0);
		let variants = bool_variants(&flag);
		let ctx = UserContext::new().with_user_id("anything");

		let decision = evaluate(&flag, &config, &variants, &[], &ctx, "production");
		assert_eq!(decision.reason, EvaluationReason::ZeroRollout);
		assert!(!decision.enabled);
	}

	#[test]
	fn test_full_rollout_boolean() {
		let flag = test_flag(FlagType::Boolean);
		let config = test_config(&flag, true, 100);
		let variants = bool_variants(&flag);
		let ctx = UserContext::new().with_user_id("u1");

		let decision = evaluate(&flag, &config, &variants, &[], &ctx, "production");
		assert_eq!(decision.reason, EvaluationReason::FullRollout);
		assert!(decision.enabled);
		assert!(decision.variant == "true" || decision.variant == "false");
	}

	#[test]
	fn test_attribute_targeting_matches() {
		let flag = test_flag(FlagType::Boolean);
		let config = test_config(&flag, true, 0);
		let variants = bool_variants(&flag);
		let rules = vec![attribute_rule(&config, 10)];

		let ctx = UserContext::new()
			.with_user_id("u2")
			.with_attribute("country", json!("US"));
		let decision = evaluate(&flag, &config, &variants, &rules, &ctx, "production");
		assert_eq!(decision.reason, EvaluationReason::AttributeMatch);
		assert!(decision.enabled);
		assert_eq!(decision.variant, "true");

		// Non-matching attribute falls through to the (zero) rollout.
		let ctx = UserContext::new()
			.with_user_id("u2")
			.with_attribute("country", json!("DE"));
		let decision = evaluate(&flag, &config, &variants, &rules, &ctx, "production");
		assert_eq!(decision.reason, EvaluationReason::ZeroRollout);
		assert!(!decision.enabled);
	}

	#[test]
	fn test_custom_attribute_wins_collision() {
		let flag = test_flag(FlagType::Boolean);
		let config = test_config(&flag, true, 0);
		let variants = bool_variants(&flag);
		let rules = vec![attribute_rule(&config, 10)];

		let ctx = UserContext::new()
			.with_attribute("country", json!("DE"))
			.with_custom_attribute("country", json!("US"));
		let decision = evaluate(&flag, &config, &variants, &rules, &ctx, "production");
		assert_eq!(decision.reason, EvaluationReason::AttributeMatch);
	}

	#[test]
	fn test_rule_priority_first_match_wins() {
		let flag = test_flag(FlagType::Boolean);
		let config = test_config(&flag, true, 0);
		let variants = bool_variants(&flag);

		let mut low_priority = attribute_rule(&config, 20);
		low_priority.variant_key = Some("false".to_string());
		let high_priority = attribute_rule(&config, 10);

		// Both match; the priority-10 rule must decide even though it was
		// supplied second.
		let rules = vec![low_priority, high_priority];
		let ctx = UserContext::new().with_attribute("country", json!("US"));
		let decision = evaluate(&flag, &config, &variants, &rules, &ctx, "production");
		assert_eq!(decision.variant, "true");
	}

	#[test]
	fn test_match_without_variant_key_uses_default() {
		let flag = test_flag(FlagType::Boolean);
		let config = test_config(&flag, true, 0);
		let variants = bool_variants(&flag);

		let mut rule = attribute_rule(&config, 10);
		rule.variant_key = None;
		let ctx = UserContext::new().with_attribute("country", json!("US"));
		let decision = evaluate(&flag, &config, &variants, &[rule], &ctx, "production");
		assert!(decision.enabled);
		assert_eq!(decision.variant, "false");
	}

	#[test]
	fn test_user_id_rule_is_case_sensitive() {
		let flag = test_flag(FlagType::Boolean);
		let config = test_config(&flag, true, 0);
		let rule = Rule {
			id: RuleId::new(),
			flag_config_id: config.id,
			rule_type: RuleKind::UserId,
			attribute_name: None,
			operator: None,
			attribute_value: Some("Alice, bob".to_string()),
			percentage: None,
			variant_key: Some("true".to_string()),
			priority: 1,
		};

		let hit = evaluate_rule(&rule, &UserContext::new().with_user_id("Alice"));
		assert_eq!(hit.reason, EvaluationReason::UserIdMatch);

		let miss = evaluate_rule(&rule, &UserContext::new().with_user_id("alice"));
		assert_eq!(miss.reason, EvaluationReason::UserIdNoMatch);

		let anonymous = evaluate_rule(&rule, &UserContext::new());
		assert_eq!(anonymous.reason, EvaluationReason::InvalidUserIdRule);
	}

	#[test]
	fn test_percentage_rule_outcomes() {
		let flag = test_flag(FlagType::Boolean);
		let config = test_config(&flag, true, 0);
		let mut rule = Rule {
			id: RuleId::new(),
			flag_config_id: config.id,
			rule_type: RuleKind::Percentage,
			attribute_name: None,
			operator: None,
			attribute_value: None,
			percentage: Some(0),
			variant_key: None,
			priority: 1,
		};

		let ctx = UserContext::new().with_user_id("u1");
		assert_eq!(
			evaluate_rule(&rule, &ctx).reason,
			EvaluationReason::ZeroPercentage
		);

		rule.percentage = Some(100);
		assert_eq!(
			evaluate_rule(&rule, &ctx).reason,
			EvaluationReason::PercentageMatch
		);

		// Deterministic for a fixed (user, rule) pair.
		rule.percentage = Some(50);
		let first = evaluate_rule(&rule, &ctx);
		for _ in 0..10 {
			assert_eq!(evaluate_rule(&rule, &ctx), first);
		}
	}

	#[test]
	fn test_segment_rule_reports_unknown() {
		let flag = test_flag(FlagType::Boolean);
		let config = test_config(&flag, true, 0);
		let rule = Rule {
			id: RuleId::new(),
			flag_config_id: config.id,
			rule_type: RuleKind::Segment,
			attribute_name: None,
			operator: None,
			attribute_value: Some("beta_testers".to_string()),
			percentage: None,
			variant_key: None,
			priority: 1,
		};

		let outcome = evaluate_rule(&rule, &UserContext::new().with_user_id("u1"));
		assert!(!outcome.matched);
		assert_eq!(outcome.reason, EvaluationReason::UnknownRuleType);
	}

	#[test]
	fn test_invalid_attribute_rule() {
		let flag = test_flag(FlagType::Boolean);
		let config = test_config(&flag, true, 0);
		let rule = Rule {
			id: RuleId::new(),
			flag_config_id: config.id,
			rule_type: RuleKind::Attribute,
			attribute_name: Some("country".to_string()),
			operator: None,
			attribute_value: Some("US".to_string()),
			percentage: None,
			variant_key: None,
			priority: 1,
		};

		let outcome = evaluate_rule(&rule, &UserContext::new());
		assert_eq!(outcome.reason, EvaluationReason::InvalidAttributeRule);
	}

	#[test]
	fn test_select_variant_synthesizes_boolean() {
		let flag = test_flag(FlagType::Boolean);
		let config = test_config(&flag, true, 100);
		assert_eq!(select_variant(&flag, &config, &[]), "true");
	}

	#[test]
	fn test_select_variant_zero_weight_is_lexicographic() {
		let flag = test_flag(FlagType::String);
		let config = test_config(&flag, true, 100);
		let variants = vec![
			Variant {
				id: VariantId::new(),
				flag_id: flag.id,
				key: "zebra".to_string(),
				value: "z".to_string(),
				weight: 0,
			},
			Variant {
				id: VariantId::new(),
				flag_id: flag.id,
				key: "aardvark".to_string(),
				value: "a".to_string(),
				weight: 0,
			},
		];
		assert_eq!(select_variant(&flag, &config, &variants), "aardvark");
	}

	#[test]
	fn test_select_variant_respects_weights() {
		let flag = test_flag(FlagType::String);
		let config = test_config(&flag, true, 100);
		let variants = vec![
			Variant {
				id: VariantId::new(),
				flag_id: flag.id,
				key: "only".to_string(),
				value: "v".to_string(),
				weight: 30,
			},
			Variant {
				id: VariantId::new(),
				flag_id: flag.id,
				key: "never".to_string(),
				value: "n".to_string(),
				weight: 0,
			},
		];

		// A zero-weight variant can never be drawn.
		for _ in 0..100 {
			assert_eq!(select_variant(&flag, &config, &variants), "only");
		}
	}

	#[test]
	fn test_typed_value_boolean() {
		let flag = test_flag(FlagType::Boolean);
		let variants = bool_variants(&flag);

		let on = Decision::on("true", EvaluationReason::FullRollout);
		assert_eq!(typed_value(&flag, &variants, &on, &json!(false)), json!(true));

		let off = Decision::off("false", EvaluationReason::ZeroRollout);
		assert_eq!(
			typed_value(&flag, &variants, &off, &json!(false)),
			json!(false)
		);

		// Disabled boolean returns the caller default, whatever it is.
		assert_eq!(typed_value(&flag, &variants, &off, &json!(true)), json!(true));
	}

	#[test]
	fn test_typed_value_string_number_json() {
		let mut flag = test_flag(FlagType::String);
		let flag_id = flag.id;
		let variant = move |key: &str, value: &str| Variant {
			id: VariantId::new(),
			flag_id,
			key: key.to_string(),
			value: value.to_string(),
			weight: 100,
		};

		let decision = Decision::on("v", EvaluationReason::FullRollout);

		let variants = vec![variant("v", "dark")];
		assert_eq!(
			typed_value(&flag, &variants, &decision, &json!("light")),
			json!("dark")
		);

		flag.flag_type = FlagType::Number;
		let variants = vec![variant("v", "12.5")];
		assert_eq!(
			typed_value(&flag, &variants, &decision, &json!(0)),
			json!(12.5)
		);

		flag.flag_type = FlagType::Json;
		let variants = vec![variant("v", r#"{"theme":"dark"}"#)];
		assert_eq!(
			typed_value(&flag, &variants, &decision, &json!(null)),
			json!({"theme": "dark"})
		);

		// Unparseable JSON degrades to the raw string.
		let variants = vec![variant("v", "not-json")];
		assert_eq!(
			typed_value(&flag, &variants, &decision, &json!(null)),
			json!("not-json")
		);

		// Missing variant row degrades to the caller default.
		assert_eq!(
			typed_value(&flag, &[], &decision, &json!("fallback")),
			json!("fallback")
		);
	}
}

#[cfg(test)]
mod proptests {
	use super::*;
	use crate::environment::EnvironmentId;
	use crate::flag::{FlagConfigId, FlagId};
	use chrono::Utc;
	use proptest::prelude::*;
	use serde_json::json;

	fn fixture(enabled: bool, rollout: u32) -> (Flag, FlagConfig) {
		let flag = Flag {
			id: FlagId::new(),
			key: "prop_flag".to_string(),
			name: "Prop Flag".to_string(),
			description: None,
			flag_type: FlagType::Boolean,
			active: true,
			created_at: Utc::now(),
			updated_at: Utc::now(),
		};
		let config = FlagConfig {
			id: FlagConfigId::new(),
			flag_id: flag.id,
			environment_id: EnvironmentId::new(),
			enabled,
			default_variant: "false".to_string(),
			rollout_percentage: rollout,
			config: json!({}),
			created_at: Utc::now(),
			updated_at: Utc::now(),
		};
		(flag, config)
	}

	proptest! {
		#[test]
		fn disabled_always_wins(user_id in "[a-zA-Z0-9]{1,20}", rollout in 0u32..=100) {
			let (flag, config) = fixture(false, rollout);
			let ctx = UserContext::new().with_user_id(&user_id);
			let decision = evaluate(&flag, &config, &[], &[], &ctx, "production");
			prop_assert!(!decision.enabled);
			prop_assert_eq!(decision.reason, EvaluationReason::FlagDisabled);
		}

		#[test]
		fn rollout_inclusion_is_monotonic(user_id in "[a-zA-Z0-9]{1,20}") {
			// Once a user is admitted at rollout p, raising the rollout can
			// never expel them. Uses a fixed flag id so every percentage
			// sees the same bucket.
			let (flag, mut config) = fixture(true, 0);
			let ctx = UserContext::new().with_user_id(&user_id);

			let mut included_at: Option<u32> = None;
			for pct in 0..=100u32 {
				config.rollout_percentage = pct;
				let decision = evaluate(&flag, &config, &[], &[], &ctx, "production");
				if decision.enabled {
					included_at = Some(pct);
					break;
				}
			}

			if let Some(threshold) = included_at {
				for pct in threshold..=100 {
					config.rollout_percentage = pct;
					let decision = evaluate(&flag, &config, &[], &[], &ctx, "production");
					prop_assert!(decision.enabled, "expelled at {} after inclusion at {}", pct, threshold);
				}
			}
		}

		#[test]
		fn zero_rollout_excludes_everyone(user_id in "[a-zA-Z0-9]{1,20}") {
			let (flag, config) = fixture(true, 0);
			let ctx = UserContext::new().with_user_id(&user_id);
			let decision = evaluate(&flag, &config, &[], &[], &ctx, "production");
			prop_assert_eq!(decision.reason, EvaluationReason::ZeroRollout);
		}

		#[test]
		fn full_rollout_admits_everyone(user_id in "[a-zA-Z0-9]{1,20}") {
			let (flag, config) = fixture(true, 100);
			let ctx = UserContext::new().with_user_id(&user_id);
			let decision = evaluate(&flag, &config, &[], &[], &ctx, "production");
			prop_assert_eq!(decision.reason, EvaluationReason::FullRollout);
			prop_assert!(decision.enabled);
		}
	}
}
