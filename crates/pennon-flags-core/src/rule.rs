// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::flag::FlagConfigId;

/// Unique identifier for a rollout rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RuleId(pub Uuid);

impl RuleId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for RuleId {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Display for RuleId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl std::str::FromStr for RuleId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self(Uuid::parse_str(s)?))
	}
}

/// The kind of a rollout rule. `Segment` is reserved: the schema carries it
/// but the engine reports no-match until segment evaluation lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
	Percentage,
	Attribute,
	UserId,
	Segment,
}

impl RuleKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			RuleKind::Percentage => "percentage",
			RuleKind::Attribute => "attribute",
			RuleKind::UserId => "user_id",
			RuleKind::Segment => "segment",
		}
	}
}

impl std::fmt::Display for RuleKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for RuleKind {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"percentage" => Ok(RuleKind::Percentage),
			"attribute" => Ok(RuleKind::Attribute),
			"user_id" => Ok(RuleKind::UserId),
			"segment" => Ok(RuleKind::Segment),
			other => Err(format!("unknown rule type: {other}")),
		}
	}
}

/// Operators for attribute rules. Both sides are canonicalized to lowercased
/// strings before comparison; `In`/`NotIn` treat the right side as a
/// comma-separated list; `GreaterThan`/`LessThan` parse both sides as f64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOperator {
	Equals,
	NotEquals,
	In,
	NotIn,
	Contains,
	StartsWith,
	EndsWith,
	GreaterThan,
	LessThan,
}

impl RuleOperator {
	pub fn as_str(&self) -> &'static str {
		match self {
			RuleOperator::Equals => "equals",
			RuleOperator::NotEquals => "not_equals",
			RuleOperator::In => "in",
			RuleOperator::NotIn => "not_in",
			RuleOperator::Contains => "contains",
			RuleOperator::StartsWith => "starts_with",
			RuleOperator::EndsWith => "ends_with",
			RuleOperator::GreaterThan => "greater_than",
			RuleOperator::LessThan => "less_than",
		}
	}

	/// Evaluates this operator against an attribute value and the rule's
	/// right-hand side.
	pub fn evaluate(&self, actual: &str, expected: &str) -> bool {
		let actual = actual.to_lowercase();
		let expected = expected.to_lowercase();

		match self {
			RuleOperator::Equals => actual == expected,
			RuleOperator::NotEquals => actual != expected,
			RuleOperator::In => csv_contains(&expected, &actual),
			RuleOperator::NotIn => !csv_contains(&expected, &actual),
			RuleOperator::Contains => actual.contains(&expected),
			RuleOperator::StartsWith => actual.starts_with(&expected),
			RuleOperator::EndsWith => actual.ends_with(&expected),
			RuleOperator::GreaterThan => match (actual.parse::<f64>(), expected.parse::<f64>()) {
				(Ok(a), Ok(b)) => a > b,
				_ => false,
			},
			RuleOperator::LessThan => match (actual.parse::<f64>(), expected.parse::<f64>()) {
				(Ok(a), Ok(b)) => a < b,
				_ => false,
			},
		}
	}
}

impl std::fmt::Display for RuleOperator {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

impl std::str::FromStr for RuleOperator {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"equals" => Ok(RuleOperator::Equals),
			"not_equals" => Ok(RuleOperator::NotEquals),
			"in" => Ok(RuleOperator::In),
			"not_in" => Ok(RuleOperator::NotIn),
			"contains" => Ok(RuleOperator::Contains),
			"starts_with" => Ok(RuleOperator::StartsWith),
			"ends_with" => Ok(RuleOperator::EndsWith),
			"greater_than" => Ok(RuleOperator::GreaterThan),
			"less_than" => Ok(RuleOperator::LessThan),
			other => Err(format!("unknown operator: {other}")),
		}
	}
}

/// Membership test over a comma-separated list with trimmed tokens.
fn csv_contains(list: &str, needle: &str) -> bool {
	list.split(',').any(|token| token.trim() == needle)
}

/// A rollout rule attached to one flag config. Rules are replaced wholesale
/// on config update, never patched in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
	pub id: RuleId,
	pub flag_config_id: FlagConfigId,
	pub rule_type: RuleKind,
	pub attribute_name: Option<String>,
	pub operator: Option<RuleOperator>,
	pub attribute_value: Option<String>,
	/// For percentage rules, 0-100
	pub percentage: Option<u32>,
	/// Variant override on match; falls back to the config default
	pub variant_key: Option<String>,
	/// Lower priority evaluates earlier
	pub priority: i32,
}

/// Canonical string form of a context attribute for operator comparison.
pub fn canonical_string(value: &serde_json::Value) -> String {
	match value {
		serde_json::Value::String(s) => s.to_lowercase(),
		other => other.to_string().to_lowercase(),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_equals_case_insensitive() {
		assert!(RuleOperator::Equals.evaluate("US", "us"));
		assert!(RuleOperator::Equals.evaluate("us", "US"));
		assert!(!RuleOperator::Equals.evaluate("us", "de"));
		assert!(RuleOperator::NotEquals.evaluate("us", "de"));
	}

	#[test]
	fn test_in_comma_separated() {
		assert!(RuleOperator::In.evaluate("ca", "US, CA, GB"));
		assert!(RuleOperator::In.evaluate("CA", "us,ca,gb"));
		assert!(!RuleOperator::In.evaluate("de", "US, CA, GB"));
		assert!(RuleOperator::NotIn.evaluate("de", "US, CA, GB"));
		assert!(!RuleOperator::NotIn.evaluate("gb", "US, CA, GB"));
	}

	#[test]
	fn test_substring_operators() {
		assert!(RuleOperator::Contains.evaluate("enterprise_plan", "prise"));
		assert!(RuleOperator::StartsWith.evaluate("enterprise_plan", "enter"));
		assert!(RuleOperator::EndsWith.evaluate("enterprise_plan", "plan"));
		assert!(!RuleOperator::StartsWith.evaluate("enterprise_plan", "plan"));
	}

	#[test]
	fn test_numeric_operators() {
		assert!(RuleOperator::GreaterThan.evaluate("42", "10"));
		assert!(!RuleOperator::GreaterThan.evaluate("10", "42"));
		assert!(RuleOperator::LessThan.evaluate("3.5", "10"));

		// Unparsable on either side never matches
		assert!(!RuleOperator::GreaterThan.evaluate("abc", "10"));
		assert!(!RuleOperator::LessThan.evaluate("10", "abc"));
	}

	#[test]
	fn test_canonical_string() {
		assert_eq!(canonical_string(&json!("US")), "us");
		assert_eq!(canonical_string(&json!(42)), "42");
		assert_eq!(canonical_string(&json!(true)), "true");
		assert_eq!(canonical_string(&json!(3.5)), "3.5");
	}

	#[test]
	fn test_rule_kind_round_trip() {
		for kind in [
			RuleKind::Percentage,
			RuleKind::Attribute,
			RuleKind::UserId,
			RuleKind::Segment,
		] {
			let parsed: RuleKind = kind.as_str().parse().unwrap();
			assert_eq!(parsed, kind);
		}
	}

	#[test]
	fn test_operator_round_trip() {
		for op in [
			RuleOperator::Equals,
			RuleOperator::NotEquals,
			RuleOperator::In,
			RuleOperator::NotIn,
			RuleOperator::Contains,
			RuleOperator::StartsWith,
			RuleOperator::EndsWith,
			RuleOperator::GreaterThan,
			RuleOperator::LessThan,
		] {
			let parsed: RuleOperator = op.as_str().parse().unwrap();
			assert_eq!(parsed, op);
		}
	}
}
