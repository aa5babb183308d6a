// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnvironmentId(pub Uuid);

impl EnvironmentId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for EnvironmentId {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Display for EnvironmentId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl std::str::FromStr for EnvironmentId {
	type Err = uuid::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Self(Uuid::parse_str(s)?))
	}
}

/// A deployment environment. Environments are fixed at deploy time; the
/// engine assumes nothing about them beyond name uniqueness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
	pub id: EnvironmentId,
	pub name: String,
	pub created_at: DateTime<Utc>,
}

/// Environment names seeded on a fresh deployment.
pub const DEFAULT_ENVIRONMENTS: &[&str] = &["development", "staging", "production"];

impl Environment {
	/// Validates an environment name: lowercase alphanumerics and
	/// underscores, starting with a letter, 2-50 characters.
	pub fn validate_name(name: &str) -> bool {
		if name.len() < 2 || name.len() > 50 {
			return false;
		}

		let mut chars = name.chars();
		match chars.next() {
			Some(c) if c.is_ascii_lowercase() => {}
			_ => return false,
		}

		chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_validate_name() {
		assert!(Environment::validate_name("production"));
		assert!(Environment::validate_name("staging"));
		assert!(Environment::validate_name("dev_eu_1"));

		assert!(!Environment::validate_name("p"));
		assert!(!Environment::validate_name("Production"));
		assert!(!Environment::validate_name("pre-prod"));
		assert!(!Environment::validate_name("1production"));
		assert!(!Environment::validate_name(&"e".repeat(51)));
	}

	#[test]
	fn test_default_environments_are_valid() {
		for name in DEFAULT_ENVIRONMENTS {
			assert!(Environment::validate_name(name));
		}
	}
}
