// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Audit records for control-plane mutations.
//!
//! Audit is write-only: every mutating repository method writes an entry
//! inside its transaction, and nothing in the platform reads them back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Actions recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
	FlagCreated,
	FlagUpdated,
	FlagDeleted,
	ConfigUpdated,
	FlagToggled,
	KillSwitch,
}

impl AuditAction {
	pub fn as_str(&self) -> &'static str {
		match self {
			AuditAction::FlagCreated => "flag_created",
			AuditAction::FlagUpdated => "flag_updated",
			AuditAction::FlagDeleted => "flag_deleted",
			AuditAction::ConfigUpdated => "config_updated",
			AuditAction::FlagToggled => "flag_toggled",
			AuditAction::KillSwitch => "kill_switch",
		}
	}

	/// Kill switches are incidents; everything else is routine change.
	pub fn severity(&self) -> AuditSeverity {
		match self {
			AuditAction::KillSwitch => AuditSeverity::Critical,
			_ => AuditSeverity::Info,
		}
	}
}

impl std::fmt::Display for AuditAction {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Severity attached to an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
	Info,
	Critical,
}

impl AuditSeverity {
	pub fn as_str(&self) -> &'static str {
		match self {
			AuditSeverity::Info => "info",
			AuditSeverity::Critical => "critical",
		}
	}
}

impl std::fmt::Display for AuditSeverity {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A single audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
	pub id: Uuid,
	/// e.g. "flag", "flag_config"
	pub entity_type: String,
	pub entity_id: String,
	pub action: AuditAction,
	pub actor: String,
	/// JSON diff of the change, shape depending on the action
	pub diff: serde_json::Value,
	pub severity: AuditSeverity,
	pub created_at: DateTime<Utc>,
}

impl AuditEntry {
	pub fn new(
		entity_type: impl Into<String>,
		entity_id: impl Into<String>,
		action: AuditAction,
		actor: impl Into<String>,
		diff: serde_json::Value,
	) -> Self {
		Self {
			id: Uuid::new_v4(),
			entity_type: entity_type.into(),
			entity_id: entity_id.into(),
			action,
			actor: actor.into(),
			diff,
			severity: action.severity(),
			created_at: Utc::now(),
		}
	}
}
