// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// Errors specific to the flags server.
///
/// The evaluation path converts every one of these into a degraded success
/// (caller default + diagnostic reason); the control path maps them to HTTP
/// statuses and fails loudly.
#[derive(Debug, Error)]
pub enum FlagsServerError {
	#[error("validation error: {0}")]
	Validation(String),

	#[error("not found: {0}")]
	NotFound(String),

	#[error("conflict: {0}")]
	Conflict(String),

	#[error("unauthenticated")]
	Unauthenticated,

	#[error("database error: {0}")]
	Database(#[from] sqlx::Error),

	#[error("cache error: {0}")]
	Cache(#[from] redis::RedisError),

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("deadline exceeded")]
	Timeout,

	#[error("internal error: {0}")]
	Internal(String),
}

impl FlagsServerError {
	/// True when the fault is an upstream (store/cache) availability
	/// problem rather than a caller mistake.
	pub fn is_upstream(&self) -> bool {
		matches!(
			self,
			FlagsServerError::Database(_) | FlagsServerError::Cache(_) | FlagsServerError::Timeout
		)
	}
}

pub type Result<T> = std::result::Result<T, FlagsServerError>;
