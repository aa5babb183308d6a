// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// Errors surfaced by the flags client.
///
/// Evaluation itself never returns these to callers; `evaluate_flag`
/// degrades to the caller's default and reports the cause on the
/// `evaluationError` stream instead.
#[derive(Debug, Error)]
pub enum FlagsError {
	#[error("base URL is required")]
	InvalidBaseUrl,

	#[error("request failed: {0}")]
	RequestFailed(#[from] reqwest::Error),

	#[error("server error: status {status}")]
	ServerError { status: u16, message: String },

	#[error("response parse failed: {0}")]
	ParseFailed(String),

	#[error("client destroyed")]
	ClientDestroyed,
}

pub type Result<T> = std::result::Result<T, FlagsError>;
