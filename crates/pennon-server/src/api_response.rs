// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! API response helpers: the common error body and status mappings.

use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use pennon_server_flags::FlagsServerError;

/// Error body shared by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ErrorBody {
	pub error: String,
	pub message: String,
}

impl ErrorBody {
	pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			error: error.into(),
			message: message.into(),
		}
	}
}

pub fn bad_request(
	error: impl Into<String>,
	message: impl Into<String>,
) -> (StatusCode, Json<ErrorBody>) {
	(StatusCode::BAD_REQUEST, Json(ErrorBody::new(error, message)))
}

pub fn unauthorized(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
	(
		StatusCode::UNAUTHORIZED,
		Json(ErrorBody::new("unauthorized", message)),
	)
}

pub fn not_found(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
	(StatusCode::NOT_FOUND, Json(ErrorBody::new("not_found", message)))
}

pub fn conflict(
	error: impl Into<String>,
	message: impl Into<String>,
) -> (StatusCode, Json<ErrorBody>) {
	(StatusCode::CONFLICT, Json(ErrorBody::new(error, message)))
}

pub fn timeout(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
	(
		StatusCode::REQUEST_TIMEOUT,
		Json(ErrorBody::new("timeout", message)),
	)
}

pub fn internal_error(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
	(
		StatusCode::INTERNAL_SERVER_ERROR,
		Json(ErrorBody::new("internal_error", message)),
	)
}

pub fn service_unavailable(message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
	(
		StatusCode::SERVICE_UNAVAILABLE,
		Json(ErrorBody::new("upstream_unavailable", message)),
	)
}

/// Maps a server error onto the admin surface's status contract.
pub fn from_error(e: &FlagsServerError) -> (StatusCode, Json<ErrorBody>) {
	match e {
		FlagsServerError::Validation(message) => bad_request("validation_error", message),
		FlagsServerError::NotFound(message) => not_found(message),
		FlagsServerError::Conflict(message) => conflict("conflict", message),
		FlagsServerError::Unauthenticated => unauthorized("missing or invalid credential"),
		FlagsServerError::Timeout => timeout("deadline exceeded"),
		FlagsServerError::Database(_) | FlagsServerError::Cache(_) => {
			service_unavailable("upstream unavailable")
		}
		FlagsServerError::Serialization(_) | FlagsServerError::Internal(_) => {
			internal_error("internal error")
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_status_mapping() {
		let cases = [
			(
				FlagsServerError::Validation("bad".into()),
				StatusCode::BAD_REQUEST,
			),
			(
				FlagsServerError::NotFound("gone".into()),
				StatusCode::NOT_FOUND,
			),
			(
				FlagsServerError::Conflict("dup".into()),
				StatusCode::CONFLICT,
			),
			(FlagsServerError::Unauthenticated, StatusCode::UNAUTHORIZED),
			(FlagsServerError::Timeout, StatusCode::REQUEST_TIMEOUT),
			(
				FlagsServerError::Internal("bug".into()),
				StatusCode::INTERNAL_SERVER_ERROR,
			),
		];

		for (error, status) in cases {
			assert_eq!(from_error(&error).0, status);
		}
	}
}
