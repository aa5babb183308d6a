// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Evaluation analytics with a bounded buffer.
//!
//! User attributes never leave the process: events carry a stable
//! non-cryptographic token derived from the context instead of the
//! attribute map. The buffer is a ring with a high-water cap; hitting the
//! cap drops the oldest events down to the drain watermark.

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use murmur3::murmur3_32;
use serde::{Deserialize, Serialize};

use pennon_flags_core::{canonical_string, EvaluationReason, UserContext};

/// Maximum number of buffered events.
pub const BUFFER_CAPACITY: usize = 1000;

/// Level the buffer is drained down to when it hits capacity.
pub const DRAIN_WATERMARK: usize = 500;

/// One retained evaluation record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
	pub flag_key: String,
	pub variant: Option<String>,
	pub reason: EvaluationReason,
	/// Stable token standing in for the raw context.
	pub context_token: String,
	pub timestamp: DateTime<Utc>,
}

impl AnalyticsEvent {
	pub fn new(
		flag_key: impl Into<String>,
		variant: Option<String>,
		reason: EvaluationReason,
		context_token: impl Into<String>,
	) -> Self {
		Self {
			flag_key: flag_key.into(),
			variant,
			reason,
			context_token: context_token.into(),
			timestamp: Utc::now(),
		}
	}
}

/// Stable token for a user context: murmur3 over the user id and the
/// canonicalized, sorted attribute pairs. Same context, same token, across
/// runs and processes.
pub fn context_token(ctx: &UserContext) -> String {
	let mut basis = String::new();
	basis.push_str(ctx.user_id.as_deref().unwrap_or("anonymous"));
	basis.push('|');

	let mut keys: Vec<&String> = ctx
		.attributes
		.keys()
		.chain(ctx.custom_attributes.keys())
		.collect();
	keys.sort();
	keys.dedup();

	for key in keys {
		// Merged view: custom attributes win on collision.
		if let Some(value) = ctx.attribute(key) {
			basis.push_str(key);
			basis.push('=');
			basis.push_str(&canonical_string(value));
			basis.push(',');
		}
	}

	let hash = murmur3_32(&mut Cursor::new(basis.as_bytes()), 0).unwrap_or(0);
	format!("{hash:08x}")
}

/// Bounded ring buffer of analytics events.
pub struct AnalyticsBuffer {
	events: Mutex<VecDeque<AnalyticsEvent>>,
}

impl AnalyticsBuffer {
	pub fn new() -> Self {
		Self {
			events: Mutex::new(VecDeque::with_capacity(DRAIN_WATERMARK)),
		}
	}

	pub fn push(&self, event: AnalyticsEvent) {
		let mut events = self.events.lock().expect("analytics buffer poisoned");
		if events.len() >= BUFFER_CAPACITY {
			while events.len() > DRAIN_WATERMARK {
				events.pop_front();
			}
		}
		events.push_back(event);
	}

	pub fn len(&self) -> usize {
		self.events.lock().expect("analytics buffer poisoned").len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Takes everything out of the buffer.
	pub fn flush(&self) -> Vec<AnalyticsEvent> {
		let mut events = self.events.lock().expect("analytics buffer poisoned");
		events.drain(..).collect()
	}
}

impl Default for AnalyticsBuffer {
	fn default() -> Self {
		Self::new()
	}
}
