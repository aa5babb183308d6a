// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client lifecycle events.
//!
//! The SDK exposes its lifecycle as a set of named asynchronous streams
//! carried over one broadcast channel; subscribers filter by variant. The
//! serialized form tags each event with its stream name.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use pennon_flags_core::EvaluationReason;

/// Default capacity of the event channel; slow subscribers lag rather than
/// block the client.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One event on the client's lifecycle streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SdkEvent {
	/// Initial config fetch succeeded; local evaluation is available.
	Ready { flag_count: usize },
	/// Initial config fetch failed; the client stays usable via remote
	/// evaluation and keeps polling.
	Error { message: String },
	/// A poll replaced the local snapshot.
	ConfigUpdated { etag: String, flag_count: usize },
	/// A flag was evaluated.
	Evaluation {
		flag_key: String,
		variant: Option<String>,
		reason: EvaluationReason,
		local: bool,
	},
	/// An evaluation degraded to the caller's default.
	EvaluationError {
		flag_key: String,
		cause: String,
		default: serde_json::Value,
		/// Redacted context: a stable token, never the attribute map.
		context_token: String,
	},
	/// A background poll failed; the next tick retries.
	PollError { message: String },
	/// The analytics buffer was flushed.
	AnalyticsFlush { count: usize },
}

impl SdkEvent {
	/// The stream name this event belongs to.
	pub fn event_type(&self) -> &'static str {
		match self {
			SdkEvent::Ready { .. } => "ready",
			SdkEvent::Error { .. } => "error",
			SdkEvent::ConfigUpdated { .. } => "configUpdated",
			SdkEvent::Evaluation { .. } => "evaluation",
			SdkEvent::EvaluationError { .. } => "evaluationError",
			SdkEvent::PollError { .. } => "pollError",
			SdkEvent::AnalyticsFlush { .. } => "analyticsFlush",
		}
	}
}

/// Broadcast bus for [`SdkEvent`]s.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<SdkEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<SdkEvent> {
		self.sender.subscribe()
	}

	/// Emits an event; dropped silently when nobody is listening.
	pub fn emit(&self, event: SdkEvent) {
		let _ = self.sender.send(event);
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(EVENT_CHANNEL_CAPACITY)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_event_type_matches_serialized_tag() {
		let events = vec![
			SdkEvent::Ready { flag_count: 3 },
			SdkEvent::Error {
				message: "boom".to_string(),
			},
			SdkEvent::ConfigUpdated {
				etag: "abc".to_string(),
				flag_count: 3,
			},
			SdkEvent::Evaluation {
				flag_key: "dark_mode".to_string(),
				variant: Some("true".to_string()),
				reason: EvaluationReason::FullRollout,
				local: true,
			},
			SdkEvent::EvaluationError {
				flag_key: "dark_mode".to_string(),
				cause: "timeout".to_string(),
				default: serde_json::json!(false),
				context_token: "deadbeef".to_string(),
			},
			SdkEvent::PollError {
				message: "503".to_string(),
			},
			SdkEvent::AnalyticsFlush { count: 10 },
		];

		for event in events {
			let json = serde_json::to_string(&event).unwrap();
			assert!(
				json.contains(&format!(r#""event":"{}""#, event.event_type())),
				"{json}"
			);
		}
	}

	#[tokio::test]
	async fn test_subscribers_receive_emitted_events() {
		let bus = EventBus::default();
		let mut receiver = bus.subscribe();

		bus.emit(SdkEvent::Ready { flag_count: 1 });

		let event = receiver.recv().await.unwrap();
		assert_eq!(event.event_type(), "ready");
	}

	#[test]
	fn test_emit_without_subscribers_is_silent() {
		let bus = EventBus::default();
		bus.emit(SdkEvent::PollError {
			message: "nobody listening".to_string(),
		});
	}
}
