// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Client SDK for the Pennon feature flags platform.
//!
//! The client polls the evaluation service's `/sdk/config` endpoint with a
//! conditional ETag, holds the environment's flag snapshots locally, and
//! evaluates with the same rule engine the server runs
//! (`pennon-flags-core`). Flags missing locally are evaluated remotely;
//! every failure degrades to the caller's default value.
//!
//! # Example
//!
//! ```ignore
//! use pennon_flags::{FlagsClient, UserContext};
//!
//! let client = FlagsClient::builder()
//!     .api_key("pennon-admin-secret")
//!     .base_url("https://flags.example.com")
//!     .environment("production")
//!     .build()
//!     .await?;
//!
//! let ctx = UserContext::new()
//!     .with_user_id("user123")
//!     .with_attribute("country", serde_json::json!("US"));
//!
//! let dark_mode = client
//!     .evaluate_flag("dark_mode", &ctx, serde_json::json!(false))
//!     .await;
//!
//! // Lifecycle streams: ready, error, configUpdated, evaluation,
//! // evaluationError, pollError, analyticsFlush.
//! let mut events = client.subscribe();
//! ```

pub mod analytics;
pub mod client;
pub mod error;
pub mod events;

pub use analytics::{context_token, AnalyticsBuffer, AnalyticsEvent, BUFFER_CAPACITY, DRAIN_WATERMARK};
pub use client::{ClientConfig, ClientState, FlagsClient, FlagsClientBuilder};
pub use error::{FlagsError, Result};
pub use events::{EventBus, SdkEvent};

// Re-export core types so SDK users need only this crate.
pub use pennon_flags_core::{
	Decision, EvaluationReason, Flag, FlagConfig, FlagSnapshot, FlagType, Rule, RuleKind,
	RuleOperator, UserContext, Variant,
};
