// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Pennon feature flags platform.
//!
//! This crate provides the shared vocabulary for flags, variants,
//! per-environment configs, rollout rules, and evaluation, plus the
//! deterministic bucketing and the pure rule engine. It is used by both the
//! server-side evaluation service (`pennon-server-flags`) and the client SDK
//! (`pennon-flags`), so local and remote evaluation run the same code.
//!
//! # Example
//!
//! ```
//! use pennon_flags_core::{bucket, UserContext};
//!
//! let ctx = UserContext::new()
//!     .with_user_id("user123")
//!     .with_attribute("country", serde_json::json!("US"));
//!
//! // Stable rollout bucket in [0, 99] for this user and flag.
//! let b = bucket(ctx.bucket_id(), "dark_mode");
//! assert!(b < 100);
//! ```

pub mod bucket;
pub mod engine;
pub mod environment;
pub mod evaluation;
pub mod flag;
pub mod rule;

pub use bucket::{bucket, fingerprint, ANONYMOUS_ID};
pub use engine::{evaluate, evaluate_rule, select_variant, typed_value, RuleOutcome};
pub use environment::{Environment, EnvironmentId, DEFAULT_ENVIRONMENTS};
pub use evaluation::{Decision, EvaluationReason, UserContext};
pub use flag::{Flag, FlagConfig, FlagConfigId, FlagId, FlagSnapshot, FlagType, Variant, VariantId};
pub use rule::{canonical_string, Rule, RuleId, RuleKind, RuleOperator};
