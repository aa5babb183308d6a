// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use prometheus::{
	Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};

use pennon_flags_core::EvaluationReason;

// Prometheus metrics for both planes. The registry owns the collectors and
// exposes them via encode().
pub struct FlagsMetrics {
	registry: Registry,

	pub evaluations_total: CounterVec,
	pub evaluation_duration: Histogram,
	pub cache_hits: Counter,
	pub cache_misses: Counter,
	pub config_changes_total: CounterVec,
	pub kill_switch_activations: Counter,
}

impl Default for FlagsMetrics {
	fn default() -> Self {
		Self::new()
	}
}

impl FlagsMetrics {
	pub fn new() -> Self {
		let registry = Registry::new();

		let evaluations_total = CounterVec::new(
			Opts::new("flag_evaluations_total", "Total flag evaluations"),
			&["flag", "environment", "result", "reason"],
		)
		.unwrap();
		registry
			.register(Box::new(evaluations_total.clone()))
			.unwrap();

		let evaluation_duration = Histogram::with_opts(
			HistogramOpts::new(
				"flag_evaluation_duration_seconds",
				"Flag evaluation duration",
			)
			.buckets(vec![
				0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0,
			]),
		)
		.unwrap();
		registry
			.register(Box::new(evaluation_duration.clone()))
			.unwrap();

		let cache_hits = Counter::new("flag_cache_hits_total", "Config cache hits").unwrap();
		registry.register(Box::new(cache_hits.clone())).unwrap();

		let cache_misses = Counter::new("flag_cache_misses_total", "Config cache misses").unwrap();
		registry.register(Box::new(cache_misses.clone())).unwrap();

		let config_changes_total = CounterVec::new(
			Opts::new("flag_config_changes_total", "Control plane mutations"),
			&["action"],
		)
		.unwrap();
		registry
			.register(Box::new(config_changes_total.clone()))
			.unwrap();

		let kill_switch_activations = Counter::new(
			"kill_switch_activations_total",
			"Kill switch activations",
		)
		.unwrap();
		registry
			.register(Box::new(kill_switch_activations.clone()))
			.unwrap();

		FlagsMetrics {
			registry,
			evaluations_total,
			evaluation_duration,
			cache_hits,
			cache_misses,
			config_changes_total,
			kill_switch_activations,
		}
	}

	pub fn record_evaluation(
		&self,
		flag_key: &str,
		environment: &str,
		enabled: bool,
		reason: EvaluationReason,
	) {
		self
			.evaluations_total
			.with_label_values(&[
				flag_key,
				environment,
				if enabled { "enabled" } else { "disabled" },
				reason.as_str(),
			])
			.inc();
	}

	pub fn record_config_change(&self, action: &str) {
		self.config_changes_total.with_label_values(&[action]).inc();
	}

	pub fn encode(&self) -> String {
		let encoder = TextEncoder::new();
		let metric_families = self.registry.gather();
		let mut buffer = Vec::new();
		encoder.encode(&metric_families, &mut buffer).unwrap();
		String::from_utf8(buffer).unwrap()
	}
}
