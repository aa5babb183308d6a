// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Deterministic fingerprinting for rollout bucketing.
//!
//! The on-disk meaning of every rollout percentage depends on this mapping
//! staying stable: for a fixed `(id, salt)` the bucket must be identical
//! across processes and time, and across differing salts the buckets must be
//! statistically independent. Changing the digest or the byte order is a
//! breaking change.

use sha2::{Digest, Sha256};

/// Identifier used for bucketing when the context has no user id.
pub const ANONYMOUS_ID: &str = "anonymous";

/// Maps `(id, salt)` to a uniform 32-bit value: the first four bytes,
/// big-endian, of SHA-256 over `id ":" salt`.
pub fn fingerprint(id: &str, salt: &str) -> u32 {
	let mut hasher = Sha256::new();
	hasher.update(id.as_bytes());
	hasher.update(b":");
	hasher.update(salt.as_bytes());
	let digest = hasher.finalize();

	u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Maps `(id, salt)` to a bucket in `[0, 99]`.
pub fn bucket(id: &str, salt: &str) -> u32 {
	fingerprint(id, salt) % 100
}
