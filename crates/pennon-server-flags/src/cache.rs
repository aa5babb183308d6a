// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The distributed config cache.
//!
//! Snapshots are cached per (flag, environment) under
//! `flag_config:<flag_key>:<environment>` with a TTL. The TTL is a safety
//! net for stale keys; freshness comes from the control plane invalidating
//! after every commit and before every mutation response.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::instrument;

use pennon_flags_core::FlagSnapshot;

use crate::error::Result;

/// Default snapshot TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Key for one (flag, environment) snapshot, without the deployment prefix.
pub fn cache_key(flag_key: &str, environment: &str) -> String {
	FlagSnapshot::cache_key(flag_key, environment)
}

/// Key-value cache of pre-joined flag snapshots.
#[async_trait]
pub trait ConfigCache: Send + Sync {
	async fn get(&self, flag_key: &str, environment: &str) -> Result<Option<FlagSnapshot>>;

	async fn put(&self, snapshot: &FlagSnapshot, environment: &str) -> Result<()>;

	/// Deletes one (flag, environment) key.
	async fn invalidate(&self, flag_key: &str, environment: &str) -> Result<()>;

	/// Deletes every key for the flag across all environments; returns the
	/// number of keys removed.
	async fn invalidate_flag(&self, flag_key: &str) -> Result<u64>;

	/// Cached keys (without the deployment prefix), for diagnostics.
	async fn list_keys(&self) -> Result<Vec<String>>;

	async fn count(&self) -> Result<u64>;

	/// Cache liveness probe.
	async fn ping(&self) -> Result<()>;
}

/// Redis-backed cache shared by the control and data planes.
#[derive(Clone)]
pub struct RedisConfigCache {
	conn: redis::aio::ConnectionManager,
	prefix: String,
	ttl: Duration,
}

impl RedisConfigCache {
	pub fn new(conn: redis::aio::ConnectionManager, prefix: impl Into<String>, ttl: Duration) -> Self {
		Self {
			conn,
			prefix: prefix.into(),
			ttl,
		}
	}

	/// Connects lazily; the connection manager reconnects with bounded
	/// retries on its own.
	pub async fn connect(url: &str, prefix: impl Into<String>, ttl: Duration) -> Result<Self> {
		let client = redis::Client::open(url)?;
		let conn = client.get_connection_manager().await?;
		Ok(Self::new(conn, prefix, ttl))
	}

	fn full_key(&self, flag_key: &str, environment: &str) -> String {
		format!("{}{}", self.prefix, cache_key(flag_key, environment))
	}

	async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>> {
		let mut conn = self.conn.clone();
		let mut keys = Vec::new();
		{
			let mut iter: redis::AsyncIter<'_, String> = conn.scan_match(pattern).await?;
			while let Some(key) = iter.next_item().await {
				keys.push(key);
			}
		}
		Ok(keys)
	}
}

#[async_trait]
impl ConfigCache for RedisConfigCache {
	#[instrument(skip(self), fields(flag_key = %flag_key, environment = %environment))]
	async fn get(&self, flag_key: &str, environment: &str) -> Result<Option<FlagSnapshot>> {
		let mut conn = self.conn.clone();
		let raw: Option<String> = conn.get(self.full_key(flag_key, environment)).await?;

		match raw {
			Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
			None => Ok(None),
		}
	}

	#[instrument(skip(self, snapshot), fields(flag_key = %snapshot.flag.key, environment = %environment))]
	async fn put(&self, snapshot: &FlagSnapshot, environment: &str) -> Result<()> {
		let mut conn = self.conn.clone();
		let payload = serde_json::to_string(snapshot)?;
		let () = conn
			.set_ex(
				self.full_key(&snapshot.flag.key, environment),
				payload,
				self.ttl.as_secs(),
			)
			.await?;
		Ok(())
	}

	#[instrument(skip(self), fields(flag_key = %flag_key, environment = %environment))]
	async fn invalidate(&self, flag_key: &str, environment: &str) -> Result<()> {
		let mut conn = self.conn.clone();
		let _: u64 = conn.del(self.full_key(flag_key, environment)).await?;
		Ok(())
	}

	#[instrument(skip(self), fields(flag_key = %flag_key))]
	async fn invalidate_flag(&self, flag_key: &str) -> Result<u64> {
		let pattern = format!("{}flag_config:{}:*", self.prefix, flag_key);
		let keys = self.scan_keys(&pattern).await?;
		if keys.is_empty() {
			return Ok(0);
		}

		let mut conn = self.conn.clone();
		let deleted: u64 = conn.del(keys).await?;
		Ok(deleted)
	}

	#[instrument(skip(self))]
	async fn list_keys(&self) -> Result<Vec<String>> {
		let pattern = format!("{}flag_config:*", self.prefix);
		let keys = self.scan_keys(&pattern).await?;
		Ok(
			keys
				.into_iter()
				.map(|k| k.trim_start_matches(&self.prefix).to_string())
				.collect(),
		)
	}

	#[instrument(skip(self))]
	async fn count(&self) -> Result<u64> {
		Ok(self.list_keys().await?.len() as u64)
	}

	#[instrument(skip(self))]
	async fn ping(&self) -> Result<()> {
		let mut conn = self.conn.clone();
		let _: String = redis::cmd("PING").query_async(&mut conn).await?;
		Ok(())
	}
}

/// In-process cache with the same contract, for tests and single-node use.
pub struct InMemoryConfigCache {
	entries: RwLock<HashMap<String, (String, Instant)>>,
	ttl: Duration,
}

impl InMemoryConfigCache {
	pub fn new(ttl: Duration) -> Self {
		Self {
			entries: RwLock::new(HashMap::new()),
			ttl,
		}
	}

	fn live(entry: &(String, Instant)) -> bool {
		entry.1 > Instant::now()
	}
}

#[async_trait]
impl ConfigCache for InMemoryConfigCache {
	async fn get(&self, flag_key: &str, environment: &str) -> Result<Option<FlagSnapshot>> {
		let entries = self.entries.read().await;
		match entries.get(&cache_key(flag_key, environment)) {
			Some(entry) if Self::live(entry) => Ok(Some(serde_json::from_str(&entry.0)?)),
			_ => Ok(None),
		}
	}

	async fn put(&self, snapshot: &FlagSnapshot, environment: &str) -> Result<()> {
		let payload = serde_json::to_string(snapshot)?;
		let mut entries = self.entries.write().await;
		entries.insert(
			cache_key(&snapshot.flag.key, environment),
			(payload, Instant::now() + self.ttl),
		);
		Ok(())
	}

	async fn invalidate(&self, flag_key: &str, environment: &str) -> Result<()> {
		let mut entries = self.entries.write().await;
		entries.remove(&cache_key(flag_key, environment));
		Ok(())
	}

	async fn invalidate_flag(&self, flag_key: &str) -> Result<u64> {
		let prefix = format!("flag_config:{flag_key}:");
		let mut entries = self.entries.write().await;
		let before = entries.len();
		entries.retain(|key, _| !key.starts_with(&prefix));
		Ok((before - entries.len()) as u64)
	}

	async fn list_keys(&self) -> Result<Vec<String>> {
		let entries = self.entries.read().await;
		let mut keys: Vec<String> = entries
			.iter()
			.filter(|(_, entry)| Self::live(entry))
			.map(|(key, _)| key.clone())
			.collect();
		keys.sort();
		Ok(keys)
	}

	async fn count(&self) -> Result<u64> {
		Ok(self.list_keys().await?.len() as u64)
	}

	async fn ping(&self) -> Result<()> {
		Ok(())
	}
}
