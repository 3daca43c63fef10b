// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Distributed mutual exclusion across scheduler replicas.
//!
//! [`DistributedLock`] layers owner-aware acquire/release/refresh semantics
//! over a [`CoordinationStore`], which supplies the three atomic primitives
//! the lock needs: set-if-absent with TTL, compare-and-delete, and
//! compare-and-extend. The compare-and-mutate operations MUST be evaluated
//! server-side (Lua on Redis); a read-then-write cannot detect a TTL expiry
//! between the two steps.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::Result;

const LOCK_KEY_PREFIX: &str = "lock:";
const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Atomic primitives the lock is built on. Implementations must make
/// `compare_and_delete` / `compare_and_expire` atomic at the store.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
	/// Set `key = value` with a TTL only if the key is absent. Returns true
	/// iff the caller now owns the key.
	async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

	/// Delete `key` only if it currently holds `value`. Returns true iff a
	/// deletion happened.
	async fn compare_and_delete(&self, key: &str, value: &str) -> Result<bool>;

	/// Extend the TTL of `key` only if it currently holds `value`. Returns
	/// true iff the TTL was extended.
	async fn compare_and_expire(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

	/// Read the current value of `key`, if any.
	async fn get(&self, key: &str) -> Result<Option<String>>;
}

const DELETE_IF_OWNER: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
	return redis.call("del", KEYS[1])
else
	return 0
end
"#;

const EXPIRE_IF_OWNER: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
	return redis.call("pexpire", KEYS[1], ARGV[2])
else
	return 0
end
"#;

/// Redis-backed [`CoordinationStore`]. The compare-and-mutate operations run
/// as server-evaluated Lua scripts.
#[derive(Clone)]
pub struct RedisCoordinationStore {
	manager: ConnectionManager,
	delete_if_owner: Script,
	expire_if_owner: Script,
}

impl RedisCoordinationStore {
	pub async fn connect(client: redis::Client) -> Result<Self> {
		let manager = ConnectionManager::new(client).await?;
		Ok(Self {
			manager,
			delete_if_owner: Script::new(DELETE_IF_OWNER),
			expire_if_owner: Script::new(EXPIRE_IF_OWNER),
		})
	}
}

#[async_trait]
impl CoordinationStore for RedisCoordinationStore {
	async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
		let mut conn = self.manager.clone();
		let set: Option<String> = redis::cmd("SET")
			.arg(key)
			.arg(value)
			.arg("NX")
			.arg("PX")
			.arg(ttl.as_millis() as u64)
			.query_async(&mut conn)
			.await?;
		Ok(set.is_some())
	}

	async fn compare_and_delete(&self, key: &str, value: &str) -> Result<bool> {
		let mut conn = self.manager.clone();
		let deleted: i64 = self
			.delete_if_owner
			.key(key)
			.arg(value)
			.invoke_async(&mut conn)
			.await?;
		Ok(deleted > 0)
	}

	async fn compare_and_expire(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
		let mut conn = self.manager.clone();
		let extended: i64 = self
			.expire_if_owner
			.key(key)
			.arg(value)
			.arg(ttl.as_millis() as u64)
			.invoke_async(&mut conn)
			.await?;
		Ok(extended > 0)
	}

	async fn get(&self, key: &str) -> Result<Option<String>> {
		let mut conn = self.manager.clone();
		let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
		Ok(value)
	}
}

/// In-memory [`CoordinationStore`] honouring TTLs. Used by tests and by
/// single-replica deployments that run without a coordination service.
#[derive(Default)]
pub struct MemoryCoordinationStore {
	entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCoordinationStore {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl CoordinationStore for MemoryCoordinationStore {
	async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
		let mut entries = self.entries.lock().unwrap();
		let now = Instant::now();
		match entries.get(key) {
			Some((_, expires_at)) if *expires_at > now => Ok(false),
			_ => {
				entries.insert(key.to_string(), (value.to_string(), now + ttl));
				Ok(true)
			}
		}
	}

	async fn compare_and_delete(&self, key: &str, value: &str) -> Result<bool> {
		let mut entries = self.entries.lock().unwrap();
		let now = Instant::now();
		match entries.get(key) {
			Some((held, expires_at)) if *expires_at > now && held == value => {
				entries.remove(key);
				Ok(true)
			}
			_ => Ok(false),
		}
	}

	async fn compare_and_expire(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
		let mut entries = self.entries.lock().unwrap();
		let now = Instant::now();
		match entries.get_mut(key) {
			Some((held, expires_at)) if *expires_at > now && held == value => {
				*expires_at = now + ttl;
				Ok(true)
			}
			_ => Ok(false),
		}
	}

	async fn get(&self, key: &str) -> Result<Option<String>> {
		let entries = self.entries.lock().unwrap();
		let now = Instant::now();
		Ok(entries
			.get(key)
			.filter(|(_, expires_at)| *expires_at > now)
			.map(|(value, _)| value.clone()))
	}
}

/// A named mutex across replicas, identified by this process's worker id.
pub struct DistributedLock {
	store: std::sync::Arc<dyn CoordinationStore>,
	worker_id: String,
}

/// Stable worker identity chosen at startup: `worker-<8 hex>`.
pub fn generate_worker_id() -> String {
	let uuid = Uuid::new_v4().simple().to_string();
	format!("worker-{}", &uuid[..8])
}

impl DistributedLock {
	pub fn new(store: std::sync::Arc<dyn CoordinationStore>, worker_id: String) -> Self {
		Self { store, worker_id }
	}

	pub fn worker_id(&self) -> &str {
		&self.worker_id
	}

	fn lock_key(key: &str) -> String {
		format!("{LOCK_KEY_PREFIX}{key}")
	}

	/// Try to take the lock. Returns true iff this worker now owns it.
	#[instrument(skip(self), fields(worker_id = %self.worker_id))]
	pub async fn acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
		self
			.store
			.set_nx(&Self::lock_key(key), &self.worker_id, ttl)
			.await
	}

	/// Release the lock if this worker owns it. Releasing a lock held by
	/// another owner (or nobody) is not an error, and never deletes a
	/// foreign lock.
	#[instrument(skip(self), fields(worker_id = %self.worker_id))]
	pub async fn release(&self, key: &str) -> Result<()> {
		let released = self
			.store
			.compare_and_delete(&Self::lock_key(key), &self.worker_id)
			.await?;
		if !released {
			debug!(key, "release skipped, lock not held by this worker");
		}
		Ok(())
	}

	/// Extend the TTL if this worker owns the lock; no-op otherwise.
	#[instrument(skip(self), fields(worker_id = %self.worker_id))]
	pub async fn refresh(&self, key: &str, ttl: Duration) -> Result<()> {
		let refreshed = self
			.store
			.compare_and_expire(&Self::lock_key(key), &self.worker_id, ttl)
			.await?;
		if !refreshed {
			debug!(key, "refresh skipped, lock not held by this worker");
		}
		Ok(())
	}

	/// Whether this worker currently holds the lock. Diagnostic only, not a
	/// synchronisation primitive.
	pub async fn is_held(&self, key: &str) -> Result<bool> {
		let value = self.store.get(&Self::lock_key(key)).await?;
		Ok(value.as_deref() == Some(self.worker_id.as_str()))
	}

	/// Poll for the lock at a 100 ms cadence until acquired or `timeout`
	/// elapses. Returns false on timeout.
	#[instrument(skip(self), fields(worker_id = %self.worker_id))]
	pub async fn wait_for(&self, key: &str, ttl: Duration, timeout: Duration) -> Result<bool> {
		let deadline = Instant::now() + timeout;
		loop {
			if self.acquire(key, ttl).await? {
				return Ok(true);
			}
			if Instant::now() + ACQUIRE_POLL_INTERVAL > deadline {
				return Ok(false);
			}
			tokio::time::sleep(ACQUIRE_POLL_INTERVAL).await;
		}
	}
}
