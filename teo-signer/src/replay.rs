//! Replay cache
//!
//! Bounded, TTL-expiring record of consumed authorizations. An entry stays
//! until its authorization's deadline (plus clock skew) has passed, after
//! which the deadline check alone rejects the signature. Live entries are
//! never evicted to make room; a full cache fails closed.

use alloy_primitives::{Address, B256};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::error::{SignerError, SignerResult};

/// A consumed authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedAuthorization {
    /// Canonical signature hex
    pub signature: String,
    /// Signing actor
    pub actor: Address,
    /// Actor nonce
    pub nonce: u64,
    /// Canonical message hash
    pub message_hash: B256,
    /// Operation name
    pub operation: &'static str,
    /// When it was consumed
    pub consumed_at: DateTime<Utc>,
    /// When the entry may be dropped
    pub expires_at: DateTime<Utc>,
}

impl ConsumedAuthorization {
    /// Check if the entry can be dropped
    pub fn is_expired(&self, now: &DateTime<Utc>) -> bool {
        *now > self.expires_at
    }
}

/// Replay cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayCacheStats {
    /// Live entries
    pub entries: usize,
    /// Total consumed since creation
    pub total_consumed: u64,
    /// Total replays rejected
    pub total_replays: u64,
    /// Total purged entries
    pub total_purged: u64,
}

/// Replay cache keyed by signature and by `(actor, nonce)`
pub struct ReplayCache {
    by_signature: HashMap<String, ConsumedAuthorization>,
    by_actor_nonce: HashMap<(Address, u64), String>,
    capacity: usize,
    skew: Duration,
    stats: ReplayCacheStats,
}

impl ReplayCache {
    /// Create new cache
    pub fn new(capacity: usize, skew_secs: i64) -> Self {
        Self {
            by_signature: HashMap::new(),
            by_actor_nonce: HashMap::new(),
            capacity,
            skew: Duration::seconds(skew_secs),
            stats: ReplayCacheStats::default(),
        }
    }

    /// Retention deadline for an authorization with the given deadline
    pub fn retention_for(&self, deadline: DateTime<Utc>) -> DateTime<Utc> {
        deadline + self.skew
    }

    /// Whether the signature or the `(actor, nonce)` pair was consumed
    pub fn contains(&self, signature: &str, actor: Address, nonce: u64) -> bool {
        self.by_signature.contains_key(signature) || self.by_actor_nonce.contains_key(&(actor, nonce))
    }

    /// Record a consumption, failing if it is a replay
    pub fn consume(&mut self, entry: ConsumedAuthorization, now: &DateTime<Utc>) -> SignerResult<()> {
        if self.contains(&entry.signature, entry.actor, entry.nonce) {
            self.stats.total_replays += 1;
            return Err(SignerError::Replayed {
                actor: entry.actor,
                nonce: entry.nonce,
            });
        }

        if self.by_signature.len() >= self.capacity {
            self.purge_expired(now);
            if self.by_signature.len() >= self.capacity {
                return Err(SignerError::CacheFull {
                    capacity: self.capacity,
                });
            }
        }

        self.by_actor_nonce
            .insert((entry.actor, entry.nonce), entry.signature.clone());
        self.by_signature.insert(entry.signature.clone(), entry);
        self.stats.total_consumed += 1;
        self.stats.entries = self.by_signature.len();
        Ok(())
    }

    /// Drop entries whose retention has passed
    pub fn purge_expired(&mut self, now: &DateTime<Utc>) -> usize {
        let before = self.by_signature.len();
        self.by_signature.retain(|_, entry| !entry.is_expired(now));
        let live = &self.by_signature;
        self.by_actor_nonce.retain(|_, signature| live.contains_key(signature));

        let purged = before - self.by_signature.len();
        self.stats.total_purged += purged as u64;
        self.stats.entries = self.by_signature.len();
        purged
    }

    /// Get entry by signature
    pub fn get(&self, signature: &str) -> Option<&ConsumedAuthorization> {
        self.by_signature.get(signature)
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.by_signature.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.by_signature.is_empty()
    }

    /// Statistics
    pub fn stats(&self) -> ReplayCacheStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(sig: &str, nonce: u64, expires_at: DateTime<Utc>) -> ConsumedAuthorization {
        ConsumedAuthorization {
            signature: sig.to_string(),
            actor: Address::repeat_byte(0xaa),
            nonce,
            message_hash: B256::ZERO,
            operation: "stake",
            consumed_at: Utc::now(),
            expires_at,
        }
    }

    #[test]
    fn test_consume_then_replay() {
        let now = Utc::now();
        let mut cache = ReplayCache::new(10, 0);
        cache.consume(entry("0x01", 1, now + Duration::minutes(5)), &now).unwrap();

        let err = cache
            .consume(entry("0x01", 1, now + Duration::minutes(5)), &now)
            .unwrap_err();
        assert!(matches!(err, SignerError::Replayed { nonce: 1, .. }));
        assert_eq!(cache.stats().total_replays, 1);
    }

    #[test]
    fn test_same_nonce_new_signature_is_replay() {
        let now = Utc::now();
        let mut cache = ReplayCache::new(10, 0);
        cache.consume(entry("0x01", 1, now + Duration::minutes(5)), &now).unwrap();

        let result = cache.consume(entry("0x02", 1, now + Duration::minutes(5)), &now);
        assert!(matches!(result, Err(SignerError::Replayed { .. })));
    }

    #[test]
    fn test_full_cache_purges_expired_first() {
        let now = Utc::now();
        let mut cache = ReplayCache::new(2, 0);
        cache.consume(entry("0x01", 1, now - Duration::seconds(1)), &now).unwrap();
        cache.consume(entry("0x02", 2, now + Duration::minutes(5)), &now).unwrap();

        cache.consume(entry("0x03", 3, now + Duration::minutes(5)), &now).unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.get("0x01").is_none());
    }

    #[test]
    fn test_full_cache_of_live_entries_fails_closed() {
        let now = Utc::now();
        let mut cache = ReplayCache::new(1, 0);
        cache.consume(entry("0x01", 1, now + Duration::minutes(5)), &now).unwrap();

        let result = cache.consume(entry("0x02", 2, now + Duration::minutes(5)), &now);
        assert!(matches!(result, Err(SignerError::CacheFull { capacity: 1 })));
        assert!(cache.get("0x01").is_some());
    }

    #[test]
    fn test_purge_drops_nonce_index() {
        let now = Utc::now();
        let mut cache = ReplayCache::new(10, 0);
        cache.consume(entry("0x01", 1, now - Duration::seconds(1)), &now).unwrap();

        assert_eq!(cache.purge_expired(&now), 1);
        assert!(!cache.contains("0x01", Address::repeat_byte(0xaa), 1));
        assert!(cache.is_empty());
    }
}
