//! Signature Authorization Service
//!
//! Validates gas-free authorizations: recompute the canonical hash, recover
//! the signer, compare with the claimed actor, then consume the signature
//! in the replay cache. Only a consumed authorization yields a receipt.

use alloy_primitives::{Address, B256};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{SignerError, SignerResult};
use crate::message::MessageDomain;
use crate::operation::AuthorizedOperation;
use crate::recover::RecoverableSignature;
use crate::replay::{ConsumedAuthorization, ReplayCache, ReplayCacheStats};

/// Signer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerConfig {
    /// Authorizing contract address
    pub contract_address: String,
    /// Network (chain) id
    pub chain_id: u64,
    /// Maximum distance between now and an authorization's deadline
    #[serde(default = "default_max_ttl")]
    pub max_ttl_secs: u64,
    /// Maximum live entries in the replay cache
    #[serde(default = "default_replay_capacity")]
    pub replay_capacity: usize,
    /// Clock skew tolerated when retaining consumed entries
    #[serde(default = "default_skew")]
    pub clock_skew_secs: i64,
}

fn default_max_ttl() -> u64 {
    600
}

fn default_replay_capacity() -> usize {
    100_000
}

fn default_skew() -> i64 {
    60
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            contract_address: "0x0000000000000000000000000000000000000000".to_string(),
            chain_id: 80002,
            max_ttl_secs: default_max_ttl(),
            replay_capacity: default_replay_capacity(),
            clock_skew_secs: default_skew(),
        }
    }
}

/// A signed authorization presented by a caller
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Claimed signing actor
    pub actor: Address,
    /// Operation being approved
    pub operation: AuthorizedOperation,
    /// Actor-chosen nonce, unique per actor
    pub nonce: u64,
    /// Unix seconds after which the authorization is void
    pub deadline: u64,
    /// Hex signature over the canonical message
    pub signature: String,
}

/// Proof that an authorization was validated and consumed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationReceipt {
    /// Signing actor
    pub actor: Address,
    /// Nonce consumed
    pub nonce: u64,
    /// Canonical message hash
    pub message_hash: B256,
    /// Canonical signature hex
    pub signature: String,
    /// Consumption time
    pub consumed_at: DateTime<Utc>,
}

/// Signature authorizer
pub struct SignatureAuthorizer {
    domain: MessageDomain,
    max_ttl_secs: u64,
    cache: Mutex<ReplayCache>,
}

impl SignatureAuthorizer {
    /// Create from configuration
    pub fn new(config: &SignerConfig) -> SignerResult<Self> {
        if config.replay_capacity == 0 {
            return Err(SignerError::Configuration(
                "replay_capacity must be positive".to_string(),
            ));
        }
        let domain = MessageDomain::parse(&config.contract_address, config.chain_id)?;
        Ok(Self {
            domain,
            max_ttl_secs: config.max_ttl_secs,
            cache: Mutex::new(ReplayCache::new(config.replay_capacity, config.clock_skew_secs)),
        })
    }

    /// Message domain
    pub fn domain(&self) -> &MessageDomain {
        &self.domain
    }

    /// Build the canonical message hash
    pub fn build_message(
        &self,
        operation: &AuthorizedOperation,
        actor: Address,
        nonce: u64,
        deadline: u64,
    ) -> SignerResult<B256> {
        self.domain.build_message(operation, actor, nonce, deadline)
    }

    /// Validate and consume an authorization
    pub async fn validate(&self, request: &AuthorizationRequest) -> SignerResult<AuthorizationReceipt> {
        self.validate_at(request, Utc::now()).await
    }

    /// Validate and consume an authorization at a given time
    pub async fn validate_at(
        &self,
        request: &AuthorizationRequest,
        now: DateTime<Utc>,
    ) -> SignerResult<AuthorizationReceipt> {
        let deadline = deadline_time(request.deadline)?;
        if deadline < now {
            debug!(actor = %request.actor, nonce = request.nonce, "authorization deadline passed");
            return Err(SignerError::Expired {
                deadline: request.deadline,
            });
        }
        let horizon = now + chrono::Duration::seconds(self.max_ttl_secs as i64);
        if deadline > horizon {
            return Err(SignerError::Malformed(format!(
                "deadline {} exceeds the {}s authorization window",
                request.deadline, self.max_ttl_secs
            )));
        }

        let signature = RecoverableSignature::from_hex(&request.signature)?;
        let message_hash =
            self.build_message(&request.operation, request.actor, request.nonce, request.deadline)?;
        let recovered = signature.recover(&message_hash)?;

        if recovered != request.actor {
            warn!(
                target: "security",
                expected = %request.actor,
                recovered = %recovered,
                operation = request.operation.name(),
                "signature mismatch"
            );
            return Err(SignerError::Mismatch {
                expected: request.actor,
                recovered,
            });
        }

        let canonical = signature.to_hex();
        let mut cache = self.cache.lock().await;
        let entry = ConsumedAuthorization {
            signature: canonical.clone(),
            actor: request.actor,
            nonce: request.nonce,
            message_hash,
            operation: request.operation.name(),
            consumed_at: now,
            expires_at: cache.retention_for(deadline),
        };
        if let Err(e) = cache.consume(entry, &now) {
            if e.is_security() {
                warn!(
                    target: "security",
                    actor = %request.actor,
                    nonce = request.nonce,
                    operation = request.operation.name(),
                    "authorization replay rejected"
                );
            }
            return Err(e);
        }
        drop(cache);

        debug!(
            actor = %request.actor,
            nonce = request.nonce,
            operation = request.operation.name(),
            "authorization consumed"
        );

        Ok(AuthorizationReceipt {
            actor: request.actor,
            nonce: request.nonce,
            message_hash,
            signature: canonical,
            consumed_at: now,
        })
    }

    /// Whether a signature has been consumed
    pub async fn is_consumed(&self, signature: &str) -> bool {
        match RecoverableSignature::from_hex(signature) {
            Ok(sig) => self.cache.lock().await.get(&sig.to_hex()).is_some(),
            Err(_) => false,
        }
    }

    /// Purge expired replay entries
    pub async fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now()).await
    }

    /// Purge replay entries whose retention ended before `now`
    ///
    /// Callers that validate with `validate_at` should purge with the same
    /// time source.
    pub async fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        self.cache.lock().await.purge_expired(&now)
    }

    /// Replay cache statistics
    pub async fn cache_stats(&self) -> ReplayCacheStats {
        self.cache.lock().await.stats()
    }
}

fn deadline_time(deadline: u64) -> SignerResult<DateTime<Utc>> {
    i64::try_from(deadline)
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .ok_or_else(|| SignerError::Malformed(format!("deadline {} out of range", deadline)))
}
