//! Generation quota gate
//!
//! Fixed-window credits per caller. Callers with a personal credential skip the gate. Everyone
//! else is counted twice: once by network address (anonymous scope) and once by stable identity
//! (identified scope). The identified remaining count is persisted to a [`CreditLedger`] after
//! every decision so it can be shown to the user. A request refused by the identified scope
//! hands back the anonymous credit it took, so a denial leaves both counters unchanged.

use crate::{
    config::{QuotaPolicy, ScopeLimit},
    error::{ComposeError, QuotaScope, Result},
    types::CallerContext,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Outcome of one atomic check-and-decrement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaDecision {
    pub allowed: bool,
    /// Credits left in the window after this decision
    pub remaining: u32,
}

impl QuotaDecision {
    #[must_use]
    pub fn allow(remaining: u32) -> Self {
        Self {
            allowed: true,
            remaining,
        }
    }

    #[must_use]
    pub fn deny() -> Self {
        Self {
            allowed: false,
            remaining: 0,
        }
    }
}

/// Counter store with an atomic check-and-decrement primitive
///
/// Implementations backed by a shared external store must map this onto that store's own
/// atomic operation. A read followed by a separate write is not acceptable.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Start a fresh window at full `capacity` if none exists or the current one has expired,
    /// then take one credit if any is left.
    ///
    /// # Errors
    /// - Store failures
    async fn check_and_decrement(
        &self,
        key: &str,
        window: Duration,
        capacity: u32,
    ) -> Result<QuotaDecision>;

    /// Give back one credit taken by `check_and_decrement` in the same window, never going
    /// above `capacity`.
    ///
    /// # Errors
    /// - Store failures
    async fn refund(&self, key: &str, capacity: u32) -> Result<()>;
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    started: Instant,
    window: Duration,
    remaining: u32,
}

impl WindowState {
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.started) >= self.window
    }
}

/// Key count above which a check sweeps out expired windows
pub const DEFAULT_PRUNE_THRESHOLD: usize = 10_000;

/// Process-local store; each key's read-modify-write runs under its map shard lock
#[derive(Debug)]
pub struct InMemoryQuotaStore {
    windows: DashMap<String, WindowState>,
    prune_threshold: usize,
}

impl Default for InMemoryQuotaStore {
    fn default() -> Self {
        Self {
            windows: DashMap::new(),
            prune_threshold: DEFAULT_PRUNE_THRESHOLD,
        }
    }
}

impl InMemoryQuotaStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_prune_threshold(mut self, threshold: usize) -> Self {
        self.prune_threshold = threshold;
        self
    }

    /// Number of keys with a window on record
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Drop every window that has run out, returning how many were removed
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, state| !state.expired(now));
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!(removed, remaining = self.windows.len(), "Pruned expired quota windows");
        }
        removed
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn check_and_decrement(
        &self,
        key: &str,
        window: Duration,
        capacity: u32,
    ) -> Result<QuotaDecision> {
        let now = Instant::now();
        let decision = {
            let mut entry = self
                .windows
                .entry(key.to_string())
                .or_insert_with(|| WindowState {
                    started: now,
                    window,
                    remaining: capacity,
                });
            let state = entry.value_mut();

            if state.expired(now) {
                state.started = now;
                state.window = window;
                state.remaining = capacity;
            }
            if state.remaining == 0 {
                QuotaDecision::deny()
            } else {
                state.remaining -= 1;
                QuotaDecision::allow(state.remaining)
            }
        };

        // The entry guard must be released before sweeping the map.
        if self.windows.len() > self.prune_threshold {
            self.prune_expired();
        }
        Ok(decision)
    }

    async fn refund(&self, key: &str, capacity: u32) -> Result<()> {
        if let Some(mut state) = self.windows.get_mut(key) {
            state.remaining = state.remaining.saturating_add(1).min(capacity);
        }
        Ok(())
    }
}

/// Persisted "remaining credits" per identity, read by the UI
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// # Errors
    /// - Store failures
    async fn record_remaining(&self, identity: &str, remaining: u32) -> Result<()>;

    /// # Errors
    /// - Store failures
    async fn remaining(&self, identity: &str) -> Result<Option<u32>>;
}

#[derive(Debug, Default)]
pub struct InMemoryCreditLedger {
    credits: DashMap<String, u32>,
}

impl InMemoryCreditLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CreditLedger for InMemoryCreditLedger {
    async fn record_remaining(&self, identity: &str, remaining: u32) -> Result<()> {
        self.credits.insert(identity.to_string(), remaining);
        Ok(())
    }

    async fn remaining(&self, identity: &str) -> Result<Option<u32>> {
        Ok(self.credits.get(identity).map(|entry| *entry.value()))
    }
}

/// Why a generation call was let through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Caller brought a personal credential; no counter was touched
    Bypassed,
    /// Quotas are switched off in configuration
    Unmetered,
    /// Both scopes allowed; `remaining` is the identified scope's count
    Allowed { remaining: u32 },
}

/// Two-scope fixed-window gate in front of the generation service
#[derive(Clone)]
pub struct QuotaGate {
    store: Arc<dyn QuotaStore>,
    ledger: Arc<dyn CreditLedger>,
    policy: QuotaPolicy,
}

impl std::fmt::Debug for QuotaGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaGate")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl QuotaGate {
    #[must_use]
    pub fn new(
        policy: QuotaPolicy,
        store: Arc<dyn QuotaStore>,
        ledger: Arc<dyn CreditLedger>,
    ) -> Self {
        Self {
            store,
            ledger,
            policy,
        }
    }

    /// Gate backed by process-local store and ledger
    #[must_use]
    pub fn in_memory(policy: QuotaPolicy) -> Self {
        Self::new(
            policy,
            Arc::new(InMemoryQuotaStore::new()),
            Arc::new(InMemoryCreditLedger::new()),
        )
    }

    #[must_use]
    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    fn limit(&self, scope: QuotaScope) -> ScopeLimit {
        match scope {
            QuotaScope::Anonymous => self.policy.anonymous,
            QuotaScope::Identified => self.policy.identified,
        }
    }

    /// Namespaced store key, `"{prefix}:{scope}:{caller}"`
    #[must_use]
    pub fn store_key(&self, scope: QuotaScope, caller_key: &str) -> String {
        format!("{}:{}:{}", self.policy.key_prefix, scope, caller_key)
    }

    /// Check one scope for one caller key
    ///
    /// # Errors
    /// - Store failures
    pub async fn check(&self, caller_key: &str, scope: QuotaScope) -> Result<QuotaDecision> {
        let limit = self.limit(scope);
        let key = self.store_key(scope, caller_key);
        let decision = self
            .store
            .check_and_decrement(&key, limit.window(), limit.capacity)
            .await?;
        debug!(
            %scope,
            allowed = decision.allowed,
            remaining = decision.remaining,
            "Quota decision"
        );
        Ok(decision)
    }

    /// Decide whether `caller` may start a generation
    ///
    /// # Errors
    /// - `ComposeError::QuotaDenied` naming the exhausted scope
    /// - `ComposeError::MissingIdentity` when the identified scope has no key to count against
    /// - Store failures; any anonymous credit already taken is handed back first
    ///
    /// A failed credit-ledger write is logged and does not affect the decision.
    #[instrument(skip_all, fields(address = %caller.network_address))]
    pub async fn authorize(&self, caller: &CallerContext) -> Result<Admission> {
        if caller.has_credential() {
            debug!("Personal credential supplied, quota bypassed");
            return Ok(Admission::Bypassed);
        }
        if !self.policy.enabled {
            return Ok(Admission::Unmetered);
        }

        // Checked up front so no anonymous credit is spent on a request that cannot pass.
        let identity = caller
            .identity
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .ok_or(ComposeError::MissingIdentity)?;

        let anonymous = self
            .check(&caller.network_address, QuotaScope::Anonymous)
            .await?;
        if !anonymous.allowed {
            info!("Anonymous quota exhausted");
            return Err(ComposeError::QuotaDenied {
                scope: QuotaScope::Anonymous,
            });
        }

        let identified = match self.check(identity, QuotaScope::Identified).await {
            Ok(decision) => decision,
            Err(e) => {
                self.refund_anonymous(caller).await;
                return Err(e);
            },
        };

        // The ledger only feeds the credit display; a failed write must not cost a credit.
        if let Err(e) = self
            .ledger
            .record_remaining(identity, identified.remaining)
            .await
        {
            warn!(error = %e, "Failed to record remaining credits");
        }

        if !identified.allowed {
            info!("Identified quota exhausted");
            self.refund_anonymous(caller).await;
            return Err(ComposeError::QuotaDenied {
                scope: QuotaScope::Identified,
            });
        }

        Ok(Admission::Allowed {
            remaining: identified.remaining,
        })
    }

    /// Hand back the anonymous credit taken for a request that will not reach the generator
    async fn refund_anonymous(&self, caller: &CallerContext) {
        let key = self.store_key(QuotaScope::Anonymous, &caller.network_address);
        if let Err(e) = self
            .store
            .refund(&key, self.policy.anonymous.capacity)
            .await
        {
            warn!(error = %e, key = %key, "Failed to refund anonymous credit");
        }
    }

    /// Last persisted credit count for `identity`
    ///
    /// # Errors
    /// - Ledger failures
    pub async fn remaining_credits(&self, identity: &str) -> Result<Option<u32>> {
        self.ledger.remaining(identity).await
    }
}
