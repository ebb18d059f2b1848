//! Pool of network identities (egress proxy plus browser fingerprint).
//!
//! An identity is checked out by exactly one in-flight fetch at a time. The
//! pool is bounded by a semaphore; identities that were soft-blocked or that
//! exhausted their usage budget are retired and never handed out again.
//!
//! Retiring consumes the only [`Identity`] handle for a session, so a retired
//! session cannot come back through [`IdentityRotator::release`]. The pool
//! keeps just a count of retirements plus the sessions whose per-strategy
//! state has not yet been swept with [`IdentityRotator::take_retired`].

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

use revharvest_core::{HarvestConfig, ProxyPoolConfig};

use crate::error::ScraperError;

/// Browser-like request fingerprint attached to an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintProfile {
    pub user_agent: &'static str,
    pub accept_language: &'static str,
    pub platform: &'static str,
    pub viewport: (u32, u32),
}

/// Current desktop browser fingerprints.
pub const FINGERPRINT_PROFILES: &[FingerprintProfile] = &[
    FingerprintProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        accept_language: "en-US,en;q=0.9",
        platform: "Win32",
        viewport: (1920, 1080),
    },
    FingerprintProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        accept_language: "en-US,en;q=0.9",
        platform: "MacIntel",
        viewport: (1440, 900),
    },
    FingerprintProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
        accept_language: "en-US,en;q=0.5",
        platform: "Win32",
        viewport: (1536, 864),
    },
    FingerprintProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
        accept_language: "en-GB,en;q=0.9",
        platform: "MacIntel",
        viewport: (1680, 1050),
    },
    FingerprintProfile {
        user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36 Edg/130.0.0.0",
        accept_language: "en-US,en;q=0.8",
        platform: "Win32",
        viewport: (1366, 768),
    },
];

fn random_profile() -> &'static FingerprintProfile {
    &FINGERPRINT_PROFILES[rand::random_range(0..FINGERPRINT_PROFILES.len())]
}

/// A checked-out identity. Holds a pool slot until it is handed back with
/// [`IdentityRotator::release`] or [`IdentityRotator::retire`].
pub struct Identity {
    session: Uuid,
    proxy: Option<String>,
    profile: &'static FingerprintProfile,
    usage_count: u32,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Identity {
    /// Stable id for the lifetime of this identity; strategies key their
    /// per-session state (cookie jars, browser instances) on it.
    #[must_use]
    pub fn session(&self) -> Uuid {
        self.session
    }

    #[must_use]
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    #[must_use]
    pub fn profile(&self) -> &'static FingerprintProfile {
        self.profile
    }

    /// Number of fetches this identity has been checked out for, including
    /// the current one.
    #[must_use]
    pub fn usage_count(&self) -> u32 {
        self.usage_count
    }

    /// An identity outside any pool, for exercising strategies directly.
    #[must_use]
    pub fn detached(proxy: Option<String>) -> Self {
        Self {
            session: Uuid::new_v4(),
            proxy,
            profile: random_profile(),
            usage_count: 1,
            _permit: None,
        }
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("session", &self.session)
            .field("proxy", &self.proxy.as_ref().map(|_| "[redacted]"))
            .field("platform", &self.profile.platform)
            .field("usage_count", &self.usage_count)
            .finish_non_exhaustive()
    }
}

struct IdleIdentity {
    session: Uuid,
    proxy: Option<String>,
    profile: &'static FingerprintProfile,
    usage_count: u32,
}

#[derive(Default)]
struct PoolState {
    idle: VecDeque<IdleIdentity>,
    retired: usize,
    /// Retired sessions not yet handed to [`IdentityRotator::take_retired`].
    unswept: Vec<Uuid>,
    provisioned: usize,
    next_proxy: usize,
}

/// Hands out identities with mutual exclusion, least-recently-used first.
pub struct IdentityRotator {
    state: Mutex<PoolState>,
    slots: Arc<Semaphore>,
    proxies: Vec<String>,
    max_uses: u32,
}

impl IdentityRotator {
    /// Creates a pool allowing at most `pool_size` concurrent checkouts.
    ///
    /// `max_uses` of zero disables usage-based retirement.
    #[must_use]
    pub fn new(pool_size: usize, proxies: &ProxyPoolConfig, max_uses: u32) -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            slots: Arc::new(Semaphore::new(pool_size.max(1))),
            proxies: proxies.endpoints.clone(),
            max_uses,
        }
    }

    #[must_use]
    pub fn from_config(config: &HarvestConfig) -> Self {
        Self::new(
            config.identity_pool_size,
            &config.proxy_pool,
            config.identity_max_uses,
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits for a free slot and checks out the least-recently-used idle
    /// identity, provisioning a fresh one when none is idle.
    ///
    /// # Errors
    ///
    /// Returns [`ScraperError::IdentityPoolClosed`] after [`Self::close`].
    pub async fn acquire(&self) -> Result<Identity, ScraperError> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| ScraperError::IdentityPoolClosed)?;

        let mut state = self.lock();
        let idle = if let Some(idle) = state.idle.pop_front() {
            idle
        } else {
            let proxy = if self.proxies.is_empty() {
                None
            } else {
                let proxy = self.proxies[state.next_proxy % self.proxies.len()].clone();
                state.next_proxy = state.next_proxy.wrapping_add(1);
                Some(proxy)
            };
            state.provisioned += 1;
            let fresh = IdleIdentity {
                session: Uuid::new_v4(),
                proxy,
                profile: random_profile(),
                usage_count: 0,
            };
            tracing::debug!(session = %fresh.session, platform = fresh.profile.platform, "provisioned identity");
            fresh
        };

        Ok(Identity {
            session: idle.session,
            proxy: idle.proxy,
            profile: idle.profile,
            usage_count: idle.usage_count + 1,
            _permit: Some(permit),
        })
    }

    /// Returns a healthy identity to the back of the idle queue, or retires it
    /// once it has reached its usage budget.
    ///
    /// Returns `true` if the identity was retired.
    pub fn release(&self, identity: Identity) -> bool {
        if self.max_uses > 0 && identity.usage_count >= self.max_uses {
            tracing::debug!(session = %identity.session, uses = identity.usage_count, "identity reached usage budget");
            self.retire(identity);
            return true;
        }
        self.lock().idle.push_back(IdleIdentity {
            session: identity.session,
            proxy: identity.proxy,
            profile: identity.profile,
            usage_count: identity.usage_count,
        });
        false
    }

    /// Permanently removes an identity from rotation.
    pub fn retire(&self, identity: Identity) {
        let mut state = self.lock();
        state.retired += 1;
        state.unswept.push(identity.session);
        tracing::info!(session = %identity.session, uses = identity.usage_count, "identity retired");
    }

    /// Drains sessions retired since the last call, so callers can drop any
    /// state they keyed on them. Each session is returned once.
    pub fn take_retired(&self) -> Vec<Uuid> {
        std::mem::take(&mut self.lock().unswept)
    }

    /// Rejects all pending and future [`Self::acquire`] calls.
    pub fn close(&self) {
        self.slots.close();
    }

    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.lock().idle.len()
    }

    #[must_use]
    pub fn retired_count(&self) -> usize {
        self.lock().retired
    }

    #[must_use]
    pub fn provisioned_count(&self) -> usize {
        self.lock().provisioned
    }

    /// Slots currently free for checkout.
    #[must_use]
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

#[cfg(test)]
#[path = "identity_test.rs"]
mod tests;
