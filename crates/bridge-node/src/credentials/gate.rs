use chrono::{Duration as ChronoDuration, Utc};
use common::{BridgeError, BridgeResult, Credential};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{Authenticator, CredentialStore};
use crate::metrics::RELOGINS_TOTAL;
use crate::retry::exponential_backoff;

/// A credential plus the generation it was handed out at. Passing the
/// generation back to [`CredentialGate::renew`] lets the gate tell a stale
/// report apart from one that still needs a login.
#[derive(Clone, Debug)]
pub struct Lease {
    pub credential: Credential,
    pub generation: u64,
}

struct Slot {
    credential: Option<Credential>,
    generation: u64,
    failure: Option<LoginFailure>,
}

/// The last failed renewal. Until `retry_at` every caller gets `error` back
/// instead of starting another login.
struct LoginFailure {
    attempts: u32,
    retry_at: Instant,
    error: BridgeError,
}

/// The single shared vendor session.
///
/// Camera tasks take the read lock to borrow the session. Renewal takes the
/// write lock, so every other task blocks until the new session is in place,
/// and a renewal for an already-superseded generation is a no-op. A failed
/// renewal is shared the same way: the tasks queued behind it see the failure
/// and no new login starts before the cooldown has passed.
pub struct CredentialGate {
    slot: RwLock<Slot>,
    authenticator: Arc<dyn Authenticator>,
    store: Option<CredentialStore>,
    refresh_margin: ChronoDuration,
    cooldown_start: Duration,
    cooldown_max: Duration,
    logins: AtomicU64,
}

impl CredentialGate {
    pub fn new(authenticator: Arc<dyn Authenticator>, store: Option<CredentialStore>) -> Self {
        Self {
            slot: RwLock::new(Slot {
                credential: None,
                generation: 0,
                failure: None,
            }),
            authenticator,
            store,
            refresh_margin: ChronoDuration::minutes(5),
            cooldown_start: Duration::from_secs(30),
            cooldown_max: Duration::from_secs(15 * 60),
            logins: AtomicU64::new(0),
        }
    }

    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = ChronoDuration::from_std(margin).unwrap_or(ChronoDuration::zero());
        self
    }

    pub fn with_login_cooldown(mut self, start: Duration, max: Duration) -> Self {
        self.cooldown_start = start;
        self.cooldown_max = max;
        self
    }

    /// Seed the gate with an already known credential.
    pub async fn seed(&self, credential: Credential) {
        let mut slot = self.slot.write().await;
        slot.credential = Some(credential);
        slot.generation += 1;
        slot.failure = None;
    }

    /// Startup: reuse the cached session when it is still valid, otherwise
    /// log in. Store corruption is fatal.
    pub async fn initialize(&self) -> BridgeResult<Lease> {
        if let Some(store) = &self.store {
            match store.load().await {
                Ok(credential) if !credential.is_expired(Utc::now()) => {
                    info!(expires_at = %credential.expires_at, "using cached vendor session");
                    self.seed(credential).await;
                    return self.current().await;
                }
                Ok(credential) => {
                    info!("cached vendor session expired");
                    if credential.refresh_token.is_some() {
                        self.seed(credential).await;
                    }
                }
                Err(BridgeError::NotFound(_)) => info!("no cached vendor session"),
                Err(e) => return Err(e),
            }
        }
        let generation = self.slot.read().await.generation;
        self.renew(generation).await
    }

    /// Borrow the current session, refreshing it first when it is about to
    /// expire.
    pub async fn current(&self) -> BridgeResult<Lease> {
        let generation = {
            let slot = self.slot.read().await;
            if let Some(credential) = &slot.credential {
                if !credential.expires_within(Utc::now(), self.refresh_margin) {
                    return Ok(Lease {
                        credential: credential.clone(),
                        generation: slot.generation,
                    });
                }
            }
            slot.generation
        };
        self.renew(generation).await
    }

    /// Replace the session handed out at `observed_generation`. If another
    /// task already replaced it, the newer session is returned untouched. If
    /// the last attempt failed less than a cooldown ago, its error is
    /// returned without contacting the vendor.
    pub async fn renew(&self, observed_generation: u64) -> BridgeResult<Lease> {
        let mut slot = self.slot.write().await;
        if slot.generation != observed_generation {
            if let Some(credential) = &slot.credential {
                return Ok(Lease {
                    credential: credential.clone(),
                    generation: slot.generation,
                });
            }
        }

        if let Some(failure) = &slot.failure {
            if Instant::now() < failure.retry_at {
                debug!(attempts = failure.attempts, "vendor login cooling down");
                return Err(failure.error.clone());
            }
        }

        let credential = match self.reauthenticate(&mut slot).await {
            Ok(credential) => credential,
            Err(e) => {
                let attempts = slot.failure.as_ref().map_or(0, |f| f.attempts) + 1;
                let cooldown = exponential_backoff(
                    self.cooldown_start.as_millis() as u64,
                    attempts,
                    self.cooldown_max.as_millis() as u64,
                );
                warn!(
                    attempts,
                    retry_in_secs = cooldown.as_secs(),
                    error = %e,
                    "vendor login failed"
                );
                slot.failure = Some(LoginFailure {
                    attempts,
                    retry_at: Instant::now() + cooldown,
                    error: e.clone(),
                });
                return Err(e);
            }
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&credential).await {
                warn!(error = %e, "failed to persist vendor session");
            }
        }

        slot.credential = Some(credential.clone());
        slot.generation += 1;
        slot.failure = None;
        info!(generation = slot.generation, expires_at = %credential.expires_at, "vendor session renewed");
        Ok(Lease {
            credential,
            generation: slot.generation,
        })
    }

    /// Refresh token first, full login second. A rejected session is
    /// dropped from memory and from the store.
    async fn reauthenticate(&self, slot: &mut Slot) -> BridgeResult<Credential> {
        let refreshed = match slot.credential.as_ref().filter(|c| c.refresh_token.is_some()) {
            Some(current) => Some(self.authenticator.refresh(current).await),
            None => None,
        };
        match refreshed {
            Some(Ok(credential)) => return Ok(credential),
            Some(Err(e)) if e.is_retryable() => return Err(e),
            Some(Err(e)) => {
                warn!(error = %e, "session refresh rejected, logging in again");
                self.forget(slot).await;
            }
            None => {}
        }

        self.logins.fetch_add(1, Ordering::SeqCst);
        RELOGINS_TOTAL.inc();
        info!("logging in to vendor");
        match self.authenticator.authenticate().await {
            Ok(credential) => Ok(credential),
            Err(e) => {
                if !e.is_retryable() {
                    self.forget(slot).await;
                }
                Err(e)
            }
        }
    }

    async fn forget(&self, slot: &mut Slot) {
        slot.credential = None;
        if let Some(store) = &self.store {
            if let Err(e) = store.clear().await {
                warn!(error = %e, "failed to clear cached vendor session");
            }
        }
    }

    /// Number of full logins performed by this gate.
    pub fn login_count(&self) -> u64 {
        self.logins.load(Ordering::SeqCst)
    }

    pub async fn generation(&self) -> u64 {
        self.slot.read().await.generation
    }
}
