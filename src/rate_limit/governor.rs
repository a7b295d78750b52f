//! Per-Application Concurrency Governor
//!
//! Issues admission tickets against a per-app ceiling on simultaneously
//! in-flight requests. The active-ticket set lives in the shared counter
//! store, so the ceiling holds across every server process, and admission is
//! a single atomic check-and-insert.
//!
//! A request over the ceiling is rejected immediately, never queued. Tickets
//! issued by processes that died without releasing are pruned by a periodic
//! stale sweep during `enter`.

use crate::error::DispatchError;
use crate::metrics;
use crate::store::{CounterStore, StoreError};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Effective concurrency ceiling for an application
///
/// Returns the smaller of the app-level and global limits, where 0 means
/// unlimited on either side; 0 only results when both are unlimited.
pub fn effective_max_active(app_limit: u32, global_limit: u32) -> u32 {
    match (app_limit, global_limit) {
        (0, g) => g,
        (a, 0) => a,
        (a, g) => a.min(g),
    }
}

/// Governor over per-application active-ticket sets
///
/// Cheap to clone; clones share the same registry state.
#[derive(Clone)]
pub struct ConcurrencyGovernor {
    /// Shared counter store holding the active sets
    store: Arc<dyn CounterStore>,

    /// Tickets older than this are presumed leaked and swept
    ticket_max_alive: Duration,

    /// Minimum time between stale sweeps of one app's set
    sweep_interval: Duration,

    /// Last sweep time per app
    last_sweep: Arc<Mutex<HashMap<String, Instant>>>,
}

impl ConcurrencyGovernor {
    /// Create a governor backed by the given store
    pub fn new(
        store: Arc<dyn CounterStore>,
        ticket_max_alive: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            store,
            ticket_max_alive,
            sweep_interval,
            last_sweep: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Generate a ticket token with enough entropy to avoid collision
    /// across concurrent requests
    pub fn generate_token() -> String {
        Uuid::new_v4().simple().to_string()
    }

    fn key(app_id: &str) -> String {
        format!("concurrency:{}:active", app_id)
    }

    /// Claim a concurrency slot for `app_id`
    ///
    /// `max_active` of 0 admits unconditionally; the returned guard is then
    /// untracked but keeps the release path uniform. Fails with
    /// [`DispatchError::ConcurrencyLimitExceeded`] when the app is at
    /// capacity.
    pub async fn enter(
        &self,
        app_id: &str,
        max_active: u32,
    ) -> Result<AdmissionGuard, DispatchError> {
        self.enter_with_token(app_id, max_active, Self::generate_token())
            .await
    }

    /// Claim a slot using a caller-supplied ticket token
    pub async fn enter_with_token(
        &self,
        app_id: &str,
        max_active: u32,
        token: String,
    ) -> Result<AdmissionGuard, DispatchError> {
        let tracked = max_active > 0;
        if tracked {
            self.sweep_stale(app_id).await?;

            let key = Self::key(app_id);
            let issued_at = Utc::now().timestamp().to_string();
            let admitted = self
                .store
                .hash_put_if_below(&key, &token, &issued_at, max_active as u64)
                .await?;
            if !admitted {
                debug!(app_id, max_active, "concurrency ceiling reached");
                metrics::ADMISSIONS_TOTAL
                    .with_label_values(&[metrics::outcome::REJECTED_CONCURRENCY])
                    .inc();
                return Err(DispatchError::ConcurrencyLimitExceeded {
                    app_id: app_id.to_string(),
                    limit: max_active,
                });
            }
            metrics::ACTIVE_TICKETS.inc();
        }

        debug!(app_id, token = %token, tracked, "admission ticket issued");
        metrics::ADMISSIONS_TOTAL
            .with_label_values(&[metrics::outcome::ADMITTED])
            .inc();
        Ok(AdmissionGuard {
            governor: self.clone(),
            app_id: app_id.to_string(),
            token,
            released: AtomicBool::new(false),
        })
    }

    /// Return a ticket's slot
    ///
    /// Safe to call any number of times and for tokens that were never
    /// admitted; releases race from multiple exit paths by design. Store
    /// failures are logged and left to the stale sweep.
    pub async fn exit(&self, app_id: &str, token: &str) {
        match self.store.hash_remove(&Self::key(app_id), token).await {
            Ok(true) => {
                metrics::ACTIVE_TICKETS.dec();
                debug!(app_id, token, "admission ticket released");
            }
            Ok(false) => {}
            Err(err) => {
                warn!(app_id, token, %err, "ticket release failed, leaving it to the stale sweep");
            }
        }
    }

    /// Number of tickets currently held for an app
    pub async fn active_count(&self, app_id: &str) -> Result<u64, StoreError> {
        self.store.hash_len(&Self::key(app_id)).await
    }

    /// Prune tickets older than the max alive time, at most once per sweep
    /// interval per app
    async fn sweep_stale(&self, app_id: &str) -> Result<(), StoreError> {
        {
            let mut sweeps = self.last_sweep.lock().await;
            if let Some(last) = sweeps.get(app_id) {
                if last.elapsed() < self.sweep_interval {
                    return Ok(());
                }
            }
            sweeps.insert(app_id.to_string(), Instant::now());
        }

        let key = Self::key(app_id);
        let cutoff = Utc::now().timestamp() - self.ticket_max_alive.as_secs() as i64;
        for (token, issued_at) in self.store.hash_entries(&key).await? {
            let issued_at = issued_at.parse::<i64>().unwrap_or(0);
            if issued_at < cutoff {
                warn!(app_id, token = %token, "sweeping stale admission ticket");
                if self.store.hash_remove(&key, &token).await? {
                    metrics::ACTIVE_TICKETS.dec();
                    metrics::STALE_TICKETS_SWEPT_TOTAL.inc();
                }
            }
        }
        Ok(())
    }
}

/// One in-flight request's claim on a concurrency slot
///
/// The slot is returned exactly once: through an explicit [`release`], or
/// when the guard is dropped, whichever comes first. Dropping without
/// releasing covers stream abandonment and unwinds.
///
/// [`release`]: AdmissionGuard::release
pub struct AdmissionGuard {
    governor: ConcurrencyGovernor,
    app_id: String,
    token: String,
    released: AtomicBool,
}

impl std::fmt::Debug for AdmissionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionGuard")
            .field("app_id", &self.app_id)
            .field("token", &self.token)
            .field("released", &self.released)
            .finish()
    }
}

impl AdmissionGuard {
    /// Ticket token backing this guard
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Application the slot belongs to
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Whether the slot has already been returned
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Return the slot now. Later calls, and the eventual drop, are no-ops.
    pub async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.governor.exit(&self.app_id, &self.token).await;
    }

    /// Return the slot without awaiting, from a context that cannot block
    /// (stream polling). The removal itself finishes on the runtime.
    pub(crate) fn release_in_background(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        self.spawn_exit();
    }

    fn spawn_exit(&self) {
        let governor = self.governor.clone();
        let app_id = self.app_id.clone();
        let token = self.token.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    governor.exit(&app_id, &token).await;
                });
            }
            Err(_) => {
                warn!(
                    app_id = %app_id,
                    token = %token,
                    "guard dropped outside a runtime, ticket left to the stale sweep"
                );
            }
        }
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        metrics::TICKETS_RECLAIMED_TOTAL.inc();
        debug!(app_id = %self.app_id, token = %self.token, "reclaiming ticket from dropped guard");
        self.spawn_exit();
    }
}
