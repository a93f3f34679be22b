// Account pool manager: sticky-then-failover selection with per-model
// cooldowns, persisted across restarts.
pub mod persistence;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};

use crate::error::GatewayResult;
use crate::models::{Account, PoolFile, Settings};

/// Result of a sticky selection. `account = None` with `wait_ms > 0` asks the
/// dispatcher to sleep and retry the sticky account; the caller never sees a
/// `None` account with zero wait unless the pool is empty.
#[derive(Debug)]
pub struct StickyPick {
    pub account: Option<Account>,
    pub wait_ms: i64,
}

struct PoolState {
    accounts: Vec<Account>,
    active_index: usize,
    settings: Settings,
    extra: serde_json::Map<String, serde_json::Value>,
}

pub struct AccountPool {
    state: RwLock<PoolState>,
    path: PathBuf,
    dirty: AtomicBool,
    save_notify: Notify,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl AccountPool {
    /// Loads the pool from disk. A missing or empty file falls back to a
    /// single account read from the local credential database. Invalid flags
    /// are reset on load so every account gets one fresh chance to refresh.
    pub async fn initialize(path: Option<PathBuf>) -> GatewayResult<Arc<Self>> {
        let path = path.unwrap_or_else(persistence::default_pool_path);
        let mut file = persistence::load_pool_file(&path)?.unwrap_or_default();

        if file.accounts.is_empty() {
            let db_path = file
                .settings
                .database_path
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or_else(persistence::default_database_path);
            if let Some(account) = persistence::load_database_account(&db_path) {
                file.accounts.push(account);
            }
        }

        let now = now_ms();
        for account in &mut file.accounts {
            account.reset_invalid();
            account.sweep_expired_limits(now);
        }
        let active_index = if file.accounts.is_empty() {
            0
        } else {
            file.active_index.min(file.accounts.len() - 1)
        };

        tracing::info!(
            "[Pool] Initialized with {} account(s), active index {}",
            file.accounts.len(),
            active_index
        );

        let pool = Arc::new(Self {
            state: RwLock::new(PoolState {
                accounts: file.accounts,
                active_index,
                settings: file.settings,
                extra: file.extra,
            }),
            path,
            dirty: AtomicBool::new(false),
            save_notify: Notify::new(),
        });
        pool.spawn_saver();
        Ok(pool)
    }

    /// Test/embedding constructor: no file on disk, no background saver.
    pub fn in_memory(accounts: Vec<Account>, settings: Settings) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(PoolState {
                accounts,
                active_index: 0,
                settings,
                extra: serde_json::Map::new(),
            }),
            path: std::env::temp_dir().join(format!(
                "pontis-pool-{}.json",
                crate::proxy::common::generate_random_id()
            )),
            dirty: AtomicBool::new(false),
            save_notify: Notify::new(),
        })
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.accounts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn settings(&self) -> Settings {
        self.state.read().await.settings.clone()
    }

    /// Central selection operation. Prefers the current sticky account for
    /// upstream cache continuity; fails over round-robin when it is unusable.
    pub async fn pick_sticky(&self, model: &str) -> StickyPick {
        let mut state = self.state.write().await;
        let now = now_ms();
        for account in &mut state.accounts {
            account.sweep_expired_limits(now);
        }

        if state.accounts.is_empty() {
            return StickyPick {
                account: None,
                wait_ms: 0,
            };
        }
        state.active_index = state.active_index.min(state.accounts.len() - 1);
        let idx = state.active_index;

        if state.accounts[idx].is_usable_for(model, now) {
            state.accounts[idx].update_last_used(now);
            let account = state.accounts[idx].clone();
            drop(state);
            self.schedule_save();
            return StickyPick {
                account: Some(account),
                wait_ms: 0,
            };
        }

        let len = state.accounts.len();
        for offset in 1..len {
            let i = (idx + offset) % len;
            if state.accounts[i].is_usable_for(model, now) {
                state.active_index = i;
                state.accounts[i].update_last_used(now);
                let account = state.accounts[i].clone();
                tracing::info!(
                    "[Pool] Sticky account unusable for {}, failing over to {}",
                    model,
                    account.email
                );
                drop(state);
                self.schedule_save();
                return StickyPick {
                    account: Some(account),
                    wait_ms: 0,
                };
            }
        }

        // Nobody is usable. If the sticky account comes back soon, waiting in
        // place preserves cache continuity instead of burning other accounts.
        let max_wait = state.settings.max_wait_before_error_ms;
        if !state.accounts[idx].is_invalid {
            if let Some(wait) = state.accounts[idx].wait_ms_for(model, now) {
                if wait <= max_wait {
                    tracing::info!(
                        "[Pool] All accounts cooling down; sticky {} resets in {}ms, waiting",
                        state.accounts[idx].email,
                        wait
                    );
                    return StickyPick {
                        account: None,
                        wait_ms: wait,
                    };
                }
            }
        }

        let next = (idx + 1) % len;
        state.active_index = next;
        let account = state.accounts[next].clone();
        drop(state);
        self.schedule_save();
        StickyPick {
            account: Some(account),
            wait_ms: 0,
        }
    }

    /// Explicit failover: advances the active index to the next account that
    /// is usable for `model` (or simply the next one when nothing is usable)
    /// and returns it.
    pub async fn pick_next(&self, model: &str) -> Option<Account> {
        let mut state = self.state.write().await;
        let now = now_ms();
        if state.accounts.is_empty() {
            return None;
        }

        let len = state.accounts.len();
        let start = state.active_index.min(len - 1);
        for offset in 1..=len {
            let i = (start + offset) % len;
            if state.accounts[i].is_usable_for(model, now) {
                state.active_index = i;
                state.accounts[i].update_last_used(now);
                let account = state.accounts[i].clone();
                drop(state);
                self.schedule_save();
                return Some(account);
            }
        }

        let next = (start + 1) % len;
        state.active_index = next;
        let account = state.accounts[next].clone();
        drop(state);
        self.schedule_save();
        Some(account)
    }

    /// Applies a cooldown for `(email, model)`. Without an explicit reset
    /// duration the configured default cooldown is used.
    pub async fn mark_rate_limited(&self, email: &str, reset_ms: Option<i64>, model: &str) {
        let mut state = self.state.write().await;
        let cooldown = reset_ms.unwrap_or(state.settings.cooldown_duration_ms).max(0);
        let reset_at = now_ms() + cooldown;

        if let Some(account) = state.accounts.iter_mut().find(|a| a.email == email) {
            account.set_rate_limited(model, reset_at);
            tracing::info!(
                "[Pool] {} rate limited for {} ({}s cooldown)",
                email,
                model,
                cooldown / 1000
            );
        }
        drop(state);
        self.schedule_save();
    }

    pub async fn mark_invalid(&self, email: &str, reason: &str) {
        let mut state = self.state.write().await;
        if let Some(account) = state.accounts.iter_mut().find(|a| a.email == email) {
            account.set_invalid(reason);
            tracing::warn!("[Pool] Account {} marked invalid: {}", email, reason);
        }
        drop(state);
        self.schedule_save();
    }

    pub async fn mark_used(&self, email: &str) {
        let mut state = self.state.write().await;
        let now = now_ms();
        if let Some(account) = state.accounts.iter_mut().find(|a| a.email == email) {
            account.update_last_used(now);
        }
        drop(state);
        self.schedule_save();
    }

    /// True iff every account is invalid or cooling down for `model`. With no
    /// model the caller has not declared a quota bucket, so the answer is
    /// false.
    pub async fn is_all_rate_limited(&self, model: Option<&str>) -> bool {
        let model = match model {
            Some(m) => m,
            None => return false,
        };
        let state = self.state.read().await;
        let now = now_ms();
        !state.accounts.is_empty()
            && state
                .accounts
                .iter()
                .all(|a| a.is_invalid || a.active_limit(model, now).is_some())
    }

    /// Soonest cooldown expiry across the pool for `model`, in milliseconds
    /// from now.
    pub async fn min_wait_time_ms(&self, model: &str) -> Option<i64> {
        let state = self.state.read().await;
        let now = now_ms();
        state
            .accounts
            .iter()
            .filter(|a| !a.is_invalid)
            .filter_map(|a| a.wait_ms_for(model, now))
            .min()
    }

    fn schedule_save(&self) {
        self.dirty.store(true, Ordering::SeqCst);
        self.save_notify.notify_one();
    }

    async fn save_now(&self) -> GatewayResult<()> {
        let snapshot = {
            let state = self.state.read().await;
            PoolFile {
                accounts: state.accounts.clone(),
                active_index: state.active_index,
                settings: state.settings.clone(),
                extra: state.extra.clone(),
            }
        };
        persistence::save_pool_file(&self.path, &snapshot)
    }

    /// Writes any pending mutation to disk. Called on shutdown so state
    /// reaches disk before process exit.
    pub async fn flush(&self) {
        if self.dirty.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.save_now().await {
                tracing::error!("[Pool] Final flush failed: {}", e);
            }
        }
    }

    fn spawn_saver(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                pool.save_notify.notified().await;
                // Coalesce bursts of mutations into one write.
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                if pool.dirty.swap(false, Ordering::SeqCst) {
                    if let Err(e) = pool.save_now().await {
                        tracing::error!("[Pool] Failed to persist account state: {}", e);
                        pool.dirty.store(true, Ordering::SeqCst);
                    }
                }
            }
        });
    }
}
