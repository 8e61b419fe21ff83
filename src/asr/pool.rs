//! ASR Provider Pool (§4.2 "Pool contract").
//!
//! Hands out warm adapters, tracks idle time for eviction down to
//! `minPoolSize`, and only ever creates new pooled instances of the *active*
//! provider (per the manager's health/priority view).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

use crate::asr::adapter::AsrAdapter;
use crate::asr::manager::ProviderManager;
use crate::config::PoolConfig;

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("timed out waiting for an available adapter")]
    Timeout,
    #[error("no active provider available")]
    NoActiveProvider,
}

struct PooledEntry {
    adapter: Box<dyn AsrAdapter>,
    provider_name: String,
    checked_out: bool,
    last_released: Instant,
}

pub struct AcquiredAdapter {
    pub id: Uuid,
    pub adapter: Box<dyn AsrAdapter>,
    pub provider_name: String,
}

/// Factory for fresh adapter instances, keyed by provider name. The pool never
/// imports vendor-specific symbols itself (§9) — it only calls through this.
pub type AdapterFactory = Arc<dyn Fn(&str) -> Option<Box<dyn AsrAdapter>> + Send + Sync>;

pub struct ProviderPool {
    config: PoolConfig,
    manager: Arc<ProviderManager>,
    factory: AdapterFactory,
    entries: Mutex<HashMap<Uuid, PooledEntry>>,
    notify: mpsc::Sender<()>,
    notify_rx: Mutex<mpsc::Receiver<()>>,
}

impl ProviderPool {
    pub fn new(config: PoolConfig, manager: Arc<ProviderManager>, factory: AdapterFactory) -> Self {
        let (notify, notify_rx) = mpsc::channel(1);
        Self { config, manager, factory, entries: Mutex::new(HashMap::new()), notify, notify_rx: Mutex::new(notify_rx) }
    }

    async fn spawn_one(&self) -> Option<(Uuid, String)> {
        let active = self.manager.active_provider()?;
        let adapter = (self.factory)(&active)?;
        let id = Uuid::new_v4();
        let mut entries = self.entries.lock().await;
        entries.insert(
            id,
            PooledEntry { adapter, provider_name: active.clone(), checked_out: false, last_released: Instant::now() },
        );
        Some((id, active))
    }

    /// `acquire()` — returns within `acquireTimeout` or fails with `Timeout` (§4.2).
    pub async fn acquire(&self) -> Result<AcquiredAdapter, PoolError> {
        let deadline = self.config.acquire_timeout();
        timeout(deadline, self.acquire_inner()).await.map_err(|_| PoolError::Timeout)?
    }

    async fn acquire_inner(&self) -> Result<AcquiredAdapter, PoolError> {
        loop {
            {
                let mut entries = self.entries.lock().await;
                if let Some((&id, entry)) = entries.iter_mut().find(|(_, e)| !e.checked_out) {
                    entry.checked_out = true;
                    // Take ownership by swapping in a stub; restored on release/remove.
                    let adapter = std::mem::replace(&mut entry.adapter, Box::new(crate::asr::mock::TombstoneAdapter));
                    let provider_name = entry.provider_name.clone();
                    drop(entries);
                    return Ok(AcquiredAdapter { id, adapter, provider_name });
                }
            }
            let count = self.entries.lock().await.len();
            if count < self.config.max_pool_size {
                if let Some((id, provider_name)) = self.spawn_one().await {
                    let mut entries = self.entries.lock().await;
                    if let Some(entry) = entries.get_mut(&id) {
                        entry.checked_out = true;
                        let adapter = std::mem::replace(&mut entry.adapter, Box::new(crate::asr::mock::TombstoneAdapter));
                        drop(entries);
                        return Ok(AcquiredAdapter { id, adapter, provider_name });
                    }
                } else {
                    return Err(PoolError::NoActiveProvider);
                }
            } else {
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        }
    }

    /// `release(id, success, confidence?)` — returns the adapter to the pool and
    /// records metrics against the provider it belongs to.
    pub async fn release(&self, acquired: AcquiredAdapter, success: bool, confidence: Option<f32>, latency_ms: f32) {
        let AcquiredAdapter { id, adapter, provider_name } = acquired;
        {
            let mut entries = self.entries.lock().await;
            if let Some(entry) = entries.get_mut(&id) {
                entry.adapter = adapter;
                entry.checked_out = false;
                entry.last_released = Instant::now();
            }
        }
        if success {
            self.manager.record_success(&provider_name, confidence.unwrap_or(1.0), latency_ms);
        } else {
            self.manager.record_error(&provider_name);
        }
        let _ = self.notify.try_send(());
    }

    /// `remove(id, error?)` — evicts the pooled slot entirely and records the error.
    pub async fn remove(&self, acquired: AcquiredAdapter, error: bool) {
        let AcquiredAdapter { id, provider_name, .. } = acquired;
        self.entries.lock().await.remove(&id);
        if error {
            self.manager.record_error(&provider_name);
        }
    }

    /// Evict idle entries down to `minPoolSize` (§4.2 invariant).
    pub async fn evict_idle(&self) {
        let mut entries = self.entries.lock().await;
        if entries.len() <= self.config.min_pool_size {
            return;
        }
        let idle_timeout = self.config.idle_timeout();
        let mut idle_ids: Vec<Uuid> = entries
            .iter()
            .filter(|(_, e)| !e.checked_out && e.last_released.elapsed() > idle_timeout)
            .map(|(id, _)| *id)
            .collect();
        idle_ids.sort();
        let removable = entries.len() - self.config.min_pool_size;
        for id in idle_ids.into_iter().take(removable) {
            entries.remove(&id);
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// The provider manager backing this pool, for observability endpoints.
    pub fn manager(&self) -> &Arc<ProviderManager> {
        &self.manager
    }
}
