//! Knowledge Refresh Loop (§4.8).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{RefreshConfig, RepositorySource};

const HISTORY_CAP: usize = 50;

#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("refresh already in progress")]
    AlreadyInProgress,
    #[error("fetch failed: {0}")]
    FetchFailed(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryFailure {
    pub repository: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshResult {
    pub timestamp: DateTime<Utc>,
    pub processed: usize,
    pub updated: usize,
    pub errors: Vec<RepositoryFailure>,
    pub duration_ms: u64,
}

/// Fetches documents for one configured repository source. Implementations
/// are responsible for respecting rate limits: on low remaining budget, sleep
/// until reset rather than surfacing an error (§4.8 "Rate-limit awareness").
#[async_trait]
pub trait RepositoryFetcher: Send + Sync {
    async fn fetch(&self, source: &RepositorySource) -> Result<Vec<FetchedDocument>, String>;
}

pub struct FetchedDocument {
    pub source_url: String,
    pub title: String,
    pub content: String,
}

/// Rate-limit header snapshot a fetcher can consult before issuing the next
/// request.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitStatus {
    pub remaining: u32,
    pub reset_at: Instant,
}

impl RateLimitStatus {
    pub fn should_wait(&self, low_watermark: u32) -> bool {
        self.remaining <= low_watermark
    }

    pub fn wait_duration(&self, now: Instant) -> Duration {
        self.reset_at.saturating_duration_since(now)
    }
}

pub struct RefreshLoop {
    config: RefreshConfig,
    in_flight: AtomicBool,
    history: Mutex<VecDeque<RefreshResult>>,
}

impl RefreshLoop {
    pub fn new(config: RefreshConfig) -> Self {
        Self { config, in_flight: AtomicBool::new(false), history: Mutex::new(VecDeque::new()) }
    }

    /// Runs one refresh tick across all configured repositories. A tick
    /// already in flight rejects the caller rather than queuing (§4.8).
    pub async fn run_once<F>(&self, fetcher: &F, ingest: impl Fn(FetchedDocument) -> bool) -> Result<RefreshResult, RefreshError>
    where
        F: RepositoryFetcher,
    {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(RefreshError::AlreadyInProgress);
        }
        let start = Instant::now();
        let mut processed = 0usize;
        let mut updated = 0usize;
        let mut errors = Vec::new();

        for source in &self.config.repositories {
            match fetcher.fetch(source).await {
                Ok(docs) => {
                    for doc in docs {
                        processed += 1;
                        if ingest(doc) {
                            updated += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!(repository = %source.repo, error = %e, "refresh: repository fetch failed");
                    errors.push(RepositoryFailure { repository: format!("{}/{}", source.owner, source.repo), error: e });
                }
            }
        }

        let result = RefreshResult {
            timestamp: Utc::now(),
            processed,
            updated,
            errors,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        {
            let mut history = self.history.lock().await;
            history.push_back(result.clone());
            while history.len() > HISTORY_CAP {
                history.pop_front();
            }
        }
        info!(processed, updated, "refresh tick complete");

        self.in_flight.store(false, Ordering::SeqCst);
        Ok(result)
    }

    pub async fn history(&self) -> Vec<RefreshResult> {
        self.history.lock().await.iter().cloned().collect()
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.config.interval_minutes * 60)
    }

    pub fn in_progress(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// Fetches repository contents via the GitHub REST API, one file at a time
/// under `paths` (or the repo root when unset). Honors `x-ratelimit-remaining`
/// / `x-ratelimit-reset` by sleeping out the window rather than erroring
/// (§4.8 "Rate-limit awareness").
pub struct GithubRepositoryFetcher {
    http: reqwest::Client,
    token: Option<String>,
}

impl GithubRepositoryFetcher {
    pub fn new(token: Option<String>) -> Self {
        Self { http: reqwest::Client::new(), token }
    }

    fn rate_limit_from_headers(headers: &reqwest::header::HeaderMap) -> Option<RateLimitStatus> {
        let remaining: u32 = headers.get("x-ratelimit-remaining")?.to_str().ok()?.parse().ok()?;
        let reset_epoch: u64 = headers.get("x-ratelimit-reset")?.to_str().ok()?.parse().ok()?;
        let now_epoch = chrono::Utc::now().timestamp() as u64;
        let reset_at = Instant::now() + Duration::from_secs(reset_epoch.saturating_sub(now_epoch));
        Some(RateLimitStatus { remaining, reset_at })
    }
}

#[async_trait]
impl RepositoryFetcher for GithubRepositoryFetcher {
    async fn fetch(&self, source: &RepositorySource) -> Result<Vec<FetchedDocument>, String> {
        let paths = source.paths.clone().unwrap_or_else(|| vec![String::new()]);
        let mut docs = Vec::new();

        for path in paths {
            let url = format!("https://api.github.com/repos/{}/{}/contents/{path}?ref={}", source.owner, source.repo, source.branch);
            let mut request = self.http.get(&url).header("User-Agent", "cadence-core").header("Accept", "application/vnd.github.raw+json");
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
            let response = request.send().await.map_err(|e| e.to_string())?;

            if let Some(limit) = Self::rate_limit_from_headers(response.headers()) {
                if limit.should_wait(5) {
                    tokio::time::sleep(limit.wait_duration(Instant::now())).await;
                }
            }

            if !response.status().is_success() {
                return Err(format!("github contents api returned {}", response.status()));
            }
            let content = response.text().await.map_err(|e| e.to_string())?;
            docs.push(FetchedDocument {
                source_url: format!("https://github.com/{}/{}/blob/{}/{path}", source.owner, source.repo, source.branch),
                title: format!("{}/{path}", source.repo),
                content,
            });
        }
        Ok(docs)
    }
}
