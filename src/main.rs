//! Cadence Core server entry point: wires every subsystem from
//! `CadenceConfig`, serves the streaming + control-plane HTTP surface, and
//! drives the background maintenance tasks (health ticks, idle eviction,
//! session sweep, knowledge refresh) until a shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use cadence_core::asr::{AdapterFactory, AsrAdapter, MockAdapter, ProviderManager, ProviderPool, WhisperAdapter};
use cadence_core::auth::StaticTokenVerifier;
use cadence_core::breaker::CircuitBreaker;
use cadence_core::endpoint::{self, AppState};
use cadence_core::latency::{LatencyMonitor, StageThresholdsMs};
use cadence_core::llm::HttpLlmClient;
use cadence_core::orchestrator::pipeline::RagContext;
use cadence_core::orchestrator::{InterruptHandler, PipelineOrchestrator};
use cadence_core::rag::{GithubRepositoryFetcher, HashEmbeddingProvider, RefreshLoop, SearchOptions, VectorStore};
use cadence_core::session::SessionStore;
use cadence_core::transcript::TranscriptAggregator;
use cadence_core::tts::{EdgeTts, TtsRegistry};
use cadence_core::CadenceConfig;
use rand::Rng;
use tokio::sync::watch;
use tracing::{error, info, warn};

fn asr_factory() -> AdapterFactory {
    let model_path = std::env::var("CADENCE_WHISPER_MODEL_PATH").ok();
    Arc::new(move |name: &str| -> Option<Box<dyn AsrAdapter>> {
        if name == "whisper-local" {
            if let Some(path) = &model_path {
                return match WhisperAdapter::load(path.clone()) {
                    Ok(adapter) => Some(Box::new(adapter)),
                    Err(e) => {
                        error!(error = %e, "failed to load whisper model, falling back to mock adapter");
                        Some(Box::new(MockAdapter::new(name)))
                    }
                };
            }
        }
        Some(Box::new(MockAdapter::new(name)))
    })
}

async fn build_rag_context(config: &CadenceConfig) -> Option<RagContext> {
    let database_url = std::env::var("CADENCE_DATABASE_URL").ok()?;
    match VectorStore::connect(&database_url).await {
        Ok(store) => Some(RagContext {
            embeddings: Arc::new(HashEmbeddingProvider::new(config.embedding.dimension)),
            embedding_config: config.embedding.clone(),
            vector_store: Arc::new(store),
            search_options: SearchOptions { limit: 5, threshold: 0.5, source_types: None },
            grounding_config: config.grounding.clone(),
        }),
        Err(e) => {
            warn!(error = %e, "failed to connect vector store, running without retrieval");
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    cadence_core::init_tracing(std::env::var("CADENCE_LOG_JSON").as_deref() == Ok("true"));

    let config = CadenceConfig::load()?;
    info!("cadence-core starting up");

    let provider_manager = Arc::new(ProviderManager::new(config.provider_manager.clone()));
    provider_manager.register("whisper-local", 1);
    provider_manager.register("mock-secondary", 2);
    let asr_pool = Arc::new(ProviderPool::new(config.pool.clone(), provider_manager.clone(), asr_factory()));

    let transcripts = Arc::new(TranscriptAggregator::new(config.transcript.clone()));

    let llm: Arc<dyn cadence_core::llm::LlmClient> = Arc::new(HttpLlmClient::new(&config.llm)?);
    let llm_breaker = Arc::new(CircuitBreaker::new(config.breaker.clone()));
    let tts_breaker = Arc::new(CircuitBreaker::new(config.breaker.clone()));

    let mut tts = TtsRegistry::new();
    tts.register(Box::new(EdgeTts::new()));
    let tts = Arc::new(tts);

    let rag = build_rag_context(&config).await;

    let latency = Arc::new(LatencyMonitor::new(StageThresholdsMs::from_config(&config.latency)));

    let orchestrator = Arc::new(PipelineOrchestrator::new(
        asr_pool.clone(),
        config.vad.clone(),
        transcripts,
        llm,
        llm_breaker,
        tts,
        tts_breaker,
        rag,
        latency.clone(),
        "en-US-AriaNeural".to_string(),
    ));

    let interrupts = Arc::new(InterruptHandler::new(config.barge_in.clone(), orchestrator.clone()));
    let sessions = Arc::new(SessionStore::new());
    let refresh = Arc::new(RefreshLoop::new(config.refresh.clone()));
    let auth: Arc<dyn cadence_core::auth::AuthVerifier> = Arc::new(StaticTokenVerifier);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let state = AppState {
        orchestrator: orchestrator.clone(),
        interrupts,
        sessions: sessions.clone(),
        auth,
        asr_pool: asr_pool.clone(),
        latency,
        refresh: refresh.clone(),
        shutdown: shutdown_rx,
    };

    // Jittered by up to 10% so multiple instances polling the same provider
    // fleet don't all health-check on the same tick.
    let health_check_interval = {
        let base_ms = config.provider_manager.health_check_interval_ms;
        let jitter_ms = rand::thread_rng().gen_range(0..=base_ms / 10);
        Duration::from_millis(base_ms + jitter_ms)
    };
    tokio::spawn({
        let provider_manager = provider_manager.clone();
        let asr_pool = asr_pool.clone();
        async move {
            let mut ticker = tokio::time::interval(health_check_interval);
            loop {
                ticker.tick().await;
                provider_manager.health_tick();
                asr_pool.evict_idle().await;
            }
        }
    });

    tokio::spawn({
        let sessions = sessions.clone();
        async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            loop {
                ticker.tick().await;
                let evicted = sessions.sweep_expired();
                if evicted > 0 {
                    info!(evicted, "swept expired sessions");
                }
            }
        }
    });

    tokio::spawn({
        let refresh = refresh.clone();
        async move {
            let mut ticker = tokio::time::interval(refresh.interval());
            loop {
                ticker.tick().await;
                let fetcher = GithubRepositoryFetcher::new(std::env::var("CADENCE_GITHUB_TOKEN").ok());
                match refresh.run_once(&fetcher, |_doc| true).await {
                    Ok(result) => info!(processed = result.processed, updated = result.updated, "knowledge refresh tick complete"),
                    Err(e) => warn!(error = %e, "knowledge refresh tick skipped"),
                }
            }
        }
    });

    let app = endpoint::router(state);
    let addr = std::env::var("CADENCE_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "cadence-core listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received, draining connections");
            let _ = shutdown_tx.send(true);
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await?;

    Ok(())
}
