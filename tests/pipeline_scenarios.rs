//! End-to-end orchestrator scenarios, driven entirely against
//! `cadence_core`'s public API with in-memory collaborator doubles (no
//! network, no real vendor adapters, no database).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cadence_core::asr::{AdapterFactory, AsrAdapter, AsrStreamConfig, MockAdapter, ProviderManager, ProviderPool};
use cadence_core::breaker::{BreakerConfig, CircuitBreaker};
use cadence_core::config::{PoolConfig, ProviderManagerConfig, TranscriptConfig, VadConfig};
use cadence_core::latency::{LatencyMonitor, StageThresholdsMs};
use cadence_core::llm::{LlmClient, LlmError, LlmMessage, ScriptedLlmClient, LLM_FALLBACK_TEXT};
use cadence_core::orchestrator::{PipelineEvent, PipelineOrchestrator, Stage};
use cadence_core::rag::{FetchedDocument, RefreshError, RefreshLoop, RepositoryFetcher};
use cadence_core::transcript::TranscriptAggregator;
use cadence_core::tts::{SynthesisResult, TextToSpeech, TtsError, TtsRegistry, VoiceInfo};
use tokio::sync::mpsc;
use uuid::Uuid;

struct StubTts;

#[async_trait]
impl TextToSpeech for StubTts {
    fn name(&self) -> &'static str {
        "stub"
    }
    fn is_initialized(&self) -> bool {
        true
    }
    async fn initialize(&self) -> Result<(), TtsError> {
        Ok(())
    }
    async fn synthesize(&self, text: &str, _voice: &str) -> Result<SynthesisResult, TtsError> {
        Ok(SynthesisResult { samples: vec![0; text.len().max(1) * 10], sample_rate: 16000, duration_ms: 10 })
    }
    fn available_voices(&self) -> Vec<VoiceInfo> {
        vec![]
    }
    fn default_voice(&self) -> &str {
        "default"
    }
}

fn registry_with_stub() -> TtsRegistry {
    let mut registry = TtsRegistry::new();
    registry.register(Box::new(StubTts));
    registry
}

fn mock_factory() -> AdapterFactory {
    Arc::new(|name| Some(Box::new(MockAdapter::new(name)) as Box<dyn AsrAdapter>))
}

/// A factory whose adapters emit one scripted final transcript as soon as
/// they're started, so a driven pipeline has something to run the language
/// stage on.
fn scripted_mock_factory(text: &str) -> AdapterFactory {
    let text = text.to_string();
    Arc::new(move |name| {
        Some(Box::new(MockAdapter::new(name).with_script(vec![(text.clone(), true, 0.95)])) as Box<dyn AsrAdapter>)
    })
}

/// Small, fast-to-cross VAD thresholds so a handful of test chunks can drive
/// a full speech-start/speech-end cycle without needing real audio.
fn fast_vad_config() -> VadConfig {
    VadConfig { bypass_initial_chunks: 0, min_silence_duration_ms: 20, min_speech_duration_ms: 10, ..Default::default() }
}

fn loud_chunk(n: usize) -> Vec<u8> {
    (0..n).flat_map(|i| if i % 2 == 0 { 20000i16 } else { -20000i16 }.to_le_bytes()).collect()
}

fn silent_chunk(n: usize) -> Vec<u8> {
    vec![0u8; n * 2]
}

/// Feeds enough silence to warm the adaptive threshold, then a loud burst
/// followed by trailing silence, driving the pipeline's VAD preprocessor
/// through speech:start and speech:end so the pipeline stage advances from
/// `audio_capture` to `asr_processing` before the scripted transcript
/// arrives.
async fn drive_speech_end(orchestrator: &PipelineOrchestrator, pipeline_id: Uuid) {
    for _ in 0..25 {
        orchestrator.process_audio_chunk(pipeline_id, &silent_chunk(160)).await.unwrap();
    }
    orchestrator.process_audio_chunk(pipeline_id, &loud_chunk(160)).await.unwrap();
    for _ in 0..5 {
        orchestrator.process_audio_chunk(pipeline_id, &silent_chunk(160)).await.unwrap();
    }
}

#[allow(clippy::too_many_arguments)]
fn build_orchestrator(
    llm: Arc<dyn LlmClient>,
    llm_breaker: Arc<CircuitBreaker>,
    tts: Arc<TtsRegistry>,
    asr_factory: AdapterFactory,
) -> (Arc<PipelineOrchestrator>, Arc<ProviderPool>) {
    let manager = Arc::new(ProviderManager::new(ProviderManagerConfig::default()));
    manager.register("primary", 1);
    let pool = Arc::new(ProviderPool::new(PoolConfig::default(), manager, asr_factory));
    let orchestrator = Arc::new(PipelineOrchestrator::new(
        pool.clone(),
        fast_vad_config(),
        Arc::new(TranscriptAggregator::new(TranscriptConfig::default())),
        llm,
        llm_breaker,
        tts,
        Arc::new(CircuitBreaker::new(BreakerConfig { failure_threshold: 5, success_threshold: 2, timeout_ms: 30_000, rolling_window_ms: 60_000 })),
        None,
        Arc::new(LatencyMonitor::new(StageThresholdsMs::default())),
        "default".to_string(),
    ));
    (orchestrator, pool)
}

/// An `LlmClient` that sleeps between tokens, giving a test time to fire an
/// interruption mid-stream.
struct SlowLlmClient {
    tokens: Vec<String>,
    delay: Duration,
}

#[async_trait]
impl LlmClient for SlowLlmClient {
    fn name(&self) -> &'static str {
        "slow"
    }

    async fn stream_completion(
        &self,
        _messages: &[LlmMessage],
        _context: Option<&str>,
        tokens: mpsc::Sender<Result<String, LlmError>>,
    ) -> Result<(), LlmError> {
        for token in &self.tokens {
            tokio::time::sleep(self.delay).await;
            if tokens.send(Ok(token.clone())).await.is_err() {
                return Ok(());
            }
        }
        Ok(())
    }
}

/// Scenario: mid-response, a strong and sustained VAD signal interrupts the
/// pipeline. No transcript, LLM response, or TTS audio is emitted for this
/// pipeline after the interruption, and the session frees up immediately for
/// a new pipeline.
#[tokio::test]
async fn barge_in_stops_the_pipeline_with_no_further_output() {
    let llm: Arc<dyn LlmClient> = Arc::new(SlowLlmClient { tokens: vec!["hello".into(), " there".into()], delay: Duration::from_millis(60) });
    let llm_breaker = Arc::new(CircuitBreaker::new(BreakerConfig { failure_threshold: 5, success_threshold: 2, timeout_ms: 30_000, rolling_window_ms: 60_000 }));
    let (orchestrator, _pool) =
        build_orchestrator(llm, llm_breaker, Arc::new(registry_with_stub()), scripted_mock_factory("what time is it"));

    let session_id = Uuid::new_v4();
    let (pipeline_id, mut events) =
        orchestrator.start_pipeline(session_id, "user-1".to_string(), AsrStreamConfig::default()).await.unwrap();

    drive_speech_end(&orchestrator, pipeline_id).await;

    let interrupt_orchestrator = orchestrator.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(25)).await;
        interrupt_orchestrator.interrupt_pipeline(pipeline_id).await.unwrap();
    });

    let mut saw_interrupted = false;
    let mut saw_completed = false;
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Some(PipelineEvent::Interrupted)) => {
                saw_interrupted = true;
                break;
            }
            Ok(Some(PipelineEvent::Completed)) => {
                saw_completed = true;
                break;
            }
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => break,
        }
    }
    assert!(saw_interrupted, "expected the pipeline to be interrupted");
    assert!(!saw_completed);

    // Nothing further arrives for this pipeline: no late LLM tokens, no TTS
    // audio, no completion.
    match tokio::time::timeout(Duration::from_millis(150), events.recv()).await {
        Ok(Some(event)) => panic!("unexpected event after interruption: {event:?}"),
        _ => {}
    }

    assert!(orchestrator.stage_of(pipeline_id).is_none(), "an interrupted pipeline should vacate the active registry");

    // The session is immediately free for a new pipeline.
    let second = orchestrator.start_pipeline(session_id, "user-1".to_string(), AsrStreamConfig::default()).await;
    assert!(second.is_ok());
}

/// Scenario: the active ASR provider accumulates five errors inside its
/// rolling window. It is marked unhealthy and the manager fails over to the
/// next-priority provider; an adapter already checked out under the old
/// provider still completes (and its release is recorded against that
/// provider), while the next acquisition is handed the new active provider.
#[tokio::test]
async fn asr_provider_rotates_to_secondary_after_five_errors() {
    let manager = Arc::new(ProviderManager::new(ProviderManagerConfig::default()));
    manager.register("primary", 1);
    manager.register("secondary", 2);
    let pool = ProviderPool::new(PoolConfig::default(), manager.clone(), mock_factory());

    assert_eq!(manager.active_provider().as_deref(), Some("primary"));

    // An in-flight pipeline holds one primary adapter across the failover.
    let in_flight = pool.acquire().await.unwrap();
    assert_eq!(in_flight.provider_name, "primary");

    for _ in 0..5 {
        let acquired = pool.acquire().await.unwrap();
        assert_eq!(acquired.provider_name, "primary");
        pool.remove(acquired, true).await;
    }

    assert!(!manager.health_of("primary").unwrap().healthy);
    assert_eq!(manager.active_provider().as_deref(), Some("secondary"));

    // The in-flight pipeline still completes normally on its old adapter.
    pool.release(in_flight, true, Some(0.9), 40.0).await;

    let next = pool.acquire().await.unwrap();
    assert_eq!(next.provider_name, "secondary");
}

/// Scenario: a refresh tick already in flight rejects a second invocation
/// rather than queuing it; the first tick still completes and records a
/// history entry.
#[tokio::test]
async fn concurrent_refresh_invocation_is_rejected_with_409_equivalent() {
    struct SlowFetcher {
        delay: Duration,
    }

    #[async_trait]
    impl RepositoryFetcher for SlowFetcher {
        async fn fetch(&self, source: &cadence_core::config::RepositorySource) -> Result<Vec<FetchedDocument>, String> {
            tokio::time::sleep(self.delay).await;
            Ok(vec![FetchedDocument {
                source_url: format!("https://example.com/{}", source.repo),
                title: source.repo.clone(),
                content: "refresh interval defaults to 3 minutes".to_string(),
            }])
        }
    }

    let refresh = Arc::new(RefreshLoop::new(cadence_core::config::RefreshConfig {
        interval_minutes: 3,
        repositories: vec![cadence_core::config::RepositorySource { owner: "acme".into(), repo: "docs".into(), branch: "main".into(), paths: None }],
    }));
    let fetcher = Arc::new(SlowFetcher { delay: Duration::from_millis(150) });

    let first_refresh = refresh.clone();
    let first_fetcher = fetcher.clone();
    let first = tokio::spawn(async move { first_refresh.run_once(&*first_fetcher, |_doc| true).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = refresh.run_once(&*fetcher, |_doc| true).await;
    assert!(matches!(second, Err(RefreshError::AlreadyInProgress)));
    assert!(second.unwrap_err().to_string().contains("already in progress"));

    let first_result = first.await.unwrap().unwrap();
    assert_eq!(first_result.processed, 1);
    assert_eq!(first_result.updated, 1);

    let history = refresh.history().await;
    assert_eq!(history.len(), 1);
}

/// An `LlmClient` that fails its first `fail_count` calls, then succeeds.
struct FailingLlmClient {
    calls: AtomicUsize,
    fail_count: usize,
}

#[async_trait]
impl LlmClient for FailingLlmClient {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn stream_completion(
        &self,
        _messages: &[LlmMessage],
        _context: Option<&str>,
        tokens: mpsc::Sender<Result<String, LlmError>>,
    ) -> Result<(), LlmError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_count {
            let _ = tokens.send(Err(LlmError::ProviderUnavailable("simulated outage".into()))).await;
            return Err(LlmError::ProviderUnavailable("simulated outage".into()));
        }
        let _ = tokens.send(Ok("recovered".to_string())).await;
        Ok(())
    }
}

/// Scenario: the LLM collaborator fails five consecutive times, opening its
/// circuit breaker. Subsequent pipeline turns get the fixed fallback
/// apology as their LLM response without the breaker ever calling the LLM
/// again; TTS still proceeds and the pipeline still completes.
#[tokio::test]
async fn llm_outage_opens_breaker_and_subsequent_turns_get_fallback_text() {
    let llm_double = Arc::new(FailingLlmClient { calls: AtomicUsize::new(0), fail_count: 5 });
    let llm: Arc<dyn LlmClient> = llm_double.clone();
    let llm_breaker = Arc::new(CircuitBreaker::new(BreakerConfig { failure_threshold: 5, success_threshold: 2, timeout_ms: 30_000, rolling_window_ms: 60_000 }));
    let (orchestrator, _pool) =
        build_orchestrator(llm, llm_breaker.clone(), Arc::new(registry_with_stub()), scripted_mock_factory("tell me a fact"));

    // Five failing turns open the breaker.
    for _ in 0..5 {
        let session_id = Uuid::new_v4();
        let (pipeline_id, mut events) =
            orchestrator.start_pipeline(session_id, "user-1".to_string(), AsrStreamConfig::default()).await.unwrap();
        drive_speech_end(&orchestrator, pipeline_id).await;

        let mut saw_error = false;
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, events.recv()).await {
                Ok(Some(PipelineEvent::Error(_))) => {
                    saw_error = true;
                    break;
                }
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => break,
            }
        }
        assert!(saw_error, "an LLM failure should end the turn in the error stage");
    }

    assert_eq!(llm_double.calls.load(Ordering::SeqCst), 5);

    // The sixth turn proceeds on the fallback apology and completes normally.
    let session_id = Uuid::new_v4();
    let (pipeline_id, mut events) =
        orchestrator.start_pipeline(session_id, "user-1".to_string(), AsrStreamConfig::default()).await.unwrap();
    drive_speech_end(&orchestrator, pipeline_id).await;

    let mut fallback_text = None;
    let mut tts_frames = 0;
    let mut saw_completed = false;
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Some(PipelineEvent::LlmResponse { text, .. })) => fallback_text = Some(text),
            Ok(Some(PipelineEvent::TtsAudio(_))) => tts_frames += 1,
            Ok(Some(PipelineEvent::Completed)) => {
                saw_completed = true;
                break;
            }
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => break,
        }
    }

    assert_eq!(fallback_text.as_deref(), Some(LLM_FALLBACK_TEXT));
    assert!(tts_frames > 0, "TTS should still proceed during an LLM outage");
    assert!(saw_completed);
    // The breaker served the fallback without ever calling the LLM again.
    assert_eq!(llm_double.calls.load(Ordering::SeqCst), 5);
    assert_eq!(llm_breaker.state(), cadence_core::breaker::BreakerState::Open);
}

/// Supporting coverage: with no RAG context configured, a turn completes
/// end to end with grounding left unevaluated (`is_grounded: None`), which
/// is the baseline the barge-in and outage scenarios above build on.
#[tokio::test]
async fn turn_without_rag_completes_with_grounding_unevaluated() {
    let llm: Arc<dyn LlmClient> = Arc::new(ScriptedLlmClient { tokens: vec!["The answer is ".into(), "42.".into()] });
    let llm_breaker = Arc::new(CircuitBreaker::new(BreakerConfig { failure_threshold: 5, success_threshold: 2, timeout_ms: 30_000, rolling_window_ms: 60_000 }));
    let (orchestrator, _pool) =
        build_orchestrator(llm, llm_breaker, Arc::new(registry_with_stub()), scripted_mock_factory("what is the answer"));

    let session_id = Uuid::new_v4();
    let (pipeline_id, mut events) =
        orchestrator.start_pipeline(session_id, "user-1".to_string(), AsrStreamConfig::default()).await.unwrap();
    drive_speech_end(&orchestrator, pipeline_id).await;

    let mut is_grounded = Some(true);
    let mut saw_completed = false;
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Some(PipelineEvent::LlmResponse { is_grounded: g, .. })) => is_grounded = g,
            Ok(Some(PipelineEvent::Completed)) => {
                saw_completed = true;
                break;
            }
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => break,
        }
    }
    assert!(saw_completed);
    assert_eq!(is_grounded, None);
    assert_eq!(orchestrator.stage_of(pipeline_id), None);
    let _ = Stage::Completed;
}
