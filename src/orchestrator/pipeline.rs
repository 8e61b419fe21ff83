//! Pipeline Orchestrator (§4.9): per-session state machine fanning audio to
//! ASR, text to the LLM, text to TTS, and audio back to the client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::asr::{AcquiredAdapter, AsrError, AsrStreamConfig, ProviderPool, TranscriptionResult};
use crate::breaker::{CallPermit, CircuitBreaker};
use crate::config::VadConfig;
use crate::error::CoreError;
use crate::latency::{LatencyMonitor, StageTransition};
use crate::llm::{LlmClient, LlmMessage, LlmRole, LLM_FALLBACK_TEXT};
use crate::orchestrator::cancellation::CancellationToken;
use crate::rag::{
    build_citations, embed_all, inject_markers, validate_grounding, EmbeddingProvider, SearchHit, SearchOptions,
    VectorStore,
};
use crate::config::{EmbeddingConfig, GroundingConfig};
use crate::transcript::TranscriptAggregator;
use crate::tts::audio_utils::pcm_bytes_to_i16;
use crate::tts::TtsRegistry;
use crate::vad::preprocessor::{AudioPreprocessor, PreprocessorEvent};

/// One frame's worth of synthesized audio handed to the client, capped so a
/// long reply is delivered as a stream of chunks rather than one giant frame.
const TTS_CHUNK_SAMPLES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Idle,
    AudioCapture,
    AsrProcessing,
    RagRetrieval,
    LlmProcessing,
    TtsSynthesis,
    AudioPlayback,
    Completed,
    Error,
    Interrupted,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Error | Stage::Interrupted)
    }
}

fn valid_transition(from: Stage, to: Stage) -> bool {
    use Stage::*;
    if from.is_terminal() {
        return false;
    }
    if matches!(to, Interrupted | Error) {
        return true;
    }
    matches!(
        (from, to),
        (Idle, AudioCapture)
            | (AudioCapture, AsrProcessing)
            | (AsrProcessing, RagRetrieval)
            | (AsrProcessing, LlmProcessing)
            | (RagRetrieval, LlmProcessing)
            | (LlmProcessing, TtsSynthesis)
            | (TtsSynthesis, AudioPlayback)
            | (AudioPlayback, Completed)
    )
}

/// Events destined for the client, consumed by the streaming endpoint and
/// translated into protocol frames.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Started,
    Transcript(TranscriptionResult),
    LlmToken(String),
    /// Final assembled response text (citation markers already injected) plus
    /// whether it was checked against retrieved sources and passed (§7 "no
    /// silent fallback ever produces a wrong answer"). `None` when no RAG
    /// context was configured, so grounding was never evaluated.
    LlmResponse { text: String, is_grounded: Option<bool> },
    TtsAudio(Vec<i16>),
    Interrupted,
    Completed,
    Error(String),
}

pub struct Pipeline {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_id: String,
    stage: SyncMutex<Stage>,
    stage_entered_at: SyncMutex<Instant>,
    pub cancel: CancellationToken,
    events: mpsc::Sender<PipelineEvent>,
    interruption_count: AtomicU64,
    last_asr_confidence: SyncMutex<f32>,
}

impl Pipeline {
    fn new(id: Uuid, session_id: Uuid, user_id: String, events: mpsc::Sender<PipelineEvent>) -> Self {
        Self {
            id,
            session_id,
            user_id,
            stage: SyncMutex::new(Stage::Idle),
            stage_entered_at: SyncMutex::new(Instant::now()),
            cancel: CancellationToken::new(),
            events,
            interruption_count: AtomicU64::new(0),
            last_asr_confidence: SyncMutex::new(1.0),
        }
    }

    pub fn stage(&self) -> Stage {
        *self.stage.lock()
    }

    /// Validates and applies a stage transition, returning the elapsed time
    /// spent in the previous stage for latency recording.
    fn transition(&self, to: Stage) -> Result<u64, CoreError> {
        let mut stage = self.stage.lock();
        if !valid_transition(*stage, to) {
            return Err(CoreError::Internal(format!("invalid stage transition {:?} -> {:?}", *stage, to)));
        }
        let mut entered_at = self.stage_entered_at.lock();
        let elapsed_ms = entered_at.elapsed().as_millis() as u64;
        info!(pipeline_id = %self.id, from = ?*stage, to = ?to, elapsed_ms, "stage transition");
        *stage = to;
        *entered_at = Instant::now();
        Ok(elapsed_ms)
    }

    pub fn interruption_count(&self) -> u64 {
        self.interruption_count.load(Ordering::SeqCst)
    }
}

struct PipelineRuntime {
    preprocessor: AudioPreprocessor,
    asr: Option<AcquiredAdapter>,
}

struct PipelineHandle {
    pipeline: Pipeline,
    runtime: AsyncMutex<PipelineRuntime>,
}

/// Bundles the components needed to run retrieval for one pipeline. Optional:
/// a deployment with no knowledge base skips straight from `asr_processing`
/// to `llm_processing` (§4.9 "rag_retrieval (optional)").
pub struct RagContext {
    pub embeddings: Arc<dyn EmbeddingProvider>,
    pub embedding_config: EmbeddingConfig,
    pub vector_store: Arc<VectorStore>,
    pub search_options: SearchOptions,
    pub grounding_config: GroundingConfig,
}

pub struct PipelineOrchestrator {
    asr_pool: Arc<ProviderPool>,
    vad_config: VadConfig,
    transcripts: Arc<TranscriptAggregator>,
    llm: Arc<dyn LlmClient>,
    llm_breaker: Arc<CircuitBreaker>,
    tts: Arc<TtsRegistry>,
    tts_breaker: Arc<CircuitBreaker>,
    rag: Option<RagContext>,
    latency: Arc<LatencyMonitor>,
    default_voice: String,
    pipelines: DashMap<Uuid, Arc<PipelineHandle>>,
    active_by_session: DashMap<Uuid, Uuid>,
}

impl PipelineOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        asr_pool: Arc<ProviderPool>,
        vad_config: VadConfig,
        transcripts: Arc<TranscriptAggregator>,
        llm: Arc<dyn LlmClient>,
        llm_breaker: Arc<CircuitBreaker>,
        tts: Arc<TtsRegistry>,
        tts_breaker: Arc<CircuitBreaker>,
        rag: Option<RagContext>,
        latency: Arc<LatencyMonitor>,
        default_voice: String,
    ) -> Self {
        Self {
            asr_pool,
            vad_config,
            transcripts,
            llm,
            llm_breaker,
            tts,
            tts_breaker,
            rag,
            latency,
            default_voice,
            pipelines: DashMap::new(),
            active_by_session: DashMap::new(),
        }
    }

    /// `startPipeline(sessionId, userId, callbacks)`. The returned receiver
    /// is this pipeline's `callbacks` — one event stream the caller forwards
    /// to the client.
    pub async fn start_pipeline(
        self: &Arc<Self>,
        session_id: Uuid,
        user_id: String,
        asr_config: AsrStreamConfig,
    ) -> Result<(Uuid, mpsc::Receiver<PipelineEvent>), CoreError> {
        if self.active_by_session.contains_key(&session_id) {
            return Err(CoreError::Validation("a pipeline is already active for this session".into()));
        }

        let acquired = self.asr_pool.acquire().await.map_err(|e| CoreError::Internal(e.to_string()))?;
        let id = Uuid::new_v4();
        let (events_tx, events_rx) = mpsc::channel(128);
        let pipeline = Pipeline::new(id, session_id, user_id, events_tx.clone());
        pipeline.transition(Stage::AudioCapture)?;

        let (asr_tx, asr_rx) = mpsc::channel(128);
        let AcquiredAdapter { id: slot_id, mut adapter, provider_name } = acquired;
        if let Err(e) = adapter.start_stream(asr_config, asr_tx).await {
            return Err(CoreError::TransientRemote { stage: Stage::AsrProcessing, reason: e.to_string() });
        }

        let runtime = PipelineRuntime {
            preprocessor: AudioPreprocessor::new(self.vad_config.clone()),
            asr: Some(AcquiredAdapter { id: slot_id, adapter, provider_name }),
        };
        let handle = Arc::new(PipelineHandle { pipeline, runtime: AsyncMutex::new(runtime) });
        self.pipelines.insert(id, handle.clone());
        self.active_by_session.insert(session_id, id);

        let orchestrator = self.clone();
        let task_handle = handle.clone();
        tokio::spawn(async move { orchestrator.drive_asr_events(task_handle, asr_rx).await });

        let _ = events_tx.send(PipelineEvent::Started).await;
        Ok((id, events_rx))
    }

    fn handle(&self, pipeline_id: Uuid) -> Result<Arc<PipelineHandle>, CoreError> {
        self.pipelines.get(&pipeline_id).map(|h| h.clone()).ok_or_else(|| CoreError::Validation("unknown pipeline".into()))
    }

    /// `processAudioChunk(pipelineId, bytes)`. Runs the chunk through the VAD
    /// preprocessor; forwarded audio reaches the acquired ASR adapter, a
    /// `SpeechEnd` advances the pipeline to `asr_processing`.
    pub async fn process_audio_chunk(&self, pipeline_id: Uuid, bytes: &[u8]) -> Result<(), CoreError> {
        let handle = self.handle(pipeline_id)?;
        if handle.pipeline.cancel.is_cancelled() {
            return Ok(());
        }
        let samples = pcm_bytes_to_i16(bytes).map_err(|e| CoreError::Internal(e.to_string()))?;
        let mut runtime = handle.runtime.lock().await;
        let events =
            runtime.preprocessor.process_chunk(&samples, Instant::now()).map_err(|e| CoreError::Internal(e.to_string()))?;

        for event in events {
            match event {
                PreprocessorEvent::Forward(samples) => {
                    if let Some(asr) = runtime.asr.as_mut() {
                        let bytes = i16_to_bytes(&samples);
                        if let Err(e) = asr.adapter.send_audio(&bytes).await {
                            return Err(CoreError::TransientRemote { stage: Stage::AsrProcessing, reason: e.to_string() });
                        }
                    }
                }
                PreprocessorEvent::SpeechStart => {}
                PreprocessorEvent::SpeechEnd { audio } => {
                    if let Some(asr) = runtime.asr.as_mut() {
                        let bytes = i16_to_bytes(&audio);
                        if let Err(e) = asr.adapter.send_audio(&bytes).await {
                            return Err(CoreError::TransientRemote { stage: Stage::AsrProcessing, reason: e.to_string() });
                        }
                    }
                    if let Err(e) = handle.pipeline.transition(Stage::AsrProcessing) {
                        warn!(pipeline_id = %pipeline_id, error = %e, "speech_end transition rejected");
                    }
                }
            }
        }
        Ok(())
    }

    async fn drive_asr_events(
        self: Arc<Self>,
        handle: Arc<PipelineHandle>,
        mut rx: mpsc::Receiver<Result<TranscriptionResult, AsrError>>,
    ) {
        while let Some(result) = rx.recv().await {
            if handle.pipeline.cancel.is_cancelled() {
                break;
            }
            match result {
                Ok(transcription) => {
                    let is_final = transcription.is_final;
                    *handle.pipeline.last_asr_confidence.lock() = transcription.confidence;
                    let _ = handle.pipeline.events.send(PipelineEvent::Transcript(transcription.clone())).await;
                    self.transcripts.ingest(&handle.pipeline.session_id.to_string(), transcription.clone());

                    if is_final {
                        let orchestrator = self.clone();
                        let handle = handle.clone();
                        let text = self.transcripts.get_complete(&handle.pipeline.session_id.to_string());
                        tokio::spawn(async move { orchestrator.run_language_stage(handle, text).await });
                    }
                }
                Err(e) => {
                    self.fail(&handle, CoreError::TransientRemote { stage: Stage::AsrProcessing, reason: e.to_string() })
                        .await;
                    break;
                }
            }
        }
    }

    /// Drives retrieval (optional), LLM streaming, and TTS synthesis for one
    /// finalized utterance.
    async fn run_language_stage(self: Arc<Self>, handle: Arc<PipelineHandle>, query: String) {
        if handle.pipeline.cancel.is_cancelled() {
            return;
        }

        let retrieved = match self.retrieve_context(&handle, &query).await {
            Ok(r) => r,
            Err(e) => {
                self.fail(&handle, e).await;
                return;
            }
        };
        let context_text = retrieved.as_ref().map(|(text, _)| text.as_str());

        if let Err(e) = handle.pipeline.transition(Stage::LlmProcessing) {
            self.fail(&handle, e).await;
            return;
        }

        let mut response = match self.run_llm(&handle, &query, context_text).await {
            Ok(text) => text,
            Err(e) => {
                self.fail(&handle, e).await;
                return;
            }
        };
        if handle.pipeline.cancel.is_cancelled() {
            return;
        }

        let mut is_grounded = None;
        if let (Some((_, hits)), Some(rag)) = (&retrieved, &self.rag) {
            let grounding = validate_grounding(&response, hits, &rag.grounding_config);
            if !grounding.is_grounded {
                warn!(pipeline_id = %handle.pipeline.id, confidence = grounding.confidence, "response not grounded in retrieved sources");
            }
            is_grounded = Some(grounding.is_grounded);
            let citations = build_citations(hits);
            response = inject_markers(&response, &citations);
        }
        let _ = handle.pipeline.events.send(PipelineEvent::LlmResponse { text: response.clone(), is_grounded }).await;

        if let Err(e) = handle.pipeline.transition(Stage::TtsSynthesis) {
            self.fail(&handle, e).await;
            return;
        }

        self.run_tts(&handle, &response).await;
    }

    async fn retrieve_context(
        &self,
        handle: &Arc<PipelineHandle>,
        query: &str,
    ) -> Result<Option<(String, Vec<SearchHit>)>, CoreError> {
        let Some(rag) = &self.rag else {
            return Ok(None);
        };
        handle.pipeline.transition(Stage::RagRetrieval)?;

        let embedded = embed_all(rag.embeddings.as_ref(), &[query.to_string()], &rag.embedding_config)
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        let Some(query_vector) = embedded.vectors.into_iter().next() else {
            return Ok(None);
        };

        let hits: Vec<SearchHit> =
            rag.vector_store.search(&query_vector, &rag.search_options).await.map_err(|e| CoreError::Internal(e.to_string()))?;
        if hits.is_empty() {
            return Ok(None);
        }
        let context = hits.iter().map(|h| h.text.as_str()).collect::<Vec<_>>().join("\n\n");
        Ok(Some((context, hits)))
    }

    async fn run_llm(&self, handle: &Arc<PipelineHandle>, query: &str, context: Option<&str>) -> Result<String, CoreError> {
        let permit = self.llm_breaker.before_call(Instant::now());
        if permit == CallPermit::UseFallback {
            return Ok(LLM_FALLBACK_TEXT.to_string());
        }

        let messages = vec![LlmMessage { role: LlmRole::User, content: query.to_string() }];
        let (tx, mut rx) = mpsc::channel(64);
        let start = Instant::now();
        let stream_result = self.llm.stream_completion(&messages, context, tx).await;

        let mut response = String::new();
        let mut first_token = true;
        while let Some(token) = rx.recv().await {
            if handle.pipeline.cancel.is_cancelled() {
                self.llm_breaker.record_success(Instant::now());
                return Err(CoreError::Cancelled);
            }
            match token {
                Ok(text) => {
                    if first_token {
                        self.latency.record_first_token_latency(start.elapsed().as_millis() as u64);
                        self.latency.record_stage(StageTransition::LlmFirstToken, start.elapsed().as_millis() as u64);
                        first_token = false;
                    }
                    let _ = handle.pipeline.events.send(PipelineEvent::LlmToken(text.clone())).await;
                    response.push_str(&text);
                }
                Err(e) => {
                    self.llm_breaker.record_failure(Instant::now());
                    return Err(CoreError::TransientRemote { stage: Stage::LlmProcessing, reason: e.to_string() });
                }
            }
        }

        match stream_result {
            Ok(()) => {
                self.llm_breaker.record_success(Instant::now());
                if response.is_empty() {
                    Ok(LLM_FALLBACK_TEXT.to_string())
                } else {
                    Ok(response)
                }
            }
            Err(e) => {
                self.llm_breaker.record_failure(Instant::now());
                Err(CoreError::TransientRemote { stage: Stage::LlmProcessing, reason: e.to_string() })
            }
        }
    }

    /// §4.11 fallback semantics: when the TTS breaker is open, yield no audio
    /// and let the text-only reply stand — never fail the pipeline over a
    /// down TTS vendor.
    async fn run_tts(&self, handle: &Arc<PipelineHandle>, text: &str) {
        let permit = self.tts_breaker.before_call(Instant::now());
        if permit == CallPermit::UseFallback {
            self.end_without_audio(handle).await;
            return;
        }

        match self.tts.synthesize(text, &self.default_voice).await {
            Ok(result) => {
                self.tts_breaker.record_success(Instant::now());
                if let Err(e) = handle.pipeline.transition(Stage::AudioPlayback) {
                    self.fail(handle, e).await;
                    return;
                }
                for chunk in result.samples.chunks(TTS_CHUNK_SAMPLES) {
                    if handle.pipeline.cancel.is_cancelled() {
                        return;
                    }
                    let _ = handle.pipeline.events.send(PipelineEvent::TtsAudio(chunk.to_vec())).await;
                }
                self.complete(handle).await;
            }
            Err(e) => {
                self.tts_breaker.record_failure(Instant::now());
                warn!(pipeline_id = %handle.pipeline.id, error = %e, "tts synthesis failed, proceeding text-only");
                self.end_without_audio(handle).await;
            }
        }
    }

    async fn end_without_audio(&self, handle: &Arc<PipelineHandle>) {
        if handle.pipeline.transition(Stage::AudioPlayback).is_ok() {
            self.complete(handle).await;
        }
    }

    async fn complete(&self, handle: &Arc<PipelineHandle>) {
        if let Ok(elapsed_ms) = handle.pipeline.transition(Stage::Completed) {
            self.latency.record_total_latency(elapsed_ms);
        }
        let _ = handle.pipeline.events.send(PipelineEvent::Completed).await;
        self.release_asr(handle, false).await;
        self.release(handle).await;
    }

    async fn fail(&self, handle: &Arc<PipelineHandle>, error: CoreError) {
        if error.is_cancelled() {
            return;
        }
        warn!(pipeline_id = %handle.pipeline.id, error = %error, "pipeline failed");
        let _ = handle.pipeline.transition(Stage::Error);
        let _ = handle.pipeline.events.send(PipelineEvent::Error(error.to_string())).await;
        self.release_asr(handle, true).await;
        self.release(handle).await;
    }

    /// `interruptPipeline(pipelineId)`: sets the cancellation flag and
    /// broadcasts it down-stack. Idempotent — a second interrupt on an
    /// already-interrupted pipeline is a no-op.
    pub async fn interrupt_pipeline(&self, pipeline_id: Uuid) -> Result<(), CoreError> {
        let handle = self.handle(pipeline_id)?;
        if handle.pipeline.stage().is_terminal() {
            return Ok(());
        }
        handle.pipeline.cancel.cancel();
        handle.pipeline.interruption_count.fetch_add(1, Ordering::SeqCst);
        handle.pipeline.transition(Stage::Interrupted)?;

        self.release_asr(&handle, false).await;
        let _ = handle.pipeline.events.send(PipelineEvent::Interrupted).await;
        self.release(&handle).await;
        Ok(())
    }

    /// `endPipeline(pipelineId)`: concludes the final state and releases
    /// resources. Safe to call on a pipeline that already reached a terminal
    /// stage via completion, error, or interruption.
    pub async fn end_pipeline(&self, pipeline_id: Uuid) -> Result<(), CoreError> {
        let handle = self.handle(pipeline_id)?;
        self.release_asr(&handle, false).await;
        self.release(&handle).await;
        Ok(())
    }

    /// Closes this pipeline's checked-out ASR adapter, if it still holds one.
    /// On success the adapter goes back to the pool via `release()` so the
    /// next turn can reuse it; on error it is evicted via `remove()` (§4.2
    /// pool contract) since its vendor stream may be left in a bad state.
    async fn release_asr(&self, handle: &Arc<PipelineHandle>, error: bool) {
        let acquired = {
            let mut runtime = handle.runtime.lock().await;
            runtime.asr.take()
        };
        if let Some(mut acquired) = acquired {
            let _ = acquired.adapter.end_stream().await;
            if error {
                self.asr_pool.remove(acquired, true).await;
            } else {
                let confidence = *handle.pipeline.last_asr_confidence.lock();
                self.asr_pool.release(acquired, true, Some(confidence), 0.0).await;
            }
        }
    }

    async fn release(&self, handle: &Arc<PipelineHandle>) {
        self.active_by_session.remove(&handle.pipeline.session_id);
        self.pipelines.remove(&handle.pipeline.id);
    }

    pub fn active_count(&self) -> usize {
        self.pipelines.len()
    }

    pub fn active_ids(&self) -> Vec<Uuid> {
        self.pipelines.iter().map(|e| *e.key()).collect()
    }

    pub fn stage_of(&self, pipeline_id: Uuid) -> Option<Stage> {
        self.pipelines.get(&pipeline_id).map(|h| h.pipeline.stage())
    }
}

fn i16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}
