//! Pipeline Orchestrator (§4.9) and Interruption Handler (§4.10).

pub mod cancellation;
pub mod interrupt;
pub mod pipeline;

pub use cancellation::CancellationToken;
pub use interrupt::{InterruptHandler, InterruptionStats, VadEvent};
pub use pipeline::{PipelineEvent, PipelineOrchestrator, RagContext, Stage};
