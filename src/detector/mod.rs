pub mod evaluation;
pub mod pipeline;
pub mod registry;

pub use evaluation::{DetectorEvaluation, EvaluationPhase, PhaseOutcome};
pub use pipeline::{DetectorPipeline, PipelineOptions, PipelineResult};
pub use registry::{default_detectors, DetectorKind, RegisteredDetector};
