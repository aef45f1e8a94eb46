// ABOUTME: Submission engine package for Patchbox
// ABOUTME: State-machine orchestration of sandbox runs plus in-band result stream framing

pub mod config;
pub mod emitter;
pub mod framing;
pub mod orchestrator;

pub use config::EngineConfig;
pub use emitter::{EmitterClosed, StreamEmitter};
pub use framing::{
    decode_stream, encode_result, strip_ansi, DecodedStream, SubmissionResult, RESULT_DELIMITER,
};
pub use orchestrator::{Orchestrator, RunOutcome, RunRecord, SubmissionJob};
