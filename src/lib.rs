//! Character-level autoregressive text generation.
//!
//! The crate tokenizes a prompt against a fixed vocabulary, feeds a sliding
//! context window to an inference backend, samples the next character from
//! the temperature-scaled distribution and streams partial output while it
//! goes. [`engine::GenerationEngine`] ties the pieces together.

pub mod backend;
pub mod engine;
pub mod error;
pub mod model;
pub mod sampler;
pub mod tokenizer;
pub mod vocab;
pub mod window;

pub use backend::InferenceBackend;
pub use engine::{
    CancelToken, EngineConfig, Generation, GenerationConfig, GenerationEngine, NullSink,
    OutputSink, StopReason,
};
pub use error::{Error, Result};
pub use tokenizer::{OovPolicy, Tokenizer};
pub use vocab::VocabularyTable;
