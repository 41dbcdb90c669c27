//! The generation loop.
//!
//! A [`GenerationEngine`] is built once from a vocabulary and a backend and
//! can then serve any number of `generate` calls. Each call owns its own
//! token sequence, so concurrent calls against the same engine do not share
//! mutable state; the backend is only borrowed.

use crate::backend::{input_tensor, last_position, InferenceBackend};
use crate::error::{Error, Result};
use crate::sampler::{check_temperature, Sampler};
use crate::tokenizer::{OovPolicy, Tokenizer};
use crate::vocab::VocabularyTable;
use crate::window::window;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Steps between partial-output snapshots.
pub const DEFAULT_SNAPSHOT_INTERVAL: usize = 5;

/// Engine-wide settings fixed at construction.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Emit a partial snapshot and yield to the scheduler every this many steps.
    pub snapshot_interval: usize,
    pub oov_policy: OovPolicy,
    /// Final text is cut right after the last occurrence of this character.
    pub terminator: char,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            oov_policy: OovPolicy::default(),
            terminator: '.',
        }
    }
}

/// Per-call generation request.
#[derive(Clone, Debug)]
pub struct GenerationConfig {
    pub prompt: String,
    pub max_steps: usize,
    pub temperature: f64,
    /// Fixes the sampler's random stream when set.
    pub seed: Option<u64>,
}

impl GenerationConfig {
    pub fn new(prompt: impl Into<String>, max_steps: usize, temperature: f64) -> Self {
        Self { prompt: prompt.into(), max_steps, temperature, seed: None }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        check_temperature(self.temperature)?;
        if self.prompt.is_empty() && self.max_steps > 0 {
            return Err(Error::InvalidArgument(
                "prompt must not be empty when steps are requested".into(),
            ));
        }
        Ok(())
    }
}

/// Receives decoded text while a run progresses.
pub trait OutputSink {
    /// Snapshot of the whole sequence so far.
    fn partial(&mut self, text: &str);

    /// Final, terminator-truncated text.
    fn finished(&mut self, text: &str) {
        self.partial(text);
    }
}

impl<F: FnMut(&str)> OutputSink for F {
    fn partial(&mut self, text: &str) {
        self(text)
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl OutputSink for NullSink {
    fn partial(&mut self, _text: &str) {}
}

/// Cooperative cancellation flag, checked at every step boundary.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Lifecycle of one run, reported through `trace!` transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Idle,
    Initializing,
    Stepping(usize),
    Finalizing,
    Done,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// All requested steps ran.
    Completed,
    /// The cancel token fired before the last step.
    Cancelled,
}

/// Result of a finished run.
#[derive(Clone, Debug)]
pub struct Generation {
    /// Decoded sequence, cut after the last terminator.
    pub text: String,
    /// Prompt ids followed by every sampled id.
    pub ids: Vec<usize>,
    /// Number of backend steps taken.
    pub steps: usize,
    pub stop: StopReason,
}

struct GenerationState {
    sequence: Vec<usize>,
    phase: Phase,
}

impl GenerationState {
    fn new() -> Self {
        Self { sequence: Vec::new(), phase: Phase::Idle }
    }

    fn enter(&mut self, phase: Phase) {
        trace!(from = ?self.phase, to = ?phase, "phase transition");
        self.phase = phase;
    }
}

/// Cut `text` right after the last `terminator`, or return it whole.
pub fn truncate_at_terminator(text: &str, terminator: char) -> &str {
    match text.rfind(terminator) {
        Some(idx) => &text[..idx + terminator.len_utf8()],
        None => text,
    }
}

/// Vocabulary, backend and settings shared by every generation call.
pub struct GenerationEngine<B> {
    vocab: VocabularyTable,
    backend: B,
    config: EngineConfig,
}

impl<B: InferenceBackend> GenerationEngine<B> {
    pub fn new(vocab: VocabularyTable, backend: B) -> Result<Self> {
        Self::with_config(vocab, backend, EngineConfig::default())
    }

    pub fn with_config(vocab: VocabularyTable, backend: B, config: EngineConfig) -> Result<Self> {
        if config.snapshot_interval == 0 {
            return Err(Error::Config("snapshot_interval must be at least 1".into()));
        }
        if backend.vocab_size() != vocab.vocab_size() {
            return Err(Error::Config(format!(
                "backend produces {} logits per position but the vocabulary has {} symbols",
                backend.vocab_size(),
                vocab.vocab_size()
            )));
        }
        // Fails early if the OOV substitute is missing.
        Tokenizer::new(&vocab, config.oov_policy)?;
        Ok(Self { vocab, backend, config })
    }

    pub fn vocab(&self) -> &VocabularyTable {
        &self.vocab
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tokenizer(&self) -> Result<Tokenizer<'_>> {
        Tokenizer::new(&self.vocab, self.config.oov_policy)
    }

    /// Generate text for `request`, streaming snapshots to `sink`.
    pub async fn generate<S>(&self, request: &GenerationConfig, sink: &mut S) -> Result<String>
    where
        S: OutputSink + ?Sized,
    {
        Ok(self.run(request, sink, &CancelToken::new()).await?.text)
    }

    /// Like [`generate`](Self::generate) but stops early once `cancel` fires.
    pub async fn generate_with_cancel<S>(
        &self,
        request: &GenerationConfig,
        sink: &mut S,
        cancel: &CancelToken,
    ) -> Result<String>
    where
        S: OutputSink + ?Sized,
    {
        Ok(self.run(request, sink, cancel).await?.text)
    }

    /// Full run returning the sampled ids and how the run ended.
    ///
    /// A backend failure aborts the run and discards partial output. A
    /// cancelled run is finalised from the ids produced so far.
    pub async fn run<S>(
        &self,
        request: &GenerationConfig,
        sink: &mut S,
        cancel: &CancelToken,
    ) -> Result<Generation>
    where
        S: OutputSink + ?Sized,
    {
        request.validate()?;
        let mut state = GenerationState::new();

        state.enter(Phase::Initializing);
        let tokenizer = self.tokenizer()?;
        state.sequence = tokenizer.encode(&request.prompt)?;
        let mut sampler = Sampler::new(request.seed);

        info!(
            prompt_len = state.sequence.len(),
            max_steps = request.max_steps,
            temperature = request.temperature,
            "starting generation"
        );

        let mut steps = 0;
        let mut stop = StopReason::Completed;
        for step in 0..request.max_steps {
            if cancel.is_cancelled() {
                warn!(step, "generation cancelled");
                stop = StopReason::Cancelled;
                break;
            }
            state.enter(Phase::Stepping(step));
            match self.step(&state.sequence, &mut sampler, request.temperature).await {
                Ok(id) => state.sequence.push(id),
                Err(e) => {
                    state.enter(Phase::Failed);
                    warn!(step, error = %e, "generation failed");
                    return Err(e);
                }
            }
            steps += 1;

            if steps % self.config.snapshot_interval == 0 {
                let snapshot = tokenizer.decode(&state.sequence)?;
                debug!(step, len = state.sequence.len(), "partial output");
                sink.partial(&snapshot);
                tokio::task::yield_now().await;
            }
        }

        state.enter(Phase::Finalizing);
        let decoded = tokenizer.decode(&state.sequence)?;
        let text = truncate_at_terminator(&decoded, self.config.terminator).to_string();
        sink.finished(&text);
        state.enter(Phase::Done);

        info!(steps, chars = text.chars().count(), ?stop, "generation finished");
        Ok(Generation { text, ids: state.sequence, steps, stop })
    }

    /// One backend call and one sampled id.
    async fn step(&self, sequence: &[usize], sampler: &mut Sampler, temperature: f64) -> Result<usize> {
        let context = window(sequence, self.vocab.block_size());
        let logits = self.backend.infer(input_tensor(context)).await?;
        let last = last_position(&logits, context.len(), self.vocab.vocab_size())?;
        sampler.sample(&last, temperature)
    }
}
