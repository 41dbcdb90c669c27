//! Command-line text generation.
//!
//! Loads a vocabulary and a model, then streams generated characters to
//! stderr while it runs; the final text goes to stdout. Ctrl-C stops the
//! current run and keeps the text produced so far, or exits when idle.

use anyhow::{Context, Result};
use chargen::engine::DEFAULT_SNAPSHOT_INTERVAL;
use chargen::model::{TinyLm, TinyLmConfig};
use chargen::{
    CancelToken, EngineConfig, GenerationConfig, GenerationEngine, InferenceBackend, OovPolicy,
    OutputSink, StopReason, VocabularyTable,
};
use clap::Parser;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Vocabulary JSON with `stoi`, `itos` and `block_size`
    #[arg(long)]
    vocab: PathBuf,

    /// Weights written by `init_model`; a freshly initialised model is used when omitted
    #[arg(long)]
    weights: Option<PathBuf>,

    /// Prompt text
    #[arg(long, default_value = " ")]
    prompt: String,

    /// Number of characters to generate
    #[arg(long, default_value_t = 200)]
    steps: usize,

    /// Sampling temperature
    #[arg(long, default_value_t = 1.0)]
    temperature: f64,

    /// Seed for reproducible sampling
    #[arg(long)]
    seed: Option<u64>,

    /// Hidden size of the fresh model (ignored with --weights)
    #[arg(long, default_value_t = 32)]
    dim: usize,

    /// Steps between streamed snapshots
    #[arg(long, default_value_t = DEFAULT_SNAPSHOT_INTERVAL)]
    snapshot_interval: usize,

    /// Reject prompts with characters outside the vocabulary
    #[arg(long)]
    strict: bool,

    /// Read prompts from stdin until `/exit`
    #[arg(long)]
    interactive: bool,
}

/// Streams progress to one writer and the final text to another.
///
/// Snapshots are untruncated, so they only go to `progress` (stderr in the
/// binary); `output` (stdout) receives the finished text exactly once.
struct TerminalSink<P, O> {
    progress: P,
    output: O,
    streamed: usize,
}

impl<P: Write, O: Write> TerminalSink<P, O> {
    fn new(progress: P, output: O) -> Self {
        Self { progress, output, streamed: 0 }
    }
}

impl<P: Write, O: Write> OutputSink for TerminalSink<P, O> {
    fn partial(&mut self, text: &str) {
        let fresh: String = text.chars().skip(self.streamed).collect();
        self.streamed += fresh.chars().count();
        let _ = write!(self.progress, "{}", fresh);
        let _ = self.progress.flush();
    }

    fn finished(&mut self, text: &str) {
        if self.streamed > 0 {
            let _ = writeln!(self.progress);
        }
        let _ = writeln!(self.output, "{}", text);
        let _ = self.output.flush();
    }
}

#[derive(Debug, PartialEq, Eq)]
enum SignalAction {
    /// A run was in flight and has been asked to stop.
    Cancelled,
    /// Nothing to cancel; leave the process.
    Exit,
}

/// Routes Ctrl-C to the run in flight, if any.
///
/// One handler is installed for the whole process. A second Ctrl-C during a
/// run that is already stopping exits.
#[derive(Default)]
struct InterruptRouter {
    active: Mutex<Option<CancelToken>>,
}

impl InterruptRouter {
    fn begin(&self) -> CancelToken {
        let token = CancelToken::new();
        *self.lock() = Some(token.clone());
        token
    }

    fn end(&self) {
        *self.lock() = None;
    }

    fn interrupt(&self) -> SignalAction {
        match self.lock().as_ref() {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                SignalAction::Cancelled
            }
            _ => SignalAction::Exit,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<CancelToken>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn run_once<B: InferenceBackend>(
    engine: &GenerationEngine<B>,
    args: &Args,
    prompt: &str,
    router: &InterruptRouter,
) -> Result<()> {
    let mut request = GenerationConfig::new(prompt, args.steps, args.temperature);
    request.seed = args.seed;

    let cancel = router.begin();
    let mut sink = TerminalSink::new(io::stderr(), io::stdout());
    let result = engine.run(&request, &mut sink, &cancel).await;
    router.end();

    let generation = result.context("generation failed")?;
    if generation.stop == StopReason::Cancelled {
        tracing::info!(steps = generation.steps, "stopped early");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("chargen=info".parse()?),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let vocab = VocabularyTable::from_json_file(&args.vocab)
        .with_context(|| format!("loading vocabulary {:?}", args.vocab))?;
    let model = match &args.weights {
        Some(path) => TinyLm::load_mmap(path).with_context(|| format!("loading model {:?}", path))?,
        None => TinyLm::new(&TinyLmConfig {
            vocab_size: vocab.vocab_size(),
            dim: args.dim,
            seed: args.seed.unwrap_or(0),
        })?,
    };

    let config = EngineConfig {
        snapshot_interval: args.snapshot_interval,
        oov_policy: if args.strict { OovPolicy::Reject } else { OovPolicy::default() },
        ..EngineConfig::default()
    };
    let engine = GenerationEngine::with_config(vocab, model, config)?;

    let router = Arc::new(InterruptRouter::default());
    let watcher = Arc::clone(&router);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if watcher.interrupt() == SignalAction::Exit {
                std::process::exit(130);
            }
        }
    });

    if !args.interactive {
        return run_once(&engine, &args, &args.prompt, &router).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!(">>> ");
        io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let trimmed = line.trim_end();
        if trimmed == "/exit" {
            break;
        }
        if trimmed.is_empty() {
            continue;
        }
        // A failed prompt is reported and the session continues.
        if let Err(e) = run_once(&engine, &args, trimmed, &router).await {
            eprintln!("Error: {:#}", e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_text_written_once() {
        let mut progress = Vec::new();
        let mut output = Vec::new();
        {
            let mut sink = TerminalSink::new(&mut progress, &mut output);
            sink.partial("ab. c");
            sink.partial("ab. cab");
            sink.finished("ab.");
        }
        assert_eq!(String::from_utf8(progress).unwrap(), "ab. cab\n");
        assert_eq!(String::from_utf8(output).unwrap(), "ab.\n");
    }

    #[test]
    fn test_interrupt_cancels_active_run_then_exits() {
        let router = InterruptRouter::default();
        assert_eq!(router.interrupt(), SignalAction::Exit);

        let token = router.begin();
        assert_eq!(router.interrupt(), SignalAction::Cancelled);
        assert!(token.is_cancelled());
        assert_eq!(router.interrupt(), SignalAction::Exit);

        router.end();
        let next = router.begin();
        assert_eq!(router.interrupt(), SignalAction::Cancelled);
        assert!(next.is_cancelled());
        router.end();
        assert_eq!(router.interrupt(), SignalAction::Exit);
    }
}
