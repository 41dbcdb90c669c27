//! Write a freshly initialised model sized for a vocabulary.

use anyhow::{Context, Result};
use chargen::model::{TinyLm, TinyLmConfig};
use chargen::VocabularyTable;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Vocabulary JSON the model is sized for
    #[arg(long)]
    vocab: PathBuf,

    /// Output file for the weights
    #[arg(long, default_value = "model.bin")]
    out: PathBuf,

    /// Embedding/hidden dimension
    #[arg(long, default_value_t = 32)]
    dim: usize,

    /// Initialisation seed
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("chargen=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let vocab = VocabularyTable::from_json_file(&args.vocab)
        .with_context(|| format!("loading vocabulary {:?}", args.vocab))?;
    let model = TinyLm::new(&TinyLmConfig {
        vocab_size: vocab.vocab_size(),
        dim: args.dim,
        seed: args.seed,
    })?;
    model.save(&args.out).with_context(|| format!("writing {:?}", args.out))?;

    tracing::info!(symbols = vocab.vocab_size(), dim = args.dim, "model initialised");
    println!("Saved model to {:?}", args.out);
    Ok(())
}
