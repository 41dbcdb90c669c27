//! Vocabulary table shared by the tokenizer and the generation engine.
//!
//! A vocabulary is loaded once, validated, and never mutated afterwards. The
//! JSON layout matches the one produced by the training scripts:
//!
//! ```json
//! { "stoi": { "a": 0, "b": 1 }, "itos": { "0": "a", "1": "b" }, "block_size": 64 }
//! ```

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Raw on-disk layout before validation.
#[derive(Debug, Deserialize)]
struct VocabFile {
    stoi: HashMap<String, usize>,
    itos: HashMap<String, String>,
    block_size: usize,
    #[serde(default)]
    vocab_size: Option<usize>,
}

/// Bidirectional symbol/id mapping plus the backend's maximum context length.
#[derive(Clone, Debug)]
pub struct VocabularyTable {
    symbol_to_id: HashMap<char, usize>,
    id_to_symbol: Vec<char>,
    block_size: usize,
}

impl VocabularyTable {
    /// Build a table from symbols listed in id order.
    pub fn from_symbols(symbols: impl IntoIterator<Item = char>, block_size: usize) -> Result<Self> {
        let id_to_symbol: Vec<char> = symbols.into_iter().collect();
        let mut symbol_to_id = HashMap::with_capacity(id_to_symbol.len());
        for (id, &sym) in id_to_symbol.iter().enumerate() {
            if symbol_to_id.insert(sym, id).is_some() {
                return Err(Error::Config(format!("duplicate symbol {:?} in vocabulary", sym)));
            }
        }
        Self::checked(symbol_to_id, id_to_symbol, block_size)
    }

    /// Parse and validate a vocabulary from its JSON representation.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let raw: VocabFile = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("malformed vocabulary: {}", e)))?;

        let n = raw.itos.len();
        if let Some(declared) = raw.vocab_size {
            if declared != n {
                return Err(Error::Config(format!(
                    "vocab_size is {} but itos has {} entries",
                    declared, n
                )));
            }
        }

        let mut id_to_symbol = vec![None; n];
        for (key, sym) in &raw.itos {
            let id: usize = key
                .parse()
                .map_err(|_| Error::Config(format!("itos key {:?} is not an integer", key)))?;
            let slot = id_to_symbol
                .get_mut(id)
                .ok_or_else(|| Error::Config(format!("itos ids are not contiguous: found {}", id)))?;
            *slot = Some(single_char(sym)?);
        }
        // "01" and "1" land in the same slot and leave a hole.
        let id_to_symbol = id_to_symbol
            .into_iter()
            .enumerate()
            .map(|(id, sym)| sym.ok_or_else(|| Error::Config(format!("itos is missing id {}", id))))
            .collect::<Result<Vec<char>>>()?;

        let mut symbol_to_id = HashMap::with_capacity(raw.stoi.len());
        for (sym, &id) in &raw.stoi {
            let ch = single_char(sym)?;
            match id_to_symbol.get(id) {
                Some(&expected) if expected == ch => {}
                Some(&expected) => {
                    return Err(Error::Config(format!(
                        "stoi maps {:?} to {} but itos[{}] is {:?}",
                        ch, id, id, expected
                    )))
                }
                None => {
                    return Err(Error::Config(format!(
                        "stoi maps {:?} to {} which is outside the vocabulary",
                        ch, id
                    )))
                }
            }
            symbol_to_id.insert(ch, id);
        }

        Self::checked(symbol_to_id, id_to_symbol, raw.block_size)
    }

    /// Read and validate a vocabulary file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Config(format!("cannot read vocabulary {:?}: {}", path.as_ref(), e))
        })?;
        Self::from_json_str(&text)
    }

    fn checked(
        symbol_to_id: HashMap<char, usize>,
        id_to_symbol: Vec<char>,
        block_size: usize,
    ) -> Result<Self> {
        if id_to_symbol.is_empty() {
            return Err(Error::Config("vocabulary is empty".into()));
        }
        if block_size == 0 {
            return Err(Error::Config("block_size must be greater than zero".into()));
        }
        Ok(Self { symbol_to_id, id_to_symbol, block_size })
    }

    pub fn vocab_size(&self) -> usize {
        self.id_to_symbol.len()
    }

    /// Maximum number of ids the backend accepts in one call.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn id_of(&self, symbol: char) -> Option<usize> {
        self.symbol_to_id.get(&symbol).copied()
    }

    pub fn symbol_of(&self, id: usize) -> Option<char> {
        self.id_to_symbol.get(id).copied()
    }

    pub fn contains(&self, symbol: char) -> bool {
        self.symbol_to_id.contains_key(&symbol)
    }

    /// Symbols in id order.
    pub fn symbols(&self) -> &[char] {
        &self.id_to_symbol
    }
}

fn single_char(sym: &str) -> Result<char> {
    let mut chars = sym.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(Error::Config(format!(
            "symbol {:?} is not a single character",
            sym
        ))),
    }
}
