//! Character tokenizer: text to ids and back through a [`VocabularyTable`].

use crate::error::{Error, Result};
use crate::vocab::VocabularyTable;

/// What to do with characters that are not in the vocabulary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OovPolicy {
    /// Replace the character with the id of the given symbol.
    Substitute(char),
    /// Fail the encode call.
    Reject,
}

impl Default for OovPolicy {
    fn default() -> Self {
        OovPolicy::Substitute(' ')
    }
}

/// Character tokenizer backed by a [`VocabularyTable`].
///
/// One character maps to exactly one id; no start or end markers are added.
#[derive(Clone, Debug)]
pub struct Tokenizer<'v> {
    vocab: &'v VocabularyTable,
    policy: OovPolicy,
    fallback_id: Option<usize>,
}

impl<'v> Tokenizer<'v> {
    /// Create a tokenizer. A substitution symbol missing from the vocabulary
    /// is a configuration error since no fallback would be possible.
    pub fn new(vocab: &'v VocabularyTable, policy: OovPolicy) -> Result<Self> {
        let fallback_id = match policy {
            OovPolicy::Substitute(sym) => Some(vocab.id_of(sym).ok_or_else(|| {
                Error::Config(format!("fallback symbol {:?} is not in the vocabulary", sym))
            })?),
            OovPolicy::Reject => None,
        };
        Ok(Self { vocab, policy, fallback_id })
    }

    pub fn policy(&self) -> OovPolicy {
        self.policy
    }

    /// Map text to ids, one per character.
    pub fn encode(&self, text: &str) -> Result<Vec<usize>> {
        text.chars()
            .enumerate()
            .map(|(pos, ch)| match (self.vocab.id_of(ch), self.fallback_id) {
                (Some(id), _) => Ok(id),
                (None, Some(fallback)) => Ok(fallback),
                (None, None) => Err(Error::InvalidArgument(format!(
                    "character {:?} at position {} is not in the vocabulary",
                    ch, pos
                ))),
            })
            .collect()
    }

    /// Map ids back to text.
    pub fn decode(&self, ids: &[usize]) -> Result<String> {
        let mut out = String::with_capacity(ids.len());
        for &id in ids {
            let ch = self.vocab.symbol_of(id).ok_or(Error::OutOfRange {
                id,
                vocab_size: self.vocab.vocab_size(),
            })?;
            out.push(ch);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> VocabularyTable {
        VocabularyTable::from_symbols(['a', 'b', 'c', ' ', '.'], 4).unwrap()
    }

    #[test]
    fn test_encode_known_characters() {
        let vocab = vocab();
        let tok = Tokenizer::new(&vocab, OovPolicy::default()).unwrap();
        assert_eq!(tok.encode("ab c.").unwrap(), vec![0, 1, 3, 2, 4]);
        assert!(tok.encode("").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_characters_become_space() {
        let vocab = vocab();
        let tok = Tokenizer::new(&vocab, OovPolicy::default()).unwrap();
        assert_eq!(tok.encode("axb").unwrap(), vec![0, 3, 1]);
        assert_eq!(tok.decode(&tok.encode("axb").unwrap()).unwrap(), "a b");
    }

    #[test]
    fn test_missing_space_is_config_error() {
        let vocab = VocabularyTable::from_symbols(['a', 'b'], 4).unwrap();
        let err = Tokenizer::new(&vocab, OovPolicy::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(Tokenizer::new(&vocab, OovPolicy::Reject).is_ok());
    }

    #[test]
    fn test_reject_policy() {
        let vocab = vocab();
        let tok = Tokenizer::new(&vocab, OovPolicy::Reject).unwrap();
        let err = tok.encode("abz").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(msg) if msg.contains("position 2")));
    }

    #[test]
    fn test_decode_out_of_range() {
        let vocab = vocab();
        let tok = Tokenizer::new(&vocab, OovPolicy::default()).unwrap();
        let err = tok.decode(&[0, 9]).unwrap_err();
        assert!(matches!(err, Error::OutOfRange { id: 9, vocab_size: 5 }));
    }
}
