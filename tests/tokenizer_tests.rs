use chargen::{Error, OovPolicy, Tokenizer, VocabularyTable};
use std::io::Write;
use tempfile::NamedTempFile;

const VOCAB_JSON: &str = r#"{
    "stoi": {"\n": 0, " ": 1, ".": 2, "a": 3, "b": 4, "c": 5},
    "itos": {"0": "\n", "1": " ", "2": ".", "3": "a", "4": "b", "5": "c"},
    "block_size": 16,
    "vocab_size": 6
}"#;

#[test]
fn test_roundtrip_for_in_vocabulary_text() {
    let vocab = VocabularyTable::from_json_str(VOCAB_JSON).unwrap();
    let tok = Tokenizer::new(&vocab, OovPolicy::default()).unwrap();
    for text in ["", "abc", "a b.\nc", "...", "cab cab."] {
        let ids = tok.encode(text).unwrap();
        assert_eq!(ids.len(), text.chars().count());
        assert_eq!(tok.decode(&ids).unwrap(), text);
    }
}

#[test]
fn test_fallback_is_lossy() {
    let vocab = VocabularyTable::from_json_str(VOCAB_JSON).unwrap();
    let tok = Tokenizer::new(&vocab, OovPolicy::default()).unwrap();
    assert_eq!(tok.decode(&tok.encode("aXé").unwrap()).unwrap(), "a  ");

    let dotted = Tokenizer::new(&vocab, OovPolicy::Substitute('.')).unwrap();
    assert_eq!(dotted.decode(&dotted.encode("aXb").unwrap()).unwrap(), "a.b");
}

#[test]
fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(VOCAB_JSON.as_bytes()).unwrap();
    file.flush().unwrap();
    let vocab = VocabularyTable::from_json_file(file.path()).unwrap();
    assert_eq!(vocab.vocab_size(), 6);
    assert_eq!(vocab.block_size(), 16);
}

#[test]
fn test_missing_file_is_config_error() {
    let err = VocabularyTable::from_json_file("/nonexistent/vocab.json").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_malformed_json_is_config_error() {
    let err = VocabularyTable::from_json_str("{ not json").unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn test_bundled_vocabulary() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/data/vocab.json");
    let vocab = VocabularyTable::from_json_file(path).unwrap();
    assert_eq!(vocab.vocab_size(), 65);
    assert_eq!(vocab.block_size(), 64);
    assert!(vocab.contains(' ') && vocab.contains('.') && vocab.contains('\n'));
}
