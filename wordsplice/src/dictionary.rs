use std::collections::BTreeSet;

use crate::corpus::Corpus;
use crate::errors::{Result, WordspliceError};
use crate::model::Segmenter;
use crate::utils::split_fields;

/// Words longer than this are never looked up.
pub const DICTIONARY_MAX_WORD_LEN: usize = 20;

/// Segmenter picking the longest known word at each position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dictionary {
    // Sorted and deduplicated.
    words: Vec<Vec<u8>>,
}

impl Dictionary {
    /// Collects every distinct word of the corpus.
    pub fn train(corpus: &Corpus) -> Self {
        let mut words = BTreeSet::new();
        for document in corpus.documents() {
            for word in split_fields(document) {
                if !words.contains(word) {
                    words.insert(word.to_vec());
                }
            }
        }
        log::info!("# of words: {}", words.len());
        Self {
            words: words.into_iter().collect(),
        }
    }

    /// Creates a dictionary from arbitrary words. Empty words are ignored.
    pub fn from_words<I, W>(words: I) -> Self
    where
        I: IntoIterator<Item = W>,
        W: AsRef<[u8]>,
    {
        let words: BTreeSet<Vec<u8>> = words
            .into_iter()
            .map(|w| w.as_ref().to_vec())
            .filter(|w| !w.is_empty())
            .collect();
        Self {
            words: words.into_iter().collect(),
        }
    }

    /// Gets the sorted vocabulary.
    pub fn words(&self) -> &[Vec<u8>] {
        &self.words
    }

    pub fn contains(&self, word: &[u8]) -> bool {
        self.words
            .binary_search_by(|probe| probe.as_slice().cmp(word))
            .is_ok()
    }

    /// Exports the vocabulary, one word per line.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.words.join(&b'\n')
    }

    /// Reads a vocabulary written by [`Dictionary::to_bytes()`].
    ///
    /// # Errors
    ///
    /// [`WordspliceError::InvalidModel`] is returned when the words are not strictly sorted,
    /// since the lookup relies on binary search.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let words: Vec<Vec<u8>> = split_fields(data).map(<[u8]>::to_vec).collect();
        if words.windows(2).any(|w| w[0] >= w[1]) {
            return Err(WordspliceError::invalid_model(
                "dictionary words are not sorted",
            ));
        }
        Ok(Self { words })
    }
}

impl Segmenter for Dictionary {
    fn split_run<'a>(&self, mut run: &'a [u8]) -> Vec<&'a [u8]> {
        let mut result = vec![];
        while !run.is_empty() {
            let mut len = 1;
            for l in 2..=DICTIONARY_MAX_WORD_LEN.min(run.len()) {
                if self.contains(&run[..l]) {
                    len = l;
                }
            }
            let (word, rest) = run.split_at(len);
            result.push(word);
            run = rest;
        }
        result
    }
}
