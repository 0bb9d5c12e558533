use bincode::{Decode, Encode};
use hashbrown::HashMap;

use crate::corpus::Corpus;
use crate::errors::{Result, WordspliceError};
use crate::model::Segmenter;
use crate::utils::{self, split_fields};

/// Markov training parameters.
#[derive(Debug, Clone)]
pub struct MarkovConfig {
    /// The longest candidate word considered while segmenting.
    pub max_word_len: usize,

    /// Single-byte words kept while counting. Any other single-byte token is dropped.
    pub single_byte_words: Vec<u8>,
}

impl Default for MarkovConfig {
    fn default() -> Self {
        Self {
            max_word_len: 20,
            single_byte_words: b"aI".to_vec(),
        }
    }
}

impl MarkovConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_word_len == 0 {
            return Err(WordspliceError::invalid_argument(
                "max_word_len",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Bigram word model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Markov {
    raw_counts: HashMap<Vec<u8>, u64>,
    table: HashMap<Vec<u8>, HashMap<Vec<u8>, u64>>,
    table_counts: HashMap<Vec<u8>, u64>,
    total_count: u64,
    max_word_len: usize,
}

/// Serialized form. Entries are sorted so that equal models produce equal bytes.
#[derive(Encode, Decode)]
struct MarkovRecord {
    max_word_len: u32,
    raw_counts: Vec<(Vec<u8>, u64)>,
    table: Vec<(Vec<u8>, Vec<(Vec<u8>, u64)>)>,
}

fn checked_total(counts: &HashMap<Vec<u8>, u64>) -> Result<u64> {
    counts
        .values()
        .try_fold(0u64, |acc, &c| acc.checked_add(c))
        .ok_or_else(|| WordspliceError::invalid_model("count overflow"))
}

fn sorted_entries(map: &HashMap<Vec<u8>, u64>) -> Vec<(Vec<u8>, u64)> {
    let mut entries: Vec<_> = map.iter().map(|(k, &v)| (k.clone(), v)).collect();
    entries.sort_unstable();
    entries
}

impl Markov {
    /// Counts words and word pairs of the corpus.
    ///
    /// Each document starts with the empty word as its context.
    ///
    /// # Errors
    ///
    /// If invalid parameters are given, an error variant will be returned.
    pub fn train(corpus: &Corpus, config: &MarkovConfig) -> Result<Self> {
        config.validate()?;
        let mut model = Self {
            max_word_len: config.max_word_len,
            ..Self::default()
        };
        for document in corpus.documents() {
            let words = split_fields(document)
                .filter(|w| w.len() > 1 || config.single_byte_words.contains(&w[0]));
            let mut previous: &[u8] = b"";
            for word in words {
                model.add_pair(previous, word);
                previous = word;
            }
        }
        log::info!(
            "# of words: {}, # of contexts: {}, total count: {}",
            model.raw_counts.len(),
            model.table.len(),
            model.total_count,
        );
        Ok(model)
    }

    fn add_pair(&mut self, previous: &[u8], word: &[u8]) {
        *self.raw_counts.entry_ref(word).or_insert(0) += 1;
        self.total_count += 1;
        *self
            .table
            .entry_ref(previous)
            .or_default()
            .entry_ref(word)
            .or_insert(0) += 1;
        *self.table_counts.entry_ref(previous).or_insert(0) += 1;
    }

    /// Probability of `word` following `previous`. The empty word always has probability 1.
    pub fn cond_prob(&self, previous: &[u8], word: &[u8]) -> f64 {
        if word.is_empty() {
            return 1.0;
        }
        let total = match self.table_counts.get(previous) {
            Some(&total) if total > 0 => total,
            _ => return 0.0,
        };
        let count = self
            .table
            .get(previous)
            .and_then(|next| next.get(word))
            .copied()
            .unwrap_or(0);
        count as f64 / total as f64
    }

    /// Unconditional probability of `word`. The empty word always has probability 1.
    pub fn prob(&self, word: &[u8]) -> f64 {
        if word.is_empty() {
            return 1.0;
        }
        if self.total_count == 0 {
            return 0.0;
        }
        let count = self.raw_counts.get(word).copied().unwrap_or(0);
        count as f64 / self.total_count as f64
    }

    /// Chooses the next word of `text` given the word before it.
    ///
    /// The two-word conditional score is tried first, then the two-word unconditional score,
    /// then the single-word unconditional score. The last one prefers longer words on ties.
    /// The result is never empty unless `text` is.
    pub fn best_field<'a>(&self, previous: &[u8], text: &'a [u8]) -> &'a [u8] {
        let max_len = self.max_word_len.min(text.len());

        let mut best_cond = (0.0, 0);
        let mut best_uncond = (0.0, 0);
        for len1 in 1..=max_len {
            let (w1, rest) = text.split_at(len1);
            let cond1 = self.cond_prob(previous, w1);
            let prob1 = self.prob(w1);
            let max_len2 = self.max_word_len.min(rest.len());
            // The empty continuation stands for the end of the text.
            let candidates = (1..=max_len2)
                .map(|len2| &rest[..len2])
                .chain(rest.is_empty().then_some(&rest[..0]));
            for w2 in candidates {
                if cond1 > 0.0 {
                    let score = cond1 * self.cond_prob(w1, w2);
                    if score > best_cond.0 {
                        best_cond = (score, len1);
                    }
                }
                if prob1 > 0.0 {
                    let score = prob1 * self.prob(w2);
                    if score > best_uncond.0 {
                        best_uncond = (score, len1);
                    }
                }
            }
        }
        if best_cond.0 > 0.0 {
            return &text[..best_cond.1];
        }
        if best_uncond.0 > 0.0 {
            return &text[..best_uncond.1];
        }

        let mut best = (0.0, max_len);
        for len in 1..=max_len {
            let score = self.prob(&text[..len]);
            if score >= best.0 {
                best = (score, len);
            }
        }
        &text[..best.1]
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut table: Vec<_> = self
            .table
            .iter()
            .map(|(prev, next)| (prev.clone(), sorted_entries(next)))
            .collect();
        table.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        utils::encode(&MarkovRecord {
            max_word_len: u32::try_from(self.max_word_len)
                .map_err(|_| WordspliceError::invalid_argument("max_word_len", "too large"))?,
            raw_counts: sorted_entries(&self.raw_counts),
            table,
        })
    }

    /// Reads a model written by [`Markov::to_bytes()`]. Totals are recomputed from the tables.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let record: MarkovRecord = utils::decode(data)?;
        if record.max_word_len == 0 {
            return Err(WordspliceError::invalid_model("max_word_len is zero"));
        }
        let raw_counts: HashMap<_, _> = record.raw_counts.into_iter().collect();
        let total_count = checked_total(&raw_counts)?;
        let mut table = HashMap::with_capacity(record.table.len());
        let mut table_counts = HashMap::with_capacity(record.table.len());
        for (prev, next) in record.table {
            let next: HashMap<_, _> = next.into_iter().collect();
            table_counts.insert(prev.clone(), checked_total(&next)?);
            table.insert(prev, next);
        }
        Ok(Self {
            raw_counts,
            table,
            table_counts,
            total_count,
            max_word_len: record.max_word_len as usize,
        })
    }
}

impl Segmenter for Markov {
    fn split_run<'a>(&self, run: &'a [u8]) -> Vec<&'a [u8]> {
        let mut result = vec![];
        let mut previous: &[u8] = b"";
        let mut rest = run;
        while !rest.is_empty() {
            let word = self.best_field(previous, rest);
            rest = &rest[word.len()..];
            result.push(word);
            previous = word;
        }
        result
    }
}
