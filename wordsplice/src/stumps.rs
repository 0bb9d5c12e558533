use std::sync::atomic::{AtomicBool, Ordering};

use bincode::{Decode, Encode};

#[cfg(feature = "multithreading")]
use rayon::prelude::*;

use crate::corpus::Corpus;
use crate::errors::{Result, WordspliceError};
use crate::model::Segmenter;
use crate::run::Run;
use crate::utils::{self, byte_at, cut_run};

// Keeps the line search finite when a stump separates every sample.
const LINE_SEARCH_SMOOTHING: f64 = 1e-10;

/// Boosting parameters.
#[derive(Debug, Clone)]
pub struct StumpsConfig {
    /// Samples beyond this count are dropped by uniform subsampling.
    pub max_samples: usize,

    /// The number of boosting steps.
    pub steps: usize,

    /// How many bytes before the focal position a stump may look at.
    pub backtrack: usize,

    /// How many bytes after the focal position a stump may look at.
    pub lookahead: usize,

    pub seed: Option<u64>,
}

impl Default for StumpsConfig {
    fn default() -> Self {
        Self {
            max_samples: 50_000,
            steps: 20,
            backtrack: 15,
            lookahead: 5,
            seed: None,
        }
    }
}

impl StumpsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_samples == 0 {
            return Err(WordspliceError::invalid_argument(
                "max_samples",
                "must be at least 1",
            ));
        }
        if self.backtrack > i16::MAX as usize || self.lookahead > i16::MAX as usize {
            return Err(WordspliceError::invalid_argument(
                "backtrack/lookahead",
                "window is too wide",
            ));
        }
        Ok(())
    }

    fn offsets(&self) -> impl Iterator<Item = isize> + Clone {
        -(self.backtrack as isize)..=self.lookahead as isize
    }
}

/// Weak classifier voting `+1` when the byte at `offset` from the focal position equals `value`.
#[derive(Debug, Clone, Copy, PartialEq, Encode, Decode)]
pub struct Stump {
    pub offset: i16,
    pub value: u8,
}

impl Stump {
    #[inline(always)]
    pub fn classify(&self, text: &[u8], pos: usize) -> f64 {
        if byte_at(text, pos, isize::from(self.offset)) == self.value {
            1.0
        } else {
            -1.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Encode, Decode)]
pub struct WeightedStump {
    pub stump: Stump,
    pub weight: f64,
}

/// Additive ensemble of stumps. A positive score marks a word boundary.
#[derive(Debug, Clone, Default, PartialEq, Encode, Decode)]
pub struct BoostedStumps {
    stumps: Vec<WeightedStump>,
}

impl BoostedStumps {
    /// Trains an ensemble with [`StumpTrainer`], stopping early when `stop` is raised.
    pub fn train(corpus: &Corpus, config: &StumpsConfig, stop: &AtomicBool) -> Result<Self> {
        let runs = corpus.runs();
        let mut trainer = StumpTrainer::new(&runs, config)?;
        for i in 0..config.steps {
            if stop.load(Ordering::Relaxed) {
                log::warn!("Boosting stopped after {i} steps");
                break;
            }
            let loss = trainer.step();
            log::info!("Step {i}: loss={loss}");
        }
        Ok(trainer.into_model())
    }

    pub fn stumps(&self) -> &[WeightedStump] {
        &self.stumps
    }

    /// Computes the ensemble score of the byte at `pos`.
    pub fn score(&self, text: &[u8], pos: usize) -> f64 {
        self.stumps
            .iter()
            .map(|s| s.weight * s.stump.classify(text, pos))
            .sum()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        utils::encode(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let model: Self = utils::decode(data)?;
        if model.stumps.iter().any(|s| !s.weight.is_finite()) {
            return Err(WordspliceError::invalid_model("non-finite stump weight"));
        }
        Ok(model)
    }
}

impl Segmenter for BoostedStumps {
    fn split_run<'a>(&self, run: &'a [u8]) -> Vec<&'a [u8]> {
        cut_run(run, |i| self.score(run, i) > 0.0)
    }
}

/// Gradient boosting on the exponential loss.
pub struct StumpTrainer {
    // Window bytes of every sample, `window_len` per sample.
    windows: Vec<u8>,
    window_len: usize,
    backtrack: usize,
    labels: Vec<f64>,
    outputs: Vec<f64>,
    stumps: Vec<WeightedStump>,
}

impl StumpTrainer {
    /// Builds one sample per byte of `runs`, subsampled to `config.max_samples`.
    ///
    /// # Errors
    ///
    /// If invalid parameters are given, an error variant will be returned.
    pub fn new(runs: &[Run], config: &StumpsConfig) -> Result<Self> {
        config.validate()?;
        let mut positions: Vec<(usize, usize)> = runs
            .iter()
            .enumerate()
            .flat_map(|(r, run)| (0..run.len()).map(move |pos| (r, pos)))
            .collect();
        let n_total = positions.len();
        let mut rng = utils::seeded_rng(config.seed);
        utils::subsample(&mut positions, config.max_samples, &mut rng);
        log::info!("# of samples: {} (of {n_total})", positions.len());

        let window_len = config.offsets().count();
        let mut windows = Vec::with_capacity(positions.len() * window_len);
        let mut labels = Vec::with_capacity(positions.len());
        for &(r, pos) in &positions {
            let run = &runs[r];
            windows.extend(config.offsets().map(|offset| run.byte_at(pos, offset)));
            labels.push(run.boundaries()[pos].sign());
        }
        Ok(Self {
            windows,
            window_len,
            backtrack: config.backtrack,
            outputs: vec![0.0; labels.len()],
            labels,
            stumps: vec![],
        })
    }

    pub fn n_samples(&self) -> usize {
        self.labels.len()
    }

    /// Exponential loss of the current ensemble over all samples.
    pub fn loss(&self) -> f64 {
        self.labels
            .iter()
            .zip(&self.outputs)
            .map(|(y, f)| (-y * f).exp())
            .sum()
    }

    /// Negative gradient of the loss with respect to each sample's output.
    fn sample_weights(&self) -> Vec<f64> {
        self.labels
            .iter()
            .zip(&self.outputs)
            .map(|(y, f)| y * (-y * f).exp())
            .collect()
    }

    /// Finds the stump with the largest absolute weighted correlation at one window column.
    fn best_in_column(&self, col: usize, weights: &[f64], total: f64) -> (f64, u8) {
        let mut sums = [0.0; 256];
        for (i, &w) in weights.iter().enumerate() {
            sums[usize::from(self.windows[i * self.window_len + col])] += w;
        }
        let mut best = (f64::NEG_INFINITY, 0);
        for (value, &sum) in sums.iter().enumerate() {
            // matches vote +1, the rest vote -1
            let dot = (2.0 * sum - total).abs();
            if dot > best.0 {
                best = (dot, value as u8);
            }
        }
        best
    }

    fn best_stump(&self, weights: &[f64]) -> (Stump, usize) {
        let total: f64 = weights.iter().sum();

        #[cfg(feature = "multithreading")]
        let columns: Vec<(f64, u8)> = (0..self.window_len)
            .into_par_iter()
            .map(|col| self.best_in_column(col, weights, total))
            .collect();
        #[cfg(not(feature = "multithreading"))]
        let columns: Vec<(f64, u8)> = (0..self.window_len)
            .map(|col| self.best_in_column(col, weights, total))
            .collect();

        let mut best = (f64::NEG_INFINITY, 0, 0);
        for (col, &(dot, value)) in columns.iter().enumerate() {
            if dot > best.0 {
                best = (dot, col, value);
            }
        }
        let (_, col, value) = best;
        let stump = Stump {
            offset: (col as isize - self.backtrack as isize) as i16,
            value,
        };
        (stump, col)
    }

    /// Adds one stump to the ensemble and returns the new loss.
    pub fn step(&mut self) -> f64 {
        if self.labels.is_empty() {
            return 0.0;
        }
        let weights = self.sample_weights();
        let (stump, col) = self.best_stump(&weights);

        let mut w_correct = 0.0;
        let mut w_wrong = 0.0;
        let mut votes = Vec::with_capacity(self.labels.len());
        for (i, (&y, &f)) in self.labels.iter().zip(&self.outputs).enumerate() {
            let vote = if self.windows[i * self.window_len + col] == stump.value {
                1.0
            } else {
                -1.0
            };
            let w = (-y * f).exp();
            if vote == y {
                w_correct += w;
            } else {
                w_wrong += w;
            }
            votes.push(vote);
        }
        let weight = 0.5
            * ((w_correct + LINE_SEARCH_SMOOTHING) / (w_wrong + LINE_SEARCH_SMOOTHING)).ln();
        for (f, vote) in self.outputs.iter_mut().zip(votes) {
            *f += weight * vote;
        }
        self.stumps.push(WeightedStump { stump, weight });
        log::debug!("Added stump {stump:?} with weight {weight}");
        self.loss()
    }

    pub fn into_model(self) -> BoostedStumps {
        BoostedStumps {
            stumps: self.stumps,
        }
    }
}
