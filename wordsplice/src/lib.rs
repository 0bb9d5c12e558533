#![cfg_attr(docsrs, feature(doc_cfg))]

//! # Wordsplice
//!
//! Wordsplice restores word boundaries in text whose spaces were removed.
//!
//! Five models share one inference contract, [`Segmenter`]: a longest-match [`Dictionary`], a
//! bigram [`Markov`] model, [`BoostedStumps`], a random [`Forest`] and a bidirectional recurrent
//! [`Tagger`]. Every model only inserts boundaries, so concatenating the words of a run always
//! gives back the run.
//!
//! ## Examples
//!
//! ```
//! use wordsplice::{Corpus, Dictionary, Segmenter};
//!
//! let corpus = Corpus::from_documents(["the cat sat on the mat"]);
//! let dict = Dictionary::train(&corpus);
//! assert_eq!(
//!     vec![&b"the"[..], b"cat", b"sat", b"on", b"the", b"mat"],
//!     dict.fields(b"thecatsatonthemat"),
//! );
//! ```
//!
//! Stored models carry their type, so they can be loaded without knowing it in advance:
//!
//! ```no_run
//! use std::fs::File;
//! use std::io::{prelude::*, stdin, BufReader};
//!
//! use wordsplice::Model;
//!
//! let mut f = BufReader::new(File::open("model.bin").unwrap());
//! let model = Model::read(&mut f).unwrap();
//!
//! for line in stdin().lock().lines() {
//!     println!("{}", model.fields_str(&line.unwrap()).join(" "));
//! }
//! ```
//!
//! With **crate feature** `multithreading`, the stump search, tree building and tagger gradients
//! run on a rayon thread pool. Results do not depend on the feature.

mod utils;

pub mod errors;

mod corpus;
mod dictionary;
mod forest;
mod markov;
mod model;
mod run;
mod stumps;
mod tagger;
mod trainer;

pub use corpus::Corpus;
pub use dictionary::{Dictionary, DICTIONARY_MAX_WORD_LEN};
pub use forest::{DecisionTree, Forest, ForestConfig};
pub use markov::{Markov, MarkovConfig};
pub use model::{Model, ModelType, Segmenter, MODEL_MAGIC};
pub use run::{BoundaryType, Run};
pub use stumps::{BoostedStumps, Stump, StumpTrainer, StumpsConfig, WeightedStump};
pub use tagger::{Gru, GruStep, Tagger, TaggerConfig, TaggerTrainer};
pub use trainer::{train, trainer_for, TrainConfig, TrainFn, TRAINERS};
pub use utils::split_fields;
