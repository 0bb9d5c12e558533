use std::sync::atomic::AtomicBool;

use crate::corpus::Corpus;
use crate::dictionary::Dictionary;
use crate::errors::{Result, WordspliceError};
use crate::forest::{Forest, ForestConfig};
use crate::markov::{Markov, MarkovConfig};
use crate::model::{Model, ModelType};
use crate::stumps::{BoostedStumps, StumpsConfig};
use crate::tagger::{Tagger, TaggerConfig};

/// Parameters of every trainer. Each trainer reads only its own section.
#[derive(Debug, Clone, Default)]
pub struct TrainConfig {
    pub markov: MarkovConfig,
    pub stumps: StumpsConfig,
    pub forest: ForestConfig,
    pub tagger: TaggerConfig,
}

/// Trains a model on a corpus. Stochastic trainers stop early when the flag is raised.
pub type TrainFn = fn(&Corpus, &TrainConfig, &AtomicBool) -> Result<Model>;

fn train_dictionary(corpus: &Corpus, _: &TrainConfig, _: &AtomicBool) -> Result<Model> {
    Ok(Dictionary::train(corpus).into())
}

fn train_markov(corpus: &Corpus, config: &TrainConfig, _: &AtomicBool) -> Result<Model> {
    Ok(Markov::train(corpus, &config.markov)?.into())
}

fn train_stumps(corpus: &Corpus, config: &TrainConfig, stop: &AtomicBool) -> Result<Model> {
    Ok(BoostedStumps::train(corpus, &config.stumps, stop)?.into())
}

fn train_forest(corpus: &Corpus, config: &TrainConfig, stop: &AtomicBool) -> Result<Model> {
    Ok(Forest::train(corpus, &config.forest, stop)?.into())
}

fn train_tagger(corpus: &Corpus, config: &TrainConfig, stop: &AtomicBool) -> Result<Model> {
    Ok(Tagger::train(corpus, &config.tagger, stop)?.into())
}

/// Registered trainers.
pub static TRAINERS: [(ModelType, TrainFn); 5] = [
    (ModelType::Dictionary, train_dictionary),
    (ModelType::Markov, train_markov),
    (ModelType::BoostedStumps, train_stumps),
    (ModelType::Forest, train_forest),
    (ModelType::Tagger, train_tagger),
];

/// Looks up the trainer of `model_type`.
///
/// # Errors
///
/// [`WordspliceError::UnknownModelType`] is returned when no trainer is registered.
pub fn trainer_for(model_type: ModelType) -> Result<TrainFn> {
    TRAINERS
        .iter()
        .find(|(t, _)| *t == model_type)
        .map(|&(_, f)| f)
        .ok_or_else(|| WordspliceError::UnknownModelType(model_type.to_string()))
}

/// Trains a model of the given type.
///
/// # Errors
///
/// Errors of the trainer are returned as is.
pub fn train(
    model_type: ModelType,
    corpus: &Corpus,
    config: &TrainConfig,
    stop: &AtomicBool,
) -> Result<Model> {
    log::info!("Training {model_type} model");
    let model = trainer_for(model_type)?(corpus, config, stop)?;
    debug_assert_eq!(model_type, model.model_type());
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::model::Segmenter;

    fn corpus() -> Corpus {
        Corpus::from_documents([
            "the cat sat on the mat",
            "a cat and a dog sat on a log",
            "the dog ate the cat food",
        ])
    }

    fn small_config() -> TrainConfig {
        TrainConfig {
            stumps: StumpsConfig {
                steps: 3,
                seed: Some(1),
                ..StumpsConfig::default()
            },
            forest: ForestConfig {
                n_trees: 3,
                seed: Some(1),
                ..ForestConfig::default()
            },
            tagger: TaggerConfig {
                seq_len: 8,
                state_size: 4,
                hidden_size: 4,
                epochs: 1,
                seed: Some(1),
                ..TaggerConfig::default()
            },
            ..TrainConfig::default()
        }
    }

    #[test]
    fn test_trainers_cover_all_types() {
        for t in ModelType::ALL {
            assert!(trainer_for(t).is_ok());
        }
        assert_eq!(ModelType::ALL.len(), TRAINERS.len());
    }

    #[test]
    fn test_train_all_types() {
        let stop = AtomicBool::new(false);
        for t in ModelType::ALL {
            let model = train(t, &corpus(), &small_config(), &stop).unwrap();
            assert_eq!(t, model.model_type());
            let fields = model.fields(b"thecatsat");
            assert_eq!(b"thecatsat".to_vec(), fields.concat());
        }
    }

    #[test]
    fn test_train_stopped() {
        let stop = AtomicBool::new(true);
        let model = train(ModelType::Forest, &corpus(), &small_config(), &stop).unwrap();
        match model {
            Model::Forest(forest) => assert!(forest.trees().is_empty()),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_train_invalid_config() {
        let mut config = small_config();
        config.markov.max_word_len = 0;
        let stop = AtomicBool::new(false);
        assert!(train(ModelType::Markov, &corpus(), &config, &stop).is_err());
    }
}
