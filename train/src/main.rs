use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use wordsplice::{
    Corpus, ForestConfig, MarkovConfig, ModelType, StumpsConfig, TaggerConfig, TrainConfig,
};

static STOP: AtomicBool = AtomicBool::new(false);

#[derive(Parser, Debug)]
#[command(about = "A program to train word boundary models.")]
struct Args {
    /// The model type: {dict, markov, stumps, forest, rnn}
    #[arg(long)]
    model_type: ModelType,

    /// A directory of training documents, one file per document
    #[arg(long)]
    corpus: PathBuf,

    /// The file to write the trained model to
    #[arg(long)]
    model: PathBuf,

    /// The random seed. Omit it to seed from the OS.
    #[arg(long)]
    seed: Option<u64>,

    /// Stops training after this many seconds, keeping the last completed step, tree or epoch
    #[arg(long)]
    time_limit: Option<u64>,

    /// The longest word the Markov model considers
    #[arg(long, default_value = "20")]
    max_word_len: usize,

    /// The maximum number of boosting samples
    #[arg(long, default_value = "50000")]
    stumps_samples: usize,

    /// The number of boosting steps
    #[arg(long, default_value = "20")]
    stumps_steps: usize,

    /// How many bytes before the focal byte a stump may look at
    #[arg(long, default_value = "15")]
    stumps_backtrack: usize,

    /// How many bytes after the focal byte a stump may look at
    #[arg(long, default_value = "5")]
    stumps_lookahead: usize,

    /// The number of trees in the forest
    #[arg(long, default_value = "100")]
    forest_trees: usize,

    /// The number of attributes drawn for every split
    #[arg(long, default_value = "10")]
    forest_features: usize,

    /// The number of samples each tree is trained on
    #[arg(long, default_value = "1000")]
    forest_samples: usize,

    /// How many bytes before the focal byte a split may look at
    #[arg(long, default_value = "20")]
    forest_backtrack: usize,

    /// How many bytes after the focal byte a split may look at
    #[arg(long, default_value = "20")]
    forest_lookahead: usize,

    /// A boundary is predicted when p(boundary) >= p(inside) * threshold
    #[arg(long, default_value = "0.5")]
    forest_threshold: f64,

    /// The maximum tree depth (0 means unlimited)
    #[arg(long, default_value = "0")]
    forest_max_depth: usize,

    /// The length of the tagger's training windows
    #[arg(long, default_value = "128")]
    seq_len: usize,

    /// The state size of each recurrent direction
    #[arg(long, default_value = "128")]
    state_size: usize,

    /// The width of the tagger's output hidden layer
    #[arg(long, default_value = "128")]
    hidden_size: usize,

    /// The Adam step size
    #[arg(long, default_value = "0.001")]
    step_size: f64,

    /// The mini-batch size
    #[arg(long, default_value = "20")]
    batch_size: usize,

    /// The maximum number of training windows
    #[arg(long, default_value = "8192")]
    tagger_samples: usize,

    /// The number of training epochs
    #[arg(long, default_value = "10")]
    epochs: usize,

    /// The number of workers for zstd (0 means multithreaded will be disabled)
    #[arg(long, default_value = "0")]
    zstd_workers: u32,
}

impl Args {
    fn train_config(&self) -> TrainConfig {
        TrainConfig {
            markov: MarkovConfig {
                max_word_len: self.max_word_len,
                ..MarkovConfig::default()
            },
            stumps: StumpsConfig {
                max_samples: self.stumps_samples,
                steps: self.stumps_steps,
                backtrack: self.stumps_backtrack,
                lookahead: self.stumps_lookahead,
                seed: self.seed,
            },
            forest: ForestConfig {
                n_trees: self.forest_trees,
                features_per_split: self.forest_features,
                samples_per_tree: self.forest_samples,
                backtrack: self.forest_backtrack,
                lookahead: self.forest_lookahead,
                threshold: self.forest_threshold,
                max_depth: self.forest_max_depth,
                seed: self.seed,
                ..ForestConfig::default()
            },
            tagger: TaggerConfig {
                seq_len: self.seq_len,
                state_size: self.state_size,
                hidden_size: self.hidden_size,
                step_size: self.step_size,
                batch_size: self.batch_size,
                max_samples: self.tagger_samples,
                epochs: self.epochs,
                seed: self.seed,
            },
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let config = args.train_config();

    log::info!("Loading corpus {:?} ...", args.corpus);
    let corpus = Corpus::from_dir(&args.corpus)?;

    if let Some(secs) = args.time_limit {
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(secs));
            log::warn!("Time limit reached, finishing the current unit");
            STOP.store(true, Ordering::Relaxed);
        });
    }

    log::info!("Start training...");
    let start = Instant::now();
    let model = wordsplice::train(args.model_type, &corpus, &config, &STOP)?;
    log::info!(
        "Finish training in {:.1} [sec]",
        start.elapsed().as_secs_f64()
    );

    let mut f = zstd::Encoder::new(File::create(&args.model)?, 19)?;
    f.multithread(args.zstd_workers)?;
    model.write(&mut f)?;
    f.finish()?;
    log::info!("Wrote {:?}", args.model);

    Ok(())
}
