use std::sync::atomic::{AtomicBool, Ordering};

use bincode::{Decode, Encode};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

#[cfg(feature = "multithreading")]
use rayon::prelude::*;

use crate::corpus::Corpus;
use crate::errors::{Result, WordspliceError};
use crate::model::Segmenter;
use crate::run::Run;
use crate::utils::{self, byte_at, cut_run};

/// Random forest parameters.
#[derive(Debug, Clone)]
pub struct ForestConfig {
    pub n_trees: usize,

    /// The number of attributes drawn at random for every split.
    pub features_per_split: usize,

    /// The number of samples each tree is trained on.
    pub samples_per_tree: usize,

    /// How many bytes before the focal position an attribute may look at.
    pub backtrack: usize,

    /// How many bytes after the focal position an attribute may look at.
    pub lookahead: usize,

    /// A boundary is predicted when `p(boundary) >= p(inside) * threshold`.
    pub threshold: f64,

    /// The maximum depth of a tree. 0 means unlimited.
    pub max_depth: usize,

    /// Nodes with fewer samples than this become leaves.
    pub min_samples_split: usize,

    pub seed: Option<u64>,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: 100,
            features_per_split: 10,
            samples_per_tree: 1000,
            backtrack: 20,
            lookahead: 20,
            threshold: 0.5,
            max_depth: 0,
            min_samples_split: 2,
            seed: None,
        }
    }
}

impl ForestConfig {
    pub fn validate(&self) -> Result<()> {
        if self.features_per_split == 0 {
            return Err(WordspliceError::invalid_argument(
                "features_per_split",
                "must be at least 1",
            ));
        }
        if self.samples_per_tree == 0 {
            return Err(WordspliceError::invalid_argument(
                "samples_per_tree",
                "must be at least 1",
            ));
        }
        if self.backtrack > i16::MAX as usize || self.lookahead > i16::MAX as usize {
            return Err(WordspliceError::invalid_argument(
                "backtrack/lookahead",
                "window is too wide",
            ));
        }
        check_threshold(self.threshold)
    }

    fn attributes(&self) -> Vec<i16> {
        (-(self.backtrack as i16)..=self.lookahead as i16).collect()
    }
}

fn check_threshold(threshold: f64) -> Result<()> {
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(WordspliceError::invalid_argument(
            "threshold",
            format!("must be a non-negative number, got {threshold}"),
        ));
    }
    Ok(())
}

/// Binary entropy of a node holding `n_true` positives out of `n`.
fn entropy(n_true: usize, n: usize) -> f64 {
    if n_true == 0 || n_true == n {
        return 0.0;
    }
    let p = n_true as f64 / n as f64;
    -p * p.log2() - (1.0 - p) * (1.0 - p).log2()
}

#[derive(Debug, Clone, Copy, PartialEq, Encode, Decode)]
pub enum TreeNode {
    Leaf {
        /// Fraction of the leaf's training samples that were word boundaries.
        p_true: f64,
    },
    Split {
        offset: i16,
        value: u8,
        matched: u32,
        unmatched: u32,
    },
}

/// Decision tree stored as a node arena. The root is node 0 and children always come after
/// their parent.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct DecisionTree {
    nodes: Vec<TreeNode>,
}

impl DecisionTree {
    /// Estimates the probability that a word ends at `pos`.
    pub fn p_true(&self, text: &[u8], pos: usize) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes[idx] {
                TreeNode::Leaf { p_true } => return p_true,
                TreeNode::Split {
                    offset,
                    value,
                    matched,
                    unmatched,
                } => {
                    idx = if byte_at(text, pos, isize::from(offset)) == value {
                        matched as usize
                    } else {
                        unmatched as usize
                    };
                }
            }
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(WordspliceError::invalid_model("empty decision tree"));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            match *node {
                TreeNode::Leaf { p_true } => {
                    if !(0.0..=1.0).contains(&p_true) {
                        return Err(WordspliceError::invalid_model(format!(
                            "leaf probability out of range: {p_true}"
                        )));
                    }
                }
                TreeNode::Split {
                    matched, unmatched, ..
                } => {
                    for child in [matched as usize, unmatched as usize] {
                        if child <= i || child >= self.nodes.len() {
                            return Err(WordspliceError::invalid_model(format!(
                                "node {i} has an invalid child {child}"
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// ID3-style tree construction over relative byte attributes.
struct TreeBuilder<'a> {
    runs: &'a [Run],
    attributes: &'a [i16],
    config: &'a ForestConfig,
    rng: SmallRng,
    nodes: Vec<TreeNode>,
}

impl<'a> TreeBuilder<'a> {
    fn label(&self, (r, pos): (usize, usize)) -> bool {
        self.runs[r].is_word_end(pos)
    }

    fn attr(&self, (r, pos): (usize, usize), offset: i16) -> u8 {
        self.runs[r].byte_at(pos, isize::from(offset))
    }

    /// Finds the equality test with the highest information gain among a random subset of
    /// attributes.
    fn best_split(&mut self, samples: &[(usize, usize)], n_true: usize) -> Option<(i16, u8)> {
        let n = samples.len();
        let parent = entropy(n_true, n);
        let mut candidates = self.attributes.to_vec();
        utils::subsample(
            &mut candidates,
            self.config.features_per_split,
            &mut self.rng,
        );

        let mut best: Option<(f64, i16, u8)> = None;
        for offset in candidates {
            let mut counts = [[0usize; 2]; 256];
            for &s in samples {
                counts[usize::from(self.attr(s, offset))][usize::from(self.label(s))] += 1;
            }
            for (value, &[m_false, m_true]) in counts.iter().enumerate() {
                let m = m_false + m_true;
                if m == 0 || m == n {
                    continue;
                }
                let children = m as f64 / n as f64 * entropy(m_true, m)
                    + (n - m) as f64 / n as f64 * entropy(n_true - m_true, n - m);
                let gain = parent - children;
                if best.map_or(true, |(g, _, _)| gain > g) {
                    best = Some((gain, offset, value as u8));
                }
            }
        }
        best.filter(|&(gain, _, _)| gain > 1e-12)
            .map(|(_, offset, value)| (offset, value))
    }

    /// Grows the tree depth-first from a work stack, so the tree depth is not limited by the
    /// call stack. Nodes are laid out in preorder with the matched branch first.
    fn build(&mut self, samples: Vec<(usize, usize)>) {
        let mut stack = vec![(samples, 0, None)];
        while let Some((samples, depth, parent)) = stack.pop() {
            let idx = self.nodes.len() as u32;
            if let Some((parent, is_matched)) = parent {
                self.link(parent, is_matched, idx);
            }
            let n = samples.len();
            let n_true = samples.iter().filter(|&&s| self.label(s)).count();
            let p_true = if n == 0 { 0.0 } else { n_true as f64 / n as f64 };
            self.nodes.push(TreeNode::Leaf { p_true });

            let max_depth_reached = self.config.max_depth != 0 && depth >= self.config.max_depth;
            if n_true == 0 || n_true == n || n < self.config.min_samples_split || max_depth_reached
            {
                continue;
            }
            let Some((offset, value)) = self.best_split(&samples, n_true) else {
                continue;
            };
            let (matched, unmatched): (Vec<_>, Vec<_>) = samples
                .into_iter()
                .partition(|&s| self.attr(s, offset) == value);
            self.nodes[idx as usize] = TreeNode::Split {
                offset,
                value,
                matched: 0,
                unmatched: 0,
            };
            stack.push((unmatched, depth + 1, Some((idx, false))));
            stack.push((matched, depth + 1, Some((idx, true))));
        }
    }

    fn link(&mut self, parent: u32, is_matched: bool, child: u32) {
        if let TreeNode::Split {
            matched, unmatched, ..
        } = &mut self.nodes[parent as usize]
        {
            if is_matched {
                *matched = child;
            } else {
                *unmatched = child;
            }
        }
    }
}

fn build_tree(
    runs: &[Run],
    pool: &[(usize, usize)],
    attributes: &[i16],
    config: &ForestConfig,
    seed: u64,
) -> DecisionTree {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut samples = pool.to_vec();
    utils::subsample(&mut samples, config.samples_per_tree, &mut rng);
    let mut builder = TreeBuilder {
        runs,
        attributes,
        config,
        rng,
        nodes: vec![],
    };
    builder.build(samples);
    DecisionTree {
        nodes: builder.nodes,
    }
}

/// Ensemble of decision trees voting on every byte position.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct Forest {
    trees: Vec<DecisionTree>,
    threshold: f64,
}

impl Forest {
    /// Trains `config.n_trees` trees, each on its own random subsample of all byte positions.
    ///
    /// Raising `stop` keeps the trees built so far.
    ///
    /// # Errors
    ///
    /// If invalid parameters are given, an error variant will be returned.
    pub fn train(corpus: &Corpus, config: &ForestConfig, stop: &AtomicBool) -> Result<Self> {
        config.validate()?;
        let runs = corpus.runs();
        let pool: Vec<(usize, usize)> = runs
            .iter()
            .enumerate()
            .flat_map(|(r, run)| (0..run.len()).map(move |pos| (r, pos)))
            .collect();
        log::info!("# of samples: {}", pool.len());
        let attributes = config.attributes();

        // Seeds are drawn up front so that the result does not depend on scheduling.
        let mut rng = utils::seeded_rng(config.seed);
        let seeds: Vec<u64> = (0..config.n_trees).map(|_| rng.gen()).collect();

        let build = |(i, &seed): (usize, &u64)| {
            if stop.load(Ordering::Relaxed) {
                return None;
            }
            let tree = build_tree(&runs, &pool, &attributes, config, seed);
            log::info!("Tree {i}: {} nodes", tree.n_nodes());
            Some(tree)
        };

        #[cfg(feature = "multithreading")]
        let trees: Vec<DecisionTree> = seeds
            .par_iter()
            .enumerate()
            .filter_map(build)
            .collect();
        #[cfg(not(feature = "multithreading"))]
        let trees: Vec<DecisionTree> = seeds.iter().enumerate().map_while(build).collect();

        if trees.len() < config.n_trees {
            log::warn!("Forest stopped after {} trees", trees.len());
        }
        Ok(Self {
            trees,
            threshold: config.threshold,
        })
    }

    /// Replaces the decision threshold.
    ///
    /// # Errors
    ///
    /// The threshold must be a finite non-negative number.
    pub fn with_threshold(mut self, threshold: f64) -> Result<Self> {
        check_threshold(threshold)?;
        self.threshold = threshold;
        Ok(self)
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    /// Averages the trees' class probabilities at `pos`, returning `(p_true, p_false)`.
    pub fn probs(&self, text: &[u8], pos: usize) -> (f64, f64) {
        if self.trees.is_empty() {
            return (0.0, 1.0);
        }
        let sum: f64 = self.trees.iter().map(|t| t.p_true(text, pos)).sum();
        let p_true = sum / self.trees.len() as f64;
        (p_true, 1.0 - p_true)
    }

    pub fn is_boundary(&self, text: &[u8], pos: usize) -> bool {
        let (p_true, p_false) = self.probs(text, pos);
        p_true >= p_false * self.threshold
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        utils::encode(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let model: Self = utils::decode(data)?;
        check_threshold(model.threshold)
            .map_err(|_| WordspliceError::invalid_model("invalid threshold"))?;
        for tree in &model.trees {
            tree.validate()?;
        }
        Ok(model)
    }
}

impl Segmenter for Forest {
    fn split_run<'a>(&self, run: &'a [u8]) -> Vec<&'a [u8]> {
        cut_run(run, |i| self.is_boundary(run, i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::run::BoundaryType;

    fn corpus() -> Corpus {
        Corpus::from_documents([
            "the cat sat on the mat",
            "a cat and a dog sat on a log",
            "the dog ate the cat food",
            "on the log sat the dog",
        ])
    }

    fn config() -> ForestConfig {
        ForestConfig {
            n_trees: 10,
            features_per_split: 5,
            samples_per_tree: 60,
            backtrack: 4,
            lookahead: 2,
            seed: Some(7),
            ..ForestConfig::default()
        }
    }

    #[test]
    fn test_entropy() {
        assert_eq!(0.0, entropy(0, 4));
        assert_eq!(0.0, entropy(4, 4));
        assert!((entropy(2, 4) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_decision_tree_p_true() {
        let tree = DecisionTree {
            nodes: vec![
                TreeNode::Split {
                    offset: 0,
                    value: b't',
                    matched: 1,
                    unmatched: 2,
                },
                TreeNode::Leaf { p_true: 0.9 },
                TreeNode::Leaf { p_true: 0.1 },
            ],
        };
        assert!(tree.validate().is_ok());
        assert_eq!(0.9, tree.p_true(b"cat", 2));
        assert_eq!(0.1, tree.p_true(b"cat", 1));
    }

    #[test]
    fn test_decision_tree_validate_cycle() {
        let tree = DecisionTree {
            nodes: vec![
                TreeNode::Split {
                    offset: 0,
                    value: b't',
                    matched: 0,
                    unmatched: 1,
                },
                TreeNode::Leaf { p_true: 0.5 },
            ],
        };
        assert!(tree.validate().is_err());
    }

    #[test]
    fn test_build_tree_separable() {
        // Every word ends with 't', and nothing else is a 't'.
        let runs = Corpus::from_documents(["cat sit mot but"]).runs();
        let pool: Vec<_> = (0..runs[0].len()).map(|pos| (0, pos)).collect();
        let cfg = ForestConfig {
            features_per_split: 1,
            backtrack: 0,
            lookahead: 0,
            ..config()
        };
        let tree = build_tree(&runs, &pool, &cfg.attributes(), &cfg, 3);
        assert_eq!(3, tree.n_nodes());
        assert_eq!(1.0, tree.p_true(b"cat", 2));
        assert_eq!(0.0, tree.p_true(b"cat", 0));
    }

    fn depth(tree: &DecisionTree, idx: usize) -> usize {
        match tree.nodes[idx] {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Split {
                matched, unmatched, ..
            } => 1 + depth(tree, matched as usize).max(depth(tree, unmatched as usize)),
        }
    }

    #[test]
    fn test_build_tree_deep_chain() {
        // Every byte value occurs once, so a split can only peel off a single sample.
        let text: Vec<u8> = (1..=200).collect();
        let boundaries = (0..200).map(|i| BoundaryType::from(i % 2 == 0)).collect();
        let runs = vec![Run {
            text: text.clone(),
            boundaries,
        }];
        let pool: Vec<_> = (0..200).map(|pos| (0, pos)).collect();
        let cfg = ForestConfig {
            features_per_split: 1,
            ..ForestConfig::default()
        };
        let tree = build_tree(&runs, &pool, &[0], &cfg, 7);
        assert!(tree.validate().is_ok());
        assert!(depth(&tree, 0) >= 100);
        for pos in 0..200 {
            let expected = if pos % 2 == 0 { 1.0 } else { 0.0 };
            assert_eq!(expected, tree.p_true(&text, pos));
        }
    }

    #[test]
    fn test_forest_train() {
        let stop = AtomicBool::new(false);
        let forest = Forest::train(&corpus(), &config(), &stop).unwrap();
        assert_eq!(10, forest.trees().len());
        for tree in forest.trees() {
            assert!(tree.validate().is_ok());
        }
        let (p_true, p_false) = forest.probs(b"thecat", 2);
        assert!((p_true + p_false - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_forest_stop() {
        let stop = AtomicBool::new(true);
        let forest = Forest::train(&corpus(), &config(), &stop).unwrap();
        assert!(forest.trees().is_empty());
        assert_eq!(vec![&b"thecat"[..]], forest.fields(b"thecat"));
    }

    #[test]
    fn test_forest_threshold_sensitivity() {
        let stop = AtomicBool::new(false);
        let forest = Forest::train(&corpus(), &config(), &stop).unwrap();
        let text = b"thedogsatonacatmat";
        let n_default = forest.clone().with_threshold(1.0).unwrap().fields(text).len();
        for threshold in [0.9, 0.5, 0.25, 0.0] {
            let n = forest
                .clone()
                .with_threshold(threshold)
                .unwrap()
                .fields(text)
                .len();
            assert!(n >= n_default, "{threshold}: {n} < {n_default}");
        }
        assert_eq!(
            text.len(),
            forest.with_threshold(0.0).unwrap().fields(text).len()
        );
    }

    #[test]
    fn test_forest_invalid_threshold() {
        let forest = Forest {
            trees: vec![],
            threshold: 1.0,
        };
        assert!(forest.clone().with_threshold(-1.0).is_err());
        assert!(forest.with_threshold(f64::NAN).is_err());
    }

    #[test]
    fn test_forest_deterministic() {
        let stop = AtomicBool::new(false);
        let a = Forest::train(&corpus(), &config(), &stop).unwrap();
        let b = Forest::train(&corpus(), &config(), &stop).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_forest_serialize() {
        let stop = AtomicBool::new(false);
        let forest = Forest::train(&corpus(), &config(), &stop).unwrap();
        let forest2 = Forest::from_bytes(&forest.to_bytes().unwrap()).unwrap();
        assert_eq!(forest, forest2);
        for text in ["thecatsat", "adogatealog", "x"] {
            assert_eq!(
                forest.fields(text.as_bytes()),
                forest2.fields(text.as_bytes())
            );
        }
    }
}
