use std::fs::File;
use std::io::{prelude::*, stdin};
use std::path::PathBuf;

use clap::Parser;
use wordsplice::{BoundaryType, Model, Run, Segmenter};

#[derive(Parser, Debug)]
#[command(about = "A program to evaluate word boundary models on a spaced reference corpus.")]
struct Args {
    /// The model file to use when analyzing text
    #[arg(long)]
    model: PathBuf,
}

/// Boundary flags of the gaps between bytes. The end of a run is always a boundary and is left
/// out.
fn gaps(run: &Run) -> &[BoundaryType] {
    let b = run.boundaries();
    &b[..b.len().saturating_sub(1)]
}

fn f1(precision: f64, recall: f64) -> f64 {
    2. * precision * recall / (precision + recall)
}

#[derive(Debug, Default, PartialEq)]
struct BoundaryCounts {
    tp: usize,
    tn: usize,
    fp: usize,
    fn_: usize,
}

impl BoundaryCounts {
    fn add(&mut self, reference: &[BoundaryType], hypothesis: &[BoundaryType]) {
        for (&r, &h) in reference.iter().zip(hypothesis) {
            let counter = match (r == BoundaryType::WordBoundary, h == BoundaryType::WordBoundary) {
                (true, true) => &mut self.tp,
                (false, false) => &mut self.tn,
                (false, true) => &mut self.fp,
                (true, false) => &mut self.fn_,
            };
            *counter += 1;
        }
    }

    fn precision(&self) -> f64 {
        self.tp as f64 / (self.tp + self.fp) as f64
    }

    fn recall(&self) -> f64 {
        self.tp as f64 / (self.tp + self.fn_) as f64
    }
}

/// Word-level counts. A system word is correct when both of its ends match the reference.
///
/// Reference:
/// Masaaki Nagata. 1994. A stochastic Japanese morphological analyzer using a forward-DP
/// backward-A* n-best search algorithm. In COLING 1994 Volume 1: The 15th International
/// Conference on Computational Linguistics.
#[derive(Debug, Default, PartialEq)]
struct WordCounts {
    n_sys: usize,
    n_ref: usize,
    n_cor: usize,
}

impl WordCounts {
    fn add(&mut self, reference: &[BoundaryType], hypothesis: &[BoundaryType]) {
        // Both sides start with a shared boundary at the beginning of the line.
        let mut aligned = true;
        for (&r, &h) in reference.iter().zip(hypothesis) {
            let r = r == BoundaryType::WordBoundary;
            let h = h == BoundaryType::WordBoundary;
            self.n_ref += usize::from(r);
            self.n_sys += usize::from(h);
            if r && h {
                self.n_cor += usize::from(aligned);
                aligned = true;
            } else if r || h {
                aligned = false;
            }
        }
        // The final word ends at the shared end of the line.
        self.n_ref += 1;
        self.n_sys += 1;
        self.n_cor += usize::from(aligned);
    }

    fn precision(&self) -> f64 {
        self.n_cor as f64 / self.n_sys as f64
    }

    fn recall(&self) -> f64 {
        self.n_cor as f64 / self.n_ref as f64
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    log::info!("Loading model file...");
    let mut f = zstd::Decoder::new(File::open(args.model)?)?;
    let model = Model::read(&mut f)?;

    log::info!("Start segmentation");
    let mut boundaries = BoundaryCounts::default();
    let mut words = WordCounts::default();
    let mut n_lines = 0;
    for line in stdin().lock().lines() {
        let reference = Run::from_document(line?);
        if reference.is_empty() {
            continue;
        }
        let hypothesis = Run::from_document(model.split_run(reference.as_bytes()).join(&b' '));
        boundaries.add(gaps(&reference), gaps(&hypothesis));
        words.add(gaps(&reference), gaps(&hypothesis));
        n_lines += 1;
    }
    log::info!("# of lines: {n_lines}");

    let (p, r) = (boundaries.precision(), boundaries.recall());
    println!("Boundary precision: {p}");
    println!("Boundary recall: {r}");
    println!("Boundary F1: {}", f1(p, r));
    println!(
        "TP: {}, TN: {}, FP: {}, FN: {}",
        boundaries.tp, boundaries.tn, boundaries.fp, boundaries.fn_
    );
    let (p, r) = (words.precision(), words.recall());
    println!("Word precision: {p}");
    println!("Word recall: {r}");
    println!("Word F1: {}", f1(p, r));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_gaps(text: &str) -> Vec<BoundaryType> {
        gaps(&Run::from_document(text)).to_vec()
    }

    #[test]
    fn test_boundary_counts() {
        let mut counts = BoundaryCounts::default();
        counts.add(&run_gaps("ab cd"), &run_gaps("a bcd"));
        assert_eq!(
            BoundaryCounts {
                tp: 0,
                tn: 1,
                fp: 1,
                fn_: 1,
            },
            counts
        );
    }

    #[test]
    fn test_word_counts() {
        // Reference: [ab, cd, e]; system: [ab, c, de]. Only "ab" matches.
        let mut counts = WordCounts::default();
        counts.add(&run_gaps("ab cd e"), &run_gaps("ab c de"));
        assert_eq!(
            WordCounts {
                n_sys: 3,
                n_ref: 3,
                n_cor: 1,
            },
            counts
        );
    }

    #[test]
    fn test_word_counts_identical() {
        let mut counts = WordCounts::default();
        counts.add(&run_gaps("the cat sat"), &run_gaps("the cat sat"));
        assert_eq!(1.0, counts.precision());
        assert_eq!(1.0, counts.recall());
    }
}
