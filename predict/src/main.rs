use std::fs::File;
use std::io::{prelude::*, stdin, stdout, BufWriter};
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use wordsplice::{Model, Segmenter};

#[derive(Parser, Debug)]
#[command(about = "A program to insert spaces between the words of unspaced text.")]
struct Args {
    /// The model file to use when analyzing text
    #[arg(long)]
    model: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    log::info!("Loading model file...");
    let mut f = zstd::Decoder::new(File::open(args.model)?)?;
    let model = Model::read(&mut f)?;
    log::info!("Loaded {} model", model.model_type());

    log::info!("Start segmentation");
    let mut n_bytes = 0;
    let start = Instant::now();
    let mut out = BufWriter::new(stdout().lock());
    for line in stdin().lock().lines() {
        let line = line?;
        let fields = model.fields(line.as_bytes());
        n_bytes += line.len();
        out.write_all(&fields.join(&b' '))?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    let duration = start.elapsed();
    log::info!("Elapsed: {} [sec]", duration.as_secs_f64());
    log::info!("Speed: {} [bytes/sec]", n_bytes as f64 / duration.as_secs_f64());

    Ok(())
}
