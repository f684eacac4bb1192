//! `classify` — scores examples from a test file against a trained
//! model and prints one score (and predicted label) per line.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use sparsetree_ensembles::dataset::parse::DenseExampleReader;
use sparsetree_ensembles::{codec, ForestError};

/// Score examples from a test file against a trained committee model.
#[derive(Parser, Debug)]
#[command(name = "classify", version, about)]
struct Args {
    /// Number of trees to use for prediction. `0` means use every tree
    /// grown; a value larger than the number grown is clamped.
    #[arg(short = 't', default_value_t = 0)]
    trees: usize,

    /// Path to the test data, in `target feat:val ...` sparse format
    /// (the target is accepted but ignored).
    data_path: PathBuf,

    /// Path to the trained model file.
    model_path: PathBuf,

    /// Path to write one `score` line per example to.
    predictions_path: PathBuf,
}

fn run(args: Args) -> Result<()> {
    let model_file = File::open(&args.model_path).map_err(|e| ForestError::io(&args.model_path, e))?;
    let ensemble = codec::read_ascii(BufReader::new(model_file)).with_context(|| format!("reading {}", args.model_path.display()))?;

    let data_file = File::open(&args.data_path).map_err(|e| ForestError::io(&args.data_path, e))?;
    let reader = DenseExampleReader::new(BufReader::new(data_file), ensemble.nfeat);

    let out_file = File::create(&args.predictions_path).map_err(|e| ForestError::io(&args.predictions_path, e))?;
    let mut out = BufWriter::new(out_file);

    let mut n = 0usize;
    for example in reader {
        let example = example.with_context(|| format!("reading {}", args.data_path.display()))?;
        let score = ensemble.classify_n(&example.values, args.trees);
        writeln!(out, "{score:.6}")?;
        n += 1;
    }
    log::info!("scored {n} examples with a {} model", ensemble.kind.name());

    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(err) = run(args) {
        eprintln!("classify: {err:#}");
        std::process::exit(1);
    }
}
