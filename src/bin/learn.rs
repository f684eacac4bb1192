//! `learn` — trains a committee of sparse decision trees from a labeled
//! dataset and writes the resulting ensemble to a model file.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rand::{Rng, SeedableRng};
use sparsetree_ensembles::committee::{self, CommitteeConfig, CommitteeKind};
use sparsetree_ensembles::{codec, dataset, ForestError};

/// Train a bagging, boosting, or random-forest committee of decision
/// trees over a sparse labeled dataset.
#[derive(Parser, Debug)]
#[command(name = "learn", version, about)]
struct Args {
    /// Committee: 1 = bagging, 2 = boosting, 3 = random forest.
    #[arg(short = 'c', default_value_t = 2)]
    committee: i64,

    /// Maximum tree depth.
    #[arg(short = 'd', default_value_t = 1000)]
    maxdepth: usize,

    /// Report out-of-bag error after every tree (bagging and random
    /// forest only; ignored for boosting).
    #[arg(short = 'e')]
    report_oob: bool,

    /// Relative weight of negative examples (w⁻), to correct for class
    /// imbalance.
    #[arg(short = 'n', default_value_t = 1.0)]
    neg_weight: f32,

    /// Random-forest features-per-node factor: `fpn = floor(factor *
    /// sqrt(nfeat))`. Bagging and boosting always use every feature.
    #[arg(short = 'p', default_value_t = 1.0)]
    fpn_factor: f32,

    /// Number of trees to grow.
    #[arg(short = 't', default_value_t = 100)]
    ntrees: usize,

    /// Seed for the committee's random number generator. Unset draws a
    /// fresh seed from the OS so that runs are reproducible when wanted
    /// but not forced to be.
    #[arg(long)]
    seed: Option<u64>,

    /// Path to the training data, in `target feat:val ...` sparse format.
    data_path: PathBuf,

    /// Path to write the trained model to.
    model_path: PathBuf,
}

fn run(args: Args) -> Result<()> {
    let kind = CommitteeKind::from_code(args.committee)?;
    let seed = args.seed.unwrap_or_else(|| rand::thread_rng().gen());
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    log::info!("seeding committee rng with {seed}");

    let data_file = File::open(&args.data_path).map_err(|e| ForestError::io(&args.data_path, e))?;
    let mut dataset = dataset::parse::load(BufReader::new(data_file), &mut rng)
        .with_context(|| format!("loading {}", args.data_path.display()))?;

    let config = CommitteeConfig {
        kind,
        ntrees: args.ntrees,
        maxdepth: args.maxdepth,
        fpn_factor: args.fpn_factor,
        neg_weight: args.neg_weight,
        report_oob: args.report_oob && kind != CommitteeKind::Boosting,
    };

    log::info!(
        "growing {} trees ({}, maxdepth {}, fpn_factor {})",
        config.ntrees,
        kind.name(),
        config.maxdepth,
        config.fpn_factor
    );

    if config.report_oob {
        println!("tree   err%   negerr%  poserr%");
    }
    let ensemble = committee::train(&mut dataset, &config, &mut rng, |report| {
        println!(
            "{:4}  {:6.2}%  {:6.2}%  {:6.2}%",
            report.tree_index, report.error, report.neg_error, report.pos_error
        );
    });

    let model_file = File::create(&args.model_path).map_err(|e| ForestError::io(&args.model_path, e))?;
    codec::write_ascii(BufWriter::new(model_file), &ensemble).with_context(|| format!("writing {}", args.model_path.display()))?;

    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(err) = run(args) {
        eprintln!("learn: {err:#}");
        std::process::exit(1);
    }
}
