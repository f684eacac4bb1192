//! Ensembles of binary decision trees grown over sparse, weighted
//! example sets: bagging, confidence-rated boosting, and random forests
//! sharing one grower and one evaluator.
//!
//! ```no_run
//! use rand::SeedableRng;
//! use sparsetree_ensembles::{committee, dataset};
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(0);
//! let mut data = dataset::parse::load("1 1:1\n-1 2:1\n".as_bytes(), &mut rng)?;
//! let config = committee::CommitteeConfig {
//!     kind: committee::CommitteeKind::Bagging,
//!     ntrees: 10,
//!     maxdepth: 1000,
//!     fpn_factor: 1.0,
//!     neg_weight: 1.0,
//!     report_oob: false,
//! };
//! let ensemble = committee::train(&mut data, &config, &mut rng, |_report| {});
//! # Ok::<(), sparsetree_ensembles::ForestError>(())
//! ```

pub mod codec;
pub mod committee;
pub mod dataset;
pub mod error;
pub mod tree;

pub use committee::{CommitteeConfig, CommitteeKind, Ensemble, OobReport};
pub use dataset::Dataset;
pub use error::ForestError;
pub use tree::Tree;
