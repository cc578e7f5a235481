//! Sampled online LDA.
//!
//! Topics are learned from a stream of randomly drawn documents: each draw
//! is Gibbs-sampled against a sparse type-topic table, and every minibatch
//! of samples is folded back into the table with a decaying learning rate.
//! See Mimno, Hoffman and Blei, "Sparse stochastic inference for latent
//! Dirichlet allocation" (ICML 2012).

extern crate flate2;
extern crate indexmap;
extern crate log;
extern crate ndarray;
extern crate rand;

mod checkpoint;
mod corpus;
mod error;
pub mod math;
mod model;
mod sampler;
mod sparse;
mod trainer;

pub use checkpoint::{CheckpointSink, GzipCheckpointWriter, NoCheckpoints};
pub use corpus::{Corpus, Vocabulary};
pub use error::{LdaError, Result};
pub use model::{Model, TrainingStats};
pub use sampler::{DocumentSampler, GradientQueue, SweepStats};
pub use sparse::SparseTopicTable;
pub use trainer::{
    SampledOnlineLDA, SampledOnlineLDABuilder, TrainerConfig, PRUNE_CUTOFF, RESCALE_THRESHOLD,
};
