use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use std::cmp;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::checkpoint::CheckpointSink;
use crate::corpus::Corpus;
use crate::error::{LdaError, Result};
use crate::math;
use crate::model::{Model, TrainingStats};
use crate::sampler::{DocumentSampler, GradientQueue};
use crate::sparse::SparseTopicTable;

/// Once `scale` falls below this, stored weights are folded into it.
pub const RESCALE_THRESHOLD: f64 = 0.01;
/// Entries lighter than this are dropped after a rescale.
pub const PRUNE_CUTOFF: f64 = 0.1;

// Upper bound on the gradient queue preallocation; it still grows on demand.
const MAX_QUEUE_CAPACITY: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TrainerConfig {
    // Number of topics
    pub num_topics: usize,
    // Dirichlet prior over document-topic distributions
    pub alpha: f64,
    // Dirichlet prior over topic-word distributions
    pub beta: f64,
    // Zero seeds from the clock
    pub random_seed: u64,
    // Gibbs sweeps per document visit
    pub num_samples: usize,
    // Sweeps excluded from the acceptance tallies
    pub sample_burn_in: usize,
    // Documents per gradient step
    pub batch_size: usize,
    // Learning rate is (offset + t)^-exponent
    pub learning_rate_offset: f64,
    // Should be in [0.5, 1.0] to guarantee asymptotic convergence.
    pub learning_rate_exponent: f64,
    // Held-out cross validation folds, zero uses all documents
    pub total_folds: usize,
    pub held_out_fold: usize,
    // Prefix of checkpoint names
    pub output_prefix: String,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            num_topics: 10,
            alpha: 0.1,
            beta: 0.1,
            random_seed: 1,
            num_samples: 5,
            sample_burn_in: 2,
            batch_size: 100,
            learning_rate_offset: 100.0,
            learning_rate_exponent: 0.6,
            total_folds: 0,
            held_out_fold: 0,
            output_prefix: "o-lda".to_owned(),
        }
    }
}

fn positive(name: &'static str, value: f64) -> Result<()> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(LdaError::invalid(name, value, "must be positive and finite"))
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_topics == 0 {
            return Err(LdaError::invalid("num_topics", self.num_topics, "must be at least 1"));
        }
        positive("alpha", self.alpha)?;
        positive("beta", self.beta)?;
        if self.num_samples == 0 {
            return Err(LdaError::invalid("num_samples", self.num_samples, "must be at least 1"));
        }
        if self.sample_burn_in >= self.num_samples {
            return Err(LdaError::invalid(
                "sample_burn_in",
                self.sample_burn_in,
                "must be smaller than num_samples",
            ));
        }
        if self.batch_size == 0 {
            return Err(LdaError::invalid("batch_size", self.batch_size, "must be at least 1"));
        }
        if !(self.learning_rate_offset > 1.0 && self.learning_rate_offset.is_finite()) {
            return Err(LdaError::invalid(
                "learning_rate_offset",
                self.learning_rate_offset,
                "must be greater than 1",
            ));
        }
        positive("learning_rate_exponent", self.learning_rate_exponent)?;
        if self.total_folds > 0 && self.held_out_fold >= self.total_folds {
            return Err(LdaError::invalid(
                "held_out_fold",
                self.held_out_fold,
                "must be smaller than total_folds",
            ));
        }

        if self.learning_rate_exponent < 0.5 || self.learning_rate_exponent > 1.0 {
            warn!(
                "learning rate exponent {} is outside [0.5, 1.0]; convergence is not guaranteed",
                self.learning_rate_exponent
            );
        }

        Ok(())
    }

    /// Whether document `doc` belongs to the held-out fold.
    pub fn is_held_out(&self, doc: usize) -> bool {
        self.total_folds > 0 && (17 * doc) % self.total_folds == self.held_out_fold
    }
}

pub struct SampledOnlineLDABuilder {
    config: TrainerConfig,
}

impl SampledOnlineLDABuilder {
    pub fn new(k: usize) -> Self {
        Self {
            config: TrainerConfig {
                num_topics: k,
                ..TrainerConfig::default()
            },
        }
    }

    pub fn alpha<'a>(&'a mut self, alpha: f64) -> &'a mut Self {
        self.config.alpha = alpha;
        self
    }

    pub fn beta<'a>(&'a mut self, beta: f64) -> &'a mut Self {
        self.config.beta = beta;
        self
    }

    pub fn random_seed<'a>(&'a mut self, seed: u64) -> &'a mut Self {
        self.config.random_seed = seed;
        self
    }

    pub fn sampling<'a>(&'a mut self, num_samples: usize, burn_in: usize) -> &'a mut Self {
        self.config.num_samples = num_samples;
        self.config.sample_burn_in = burn_in;
        self
    }

    pub fn batch_size<'a>(&'a mut self, batch_size: usize) -> &'a mut Self {
        self.config.batch_size = batch_size;
        self
    }

    pub fn learning_rate<'a>(&'a mut self, offset: f64, exponent: f64) -> &'a mut Self {
        self.config.learning_rate_offset = offset;
        self.config.learning_rate_exponent = exponent;
        self
    }

    pub fn held_out_fold<'a>(&'a mut self, fold: usize, total_folds: usize) -> &'a mut Self {
        self.config.held_out_fold = fold;
        self.config.total_folds = total_folds;
        self
    }

    pub fn output_prefix<'a>(&'a mut self, prefix: &str) -> &'a mut Self {
        self.config.output_prefix = prefix.to_owned();
        self
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn build(&mut self) -> Result<SampledOnlineLDA> {
        SampledOnlineLDA::new(self.config.clone())
    }
}

fn seeded_rng(seed: u64) -> StdRng {
    if seed != 0 {
        return StdRng::seed_from_u64(seed);
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    StdRng::seed_from_u64(nanos)
}

/// Streaming LDA trainer mixing per-document Gibbs sampling with
/// stochastic gradient steps on a sparse type-topic table.
pub struct SampledOnlineLDA {
    config: TrainerConfig,
    rng: StdRng,
}

impl SampledOnlineLDA {
    pub fn new(config: TrainerConfig) -> Result<Self> {
        config.validate()?;
        let rng = seeded_rng(config.random_seed);
        Ok(Self { config, rng })
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Processes `total_docs` randomly drawn documents and returns the model.
    ///
    /// Every `docs_between_checkpoints` documents (zero disables it) the
    /// effective weights are handed to `sink`; a failing sink does not stop
    /// training.
    pub fn train<S: CheckpointSink + ?Sized>(
        &mut self,
        corpus: &Corpus,
        total_docs: usize,
        docs_between_checkpoints: usize,
        sink: &mut S,
    ) -> Result<Model> {
        if self.config.total_folds > 0 && (0..corpus.len()).all(|d| self.config.is_held_out(d)) {
            return Err(LdaError::NoTrainingDocuments {
                total_folds: self.config.total_folds,
                held_out_fold: self.config.held_out_fold,
            });
        }

        info!(
            "Starting sampled online LDA: {} documents, {} types, {} topics, {} documents to process",
            corpus.len(),
            corpus.num_types(),
            self.config.num_topics,
            total_docs
        );

        let mut run = TrainingRun::new(&self.config, corpus, total_docs);
        let mut next_checkpoint = docs_between_checkpoints;

        while run.stats.docs_processed < total_docs {
            let batch = cmp::min(self.config.batch_size, total_docs - run.stats.docs_processed);
            for _ in 0..batch {
                let doc = run.draw_document(&mut self.rng);
                run.sample_document(doc, &mut self.rng);
            }
            run.apply_gradient(batch);

            if docs_between_checkpoints > 0 && run.stats.docs_processed >= next_checkpoint {
                run.checkpoint(&mut *sink);
                while next_checkpoint <= run.stats.docs_processed {
                    next_checkpoint += docs_between_checkpoints;
                }
            }
        }

        info!(
            "Finished training: {} documents in {} batches, {} rescales, acceptance rate {:.4}",
            run.stats.docs_processed,
            run.stats.batches,
            run.stats.rescales,
            run.stats.acceptance_rate()
        );

        Ok(run.into_model())
    }
}

/// Mutable state of one `train` call.
///
/// Every weight and total in `table` is stored unscaled: its effective value
/// is `stored * scale`. Any new mutation of `table` has to divide by `scale`
/// first.
pub(crate) struct TrainingRun<'a> {
    config: &'a TrainerConfig,
    corpus: &'a Corpus,
    table: SparseTopicTable,
    scale: f64,
    iteration: usize,
    sampler: DocumentSampler,
    queue: GradientQueue,
    stats: TrainingStats,
}

impl<'a> TrainingRun<'a> {
    pub(crate) fn new(config: &'a TrainerConfig, corpus: &'a Corpus, total_docs: usize) -> Self {
        let mean_doc_len = corpus.num_tokens() / corpus.len() + 1;
        let capacity = cmp::min(config.batch_size, total_docs)
            .saturating_mul(config.num_samples)
            .saturating_mul(mean_doc_len);
        let capacity = cmp::min(capacity, MAX_QUEUE_CAPACITY);

        Self {
            config,
            corpus,
            table: SparseTopicTable::new(corpus.num_types(), config.num_topics),
            scale: 1.0,
            iteration: 0,
            sampler: DocumentSampler::new(
                corpus.num_types(),
                config.num_topics,
                config.alpha,
                config.beta,
                config.num_samples,
                config.sample_burn_in,
            ),
            queue: GradientQueue::with_capacity(capacity),
            stats: TrainingStats::default(),
        }
    }

    /// Uniformly draws a document index outside the held-out fold.
    pub(crate) fn draw_document<R: Rng>(&self, rng: &mut R) -> usize {
        loop {
            let doc = rng.gen_range(0..self.corpus.len());
            if !self.config.is_held_out(doc) {
                return doc;
            }
        }
    }

    pub(crate) fn sample_document<R: Rng>(&mut self, doc: usize, rng: &mut R) {
        let tokens = self.corpus.document(doc);
        let sweep = self
            .sampler
            .sample(tokens, &self.table, self.scale, rng, Some(&mut self.queue));

        self.stats.docs_processed += 1;
        self.stats.total_samples += sweep.samples;
        self.stats.total_changes += sweep.changes;
    }

    /// Folds the queued samples of a `batch_docs`-document minibatch into the
    /// table and decays `scale`.
    pub(crate) fn apply_gradient(&mut self, batch_docs: usize) {
        let learning_rate = math::learning_rate(
            self.config.learning_rate_offset,
            self.iteration,
            self.config.learning_rate_exponent,
        );

        if !self.queue.is_empty() {
            let word_weight = learning_rate * self.corpus.len() as f64
                / (self.scale * self.config.num_samples as f64 * batch_docs as f64);
            for (word, topic) in self.queue.iter() {
                self.table.insert_or_accumulate(word, topic, word_weight);
            }
            self.queue.clear();
        }

        self.scale *= 1.0 - learning_rate;
        if self.scale < RESCALE_THRESHOLD {
            self.rescale_and_prune();
        }

        self.iteration += 1;
        self.stats.batches += 1;

        debug!(
            "batch {}: learning rate {:.6}, scale {:.6}, {} sparse entries, acceptance rate {:.4}",
            self.stats.batches,
            learning_rate,
            self.scale,
            self.table.num_entries(),
            self.stats.acceptance_rate()
        );
    }

    fn rescale_and_prune(&mut self) {
        self.table.rescale(self.scale);
        self.scale = 1.0;
        let removed = self.table.prune_below(PRUNE_CUTOFF);
        self.stats.rescales += 1;

        debug!(
            "rescaled weights, pruned {} entries below {}, {} remain",
            removed,
            PRUNE_CUTOFF,
            self.table.num_entries()
        );
    }

    pub(crate) fn checkpoint<S: CheckpointSink + ?Sized>(&mut self, sink: &mut S) {
        let name = format!(
            "{}.{}.wordtopics.gz",
            self.config.output_prefix, self.stats.docs_processed
        );
        let weights = self.table.to_dense(self.scale);

        match sink.write_checkpoint(&name, &weights) {
            Ok(()) => {
                self.stats.checkpoints_written += 1;
                info!(
                    "wrote checkpoint {} after {} documents, acceptance rate {:.4}",
                    name,
                    self.stats.docs_processed,
                    self.stats.acceptance_rate()
                );
            }
            Err(e) => {
                self.stats.checkpoint_failures += 1;
                warn!("failed to write checkpoint {}: {}", name, e);
            }
        }
    }

    pub(crate) fn into_model(self) -> Model {
        Model {
            table: self.table,
            scale: self.scale,
            alpha: self.config.alpha,
            beta: self.config.beta,
            stats: self.stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::NoCheckpoints;
    use ndarray::Array2;
    use std::collections::HashSet;

    fn config(num_topics: usize) -> TrainerConfig {
        TrainerConfig {
            num_topics,
            batch_size: 2,
            ..TrainerConfig::default()
        }
    }

    fn corpus() -> Corpus {
        Corpus::new(
            vec![
                vec![0, 1, 2, 0, 1],
                vec![3, 4, 5, 3, 5, 4],
                vec![0, 2, 1, 1],
                vec![4, 3, 5],
                vec![],
                vec![6, 6, 6, 0],
            ],
            7,
        )
        .unwrap()
    }

    fn assert_totals_consistent(table: &SparseTopicTable) {
        for topic in 0..table.num_topics() {
            let sum: f64 = (0..table.num_types()).map(|w| table.weight(w, topic)).sum();
            let total = table.topic_totals()[topic];
            assert!(
                (sum - total).abs() <= 1e-9 * total.max(1.0),
                "topic {}: {} vs {}",
                topic,
                sum,
                total
            );
        }
    }

    fn assert_sorted(table: &SparseTopicTable) {
        for word in 0..table.num_types() {
            for pair in table.weights(word).windows(2) {
                assert!(pair[0] >= pair[1]);
            }
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(TrainerConfig::default().validate().is_ok());
        let builder = SampledOnlineLDABuilder::new(4);
        assert_eq!(builder.config().num_topics, 4);
        assert_eq!(builder.config().output_prefix, "o-lda");
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        let base = TrainerConfig::default();
        let cases = vec![
            (
                "num_topics",
                TrainerConfig {
                    num_topics: 0,
                    ..base.clone()
                },
            ),
            (
                "alpha",
                TrainerConfig {
                    alpha: 0.0,
                    ..base.clone()
                },
            ),
            (
                "beta",
                TrainerConfig {
                    beta: -1.0,
                    ..base.clone()
                },
            ),
            (
                "beta",
                TrainerConfig {
                    beta: f64::NAN,
                    ..base.clone()
                },
            ),
            (
                "num_samples",
                TrainerConfig {
                    num_samples: 0,
                    sample_burn_in: 0,
                    ..base.clone()
                },
            ),
            (
                "sample_burn_in",
                TrainerConfig {
                    num_samples: 3,
                    sample_burn_in: 3,
                    ..base.clone()
                },
            ),
            (
                "batch_size",
                TrainerConfig {
                    batch_size: 0,
                    ..base.clone()
                },
            ),
            (
                "learning_rate_offset",
                TrainerConfig {
                    learning_rate_offset: 1.0,
                    ..base.clone()
                },
            ),
            (
                "learning_rate_exponent",
                TrainerConfig {
                    learning_rate_exponent: 0.0,
                    ..base.clone()
                },
            ),
            (
                "held_out_fold",
                TrainerConfig {
                    total_folds: 5,
                    held_out_fold: 5,
                    ..base.clone()
                },
            ),
        ];

        for (expected, config) in cases {
            match SampledOnlineLDA::new(config) {
                Err(LdaError::InvalidParameter { name, .. }) => assert_eq!(name, expected),
                Err(e) => panic!("{}: unexpected error {}", expected, e),
                Ok(_) => panic!("{}: accepted", expected),
            }
        }
    }

    #[test]
    fn test_held_out_documents_are_never_drawn() {
        let docs = (0..50).map(|i| vec![i % 7]).collect();
        let corpus = Corpus::new(docs, 7).unwrap();
        let mut config = config(2);
        config.total_folds = 5;
        config.held_out_fold = 2;
        let run = TrainingRun::new(&config, &corpus, 100);
        let mut rng = StdRng::seed_from_u64(42);

        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            let doc = run.draw_document(&mut rng);
            assert_ne!((17 * doc) % 5, 2, "drew held-out document {}", doc);
            seen.insert(doc);
        }
        assert_eq!(seen.len(), 40);
    }

    #[test]
    fn test_all_documents_held_out() {
        let corpus = Corpus::new(vec![vec![0, 1]], 2).unwrap();
        let mut lda = SampledOnlineLDABuilder::new(2).held_out_fold(0, 1).build().unwrap();
        match lda.train(&corpus, 10, 0, &mut NoCheckpoints) {
            Err(LdaError::NoTrainingDocuments { total_folds, held_out_fold }) => {
                assert_eq!((total_folds, held_out_fold), (1, 0));
            }
            other => panic!("unexpected result: {:?}", other.map(|m| m.stats().docs_processed)),
        }
    }

    #[test]
    fn test_one_pass_over_tiny_document() {
        // vocabulary {a, b}, document [a, a, b]
        let corpus = Corpus::new(vec![vec![0, 0, 1]], 2).unwrap();
        let mut config = config(2);
        config.num_samples = 1;
        config.sample_burn_in = 0;
        config.batch_size = 1;
        let mut run = TrainingRun::new(&config, &corpus, 100);
        let mut rng = StdRng::seed_from_u64(1);

        run.sample_document(0, &mut rng);

        assert_eq!(run.queue.len(), 3);
        assert!(run.queue.iter().all(|(_, topic)| topic < 2));
        assert_eq!(run.stats.total_samples, 3);

        run.apply_gradient(1);
        assert!(run.queue.is_empty());
        assert!(run.table.num_entries() > 0);
        assert_totals_consistent(&run.table);
    }

    #[test]
    fn test_sparse_rows_only_grow_from_sampled_pairs() {
        let corpus = corpus();
        let config = config(3);
        let mut run = TrainingRun::new(&config, &corpus, 100);
        let mut rng = StdRng::seed_from_u64(9);

        assert_eq!(run.table.num_entries(), 0);

        let mut sampled = HashSet::new();
        for _ in 0..20 {
            for _ in 0..config.batch_size {
                let doc = run.draw_document(&mut rng);
                run.sample_document(doc, &mut rng);
            }
            sampled.extend(run.queue.iter());
            run.apply_gradient(config.batch_size);

            for word in 0..corpus.num_types() {
                for &topic in run.table.topics(word) {
                    assert!(
                        sampled.contains(&(word, topic)),
                        "({}, {}) was never sampled",
                        word,
                        topic
                    );
                }
            }
            assert_sorted(&run.table);
            assert_totals_consistent(&run.table);
        }
    }

    #[test]
    fn test_rescale_fires_once_per_threshold_crossing() {
        let corpus = corpus();
        let mut config = config(2);
        config.learning_rate_offset = 2.0;
        config.learning_rate_exponent = 1.0;
        let mut run = TrainingRun::new(&config, &corpus, 100);
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..150 {
            for _ in 0..config.batch_size {
                let doc = run.draw_document(&mut rng);
                run.sample_document(doc, &mut rng);
            }

            let before = run.stats.rescales;
            run.apply_gradient(config.batch_size);

            if run.stats.rescales > before {
                assert_eq!(run.stats.rescales, before + 1);
                assert_eq!(run.scale, 1.0);
                for word in 0..corpus.num_types() {
                    assert!(run.table.weights(word).iter().all(|&w| w >= PRUNE_CUTOFF));
                }
            } else {
                assert!(run.scale >= RESCALE_THRESHOLD);
            }
            assert_sorted(&run.table);
            assert_totals_consistent(&run.table);
        }

        assert_eq!(run.stats.rescales, 1);
    }

    #[test]
    fn test_empty_documents_consume_budget() {
        let corpus = Corpus::new(vec![vec![], vec![]], 3).unwrap();
        let mut lda = SampledOnlineLDABuilder::new(2).batch_size(3).build().unwrap();
        let model = lda.train(&corpus, 10, 0, &mut NoCheckpoints).unwrap();

        assert_eq!(model.stats().docs_processed, 10);
        assert_eq!(model.stats().batches, 4);
        assert_eq!(model.stats().total_samples, 0);
        assert_eq!(model.table().num_entries(), 0);
    }

    #[test]
    fn test_huge_batch_with_small_budget() {
        let corpus = corpus();
        let mut config = config(2);
        config.batch_size = usize::MAX / 4;
        let run = TrainingRun::new(&config, &corpus, 3);
        assert!(run.queue.is_empty());

        let mut lda = SampledOnlineLDABuilder::new(2)
            .batch_size(usize::MAX / 4)
            .build()
            .unwrap();
        let model = lda.train(&corpus, 3, 0, &mut NoCheckpoints).unwrap();

        assert_eq!(model.stats().docs_processed, 3);
        assert_eq!(model.stats().batches, 1);
    }

    #[test]
    fn test_checkpoint_cadence() {
        let corpus = corpus();
        let mut lda = SampledOnlineLDABuilder::new(3).batch_size(10).build().unwrap();
        let mut sink: Vec<(String, Array2<f64>)> = Vec::new();

        let model = lda.train(&corpus, 100, 25, &mut sink).unwrap();

        let names: Vec<&str> = sink.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "o-lda.30.wordtopics.gz",
                "o-lda.50.wordtopics.gz",
                "o-lda.80.wordtopics.gz",
                "o-lda.100.wordtopics.gz",
            ]
        );
        assert_eq!(model.stats().checkpoints_written, 4);

        let (_, last) = &sink[3];
        assert_eq!(last.dim(), (3, 7));
        assert_eq!(last, &model.weights());
    }

    struct FailingSink;

    impl CheckpointSink for FailingSink {
        fn write_checkpoint(&mut self, _name: &str, _weights: &Array2<f64>) -> Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into())
        }
    }

    #[test]
    fn test_checkpoint_failures_are_not_fatal() {
        let corpus = corpus();
        let mut lda = SampledOnlineLDABuilder::new(3).batch_size(5).build().unwrap();
        let model = lda.train(&corpus, 40, 10, &mut FailingSink).unwrap();

        assert_eq!(model.stats().docs_processed, 40);
        assert_eq!(model.stats().checkpoint_failures, 4);
        assert_eq!(model.stats().checkpoints_written, 0);
    }

    #[test]
    fn test_training_is_deterministic_for_a_seed() {
        let corpus = corpus();
        let train = || {
            SampledOnlineLDABuilder::new(3)
                .random_seed(17)
                .batch_size(4)
                .build()
                .unwrap()
                .train(&corpus, 200, 0, &mut NoCheckpoints)
                .unwrap()
        };

        let (a, b) = (train(), train());
        assert_eq!(a.weights(), b.weights());
        assert_eq!(a.stats(), b.stats());
    }
}
