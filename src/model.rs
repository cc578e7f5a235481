use ndarray::Array2;
use rand::Rng;

use crate::error::{LdaError, Result};
use crate::sampler::DocumentSampler;
use crate::sparse::SparseTopicTable;

/// Counters collected over one training run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrainingStats {
    pub docs_processed: usize,
    pub batches: usize,
    /// Tokens sampled after burn-in.
    pub total_samples: usize,
    /// Post-burn-in samples whose topic differed from the previous one.
    pub total_changes: usize,
    pub rescales: usize,
    pub checkpoints_written: usize,
    pub checkpoint_failures: usize,
}

impl TrainingStats {
    pub fn acceptance_rate(&self) -> f64 {
        if self.total_samples == 0 {
            0.0
        } else {
            self.total_changes as f64 / self.total_samples as f64
        }
    }
}

/// A trained sampled online LDA model.
#[derive(Debug, Clone)]
pub struct Model {
    pub(crate) table: SparseTopicTable,
    pub(crate) scale: f64,
    pub(crate) alpha: f64,
    pub(crate) beta: f64,
    pub(crate) stats: TrainingStats,
}

impl Model {
    pub fn num_topics(&self) -> usize {
        self.table.num_topics()
    }

    pub fn num_types(&self) -> usize {
        self.table.num_types()
    }

    /// Multiplier applied to every stored weight.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// The stored (unscaled) sparse table.
    pub fn table(&self) -> &SparseTopicTable {
        &self.table
    }

    pub fn stats(&self) -> &TrainingStats {
        &self.stats
    }

    pub fn topic_totals(&self) -> Vec<f64> {
        self.table
            .topic_totals()
            .iter()
            .map(|total| total * self.scale)
            .collect()
    }

    /// Nonzero topics of `word` with effective weights, heaviest first.
    pub fn word_topics(&self, word: usize) -> Vec<(usize, f64)> {
        self.table
            .row(word)
            .map(|(topic, weight)| (topic, weight * self.scale))
            .collect()
    }

    /// The `n` most probable types of topic `k`. A topic index past
    /// `num_topics` has no words.
    pub fn top_words(&self, k: usize, n: usize) -> Vec<(usize, f64)> {
        let total = match self.table.topic_totals().get(k) {
            Some(&total) => total,
            None => return Vec::new(),
        };
        self.table
            .top_words(k, n)
            .into_iter()
            .map(|(word, weight)| (word, if total > 0.0 { weight / total } else { 0.0 }))
            .collect()
    }

    /// Every type with nonzero weight in topic `k`, normalized by the topic mass.
    pub fn topic_word_distribution(&self, k: usize) -> Vec<(usize, f64)> {
        self.top_words(k, self.num_types())
    }

    /// Dense `topics x types` effective weights.
    pub fn weights(&self) -> Array2<f64> {
        self.table.to_dense(self.scale)
    }

    /// Topic proportions of `doc`: the sampler is replayed against the frozen
    /// weights and its final token-topic counts are divided by the document
    /// length. An empty document yields all zeros.
    pub fn document_topics<R: Rng>(
        &self,
        doc: &[usize],
        num_samples: usize,
        rng: &mut R,
    ) -> Result<Vec<f64>> {
        if num_samples == 0 {
            return Err(LdaError::invalid("num_samples", num_samples, "must be at least 1"));
        }
        if let Some(position) = doc.iter().position(|&w| w >= self.num_types()) {
            return Err(LdaError::TypeOutOfRange {
                doc: 0,
                position,
                word: doc[position],
                num_types: self.num_types(),
            });
        }

        let mut proportions = vec![0.0; self.num_topics()];
        if doc.is_empty() {
            return Ok(proportions);
        }

        let mut sampler = DocumentSampler::new(
            self.num_types(),
            self.num_topics(),
            self.alpha,
            self.beta,
            num_samples,
            num_samples - 1,
        );
        sampler.sample(doc, &self.table, self.scale, rng, None);

        for (p, &count) in proportions.iter_mut().zip(sampler.doc_topic_counts()) {
            *p = count as f64 / doc.len() as f64;
        }

        Ok(proportions)
    }
}
