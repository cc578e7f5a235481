use ndarray::Array1;
use rand::Rng;

use crate::math::{self, EXP_DIGAMMA_LINEAR_CUTOFF};
use crate::sparse::SparseTopicTable;

/// Every (type, topic) decision sampled during the current minibatch.
#[derive(Debug, Clone, Default)]
pub struct GradientQueue {
    words: Vec<usize>,
    topics: Vec<usize>,
}

impl GradientQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            words: Vec::with_capacity(capacity),
            topics: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, word: usize, topic: usize) {
        self.words.push(word);
        self.topics.push(topic);
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn clear(&mut self) {
        self.words.clear();
        self.topics.clear();
    }

    pub fn iter<'a>(&'a self) -> impl Iterator<Item = (usize, usize)> + 'a {
        self.words.iter().cloned().zip(self.topics.iter().cloned())
    }
}

/// Diagnostic tallies from the post-burn-in sweeps of one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub samples: usize,
    pub changes: usize,
}

/// Collapsed Gibbs sampler for a single document against a frozen
/// [`SparseTopicTable`], with reusable per-document scratch space.
#[derive(Debug, Clone)]
pub struct DocumentSampler {
    num_topics: usize,
    num_samples: usize,
    burn_in: usize,
    alpha: f64,
    beta: f64,
    // V * beta
    beta_sum: f64,
    exp_digamma_beta: f64,

    topics: Vec<usize>,
    doc_topic_counts: Vec<usize>,
    normalizers: Array1<f64>,
    coefficients: Array1<f64>,
    coefficient_sum: f64,
    // Sampling mass of each entry of the current type's sparse row
    sparse_weights: Vec<f64>,
}

impl DocumentSampler {
    pub fn new(
        num_types: usize,
        num_topics: usize,
        alpha: f64,
        beta: f64,
        num_samples: usize,
        burn_in: usize,
    ) -> Self {
        Self {
            num_topics,
            num_samples,
            burn_in,
            alpha,
            beta,
            beta_sum: num_types as f64 * beta,
            exp_digamma_beta: math::approx_exp_digamma(beta),
            topics: Vec::new(),
            doc_topic_counts: vec![0; num_topics],
            normalizers: Array1::zeros(num_topics),
            coefficients: Array1::zeros(num_topics),
            coefficient_sum: 0.0,
            sparse_weights: vec![0.0; num_topics],
        }
    }

    /// Topic assigned to each position of the last sampled document.
    pub fn topics(&self) -> &[usize] {
        &self.topics
    }

    /// Token counts per topic for the last sampled document.
    pub fn doc_topic_counts(&self) -> &[usize] {
        &self.doc_topic_counts
    }

    /// Runs `num_samples` sweeps over `doc`, starting from all-zero
    /// assignments. Every sampled decision, burn-in included, is appended to
    /// `queue` when one is given. An empty document leaves all state untouched.
    pub fn sample<R: Rng>(
        &mut self,
        doc: &[usize],
        table: &SparseTopicTable,
        scale: f64,
        rng: &mut R,
        mut queue: Option<&mut GradientQueue>,
    ) -> SweepStats {
        let mut stats = SweepStats::default();
        if doc.is_empty() {
            return stats;
        }

        self.topics.clear();
        self.topics.resize(doc.len(), 0);
        for count in self.doc_topic_counts.iter_mut() {
            *count = 0;
        }

        let totals = table.topic_totals();
        self.coefficient_sum = 0.0;
        for topic in 0..self.num_topics {
            self.normalizers[topic] = math::topic_normalizer(self.beta_sum, scale * totals[topic]);
            self.coefficients[topic] = self.alpha * self.normalizers[topic];
            self.coefficient_sum += self.coefficients[topic];
        }

        for sweep in 0..self.num_samples {
            for (position, &word) in doc.iter().enumerate() {
                let old_topic = self.topics[position];
                if sweep > 0 {
                    self.doc_topic_counts[old_topic] -= 1;
                    self.update_coefficient(old_topic);
                }

                let new_topic = self.draw_topic(table, word, scale, rng);

                self.topics[position] = new_topic;
                self.doc_topic_counts[new_topic] += 1;
                self.update_coefficient(new_topic);

                if let Some(queue) = queue.as_mut() {
                    queue.push(word, new_topic);
                }

                if sweep >= self.burn_in {
                    stats.samples += 1;
                    if new_topic != old_topic {
                        stats.changes += 1;
                    }
                }
            }
        }

        stats
    }

    fn update_coefficient(&mut self, topic: usize) {
        self.coefficient_sum -= self.coefficients[topic];
        self.coefficients[topic] =
            (self.alpha + self.doc_topic_counts[topic] as f64) * self.normalizers[topic];
        self.coefficient_sum += self.coefficients[topic];
    }

    /// Draws a topic for `word` from the sparse row mass plus the dense
    /// smoothing-only mass.
    fn draw_topic<R: Rng>(
        &mut self,
        table: &SparseTopicTable,
        word: usize,
        scale: f64,
        rng: &mut R,
    ) -> usize {
        let row_topics = table.topics(word);
        let row_weights = table.weights(word);

        let mut sparse_mass = 0.0;
        for (i, (&topic, &weight)) in row_topics.iter().zip(row_weights).enumerate() {
            let effective = scale * weight;
            let exp_digamma = if effective > EXP_DIGAMMA_LINEAR_CUTOFF {
                self.beta + effective - 0.5
            } else {
                math::approx_exp_digamma(self.beta + effective)
            };
            let mass = (exp_digamma - self.exp_digamma_beta) * self.coefficients[topic];
            self.sparse_weights[i] = mass;
            sparse_mass += mass;
        }

        let mut sample =
            rng.gen::<f64>() * (sparse_mass + self.exp_digamma_beta * self.coefficient_sum);

        if sample < sparse_mass {
            for (i, &topic) in row_topics.iter().enumerate() {
                sample -= self.sparse_weights[i];
                if sample <= 0.0 {
                    return topic;
                }
            }
            return row_topics.last().cloned().unwrap_or(self.num_topics - 1);
        }

        sample = (sample - sparse_mass) / self.exp_digamma_beta;
        for (topic, &coefficient) in self.coefficients.iter().enumerate() {
            sample -= coefficient;
            if sample <= 0.0 {
                return topic;
            }
        }

        self.num_topics - 1
    }
}
