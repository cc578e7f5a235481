use ndarray::Array2;

/// Per-type sparse topic weights.
///
/// Row `w` lives in the arena slots `w * K .. w * K + len[w]` of `topics` and
/// `weights`. Rows are contiguous from their first slot and kept sorted by
/// descending weight. Stored values are *unscaled*: the effective weight of an
/// entry is `stored * scale`, with `scale` owned by the caller.
///
/// `topic_totals[k]` always equals the sum of the stored weights of topic `k`
/// over every row.
#[derive(Debug, Clone)]
pub struct SparseTopicTable {
    num_types: usize,
    num_topics: usize,
    topics: Vec<usize>,
    weights: Vec<f64>,
    lens: Vec<usize>,
    topic_totals: Vec<f64>,
}

impl SparseTopicTable {
    pub fn new(num_types: usize, num_topics: usize) -> Self {
        Self {
            num_types,
            num_topics,
            topics: vec![0; num_types * num_topics],
            weights: vec![0.0; num_types * num_topics],
            lens: vec![0; num_types],
            topic_totals: vec![0.0; num_topics],
        }
    }

    pub fn num_types(&self) -> usize {
        self.num_types
    }

    pub fn num_topics(&self) -> usize {
        self.num_topics
    }

    /// Topic ids of row `word`, heaviest first.
    pub fn topics(&self, word: usize) -> &[usize] {
        let start = word * self.num_topics;
        &self.topics[start..start + self.lens[word]]
    }

    /// Stored weights of row `word`, parallel to [`SparseTopicTable::topics`].
    pub fn weights(&self, word: usize) -> &[f64] {
        let start = word * self.num_topics;
        &self.weights[start..start + self.lens[word]]
    }

    pub fn row<'a>(&'a self, word: usize) -> impl Iterator<Item = (usize, f64)> + 'a {
        self.topics(word)
            .iter()
            .cloned()
            .zip(self.weights(word).iter().cloned())
    }

    /// Stored weight of `topic` in row `word`, zero if absent.
    pub fn weight(&self, word: usize, topic: usize) -> f64 {
        self.row(word)
            .find(|&(t, _)| t == topic)
            .map_or(0.0, |(_, w)| w)
    }

    pub fn topic_totals(&self) -> &[f64] {
        &self.topic_totals
    }

    /// Number of live entries across all rows.
    pub fn num_entries(&self) -> usize {
        self.lens.iter().sum()
    }

    /// Adds `delta` to the (`word`, `topic`) entry, creating it if needed.
    ///
    /// An entry whose weight falls to zero or below is removed.
    pub fn insert_or_accumulate(&mut self, word: usize, topic: usize, delta: f64) {
        let start = word * self.num_topics;
        let len = self.lens[word];

        let mut idx = match self.topics[start..start + len].iter().position(|&t| t == topic) {
            Some(i) => i,
            None => {
                if delta <= 0.0 {
                    return;
                }
                self.topics[start + len] = topic;
                self.weights[start + len] = 0.0;
                self.lens[word] += 1;
                len
            }
        };

        self.weights[start + idx] += delta;
        self.topic_totals[topic] += delta;

        let len = self.lens[word];
        let row_topics = &mut self.topics[start..start + len];
        let row_weights = &mut self.weights[start..start + len];

        while idx > 0 && row_weights[idx] > row_weights[idx - 1] {
            row_topics.swap(idx, idx - 1);
            row_weights.swap(idx, idx - 1);
            idx -= 1;
        }
        while idx + 1 < len && row_weights[idx] < row_weights[idx + 1] {
            row_topics.swap(idx, idx + 1);
            row_weights.swap(idx, idx + 1);
            idx += 1;
        }

        if row_weights[idx] <= 0.0 {
            // Sorted descending, so a non-positive entry is the last one.
            self.topic_totals[topic] -= row_weights[idx];
            self.lens[word] -= 1;
        }
    }

    /// Multiplies every stored weight and topic total by `factor`.
    pub fn rescale(&mut self, factor: f64) {
        if factor == 1.0 {
            return;
        }
        for word in 0..self.num_types {
            let start = word * self.num_topics;
            for w in self.weights[start..start + self.lens[word]].iter_mut() {
                *w *= factor;
            }
        }
        for total in self.topic_totals.iter_mut() {
            *total *= factor;
        }
    }

    /// Drops every entry whose stored weight is below `cutoff`, returning how
    /// many were removed. Their mass is taken out of the topic totals.
    pub fn prune_below(&mut self, cutoff: f64) -> usize {
        let mut removed = 0;

        for word in 0..self.num_types {
            let start = word * self.num_topics;
            let len = self.lens[word];
            let mut kept = 0;

            for i in 0..len {
                let topic = self.topics[start + i];
                let weight = self.weights[start + i];

                if weight < cutoff {
                    self.topic_totals[topic] -= weight;
                    removed += 1;
                    continue;
                }

                // Descending insertion of the survivor.
                let mut j = kept;
                while j > 0 && self.weights[start + j - 1] < weight {
                    self.topics[start + j] = self.topics[start + j - 1];
                    self.weights[start + j] = self.weights[start + j - 1];
                    j -= 1;
                }
                self.topics[start + j] = topic;
                self.weights[start + j] = weight;
                kept += 1;
            }

            self.lens[word] = kept;
        }

        removed
    }

    /// The `n` heaviest types of `topic` with their stored weights.
    pub fn top_words(&self, topic: usize, n: usize) -> Vec<(usize, f64)> {
        let mut words: Vec<(usize, f64)> = (0..self.num_types)
            .filter_map(|word| {
                self.row(word)
                    .find(|&(t, _)| t == topic)
                    .map(|(_, weight)| (word, weight))
            })
            .collect();

        words.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        words.truncate(n);
        words
    }

    /// Dense `topics x types` matrix of effective weights (`stored * scale`).
    pub fn to_dense(&self, scale: f64) -> Array2<f64> {
        let mut dense = Array2::<f64>::zeros((self.num_topics, self.num_types));
        for word in 0..self.num_types {
            for (topic, weight) in self.row(word) {
                dense[[topic, word]] = weight * scale;
            }
        }
        dense
    }
}
