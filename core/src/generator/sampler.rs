use log::warn;
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand::rngs::StdRng;

/// Chooses which samples go into each batch
///
/// Training batches follow an epoch-wise permutation, or weighted draws with
/// replacement when class balancing is on. Validation batches walk the
/// samples in order; the last batch of a pass is partial.
#[derive(Debug, Clone)]
pub struct BatchSampler {
    labels: Vec<u8>,
    batch_size: usize,
    shuffle: bool,
    validation_mode: bool,
    balance: Option<WeightedIndex<f64>>,
    all_neg_skip: f64,
    order: Vec<usize>,
    cursor: usize,
    seed: u64,
    rng: StdRng,
}

impl BatchSampler {
    /// # Arguments
    ///
    /// * `labels` - Binary label of every sample
    /// * `batch_size` - Samples per batch
    /// * `balance_classes` - Target share of positives per batch, 0 disables
    /// * `all_neg_skip` - Probability of redrawing a batch without positives
    /// * `shuffle` - Permute the samples at every pass
    /// * `seed` - RNG seed
    /// * `validation_mode` - In-order passes, no balancing or skipping
    pub fn new(
        labels: Vec<u8>,
        batch_size: usize,
        balance_classes: f64,
        all_neg_skip: f64,
        shuffle: bool,
        seed: u64,
        validation_mode: bool,
    ) -> Self {
        let n_pos = labels.iter().filter(|&&l| l > 0).count();
        let n_neg = labels.len() - n_pos;

        let balance = if validation_mode || balance_classes <= 0.0 {
            None
        } else if n_pos == 0 || n_neg == 0 {
            warn!(
                "Class balancing disabled: {} positives and {} negatives",
                n_pos, n_neg
            );
            None
        } else {
            let w_pos = balance_classes / n_pos as f64;
            let w_neg = (1.0 - balance_classes) / n_neg as f64;
            let weights = labels.iter().map(|&l| if l > 0 { w_pos } else { w_neg });
            WeightedIndex::new(weights).ok()
        };

        let all_neg_skip = if validation_mode {
            0.0
        } else if all_neg_skip > 0.0 && n_pos == 0 {
            warn!("All-negative batch skipping disabled: no positive samples");
            0.0
        } else {
            all_neg_skip
        };

        let mut sampler = Self {
            order: (0..labels.len()).collect(),
            labels,
            batch_size,
            shuffle: shuffle && !validation_mode,
            validation_mode,
            balance,
            all_neg_skip,
            cursor: 0,
            seed,
            rng: StdRng::seed_from_u64(seed),
        };
        sampler.start_pass();
        sampler
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[u8] {
        &self.labels
    }

    /// Batches needed to visit every sample once
    pub fn steps_per_pass(&self) -> usize {
        self.labels.len().div_ceil(self.batch_size)
    }

    /// Restarts from the first batch with the initial seed
    pub fn reset(&mut self) {
        self.rng = StdRng::seed_from_u64(self.seed);
        self.order = (0..self.labels.len()).collect();
        self.cursor = 0;
        self.start_pass();
    }

    /// Indices of the next batch
    pub fn next_indices(&mut self) -> Vec<usize> {
        if self.is_empty() {
            return Vec::new();
        }
        loop {
            let batch = self.draw();
            if self.all_neg_skip > 0.0
                && !batch.iter().any(|&i| self.labels[i] > 0)
                && self.rng.gen_bool(self.all_neg_skip.min(1.0))
            {
                continue;
            }
            return batch;
        }
    }

    /// Per-sample random choice in `0..n`, made on the sampler's RNG
    pub fn choose(&mut self, n: usize) -> usize {
        if self.validation_mode || n <= 1 {
            0
        } else {
            self.rng.gen_range(0..n)
        }
    }

    /// Coin flip with probability 0.5, always false in validation mode
    pub fn coin(&mut self) -> bool {
        !self.validation_mode && self.rng.gen_bool(0.5)
    }

    fn draw(&mut self) -> Vec<usize> {
        if let Some(dist) = &self.balance {
            return (0..self.batch_size)
                .map(|_| dist.sample(&mut self.rng))
                .collect();
        }

        if self.cursor >= self.order.len() {
            self.start_pass();
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let batch = self.order[self.cursor..end].to_vec();
        self.cursor = end;
        batch
    }

    fn start_pass(&mut self) {
        self.cursor = 0;
        if self.shuffle {
            self.order.shuffle(&mut self.rng);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(neg: usize, pos: usize) -> Vec<u8> {
        let mut l = vec![0u8; neg];
        l.extend(vec![1u8; pos]);
        l
    }

    #[test]
    fn test_validation_walks_in_order() {
        let mut sampler = BatchSampler::new(labels(5, 2), 3, 0.5, 0.9, true, 1, true);
        assert_eq!(sampler.steps_per_pass(), 3);
        assert_eq!(sampler.next_indices(), vec![0, 1, 2]);
        assert_eq!(sampler.next_indices(), vec![3, 4, 5]);
        assert_eq!(sampler.next_indices(), vec![6]);
        // Wraps into a new pass
        assert_eq!(sampler.next_indices(), vec![0, 1, 2]);

        sampler.next_indices();
        sampler.reset();
        assert_eq!(sampler.next_indices(), vec![0, 1, 2]);
        assert!(!sampler.coin());
        assert_eq!(sampler.choose(5), 0);
    }

    #[test]
    fn test_shuffled_pass_covers_every_sample() {
        let mut sampler = BatchSampler::new(labels(6, 4), 4, 0.0, 0.0, true, 7, false);
        let mut seen: Vec<usize> = (0..3).flat_map(|_| sampler.next_indices()).collect();
        assert_eq!(seen.len(), 10);
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_balanced_draws_reach_target_ratio() {
        let y = labels(95, 5);
        let mut sampler = BatchSampler::new(y.clone(), 32, 0.5, 0.0, true, 3, false);
        let draws: Vec<usize> = (0..200).flat_map(|_| sampler.next_indices()).collect();
        assert_eq!(draws.len(), 200 * 32);
        let pos = draws.iter().filter(|&&i| y[i] == 1).count() as f64;
        let ratio = pos / draws.len() as f64;
        assert!((ratio - 0.5).abs() < 0.05, "ratio={ratio}");
    }

    #[test]
    fn test_all_neg_skip_removes_negative_batches() {
        let y = labels(98, 2);
        let mut sampler = BatchSampler::new(y.clone(), 4, 0.0, 1.0, true, 11, false);
        for _ in 0..50 {
            let batch = sampler.next_indices();
            assert!(batch.iter().any(|&i| y[i] == 1));
        }
    }

    #[test]
    fn test_all_neg_skip_disabled_without_positives() {
        let mut sampler = BatchSampler::new(labels(10, 0), 4, 0.5, 1.0, true, 11, false);
        // Neither balancing nor skipping can apply; plain passes continue
        assert_eq!(sampler.next_indices().len(), 4);
        assert_eq!(sampler.next_indices().len(), 4);
        assert_eq!(sampler.next_indices().len(), 2);
    }

    #[test]
    fn test_same_seed_same_batches() {
        let mut a = BatchSampler::new(labels(20, 5), 5, 0.3, 0.5, true, 99, false);
        let mut b = BatchSampler::new(labels(20, 5), 5, 0.3, 0.5, true, 99, false);
        for _ in 0..10 {
            assert_eq!(a.next_indices(), b.next_indices());
        }
    }
}
