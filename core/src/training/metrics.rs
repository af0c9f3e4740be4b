use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use std::collections::BTreeMap;

/// Offset keeping sensitivity and specificity defined on one-class batches
const RATE_EPSILON: f64 = 1e-7;

/// Decision threshold on predicted probabilities
pub const THRESHOLD: f64 = 0.5;

/// Loss weight of each class
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "json", derive(serde::Serialize))]
pub struct ClassWeights {
    pub negative: f64,
    pub positive: f64,
}

impl ClassWeights {
    pub fn new(negative: f64, positive: f64) -> Self {
        Self { negative, positive }
    }

    /// Weights keyed by class label
    pub fn as_map(&self) -> BTreeMap<u8, f64> {
        BTreeMap::from([(0, self.negative), (1, self.positive)])
    }

    /// Per-sample weights for binary targets
    pub fn sample_weights<B: Backend>(&self, targets: Tensor<B, 2>) -> Tensor<B, 2> {
        targets
            .mul_scalar(self.positive - self.negative)
            .add_scalar(self.negative)
    }
}

impl Default for ClassWeights {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

/// Class-weighted binary cross entropy on logits, averaged over the batch
///
/// Uses `max(x, 0) - x * y + ln(1 + exp(-|x|))`, which stays finite for
/// large logits.
pub fn weighted_bce<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 2>,
    weights: &ClassWeights,
) -> Tensor<B, 1> {
    let relu = logits.clone().clamp_min(0.0);
    let softplus = logits.clone().abs().neg().exp().add_scalar(1.0).log();
    let loss = relu - logits * targets.clone() + softplus;
    (loss * weights.sample_weights(targets)).mean()
}

/// Running confusion counts at the 0.5 threshold
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionCounts {
    pub true_pos: usize,
    pub false_neg: usize,
    pub true_neg: usize,
    pub false_pos: usize,
}

impl ConfusionCounts {
    pub fn update(&mut self, probs: &[f32], labels: &[f32]) {
        for (&p, &y) in probs.iter().zip(labels) {
            let predicted = p as f64 >= THRESHOLD;
            match (y > 0.5, predicted) {
                (true, true) => self.true_pos += 1,
                (true, false) => self.false_neg += 1,
                (false, false) => self.true_neg += 1,
                (false, true) => self.false_pos += 1,
            }
        }
    }

    pub fn positives(&self) -> usize {
        self.true_pos + self.false_neg
    }

    pub fn negatives(&self) -> usize {
        self.true_neg + self.false_pos
    }

    /// TP / (P + eps)
    pub fn sensitivity(&self) -> f64 {
        self.true_pos as f64 / (self.positives() as f64 + RATE_EPSILON)
    }

    /// TN / (N + eps)
    pub fn specificity(&self) -> f64 {
        self.true_neg as f64 / (self.negatives() as f64 + RATE_EPSILON)
    }
}

/// Area under the ROC curve
///
/// Tied scores count half, matching the trapezoidal curve. Returns `None`
/// when `labels` holds a single class.
pub fn roc_auc(scores: &[f32], labels: &[f32]) -> Option<f64> {
    let mut pairs: Vec<(f32, bool)> = scores
        .iter()
        .zip(labels)
        .map(|(&s, &y)| (s, y > 0.5))
        .collect();
    let n_pos = pairs.iter().filter(|(_, y)| *y).count();
    let n_neg = pairs.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    // Mann-Whitney U with average ranks for ties
    let mut rank_sum = 0.0f64;
    let mut i = 0;
    while i < pairs.len() {
        let mut j = i;
        while j + 1 < pairs.len() && pairs[j + 1].0 == pairs[i].0 {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        let tied_pos = pairs[i..=j].iter().filter(|(_, y)| *y).count();
        rank_sum += avg_rank * tied_pos as f64;
        i = j + 1;
    }

    let n_pos = n_pos as f64;
    let u = rank_sum - n_pos * (n_pos + 1.0) / 2.0;
    Some(u / (n_pos * n_neg as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use rstest::rstest;

    type TestBackend = NdArray<f32>;

    fn tensor(values: &[f32]) -> Tensor<TestBackend, 2> {
        Tensor::<TestBackend, 1>::from_floats(values, &Default::default())
            .reshape([values.len(), 1])
    }

    #[rstest]
    #[case(&[0.1, 0.4, 0.35, 0.8], &[0.0, 0.0, 1.0, 1.0], 0.75)]
    #[case(&[0.1, 0.2, 0.8, 0.9], &[0.0, 0.0, 1.0, 1.0], 1.0)]
    #[case(&[0.9, 0.8, 0.2, 0.1], &[0.0, 0.0, 1.0, 1.0], 0.0)]
    #[case(&[0.5, 0.5, 0.5, 0.5], &[0.0, 1.0, 0.0, 1.0], 0.5)]
    #[case(&[0.2, 0.5, 0.5, 0.9], &[0.0, 0.0, 1.0, 1.0], 0.875)]
    fn test_roc_auc(#[case] scores: &[f32], #[case] labels: &[f32], #[case] expected: f64) {
        let auc = roc_auc(scores, labels).unwrap();
        assert!((auc - expected).abs() < 1e-9, "auc={auc}");
    }

    #[test]
    fn test_roc_auc_single_class() {
        assert_eq!(roc_auc(&[0.1, 0.9], &[0.0, 0.0]), None);
        assert_eq!(roc_auc(&[], &[]), None);
    }

    #[test]
    fn test_confusion_counts() {
        let mut counts = ConfusionCounts::default();
        counts.update(&[0.9, 0.2, 0.6, 0.1], &[1.0, 1.0, 0.0, 0.0]);
        counts.update(&[0.5], &[1.0]);
        assert_eq!(counts.true_pos, 2);
        assert_eq!(counts.false_neg, 1);
        assert_eq!(counts.true_neg, 1);
        assert_eq!(counts.false_pos, 1);
        assert!((counts.sensitivity() - 2.0 / 3.0).abs() < 1e-6);
        assert!((counts.specificity() - 0.5).abs() < 1e-6);

        // No positives seen: sensitivity is 0, not NaN
        let empty = ConfusionCounts::default();
        assert_eq!(empty.sensitivity(), 0.0);
    }

    #[test]
    fn test_weighted_bce_matches_formula() {
        let logits = [2.0f32, -1.0, 0.0, 30.0];
        let targets = [1.0f32, 0.0, 1.0, 0.0];
        let weights = ClassWeights::new(1.0, 3.0);

        let loss: f32 = weighted_bce(tensor(&logits), tensor(&targets), &weights).into_scalar();

        let expected: f64 = logits
            .iter()
            .zip(&targets)
            .map(|(&x, &y)| {
                let (x, y) = (x as f64, y as f64);
                let p = 1.0 / (1.0 + (-x).exp());
                let bce = -(y * p.max(1e-300).ln() + (1.0 - y) * (1.0 - p).max(1e-300).ln());
                let bce = if x > 20.0 && y == 0.0 { x } else { bce };
                bce * if y > 0.5 { 3.0 } else { 1.0 }
            })
            .sum::<f64>()
            / 4.0;
        assert!((loss as f64 - expected).abs() < 1e-4, "{loss} vs {expected}");
    }

    #[test]
    fn test_sample_weights_and_map() {
        let weights = ClassWeights::new(1.0, 4.0);
        let w: Vec<f32> = weights
            .sample_weights(tensor(&[0.0, 1.0, 1.0]))
            .into_data()
            .to_vec()
            .unwrap();
        assert_eq!(w, vec![1.0, 4.0, 4.0]);
        assert_eq!(weights.as_map().keys().copied().collect::<Vec<_>>(), vec![0, 1]);
    }
}
