//! Stratified train/validation partitioning

use crate::config::ValSize;
use crate::error::{Result, TrainError};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;

/// Splits sample indices into train and validation sets keeping the label
/// proportions of `labels` in both
///
/// # Arguments
///
/// * `labels` - Class label of every sample
/// * `val_size` - Fraction or absolute number of validation samples
/// * `seed` - Seed of the shuffling RNG
///
/// # Returns
///
/// `(train, val)` index lists, each in shuffled order
pub fn stratified_split(
    labels: &[u8],
    val_size: ValSize,
    seed: u64,
) -> Result<(Vec<usize>, Vec<usize>)> {
    let n = labels.len();
    if n == 0 {
        return Err(TrainError::SplitError("cannot split an empty dataset".to_string()));
    }

    let n_test = val_size.test_count(n);
    if n_test == 0 || n_test >= n {
        return Err(TrainError::SplitError(format!(
            "validation size {} is out of range for {} samples",
            n_test, n
        )));
    }
    let n_train = n - n_test;

    let mut classes: BTreeMap<u8, Vec<usize>> = BTreeMap::new();
    for (i, &label) in labels.iter().enumerate() {
        classes.entry(label).or_default().push(i);
    }

    if let Some((label, members)) = classes.iter().find(|(_, m)| m.len() < 2) {
        return Err(TrainError::SplitError(format!(
            "class {} has only {} member, at least 2 are required",
            label,
            members.len()
        )));
    }
    if n_test < classes.len() || n_train < classes.len() {
        return Err(TrainError::SplitError(format!(
            "train size {} and validation size {} must each be at least the number of classes {}",
            n_train,
            n_test,
            classes.len()
        )));
    }

    let counts: Vec<usize> = classes.values().map(Vec::len).collect();
    let test_counts = allocate(&counts, n_test);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(n_train);
    let mut val = Vec::with_capacity(n_test);
    for (members, k) in classes.into_values().zip(test_counts) {
        let mut members = members;
        members.shuffle(&mut rng);
        val.extend_from_slice(&members[..k]);
        train.extend_from_slice(&members[k..]);
    }
    train.shuffle(&mut rng);
    val.shuffle(&mut rng);

    Ok((train, val))
}

/// Distributes `total` draws across classes proportionally to `counts`
/// using largest-remainder rounding
fn allocate(counts: &[usize], total: usize) -> Vec<usize> {
    let n: usize = counts.iter().sum();
    let exact: Vec<f64> = counts
        .iter()
        .map(|&c| total as f64 * c as f64 / n as f64)
        .collect();
    let mut alloc: Vec<usize> = exact
        .iter()
        .zip(counts)
        .map(|(&e, &c)| (e.floor() as usize).min(c))
        .collect();

    let mut order: Vec<usize> = (0..counts.len()).collect();
    // Largest remainder first, ties to the larger class
    order.sort_by(|&a, &b| {
        let ra = exact[a] - exact[a].floor();
        let rb = exact[b] - exact[b].floor();
        rb.partial_cmp(&ra)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(counts[b].cmp(&counts[a]))
    });

    let mut remaining = total - alloc.iter().sum::<usize>();
    while remaining > 0 {
        let before = remaining;
        for &i in &order {
            if remaining == 0 {
                break;
            }
            if alloc[i] < counts[i] {
                alloc[i] += 1;
                remaining -= 1;
            }
        }
        if remaining == before {
            break;
        }
    }
    alloc
}
