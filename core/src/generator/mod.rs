//! Batch generation for training and validation
//!
//! [`ImageDataGenerator`] holds the augmentation and normalization settings
//! and the image decoding worker pool. Its `flow_*` methods return
//! [`BatchSource`]s that sample, decode and normalize batches on demand.
//!
//! All random choices (sample order, flips, view picks) are made on the
//! calling thread from a seeded RNG, so decoding order on the pool does not
//! change the batches.

mod iterator;
mod sampler;

pub use iterator::{BatchSource, ExamListIterator, ImageListIterator};
pub use sampler::BatchSampler;

use crate::error::{Result, TrainError};
use crate::imaging::read_resize_img;
use crate::metadata::ExamRecord;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Offset added to the standard deviation before dividing
const STD_EPSILON: f32 = 1e-7;

/// Intensity normalization applied after augmentation
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "json", derive(serde::Serialize))]
pub enum Normalization {
    /// Fixed dataset-wide mean and standard deviation
    Featurewise { mean: f32, std: f32 },
    /// Each image centered and scaled by its own statistics
    Samplewise,
}

impl Normalization {
    pub fn apply(&self, data: &mut [f32]) {
        let (mean, std) = match *self {
            Normalization::Featurewise { mean, std } => (mean, std + STD_EPSILON),
            Normalization::Samplewise => {
                if data.is_empty() {
                    return;
                }
                let n = data.len() as f32;
                let mean = data.iter().sum::<f32>() / n;
                let var = data.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
                (mean, var.sqrt() + STD_EPSILON)
            }
        };
        for v in data.iter_mut() {
            *v = (*v - mean) / std;
        }
    }
}

/// Parameters of a batch flow
#[derive(Debug, Clone, PartialEq)]
pub struct FlowOptions {
    /// Image (height, width)
    pub target_size: (u32, u32),
    pub target_scale: Option<f32>,
    /// Images per batch, or exams per batch in exam flows
    pub batch_size: usize,
    pub balance_classes: f64,
    pub all_neg_skip: f64,
    pub shuffle: bool,
    pub seed: u64,
    /// In-order, unaugmented passes
    pub validation_mode: bool,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            target_size: (288, 224),
            target_scale: Some(4095.0),
            batch_size: 16,
            balance_classes: 0.0,
            all_neg_skip: 0.0,
            shuffle: true,
            seed: 12345,
            validation_mode: false,
        }
    }
}

impl FlowOptions {
    fn sampler(&self, labels: Vec<u8>) -> BatchSampler {
        BatchSampler::new(
            labels,
            self.batch_size,
            self.balance_classes,
            self.all_neg_skip,
            self.shuffle,
            self.seed,
            self.validation_mode,
        )
    }
}

/// Per-image processing shared by every flow of a generator
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Augmenter {
    pub horizontal_flip: bool,
    pub vertical_flip: bool,
    pub normalization: Normalization,
}

impl Augmenter {
    /// Reads, resizes, flips and normalizes one image
    pub fn load(
        &self,
        path: &Path,
        target_size: (u32, u32),
        target_scale: Option<f32>,
        flip_h: bool,
        flip_v: bool,
    ) -> Result<Vec<f32>> {
        let mut data = read_resize_img(path, target_size, target_scale)?;
        let (height, width) = (target_size.0 as usize, target_size.1 as usize);
        if flip_h {
            flip_horizontal(&mut data, height, width);
        }
        if flip_v {
            flip_vertical(&mut data, height, width);
        }
        self.normalization.apply(&mut data);
        Ok(data)
    }
}

fn flip_horizontal(data: &mut [f32], height: usize, width: usize) {
    for row in data.chunks_exact_mut(width).take(height) {
        row.reverse();
    }
}

fn flip_vertical(data: &mut [f32], height: usize, width: usize) {
    for r in 0..height / 2 {
        let (top, bottom) = data.split_at_mut((height - 1 - r) * width);
        top[r * width..(r + 1) * width].swap_with_slice(&mut bottom[..width]);
    }
}

/// A decoded batch: one pixel buffer per view, in sample order
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBatch {
    /// `[sample][row][col]` pixels per view, flattened
    pub views: Vec<Vec<f32>>,
    pub labels: Vec<f32>,
    pub height: usize,
    pub width: usize,
}

impl ImageBatch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Samples held by each view buffer
    pub fn view_sizes(&self) -> Vec<usize> {
        let per_image = (self.height * self.width).max(1);
        self.views.iter().map(|v| v.len() / per_image).collect()
    }

    /// Concatenates batches sample-wise
    pub fn concat(batches: Vec<ImageBatch>) -> Result<ImageBatch> {
        let mut iter = batches.into_iter();
        let mut merged = iter
            .next()
            .ok_or_else(|| TrainError::NoSamples("no batches to merge".to_string()))?;
        for batch in iter {
            if batch.views.len() != merged.views.len()
                || (batch.height, batch.width) != (merged.height, merged.width)
            {
                return Err(TrainError::InvalidValue(
                    "cannot merge batches of different shapes".to_string(),
                ));
            }
            for (dst, src) in merged.views.iter_mut().zip(batch.views) {
                dst.extend(src);
            }
            merged.labels.extend(batch.labels);
        }
        Ok(merged)
    }

    /// Splits the batch into consecutive batches of at most `size` samples
    pub fn chunks(&self, size: usize) -> Vec<ImageBatch> {
        let size = size.max(1);
        let per_image = self.height * self.width;
        (0..self.len())
            .step_by(size)
            .map(|start| {
                let end = (start + size).min(self.len());
                ImageBatch {
                    views: self
                        .views
                        .iter()
                        .map(|v| v[start * per_image..end * per_image].to_vec())
                        .collect(),
                    labels: self.labels[start..end].to_vec(),
                    height: self.height,
                    width: self.width,
                }
            })
            .collect()
    }

    /// `[n, 1, height, width]` tensors, one per view
    pub fn view_tensors<B: Backend>(&self, device: &B::Device) -> Vec<Tensor<B, 4>> {
        let shape = [self.len(), 1, self.height, self.width];
        self.views
            .iter()
            .map(|v| Tensor::<B, 1>::from_floats(v.as_slice(), device).reshape(shape))
            .collect()
    }

    /// `[n, 1]` label tensor
    pub fn label_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        Tensor::<B, 1>::from_floats(self.labels.as_slice(), device).reshape([self.len(), 1])
    }
}

/// Augmentation settings plus the worker pool that decodes images
pub struct ImageDataGenerator {
    augmenter: Augmenter,
    pool: Arc<ThreadPool>,
}

impl ImageDataGenerator {
    /// # Arguments
    ///
    /// * `horizontal_flip` - Mirror left/right with probability 0.5
    /// * `vertical_flip` - Mirror top/bottom with probability 0.5
    /// * `normalization` - Intensity normalization
    /// * `nb_worker` - Decoding threads
    pub fn new(
        horizontal_flip: bool,
        vertical_flip: bool,
        normalization: Normalization,
        nb_worker: usize,
    ) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(nb_worker.max(1))
            .thread_name(|i| format!("img-loader-{}", i))
            .build()?;
        Ok(Self::with_pool(
            horizontal_flip,
            vertical_flip,
            normalization,
            Arc::new(pool),
        ))
    }

    /// Builds a generator sharing an existing worker pool
    pub fn with_pool(
        horizontal_flip: bool,
        vertical_flip: bool,
        normalization: Normalization,
        pool: Arc<ThreadPool>,
    ) -> Self {
        Self {
            augmenter: Augmenter {
                horizontal_flip,
                vertical_flip,
                normalization,
            },
            pool,
        }
    }

    pub fn pool(&self) -> Arc<ThreadPool> {
        Arc::clone(&self.pool)
    }

    pub fn normalization(&self) -> Normalization {
        self.augmenter.normalization
    }

    /// Batches of single images
    pub fn flow_from_img_list(
        &self,
        paths: Vec<PathBuf>,
        labels: Vec<u8>,
        options: FlowOptions,
    ) -> Result<ImageListIterator> {
        ImageListIterator::new(paths, labels, self.augmenter, options, self.pool())
    }

    /// Batches of CC/MLO pairs, two breasts per exam
    pub fn flow_from_exam_list(
        &self,
        exams: Vec<ExamRecord>,
        options: FlowOptions,
    ) -> Result<ExamListIterator> {
        ExamListIterator::new(exams, self.augmenter, options, self.pool())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::BreastImages;
    use image::{ImageBuffer, Luma};
    use tempfile::TempDir;

    fn write_png(dir: &Path, name: &str, value: u16) -> PathBuf {
        let path = dir.join(name);
        let img: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_fn(6, 8, |x, y| Luma([value + (x + y) as u16]));
        img.save(&path).unwrap();
        path
    }

    fn generator(normalization: Normalization) -> ImageDataGenerator {
        ImageDataGenerator::new(true, true, normalization, 2).unwrap()
    }

    fn options(batch_size: usize, validation_mode: bool) -> FlowOptions {
        FlowOptions {
            target_size: (4, 3),
            target_scale: None,
            batch_size,
            validation_mode,
            ..Default::default()
        }
    }

    #[test]
    fn test_featurewise_normalization() {
        let mut data = vec![10.0, 20.0, 30.0];
        Normalization::Featurewise {
            mean: 20.0,
            std: 10.0,
        }
        .apply(&mut data);
        for (v, expected) in data.iter().zip([-1.0, 0.0, 1.0]) {
            assert!((v - expected).abs() < 1e-6);
        }

        // A zero std still divides by the epsilon
        let mut flat = vec![3.0, 3.0];
        Normalization::Featurewise { mean: 3.0, std: 0.0 }.apply(&mut flat);
        assert!(flat.iter().all(|v| v.is_finite() && *v == 0.0));
        let mut shifted = vec![3.0 + 1e-6];
        Normalization::Featurewise { mean: 3.0, std: 0.0 }.apply(&mut shifted);
        assert!(shifted[0].is_finite() && shifted[0] > 0.0);
    }

    #[test]
    fn test_samplewise_normalization() {
        let mut data = vec![1.0, 3.0, 5.0, 7.0];
        Normalization::Samplewise.apply(&mut data);
        let mean: f32 = data.iter().sum::<f32>() / 4.0;
        let var: f32 = data.iter().map(|v| v * v).sum::<f32>() / 4.0;
        assert!(mean.abs() < 1e-6);
        assert!((var - 1.0).abs() < 1e-4);

        // Constant images stay finite
        let mut flat = vec![5.0; 4];
        Normalization::Samplewise.apply(&mut flat);
        assert!(flat.iter().all(|v| v.is_finite() && v.abs() < 1e-3));
    }

    #[test]
    fn test_flips() {
        // 2 rows x 3 cols
        let mut data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        flip_horizontal(&mut data, 2, 3);
        assert_eq!(data, vec![3.0, 2.0, 1.0, 6.0, 5.0, 4.0]);

        let mut data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        flip_vertical(&mut data, 3, 3);
        assert_eq!(data, vec![7.0, 8.0, 9.0, 4.0, 5.0, 6.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_image_flow_validation_pass() {
        let dir = TempDir::new().unwrap();
        let paths: Vec<PathBuf> = (0..5)
            .map(|i| write_png(dir.path(), &format!("{i}.png"), i * 100))
            .collect();
        let gen = generator(Normalization::Featurewise {
            mean: 0.0,
            std: 1.0,
        });
        let mut flow = gen
            .flow_from_img_list(paths, vec![0, 1, 0, 0, 1], options(2, true))
            .unwrap();

        assert_eq!(flow.nb_samples(), 5);
        assert_eq!(flow.steps_per_pass(), 3);
        let first = flow.next_batch().unwrap();
        assert_eq!(first.labels, vec![0.0, 1.0]);
        assert_eq!(first.view_sizes(), vec![2]);
        // No augmentation in validation mode: first pixel is the darkest
        assert!(first.views[0][0] < first.views[0][11]);

        flow.next_batch().unwrap();
        let last = flow.next_batch().unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last.labels, vec![1.0]);
    }

    #[test]
    fn test_image_flow_rejects_mismatched_labels() {
        let gen = generator(Normalization::Samplewise);
        let err = gen
            .flow_from_img_list(vec![PathBuf::from("a.png")], vec![], options(1, false))
            .err()
            .unwrap();
        assert!(matches!(err, TrainError::InvalidValue(_)));
    }

    #[test]
    fn test_exam_flow_pairs_views() {
        let dir = TempDir::new().unwrap();
        let cc = write_png(dir.path(), "cc.png", 1000);
        let mlo = write_png(dir.path(), "mlo.png", 10);
        let exam = ExamRecord {
            subject_id: "1".to_string(),
            exam_index: 1,
            left: BreastImages {
                cc: vec![cc.clone()],
                mlo: vec![mlo.clone()],
                cancer: Some(0),
            },
            // Right breast lacks an MLO; the CC stands in
            right: BreastImages {
                cc: vec![cc],
                mlo: vec![],
                cancer: Some(1),
            },
            clinical: None,
        };
        let gen = generator(Normalization::Featurewise {
            mean: 0.0,
            std: 1.0,
        });
        let mut flow = gen
            .flow_from_exam_list(vec![exam.clone(), exam], options(2, true))
            .unwrap();
        assert_eq!(flow.nb_samples(), 4);
        assert_eq!(flow.nb_views(), 2);

        let batch = flow.next_batch().unwrap();
        assert_eq!(batch.labels, vec![0.0, 1.0, 0.0, 1.0]);
        assert_eq!(batch.view_sizes(), vec![4, 4]);
        let pixels = 12;
        // Left MLO comes from mlo.png, right MLO falls back to cc.png
        assert!(batch.views[1][0] < 100.0);
        assert!(batch.views[1][pixels] > 900.0);
    }

    /// Exams sharing one image, with the given (left, right) labels
    fn exams(dir: &Path, labels: &[(u8, u8)]) -> Vec<ExamRecord> {
        let png = write_png(dir, "breast.png", 100);
        let breast = |cancer| BreastImages {
            cc: vec![png.clone()],
            mlo: vec![png.clone()],
            cancer: Some(cancer),
        };
        labels
            .iter()
            .enumerate()
            .map(|(i, &(left, right))| ExamRecord {
                subject_id: i.to_string(),
                exam_index: 1,
                left: breast(left),
                right: breast(right),
                clinical: None,
            })
            .collect()
    }

    #[test]
    fn test_exam_flow_balances_on_exam_labels() {
        let dir = TempDir::new().unwrap();
        let list = exams(dir.path(), &[(0, 0), (0, 1), (0, 0), (0, 0)]);
        let gen = generator(Normalization::Samplewise);
        let mut flow = gen
            .flow_from_exam_list(
                list,
                FlowOptions {
                    balance_classes: 1.0,
                    shuffle: true,
                    ..options(2, false)
                },
            )
            .unwrap();

        // Only the positive exam carries weight, so every draw is that exam
        for _ in 0..5 {
            let batch = flow.next_batch().unwrap();
            assert_eq!(batch.labels, vec![0.0, 1.0, 0.0, 1.0]);
            assert_eq!(batch.view_sizes(), vec![4, 4]);
        }
    }

    #[test]
    fn test_exam_flow_skips_all_negative_batches() {
        let dir = TempDir::new().unwrap();
        let list = exams(dir.path(), &[(0, 0), (0, 0), (1, 0), (0, 0)]);
        let gen = generator(Normalization::Samplewise);
        let mut flow = gen
            .flow_from_exam_list(
                list,
                FlowOptions {
                    all_neg_skip: 1.0,
                    shuffle: true,
                    ..options(1, false)
                },
            )
            .unwrap();

        for _ in 0..6 {
            assert_eq!(flow.next_batch().unwrap().labels, vec![1.0, 0.0]);
        }
    }

    #[test]
    fn test_exam_flow_without_positives_ignores_skipping() {
        let dir = TempDir::new().unwrap();
        let list = exams(dir.path(), &[(0, 0), (0, 0), (0, 0)]);
        let gen = generator(Normalization::Samplewise);
        let mut flow = gen
            .flow_from_exam_list(
                list,
                FlowOptions {
                    all_neg_skip: 1.0,
                    balance_classes: 0.5,
                    ..options(2, false)
                },
            )
            .unwrap();

        let sizes: Vec<usize> = (0..3).map(|_| flow.next_batch().unwrap().len()).collect();
        // Unbalanced pass over 3 exams: 2 exams, then the last one
        assert_eq!(sizes, vec![4, 2, 4]);
    }

    #[test]
    fn test_training_flow_is_reproducible() {
        let dir = TempDir::new().unwrap();
        let paths: Vec<PathBuf> = (0..6)
            .map(|i| write_png(dir.path(), &format!("{i}.png"), i * 50))
            .collect();
        let labels = vec![0, 1, 0, 1, 0, 0];
        let gen = generator(Normalization::Samplewise);
        let opts = FlowOptions {
            seed: 5,
            ..options(3, false)
        };
        let mut a = gen
            .flow_from_img_list(paths.clone(), labels.clone(), opts.clone())
            .unwrap();
        let mut b = gen.flow_from_img_list(paths, labels, opts).unwrap();
        for _ in 0..3 {
            assert_eq!(a.next_batch().unwrap(), b.next_batch().unwrap());
        }
    }

    #[test]
    fn test_concat_batches() {
        let a = ImageBatch {
            views: vec![vec![1.0; 4]],
            labels: vec![0.0],
            height: 2,
            width: 2,
        };
        let b = ImageBatch {
            views: vec![vec![2.0; 8]],
            labels: vec![1.0, 0.0],
            height: 2,
            width: 2,
        };
        let merged = ImageBatch::concat(vec![a, b]).unwrap();
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.view_sizes(), vec![3]);
        assert!(ImageBatch::concat(vec![]).is_err());

        let parts = merged.chunks(2);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].labels, vec![0.0, 1.0]);
        assert_eq!(parts[1].views[0], vec![2.0; 4]);
        assert_eq!(ImageBatch::concat(parts).unwrap(), merged);
    }
}
