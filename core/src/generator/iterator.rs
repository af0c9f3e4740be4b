use super::sampler::BatchSampler;
use super::{Augmenter, FlowOptions, ImageBatch};
use crate::error::{Result, TrainError};
use crate::metadata::ExamRecord;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::path::PathBuf;
use std::sync::Arc;

/// Endless source of image batches
pub trait BatchSource {
    /// Loads the next batch
    fn next_batch(&mut self) -> Result<ImageBatch>;

    /// Restarts the source from its first batch
    fn reset(&mut self);

    /// Samples produced by one full pass
    fn nb_samples(&self) -> usize;

    /// Batches in one full pass
    fn steps_per_pass(&self) -> usize;

    /// Image inputs per sample
    fn nb_views(&self) -> usize;
}

/// One image decode with its augmentation decided up front
#[derive(Debug, Clone)]
struct LoadJob {
    path: PathBuf,
    flip_h: bool,
    flip_v: bool,
}

fn decide(sampler: &mut BatchSampler, augmenter: &Augmenter, path: PathBuf) -> LoadJob {
    let flip_h = augmenter.horizontal_flip && sampler.coin();
    let flip_v = augmenter.vertical_flip && sampler.coin();
    LoadJob {
        path,
        flip_h,
        flip_v,
    }
}

/// Decodes every job on the worker pool, keeping job order
fn load_all(
    pool: &ThreadPool,
    augmenter: &Augmenter,
    options: &FlowOptions,
    jobs: &[LoadJob],
) -> Result<Vec<f32>> {
    let images: Vec<Vec<f32>> = pool.install(|| {
        jobs.par_iter()
            .map(|job| {
                augmenter.load(
                    &job.path,
                    options.target_size,
                    options.target_scale,
                    job.flip_h,
                    job.flip_v,
                )
            })
            .collect::<Result<Vec<_>>>()
    })?;
    Ok(images.concat())
}

/// Batches of single images with their labels
pub struct ImageListIterator {
    paths: Vec<PathBuf>,
    labels: Vec<u8>,
    sampler: BatchSampler,
    augmenter: Augmenter,
    options: FlowOptions,
    pool: Arc<ThreadPool>,
}

impl ImageListIterator {
    pub(super) fn new(
        paths: Vec<PathBuf>,
        labels: Vec<u8>,
        augmenter: Augmenter,
        options: FlowOptions,
        pool: Arc<ThreadPool>,
    ) -> Result<Self> {
        if paths.len() != labels.len() {
            return Err(TrainError::InvalidValue(format!(
                "{} image paths but {} labels",
                paths.len(),
                labels.len()
            )));
        }
        if paths.is_empty() {
            return Err(TrainError::NoSamples("image list is empty".to_string()));
        }
        let sampler = options.sampler(labels.clone());
        Ok(Self {
            paths,
            labels,
            sampler,
            augmenter,
            options,
            pool,
        })
    }
}

impl BatchSource for ImageListIterator {
    fn next_batch(&mut self) -> Result<ImageBatch> {
        let indices = self.sampler.next_indices();
        let jobs: Vec<LoadJob> = indices
            .iter()
            .map(|&i| decide(&mut self.sampler, &self.augmenter, self.paths[i].clone()))
            .collect();
        let labels = indices.iter().map(|&i| self.labels[i] as f32).collect();
        let pixels = load_all(&self.pool, &self.augmenter, &self.options, &jobs)?;

        let (height, width) = self.options.target_size;
        Ok(ImageBatch {
            views: vec![pixels],
            labels,
            height: height as usize,
            width: width as usize,
        })
    }

    fn reset(&mut self) {
        self.sampler.reset();
    }

    fn nb_samples(&self) -> usize {
        self.paths.len()
    }

    fn steps_per_pass(&self) -> usize {
        self.sampler.steps_per_pass()
    }

    fn nb_views(&self) -> usize {
        1
    }
}

/// Batches of breasts with paired CC and MLO images
///
/// Batch size counts exams; every exam contributes its left breast then
/// its right breast.
pub struct ExamListIterator {
    exams: Vec<ExamRecord>,
    sampler: BatchSampler,
    augmenter: Augmenter,
    options: FlowOptions,
    pool: Arc<ThreadPool>,
}

impl ExamListIterator {
    pub(super) fn new(
        exams: Vec<ExamRecord>,
        augmenter: Augmenter,
        options: FlowOptions,
        pool: Arc<ThreadPool>,
    ) -> Result<Self> {
        if exams.is_empty() {
            return Err(TrainError::NoSamples("exam list is empty".to_string()));
        }
        if let Some(exam) = exams.iter().find(|e| !e.is_complete()) {
            return Err(TrainError::InvalidValue(format!(
                "exam {}/{} lacks images or labels for a breast",
                exam.subject_id, exam.exam_index
            )));
        }
        let labels = exams.iter().map(|e| e.label().unwrap_or(0)).collect();
        let sampler = options.sampler(labels);
        Ok(Self {
            exams,
            sampler,
            augmenter,
            options,
            pool,
        })
    }
}

impl BatchSource for ExamListIterator {
    fn next_batch(&mut self) -> Result<ImageBatch> {
        let indices = self.sampler.next_indices();
        let mut cc_jobs = Vec::with_capacity(indices.len() * 2);
        let mut mlo_jobs = Vec::with_capacity(indices.len() * 2);
        let mut labels = Vec::with_capacity(indices.len() * 2);

        for &i in &indices {
            let exam = &self.exams[i];
            for breast in [&exam.left, &exam.right] {
                let cc = breast.cc_or_fallback();
                let mlo = breast.mlo_or_fallback();
                let cc_path = cc[self.sampler.choose(cc.len())].clone();
                let mlo_path = mlo[self.sampler.choose(mlo.len())].clone();
                cc_jobs.push(decide(&mut self.sampler, &self.augmenter, cc_path));
                mlo_jobs.push(decide(&mut self.sampler, &self.augmenter, mlo_path));
                labels.push(breast.cancer.unwrap_or(0) as f32);
            }
        }

        let cc = load_all(&self.pool, &self.augmenter, &self.options, &cc_jobs)?;
        let mlo = load_all(&self.pool, &self.augmenter, &self.options, &mlo_jobs)?;

        let (height, width) = self.options.target_size;
        Ok(ImageBatch {
            views: vec![cc, mlo],
            labels,
            height: height as usize,
            width: width as usize,
        })
    }

    fn reset(&mut self) {
        self.sampler.reset();
    }

    fn nb_samples(&self) -> usize {
        self.exams.len() * 2
    }

    fn steps_per_pass(&self) -> usize {
        self.sampler.steps_per_pass()
    }

    fn nb_views(&self) -> usize {
        2
    }
}
