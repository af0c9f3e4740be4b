//! Run configuration
//!
//! [`TrainOptions`] carries every hyperparameter of a training run, with
//! defaults matching the command-line defaults. [`RuntimeSettings`] holds
//! the values normally taken from the environment (seed, worker and
//! device counts).

use crate::error::{Result, TrainError};
use crate::generator::Normalization;
use crate::imaging::ImageExtension;
use crate::model::Architecture;
use crate::training::ClassWeights;
use std::path::PathBuf;

/// Sentinel accepted by `--final-model` meaning "do not save"
pub const NO_SAVE: &str = "NOSAVE";

/// Size of the validation partition
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "json", derive(serde::Serialize))]
pub enum ValSize {
    /// Fraction of the samples, in (0, 1)
    Fraction(f64),
    /// Absolute number of samples
    Count(usize),
}

impl ValSize {
    /// Interprets a raw `--val-size` value
    ///
    /// Values below 1 are fractions, anything else is truncated to a count.
    pub fn from_value(value: f64) -> Result<Self> {
        if !value.is_finite() || value <= 0.0 {
            return Err(TrainError::InvalidOption(format!(
                "val size must be positive, got {}",
                value
            )));
        }
        if value < 1.0 {
            Ok(ValSize::Fraction(value))
        } else {
            Ok(ValSize::Count(value as usize))
        }
    }

    /// Number of test samples out of `n`
    pub fn test_count(&self, n: usize) -> usize {
        match *self {
            ValSize::Fraction(f) => (f * n as f64).ceil() as usize,
            ValSize::Count(k) => k,
        }
    }
}

/// Hyperparameters of a training run
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "json", derive(serde::Serialize))]
pub struct TrainOptions {
    /// Extension of the image files under the image folder
    pub img_extension: ImageExtension,
    /// Target (height, width) after resizing
    pub img_size: (u32, u32),
    /// Maximum pixel value after rescaling; `None` keeps raw intensities
    pub img_scale: Option<f32>,
    /// Feed CC/MLO pairs per breast instead of single images
    pub multi_view: bool,
    pub featurewise_norm: bool,
    pub featurewise_mean: f32,
    pub featurewise_std: f32,
    pub batch_size: usize,
    pub samples_per_epoch: usize,
    pub nb_epoch: usize,
    /// Target share of positives per training batch (0 disables balancing)
    pub balance_classes: f64,
    /// Probability of discarding an all-negative training batch
    pub all_neg_skip: f64,
    pub pos_cls_weight: f64,
    pub nb_init_filter: usize,
    pub init_filter_size: usize,
    pub init_conv_stride: usize,
    pub pool_size: usize,
    pub pool_stride: usize,
    pub weight_decay: f64,
    pub alpha: f64,
    pub l1_ratio: f64,
    pub inp_dropout: f64,
    pub hidden_dropout: f64,
    pub init_lr: f64,
    pub val_size: ValSize,
    pub lr_patience: usize,
    pub es_patience: usize,
    pub resume_from: Option<PathBuf>,
    pub net: Architecture,
    /// Decode the whole validation set once and keep it in memory
    pub load_val_ram: bool,
    pub exam_tsv: Option<PathBuf>,
    pub img_tsv: PathBuf,
    pub best_model: PathBuf,
    pub final_model: Option<PathBuf>,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            img_extension: ImageExtension::Dcm,
            img_size: (288, 224),
            img_scale: Some(4095.0),
            multi_view: false,
            featurewise_norm: true,
            featurewise_mean: 398.5,
            featurewise_std: 627.8,
            batch_size: 16,
            samples_per_epoch: 160,
            nb_epoch: 20,
            balance_classes: 0.0,
            all_neg_skip: 0.0,
            pos_cls_weight: 1.0,
            nb_init_filter: 64,
            init_filter_size: 7,
            init_conv_stride: 2,
            pool_size: 3,
            pool_stride: 2,
            weight_decay: 0.0001,
            alpha: 1.0,
            l1_ratio: 0.5,
            inp_dropout: 0.0,
            hidden_dropout: 0.0,
            init_lr: 0.01,
            val_size: ValSize::Fraction(0.2),
            lr_patience: 5,
            es_patience: 10,
            resume_from: None,
            net: Architecture::ResNet50,
            load_val_ram: false,
            exam_tsv: Some(PathBuf::from("./metadata/exams_metadata.tsv")),
            img_tsv: PathBuf::from("./metadata/images_crosswalk.tsv"),
            best_model: PathBuf::from("./modelState/dm_resnet_best_model"),
            final_model: None,
        }
    }
}

impl TrainOptions {
    /// Checks that every option lies in its accepted range
    pub fn validate(&self) -> Result<()> {
        fn check(ok: bool, message: impl FnOnce() -> String) -> Result<()> {
            if ok {
                Ok(())
            } else {
                Err(TrainError::InvalidOption(message()))
            }
        }
        fn unit(name: &str, value: f64) -> Result<()> {
            check((0.0..=1.0).contains(&value), || {
                format!("{} must lie in [0, 1], got {}", name, value)
            })
        }

        check(self.img_size.0 > 0 && self.img_size.1 > 0, || {
            format!("image size must be positive, got {:?}", self.img_size)
        })?;
        if let Some(scale) = self.img_scale {
            check(scale > 0.0, || format!("image scale must be positive, got {}", scale))?;
        }
        check(self.featurewise_std > 0.0, || {
            format!("featurewise std must be positive, got {}", self.featurewise_std)
        })?;
        check(self.batch_size > 0, || "batch size must be positive".to_string())?;
        check(self.samples_per_epoch > 0, || {
            "samples per epoch must be positive".to_string()
        })?;
        check(self.nb_epoch > 0, || "number of epochs must be positive".to_string())?;
        unit("balance classes", self.balance_classes)?;
        unit("all-negative skip", self.all_neg_skip)?;
        unit("l1 ratio", self.l1_ratio)?;
        check((0.0..1.0).contains(&self.inp_dropout), || {
            format!("input dropout must lie in [0, 1), got {}", self.inp_dropout)
        })?;
        check((0.0..1.0).contains(&self.hidden_dropout), || {
            format!("hidden dropout must lie in [0, 1), got {}", self.hidden_dropout)
        })?;
        check(self.pos_cls_weight > 0.0, || {
            format!("positive class weight must be positive, got {}", self.pos_cls_weight)
        })?;
        check(self.weight_decay >= 0.0 && self.alpha >= 0.0, || {
            "weight decay and alpha must be non-negative".to_string()
        })?;
        check(self.init_lr > 0.0, || {
            format!("learning rate must be positive, got {}", self.init_lr)
        })?;
        check(
            self.nb_init_filter > 0
                && self.init_filter_size > 0
                && self.init_conv_stride > 0
                && self.pool_size > 0
                && self.pool_stride > 0,
            || "filter, stride and pooling sizes must be positive".to_string(),
        )?;
        if let ValSize::Fraction(f) = self.val_size {
            check(f > 0.0 && f < 1.0, || {
                format!("val size fraction must lie in (0, 1), got {}", f)
            })?;
        }
        Ok(())
    }

    /// Normalization applied by the image generators
    pub fn normalization(&self) -> Normalization {
        if self.featurewise_norm {
            Normalization::Featurewise {
                mean: self.featurewise_mean,
                std: self.featurewise_std,
            }
        } else {
            Normalization::Samplewise
        }
    }

    /// Per-class loss weights
    pub fn class_weights(&self) -> ClassWeights {
        ClassWeights::new(1.0, self.pos_cls_weight)
    }
}

/// Settings read from the environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "json", derive(serde::Serialize))]
pub struct RuntimeSettings {
    /// `RANDOM_SEED`
    pub random_seed: u64,
    /// `NUM_CPU_CORES`: image decoding threads
    pub nb_worker: usize,
    /// `NUM_GPU_DEVICES`: number of batch shards
    pub gpu_count: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            random_seed: 12345,
            nb_worker: 4,
            gpu_count: 1,
        }
    }
}

impl RuntimeSettings {
    pub fn validate(&self) -> Result<()> {
        if self.nb_worker == 0 || self.gpu_count == 0 {
            return Err(TrainError::InvalidOption(format!(
                "worker and device counts must be positive, got {} and {}",
                self.nb_worker, self.gpu_count
            )));
        }
        Ok(())
    }
}
