pub mod report;

use crate::config::{RuntimeSettings, TrainOptions, ValSize, NO_SAVE};
use crate::error::Result;
use crate::imaging::ImageExtension;
use crate::model::Architecture;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Command-line arguments for mammotrain
#[derive(Parser, Debug)]
#[command(name = "mammotrain")]
#[command(about = "Train a ResNet mammogram classifier from DICOM or PNG images")]
#[command(version)]
pub struct Cli {
    /// Directory holding the images listed in the crosswalk
    #[arg(value_name = "IMG_FOLDER")]
    pub img_folder: PathBuf,

    /// Extension of the image files
    #[arg(long, visible_alias = "ext", default_value = "dcm")]
    pub img_extension: ImageExtensionArg,

    /// Target image size after resizing
    #[arg(
        long,
        visible_alias = "is",
        num_args = 2,
        value_names = ["HEIGHT", "WIDTH"],
        default_values_t = [288u32, 224u32]
    )]
    pub img_size: Vec<u32>,

    /// Maximum pixel value after rescaling
    #[arg(long, visible_alias = "ic", default_value_t = 4095.0)]
    pub img_scale: f32,

    /// Train on CC/MLO pairs per breast
    #[arg(long, overrides_with = "no_multi_view")]
    pub multi_view: bool,

    #[arg(long, overrides_with = "multi_view")]
    pub no_multi_view: bool,

    /// Normalize with a fixed mean and standard deviation (default)
    #[arg(long, overrides_with = "no_featurewise_norm")]
    pub featurewise_norm: bool,

    /// Normalize every image by its own statistics
    #[arg(long, overrides_with = "featurewise_norm")]
    pub no_featurewise_norm: bool,

    #[arg(long, visible_alias = "feam", default_value_t = 398.5)]
    pub featurewise_mean: f32,

    #[arg(long, visible_alias = "feas", default_value_t = 627.8)]
    pub featurewise_std: f32,

    #[arg(long, visible_alias = "bs", default_value_t = 16)]
    pub batch_size: usize,

    #[arg(long, visible_alias = "spe", default_value_t = 160)]
    pub samples_per_epoch: usize,

    #[arg(long, visible_alias = "ne", default_value_t = 20)]
    pub nb_epoch: usize,

    /// Target share of positives per training batch (0 disables)
    #[arg(long, visible_alias = "bc", default_value_t = 0.0)]
    pub balance_classes: f64,

    /// Probability of skipping an all-negative training batch
    #[arg(long = "allneg-skip", default_value_t = 0.0)]
    pub all_neg_skip: f64,

    #[arg(long = "pos-class-weight", visible_alias = "pcw", default_value_t = 1.0)]
    pub pos_cls_weight: f64,

    #[arg(long, visible_alias = "nif", default_value_t = 64)]
    pub nb_init_filter: usize,

    #[arg(long, visible_alias = "ifs", default_value_t = 7)]
    pub init_filter_size: usize,

    #[arg(long, visible_alias = "ics", default_value_t = 2)]
    pub init_conv_stride: usize,

    #[arg(long = "max-pooling-size", visible_alias = "mps", default_value_t = 3)]
    pub pool_size: usize,

    #[arg(long = "max-pooling-stride", visible_alias = "mpr", default_value_t = 2)]
    pub pool_stride: usize,

    /// L2 factor on convolution kernels
    #[arg(long, visible_alias = "wd", default_value_t = 0.0001)]
    pub weight_decay: f64,

    /// Elastic net strength on the output layer
    #[arg(long, default_value_t = 1.0)]
    pub alpha: f64,

    #[arg(long, default_value_t = 0.5)]
    pub l1_ratio: f64,

    #[arg(long, visible_alias = "id", default_value_t = 0.0)]
    pub inp_dropout: f64,

    #[arg(long, visible_alias = "hd", default_value_t = 0.0)]
    pub hidden_dropout: f64,

    #[arg(long = "init-learningrate", visible_alias = "ilr", default_value_t = 0.01)]
    pub init_lr: f64,

    /// Validation fraction, or a sample count when >= 1
    #[arg(long, visible_alias = "vs", default_value_t = 0.2)]
    pub val_size: f64,

    #[arg(long, visible_alias = "lrp", default_value_t = 5)]
    pub lr_patience: usize,

    #[arg(long, visible_alias = "esp", default_value_t = 10)]
    pub es_patience: usize,

    /// Checkpoint to initialize the network from
    #[arg(long, visible_alias = "rf")]
    pub resume_from: Option<PathBuf>,

    /// Network architecture
    #[arg(long, default_value = "resnet50", value_parser = parse_net)]
    pub net: Architecture,

    /// Decode the validation set once and keep it in memory
    #[arg(long = "loadval-ram", overrides_with = "no_load_val_ram")]
    pub load_val_ram: bool,

    #[arg(long = "no-loadval-ram", overrides_with = "load_val_ram")]
    pub no_load_val_ram: bool,

    /// Exam manifest
    #[arg(
        long,
        visible_alias = "et",
        default_value = "./metadata/exams_metadata.tsv",
        overrides_with = "no_exam_tsv"
    )]
    pub exam_tsv: PathBuf,

    /// Derive breast labels from the image crosswalk alone
    #[arg(long, overrides_with = "exam_tsv")]
    pub no_exam_tsv: bool,

    /// Image crosswalk
    #[arg(long, visible_alias = "it", default_value = "./metadata/images_crosswalk.tsv")]
    pub img_tsv: PathBuf,

    /// Where the best AUROC model is saved
    #[arg(long, visible_alias = "bm", default_value = "./modelState/dm_resnet_best_model")]
    pub best_model: PathBuf,

    /// Where the final model is saved; NOSAVE skips it
    #[arg(long, visible_alias = "fm", default_value = NO_SAVE)]
    pub final_model: String,

    /// Write per-epoch metrics to this CSV file
    #[arg(long)]
    pub history_out: Option<PathBuf>,

    #[arg(long, env = "RANDOM_SEED", default_value_t = 12345)]
    pub random_seed: u64,

    /// Image decoding threads
    #[arg(long, env = "NUM_CPU_CORES", default_value_t = 4)]
    pub nb_worker: usize,

    /// Batch shards per forward pass
    #[arg(long, env = "NUM_GPU_DEVICES", default_value_t = 1)]
    pub gpu_count: usize,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Image file formats
#[derive(Debug, Clone, ValueEnum)]
pub enum ImageExtensionArg {
    Dcm,
    Png,
}

impl From<ImageExtensionArg> for ImageExtension {
    fn from(arg: ImageExtensionArg) -> Self {
        match arg {
            ImageExtensionArg::Dcm => ImageExtension::Dcm,
            ImageExtensionArg::Png => ImageExtension::Png,
        }
    }
}

fn parse_net(name: &str) -> std::result::Result<Architecture, String> {
    Architecture::from_name(name).map_err(|e| e.to_string())
}

impl Cli {
    /// Training options selected on the command line
    pub fn train_options(&self) -> Result<TrainOptions> {
        let final_model = if self.final_model == NO_SAVE {
            None
        } else {
            Some(PathBuf::from(&self.final_model))
        };
        let img_size = match self.img_size.as_slice() {
            &[height, width] => (height, width),
            other => {
                return Err(crate::error::TrainError::InvalidOption(format!(
                    "image size takes a height and a width, got {:?}",
                    other
                )))
            }
        };

        Ok(TrainOptions {
            img_extension: self.img_extension.clone().into(),
            img_size,
            img_scale: Some(self.img_scale),
            multi_view: self.multi_view,
            featurewise_norm: !self.no_featurewise_norm,
            featurewise_mean: self.featurewise_mean,
            featurewise_std: self.featurewise_std,
            batch_size: self.batch_size,
            samples_per_epoch: self.samples_per_epoch,
            nb_epoch: self.nb_epoch,
            balance_classes: self.balance_classes,
            all_neg_skip: self.all_neg_skip,
            pos_cls_weight: self.pos_cls_weight,
            nb_init_filter: self.nb_init_filter,
            init_filter_size: self.init_filter_size,
            init_conv_stride: self.init_conv_stride,
            pool_size: self.pool_size,
            pool_stride: self.pool_stride,
            weight_decay: self.weight_decay,
            alpha: self.alpha,
            l1_ratio: self.l1_ratio,
            inp_dropout: self.inp_dropout,
            hidden_dropout: self.hidden_dropout,
            init_lr: self.init_lr,
            val_size: ValSize::from_value(self.val_size)?,
            lr_patience: self.lr_patience,
            es_patience: self.es_patience,
            resume_from: self.resume_from.clone(),
            net: self.net,
            load_val_ram: self.load_val_ram,
            exam_tsv: if self.no_exam_tsv {
                None
            } else {
                Some(self.exam_tsv.clone())
            },
            img_tsv: self.img_tsv.clone(),
            best_model: self.best_model.clone(),
            final_model,
        })
    }

    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            random_seed: self.random_seed,
            nb_worker: self.nb_worker,
            gpu_count: self.gpu_count,
        }
    }
}
