//! Network construction and checkpoints
//!
//! Every architecture is a stack of residual stages on top of a strided
//! stem. Single-view networks run one trunk; multi-view networks run one
//! trunk per view (CC, MLO) and concatenate the pooled features before the
//! sigmoid output unit.

mod parallel;
mod resnet;

pub use parallel::{make_parallel, DataParallel};
pub use resnet::{
    BlockConfig, MammoResNet, MammoResNetConfig, ResNetTrunk, ResNetTrunkConfig,
};

use crate::config::TrainOptions;
use crate::error::{Result, TrainError};
use burn::config::Config;
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use log::info;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Residual block flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Two 3x3 convolutions
    Basic,
    /// 1x1, 3x3, 1x1 convolutions with a 4x wider output
    Bottleneck,
}

/// Selectable network layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "json", derive(serde::Serialize))]
#[cfg_attr(feature = "json", serde(rename_all = "lowercase"))]
pub enum Architecture {
    ResNet18,
    ResNet34,
    ResNet50,
    ResNet101,
    ResNet152,
    DmResNet14,
    DmResNet47Rb5,
    DmResNet56Rb6,
    DmResNet65Rb7,
}

impl Architecture {
    pub const ALL: [Architecture; 9] = [
        Architecture::ResNet18,
        Architecture::ResNet34,
        Architecture::ResNet50,
        Architecture::ResNet101,
        Architecture::ResNet152,
        Architecture::DmResNet14,
        Architecture::DmResNet47Rb5,
        Architecture::DmResNet56Rb6,
        Architecture::DmResNet65Rb7,
    ];

    /// Name used on the command line
    pub fn name(&self) -> &'static str {
        match self {
            Architecture::ResNet18 => "resnet18",
            Architecture::ResNet34 => "resnet34",
            Architecture::ResNet50 => "resnet50",
            Architecture::ResNet101 => "resnet101",
            Architecture::ResNet152 => "resnet152",
            Architecture::DmResNet14 => "dmresnet14",
            Architecture::DmResNet47Rb5 => "dmresnet47rb5",
            Architecture::DmResNet56Rb6 => "dmresnet56rb6",
            Architecture::DmResNet65Rb7 => "dmresnet65rb7",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        let lower = name.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.name() == lower)
            .ok_or_else(|| {
                TrainError::InvalidOption(format!("unknown network '{}'", name))
            })
    }

    /// Block flavor and number of blocks per stage
    pub fn layout(&self) -> (BlockKind, Vec<usize>) {
        use BlockKind::*;
        match self {
            Architecture::ResNet18 => (Basic, vec![2, 2, 2, 2]),
            Architecture::ResNet34 => (Basic, vec![3, 4, 6, 3]),
            Architecture::ResNet50 => (Bottleneck, vec![3, 4, 6, 3]),
            Architecture::ResNet101 => (Bottleneck, vec![3, 4, 23, 3]),
            Architecture::ResNet152 => (Bottleneck, vec![3, 8, 36, 3]),
            Architecture::DmResNet14 => (Basic, vec![2, 2, 2]),
            Architecture::DmResNet47Rb5 => (Bottleneck, vec![3; 5]),
            Architecture::DmResNet56Rb6 => (Bottleneck, vec![3; 6]),
            Architecture::DmResNet65Rb7 => (Bottleneck, vec![3; 7]),
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Penalty coefficients added to the loss
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Regularization {
    /// L2 factor on every convolution kernel
    pub weight_decay: f64,
    /// Elastic net strength on the output layer
    pub alpha: f64,
    /// Share of L1 in the elastic net
    pub l1_ratio: f64,
}

impl Default for Regularization {
    fn default() -> Self {
        Self {
            weight_decay: 0.0001,
            alpha: 1.0,
            l1_ratio: 0.5,
        }
    }
}

/// Builds single-view and multi-view networks from an architecture name
#[derive(Debug, Clone, PartialEq)]
pub struct ResNetBuilder {
    pub arch: Architecture,
    /// 1 for single images, 2 for CC/MLO pairs
    pub nb_views: usize,
    pub nb_init_filter: usize,
    pub init_filter_size: usize,
    pub init_conv_stride: usize,
    pub pool_size: usize,
    pub pool_stride: usize,
    pub inp_dropout: f64,
    pub hidden_dropout: f64,
}

impl ResNetBuilder {
    pub fn new(arch: Architecture) -> Self {
        Self {
            arch,
            nb_views: 1,
            nb_init_filter: 64,
            init_filter_size: 7,
            init_conv_stride: 2,
            pool_size: 3,
            pool_stride: 2,
            inp_dropout: 0.0,
            hidden_dropout: 0.0,
        }
    }

    /// Builder matching the network options of a training run
    pub fn from_options(options: &TrainOptions) -> Self {
        Self {
            arch: options.net,
            nb_views: if options.multi_view { 2 } else { 1 },
            nb_init_filter: options.nb_init_filter,
            init_filter_size: options.init_filter_size,
            init_conv_stride: options.init_conv_stride,
            pool_size: options.pool_size,
            pool_stride: options.pool_stride,
            inp_dropout: options.inp_dropout,
            hidden_dropout: options.hidden_dropout,
        }
    }

    /// Network configuration for the selected architecture
    pub fn config(&self) -> MammoResNetConfig {
        let (kind, repetitions) = self.arch.layout();
        let trunk = ResNetTrunkConfig::new(repetitions)
            .with_bottleneck(kind == BlockKind::Bottleneck)
            .with_nb_init_filter(self.nb_init_filter)
            .with_init_filter_size(self.init_filter_size)
            .with_init_conv_stride(self.init_conv_stride)
            .with_pool_size(self.pool_size)
            .with_pool_stride(self.pool_stride);
        MammoResNetConfig::new(trunk)
            .with_nb_views(self.nb_views)
            .with_inp_dropout(self.inp_dropout)
            .with_hidden_dropout(self.hidden_dropout)
    }

    pub fn build<B: Backend>(&self, device: &B::Device) -> MammoResNet<B> {
        self.config().init(device)
    }
}

fn recorder() -> BinFileRecorder<FullPrecisionSettings> {
    BinFileRecorder::<FullPrecisionSettings>::new()
}

/// Architecture file stored next to the weights
fn config_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".json");
    PathBuf::from(name)
}

/// Writes model weights to `path` (the recorder appends `.bin`) and the
/// network config to `path.json`
pub fn save_model<B: Backend>(
    model: &MammoResNet<B>,
    config: &MammoResNetConfig,
    path: &Path,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    config.save(config_path(path))?;
    model.clone().save_file(path.to_path_buf(), &recorder())?;
    Ok(())
}

/// Loads weights saved by [`save_model`] into a freshly built network
///
/// Fails with [`TrainError::CheckpointError`] when the checkpoint was saved
/// from a different architecture or view count than `config`.
pub fn load_model<B: Backend>(
    model: MammoResNet<B>,
    config: &MammoResNetConfig,
    path: &Path,
    device: &B::Device,
) -> Result<MammoResNet<B>> {
    let saved = MammoResNetConfig::load(config_path(path)).map_err(|e| {
        TrainError::CheckpointError(format!(
            "cannot read architecture of {}: {}",
            path.display(),
            e
        ))
    })?;
    if saved.nb_views != config.nb_views || saved.trunk.to_string() != config.trunk.to_string() {
        return Err(TrainError::CheckpointError(format!(
            "{} holds a {}-view network that does not match the selected {}-view network",
            path.display(),
            saved.nb_views,
            config.nb_views
        )));
    }

    let model = model.load_file(path.to_path_buf(), &recorder(), device)?;
    info!("Loaded model weights from {}", path.display());
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("resnet50", Architecture::ResNet50)]
    #[case("ResNet18", Architecture::ResNet18)]
    #[case("dmresnet65rb7", Architecture::DmResNet65Rb7)]
    fn test_from_name(#[case] name: &str, #[case] expected: Architecture) {
        assert_eq!(Architecture::from_name(name).unwrap(), expected);
    }

    #[test]
    fn test_unknown_name() {
        assert!(matches!(
            Architecture::from_name("vgg16"),
            Err(TrainError::InvalidOption(_))
        ));
    }

    #[test]
    fn test_names_round_trip() {
        for arch in Architecture::ALL {
            assert_eq!(Architecture::from_name(arch.name()).unwrap(), arch);
        }
    }

    #[rstest]
    #[case(Architecture::ResNet18, BlockKind::Basic, 8)]
    #[case(Architecture::ResNet34, BlockKind::Basic, 16)]
    #[case(Architecture::ResNet50, BlockKind::Bottleneck, 16)]
    #[case(Architecture::ResNet101, BlockKind::Bottleneck, 33)]
    #[case(Architecture::ResNet152, BlockKind::Bottleneck, 50)]
    #[case(Architecture::DmResNet14, BlockKind::Basic, 6)]
    #[case(Architecture::DmResNet47Rb5, BlockKind::Bottleneck, 15)]
    #[case(Architecture::DmResNet56Rb6, BlockKind::Bottleneck, 18)]
    #[case(Architecture::DmResNet65Rb7, BlockKind::Bottleneck, 21)]
    fn test_layouts(#[case] arch: Architecture, #[case] kind: BlockKind, #[case] blocks: usize) {
        let (k, reps) = arch.layout();
        assert_eq!(k, kind);
        assert_eq!(reps.iter().sum::<usize>(), blocks);
        // Depth: stem conv + convs per block + output layer
        let convs_per_block = if kind == BlockKind::Basic { 2 } else { 3 };
        let depth = 1 + blocks * convs_per_block + 1;
        let digits: String = arch
            .name()
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(|c| c.is_ascii_digit())
            .collect();
        assert_eq!(depth, digits.parse::<usize>().unwrap());
    }

    #[test]
    fn test_builder_from_options() {
        let mut options = TrainOptions::default();
        options.multi_view = true;
        options.net = Architecture::DmResNet14;
        options.nb_init_filter = 8;
        let builder = ResNetBuilder::from_options(&options);
        assert_eq!(builder.nb_views, 2);
        let config = builder.config();
        assert_eq!(config.nb_views, 2);
        assert_eq!(config.trunk.repetitions, vec![2, 2, 2]);
        assert!(!config.trunk.bottleneck);
        assert_eq!(config.trunk.nb_init_filter, 8);
    }

    fn tiny(arch: Architecture, nb_views: usize) -> MammoResNetConfig {
        ResNetBuilder {
            nb_views,
            nb_init_filter: 2,
            init_filter_size: 3,
            ..ResNetBuilder::new(arch)
        }
        .config()
    }

    #[test]
    fn test_resume_restores_outputs() {
        type TestBackend = burn::backend::NdArray<f32>;
        let device = Default::default();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("state").join("best");
        let config = tiny(Architecture::DmResNet14, 1);
        let x = || burn::tensor::Tensor::<TestBackend, 4>::ones([2, 1, 16, 16], &device);

        let trained = config.init::<TestBackend>(&device);
        save_model(&trained, &config, &path).unwrap();
        assert!(path.with_extension("bin").exists());
        assert!(dir.path().join("state").join("best.json").exists());

        let resumed = load_model(config.init::<TestBackend>(&device), &config, &path, &device).unwrap();
        let before: Vec<f32> = trained.forward(vec![x()]).into_data().to_vec().unwrap();
        let after: Vec<f32> = resumed.forward(vec![x()]).into_data().to_vec().unwrap();
        assert_eq!(before, after);
    }

    #[rstest]
    #[case(Architecture::DmResNet14, 2)]
    #[case(Architecture::ResNet18, 1)]
    fn test_resume_rejects_other_network(#[case] arch: Architecture, #[case] nb_views: usize) {
        type TestBackend = burn::backend::NdArray<f32>;
        let device = Default::default();
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("best");
        let saved = tiny(Architecture::DmResNet14, 1);
        save_model(&saved.init::<TestBackend>(&device), &saved, &path).unwrap();

        let other = tiny(arch, nb_views);
        let result = load_model(other.init::<TestBackend>(&device), &other, &path, &device);
        assert!(matches!(result, Err(TrainError::CheckpointError(_))));
    }

    #[test]
    fn test_resume_without_checkpoint_fails() {
        type TestBackend = burn::backend::NdArray<f32>;
        let device = Default::default();
        let dir = tempfile::TempDir::new().unwrap();
        let config = tiny(Architecture::DmResNet14, 1);
        let result = load_model(
            config.init::<TestBackend>(&device),
            &config,
            &dir.path().join("absent"),
            &device,
        );
        assert!(matches!(result, Err(TrainError::CheckpointError(_))));
    }
}
