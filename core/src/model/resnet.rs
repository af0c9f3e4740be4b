use super::Regularization;
use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Initializer, Linear, LinearConfig,
        PaddingConfig2d, Relu,
    },
    prelude::*,
    tensor::activation::sigmoid,
};

/// Output channels of a bottleneck block relative to its inner width
const BOTTLENECK_EXPANSION: usize = 4;

fn he_normal() -> Initializer {
    Initializer::KaimingNormal {
        gain: (2.0_f64).sqrt(),
        fan_out_only: false,
    }
}

fn conv(in_planes: usize, out_planes: usize, kernel: usize, stride: usize) -> Conv2dConfig {
    Conv2dConfig::new([in_planes, out_planes], [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(kernel / 2, kernel / 2))
        .with_bias(false)
        .with_initializer(he_normal())
}

/// Image classifier with one residual trunk per view and a single logit
#[derive(Module, Debug)]
pub struct MammoResNet<B: Backend> {
    trunks: Vec<ResNetTrunk<B>>,
    inp_dropout: Dropout,
    hidden_dropout: Dropout,
    fc: Linear<B>,
}

impl<B: Backend> MammoResNet<B> {
    /// Logits of shape `[batch, 1]`
    ///
    /// `views` holds one `[batch, 1, height, width]` tensor per trunk, in
    /// trunk order (CC then MLO for multi-view networks).
    pub fn forward(&self, views: Vec<Tensor<B, 4>>) -> Tensor<B, 2> {
        let features: Vec<Tensor<B, 2>> = self
            .trunks
            .iter()
            .zip(views)
            .map(|(trunk, x)| trunk.forward(self.inp_dropout.forward(x)))
            .collect();
        let x = self.hidden_dropout.forward(Tensor::cat(features, 1));
        self.fc.forward(x)
    }

    /// Positive class probabilities of shape `[batch, 1]`
    pub fn forward_proba(&self, views: Vec<Tensor<B, 4>>) -> Tensor<B, 2> {
        sigmoid(self.forward(views))
    }

    pub fn nb_views(&self) -> usize {
        self.trunks.len()
    }

    /// Weight penalty added to the loss
    ///
    /// L2 on every convolution kernel scaled by `weight_decay`, plus an
    /// elastic net on the output layer weights.
    pub fn penalty(&self, reg: &Regularization) -> Tensor<B, 1> {
        let fc_weight = self.fc.weight.val();
        let mut total = Tensor::<B, 1>::zeros([1], &fc_weight.device());

        if reg.weight_decay > 0.0 {
            for w in self.trunks.iter().flat_map(ResNetTrunk::conv_weights) {
                total = total + (w.clone() * w).sum().mul_scalar(reg.weight_decay);
            }
        }
        if reg.alpha > 0.0 {
            let l1 = fc_weight.clone().abs().sum().mul_scalar(reg.l1_ratio);
            let l2 = (fc_weight.clone() * fc_weight)
                .sum()
                .mul_scalar(1.0 - reg.l1_ratio);
            total = total + (l1 + l2).mul_scalar(reg.alpha);
        }
        total
    }
}

#[derive(Config, Debug)]
pub struct MammoResNetConfig {
    pub trunk: ResNetTrunkConfig,
    #[config(default = 1)]
    pub nb_views: usize,
    #[config(default = 0.0)]
    pub inp_dropout: f64,
    #[config(default = 0.0)]
    pub hidden_dropout: f64,
}

impl MammoResNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> MammoResNet<B> {
        let nb_views = self.nb_views.max(1);
        MammoResNet {
            trunks: (0..nb_views).map(|_| self.trunk.init(device)).collect(),
            inp_dropout: DropoutConfig::new(self.inp_dropout).init(),
            hidden_dropout: DropoutConfig::new(self.hidden_dropout).init(),
            fc: LinearConfig::new(self.trunk.nb_features() * nb_views, 1)
                .with_initializer(he_normal())
                .init(device),
        }
    }
}

/// Stem, residual stages and global average pooling for one view
#[derive(Module, Debug)]
pub struct ResNetTrunk<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    activation: Relu,
    /// Zero border added before the unpadded max pool
    pool_pad: usize,
    maxpool: MaxPool2d,
    stages: Vec<Stage<B>>,
    avgpool: AdaptiveAvgPool2d,
}

impl<B: Backend> ResNetTrunk<B> {
    /// Pooled features of shape `[batch, nb_features]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(x);
        let x = self.bn1.forward(x);
        let x = self.activation.forward(x);
        // Post-ReLU activations are >= 0, so a zero border never wins the max
        let x = match self.pool_pad {
            0 => x,
            p => x.pad((p, p, p, p), 0.0),
        };
        let mut x = self.maxpool.forward(x);

        for stage in &self.stages {
            x = stage.forward(x);
        }

        let x = self.avgpool.forward(x);
        x.flatten(1, 3)
    }

    fn conv_weights(&self) -> Vec<Tensor<B, 4>> {
        let mut weights = vec![self.conv1.weight.val()];
        for block in self.stages.iter().flat_map(|s| s.blocks.iter()) {
            weights.extend(block.conv_weights());
        }
        weights
    }
}

#[derive(Config, Debug)]
pub struct ResNetTrunkConfig {
    /// Blocks per stage
    pub repetitions: Vec<usize>,
    #[config(default = false)]
    pub bottleneck: bool,
    #[config(default = 64)]
    pub nb_init_filter: usize,
    #[config(default = 7)]
    pub init_filter_size: usize,
    #[config(default = 2)]
    pub init_conv_stride: usize,
    #[config(default = 3)]
    pub pool_size: usize,
    #[config(default = 2)]
    pub pool_stride: usize,
}

impl ResNetTrunkConfig {
    fn expansion(&self) -> usize {
        if self.bottleneck {
            BOTTLENECK_EXPANSION
        } else {
            1
        }
    }

    /// Width of the pooled feature vector
    pub fn nb_features(&self) -> usize {
        let last_stage = self.repetitions.len().saturating_sub(1);
        self.nb_init_filter * (1 << last_stage) * self.expansion()
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNetTrunk<B> {
        let pool_pad = self.pool_size.saturating_sub(1) / 2;
        let mut in_planes = self.nb_init_filter;
        let mut stages = Vec::with_capacity(self.repetitions.len());
        for (i, &blocks) in self.repetitions.iter().enumerate() {
            let planes = self.nb_init_filter << i;
            let stride = if i == 0 { 1 } else { 2 };
            let mut stage_blocks = Vec::with_capacity(blocks);
            for b in 0..blocks {
                let block = BlockConfig::new(in_planes, planes)
                    .with_stride(if b == 0 { stride } else { 1 })
                    .with_bottleneck(self.bottleneck)
                    .init(device);
                in_planes = planes * self.expansion();
                stage_blocks.push(block);
            }
            stages.push(Stage {
                blocks: stage_blocks,
            });
        }

        ResNetTrunk {
            conv1: conv(1, self.nb_init_filter, self.init_filter_size, self.init_conv_stride)
                .init(device),
            bn1: BatchNormConfig::new(self.nb_init_filter).init(device),
            activation: Relu::new(),
            pool_pad,
            maxpool: MaxPool2dConfig::new([self.pool_size, self.pool_size])
                .with_strides([self.pool_stride, self.pool_stride])
                .init(),
            stages,
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }
}

#[derive(Module, Debug)]
struct Stage<B: Backend> {
    blocks: Vec<Block<B>>,
}

impl<B: Backend> Stage<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }
}

/// Residual block, basic or bottleneck
///
/// Basic blocks use `conv1`/`conv2` as 3x3 convolutions. Bottleneck blocks
/// use `conv1` and `conv3` as 1x1 reductions around a 3x3 `conv2`.
#[derive(Module, Debug)]
struct Block<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B, 2>,
    conv3: Option<Conv2d<B>>,
    bn3: Option<BatchNorm<B, 2>>,
    shortcut: Option<Shortcut<B>>,
    activation: Relu,
}

impl<B: Backend> Block<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.shortcut {
            Some(shortcut) => shortcut.forward(x.clone()),
            None => x.clone(),
        };

        let x = self.conv1.forward(x);
        let x = self.bn1.forward(x);
        let x = self.activation.forward(x);

        let x = self.conv2.forward(x);
        let mut x = self.bn2.forward(x);

        if let (Some(conv3), Some(bn3)) = (&self.conv3, &self.bn3) {
            x = self.activation.forward(x);
            x = bn3.forward(conv3.forward(x));
        }

        self.activation.forward(x + identity)
    }

    fn conv_weights(&self) -> Vec<Tensor<B, 4>> {
        let mut weights = vec![self.conv1.weight.val(), self.conv2.weight.val()];
        if let Some(conv3) = &self.conv3 {
            weights.push(conv3.weight.val());
        }
        if let Some(shortcut) = &self.shortcut {
            weights.push(shortcut.conv.weight.val());
        }
        weights
    }
}

#[derive(Config, Debug)]
pub struct BlockConfig {
    /// Input channels
    pub in_planes: usize,
    /// Inner width; the output is 4x wider for bottleneck blocks
    pub planes: usize,
    #[config(default = 1)]
    pub stride: usize,
    #[config(default = false)]
    pub bottleneck: bool,
}

impl BlockConfig {
    fn init<B: Backend>(&self, device: &B::Device) -> Block<B> {
        let out_planes = if self.bottleneck {
            self.planes * BOTTLENECK_EXPANSION
        } else {
            self.planes
        };
        let shortcut = (self.stride != 1 || self.in_planes != out_planes).then(|| Shortcut {
            conv: conv(self.in_planes, out_planes, 1, self.stride).init(device),
            bn: BatchNormConfig::new(out_planes).init(device),
        });

        if self.bottleneck {
            Block {
                conv1: conv(self.in_planes, self.planes, 1, self.stride).init(device),
                bn1: BatchNormConfig::new(self.planes).init(device),
                conv2: conv(self.planes, self.planes, 3, 1).init(device),
                bn2: BatchNormConfig::new(self.planes).init(device),
                conv3: Some(conv(self.planes, out_planes, 1, 1).init(device)),
                bn3: Some(BatchNormConfig::new(out_planes).init(device)),
                shortcut,
                activation: Relu::new(),
            }
        } else {
            Block {
                conv1: conv(self.in_planes, self.planes, 3, self.stride).init(device),
                bn1: BatchNormConfig::new(self.planes).init(device),
                conv2: conv(self.planes, self.planes, 3, 1).init(device),
                bn2: BatchNormConfig::new(self.planes).init(device),
                conv3: None,
                bn3: None,
                shortcut,
                activation: Relu::new(),
            }
        }
    }
}

/// 1x1 projection used when a block changes width or resolution
#[derive(Module, Debug)]
struct Shortcut<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> Shortcut<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Architecture, ResNetBuilder};
    use burn::backend::{Autodiff, NdArray};
    use rstest::rstest;

    type TestBackend = NdArray<f32>;

    fn tiny(arch: Architecture, nb_views: usize) -> ResNetBuilder {
        ResNetBuilder {
            nb_views,
            nb_init_filter: 2,
            init_filter_size: 3,
            ..ResNetBuilder::new(arch)
        }
    }

    fn input(batch: usize, size: usize) -> Tensor<TestBackend, 4> {
        Tensor::ones([batch, 1, size, size], &Default::default())
    }

    #[rstest]
    #[case(Architecture::ResNet18, 16)]
    #[case(Architecture::DmResNet14, 8)]
    #[case(Architecture::ResNet50, 64)]
    #[case(Architecture::DmResNet47Rb5, 128)]
    fn test_single_view_output_shape(#[case] arch: Architecture, #[case] features: usize) {
        let device = Default::default();
        let builder = tiny(arch, 1);
        assert_eq!(builder.config().trunk.nb_features(), features);

        let model = builder.build::<TestBackend>(&device);
        let out = model.forward(vec![input(3, 64)]);
        assert_eq!(out.dims(), [3, 1]);
    }

    #[test]
    fn test_multi_view_output_shape() {
        let device = Default::default();
        let model = tiny(Architecture::DmResNet14, 2).build::<TestBackend>(&device);
        assert_eq!(model.nb_views(), 2);
        let out = model.forward_proba(vec![input(2, 32), input(2, 32)]);
        assert_eq!(out.dims(), [2, 1]);
        let values: Vec<f32> = out.into_data().to_vec().unwrap();
        assert!(values.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_penalty() {
        let device = Default::default();
        let model = tiny(Architecture::DmResNet14, 1).build::<TestBackend>(&device);

        let none = Regularization {
            weight_decay: 0.0,
            alpha: 0.0,
            l1_ratio: 0.5,
        };
        let zero: f32 = model.penalty(&none).into_scalar();
        assert_eq!(zero, 0.0);

        let decay_only: f32 = model
            .penalty(&Regularization {
                weight_decay: 1e-4,
                ..none
            })
            .into_scalar();
        let full: f32 = model.penalty(&Regularization::default()).into_scalar();
        assert!(decay_only > 0.0);
        assert!(full > decay_only);

        // Pure L1 on the output layer equals the sum of absolute weights
        let l1: f32 = model
            .penalty(&Regularization {
                weight_decay: 0.0,
                alpha: 1.0,
                l1_ratio: 1.0,
            })
            .into_scalar();
        let expected: f32 = model.fc.weight.val().abs().sum().into_scalar();
        assert!((l1 - expected).abs() < 1e-5);
    }

    #[test]
    fn test_backward_reaches_stem_and_head() {
        type TrainBackend = Autodiff<NdArray<f32>>;
        let device = Default::default();
        let model = tiny(Architecture::DmResNet14, 1).build::<TrainBackend>(&device);
        assert_eq!(model.trunks[0].pool_pad, 1);

        let x = Tensor::<TrainBackend, 4>::random(
            [2, 1, 16, 12],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );
        let loss = model.forward(vec![x]).sum() + model.penalty(&Regularization::default()).sum();
        let grads = loss.backward();

        let stem = model.trunks[0].conv1.weight.grad(&grads).unwrap();
        assert_eq!(stem.dims(), [2, 1, 3, 3]);
        assert!(model.fc.weight.grad(&grads).is_some());
    }

    #[test]
    fn test_padded_pool_keeps_output_size() {
        let device = Default::default();
        let model = tiny(Architecture::DmResNet14, 1).build::<TestBackend>(&device);
        let trunk = &model.trunks[0];
        let x = input(1, 16);
        let x = trunk.activation.forward(trunk.bn1.forward(trunk.conv1.forward(x)));
        let pooled = trunk.maxpool.forward(x.pad((1, 1, 1, 1), 0.0));
        // 16 -> conv stride 2 -> 8 -> pool 3/2 with a 1 pixel border -> 4
        assert_eq!(pooled.dims(), [1, 2, 4, 4]);
    }
}
