use super::callbacks::{Callback, EpochContext, TrainingControl};
use super::history::{EpochLogs, TrainingHistory};
use super::metrics::{roc_auc, weighted_bce, ClassWeights, ConfusionCounts};
use crate::config::TrainOptions;
use crate::error::{Result, TrainError};
use crate::generator::{BatchSource, ImageBatch};
use crate::model::{DataParallel, MammoResNet, Regularization};
use burn::module::AutodiffModule;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{GradientsParams, Optimizer, SgdConfig};
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};
use log::{debug, info};
use std::time::Instant;

const SGD_MOMENTUM: f64 = 0.9;

/// Loop settings of [`fit`]
#[derive(Debug, Clone, PartialEq)]
pub struct FitOptions {
    pub nb_epoch: usize,
    /// Training samples drawn per epoch
    pub samples_per_epoch: usize,
    /// Chunk size when evaluating a preloaded validation set
    pub batch_size: usize,
    pub init_lr: f64,
    pub class_weights: ClassWeights,
    pub regularization: Regularization,
}

impl FitOptions {
    pub fn from_options(options: &TrainOptions) -> Self {
        Self {
            nb_epoch: options.nb_epoch,
            samples_per_epoch: options.samples_per_epoch,
            batch_size: options.batch_size,
            init_lr: options.init_lr,
            class_weights: options.class_weights(),
            regularization: Regularization {
                weight_decay: options.weight_decay,
                alpha: options.alpha,
                l1_ratio: options.l1_ratio,
            },
        }
    }
}

/// Validation data of a run
pub enum ValidationSet {
    /// Decoded once, evaluated in chunks every epoch
    Preloaded(ImageBatch),
    /// Decoded batch by batch, one full pass per epoch
    Flow(Box<dyn BatchSource>),
}

impl ValidationSet {
    pub fn nb_samples(&self) -> usize {
        match self {
            ValidationSet::Preloaded(batch) => batch.len(),
            ValidationSet::Flow(flow) => flow.nb_samples(),
        }
    }
}

/// Loss, probabilities and labels of one validation pass
#[derive(Debug, Clone, Default)]
struct Evaluation {
    loss: f64,
    counts: ConfusionCounts,
    scores: Vec<f32>,
    labels: Vec<f32>,
}

fn to_vec<B: Backend>(tensor: Tensor<B, 2>) -> Vec<f32> {
    tensor.into_data().iter::<f32>().collect()
}

/// Scores the validation set with an inference copy of the model
///
/// Class weights only apply to training; the validation loss is the plain
/// cross entropy plus the weight penalty.
fn evaluate<B: Backend>(
    model: &MammoResNet<B>,
    validation: &mut ValidationSet,
    options: &FitOptions,
    parallel: DataParallel,
    device: &B::Device,
) -> Result<Evaluation> {
    let penalty: f64 = model
        .penalty(&options.regularization)
        .into_scalar()
        .elem::<f64>();
    let unweighted = ClassWeights::default();
    let mut eval = Evaluation::default();
    let mut loss_sum = 0.0;

    let mut score = |batch: &ImageBatch| {
        let logits = parallel.forward(model, batch.view_tensors::<B>(device));
        let targets = batch.label_tensor::<B>(device);
        let loss: f64 = weighted_bce(logits.clone(), targets, &unweighted)
            .into_scalar()
            .elem::<f64>();
        loss_sum += loss * batch.len() as f64;

        let probs = to_vec(sigmoid(logits));
        eval.counts.update(&probs, &batch.labels);
        eval.scores.extend(probs);
        eval.labels.extend_from_slice(&batch.labels);
    };

    match validation {
        ValidationSet::Preloaded(all) => {
            for batch in all.chunks(options.batch_size) {
                score(&batch);
            }
        }
        ValidationSet::Flow(flow) => {
            flow.reset();
            for _ in 0..flow.steps_per_pass() {
                let batch = flow.next_batch()?;
                score(&batch);
            }
        }
    }

    if eval.labels.is_empty() {
        return Err(TrainError::NoSamples("validation set is empty".to_string()));
    }
    eval.loss = loss_sum / eval.labels.len() as f64 + penalty;
    Ok(eval)
}

/// Draws training batches until `samples_per_epoch` samples were seen
///
/// Returns the updated model, the sample-weighted mean loss and the
/// confusion counts of the batches.
fn train_epoch<B, O>(
    mut model: MammoResNet<B>,
    optim: &mut O,
    train: &mut dyn BatchSource,
    options: &FitOptions,
    lr: f64,
    parallel: DataParallel,
    device: &B::Device,
) -> Result<(MammoResNet<B>, f64, ConfusionCounts)>
where
    B: AutodiffBackend,
    O: Optimizer<MammoResNet<B>, B>,
{
    let mut seen = 0;
    let mut loss_sum = 0.0;
    let mut counts = ConfusionCounts::default();
    let mut step = 0;

    while seen < options.samples_per_epoch {
        let batch = train.next_batch()?;
        if batch.is_empty() {
            return Err(TrainError::NoSamples(
                "training flow returned an empty batch".to_string(),
            ));
        }

        let targets = batch.label_tensor::<B>(device);
        let logits = parallel.forward(&model, batch.view_tensors::<B>(device));
        let loss = weighted_bce(logits.clone(), targets, &options.class_weights)
            + model.penalty(&options.regularization);

        let loss_value: f64 = loss.clone().into_scalar().elem::<f64>();
        counts.update(&to_vec(sigmoid(logits.inner())), &batch.labels);

        let grads = GradientsParams::from_grads(loss.backward(), &model);
        model = optim.step(lr, model, grads);

        seen += batch.len();
        loss_sum += loss_value * batch.len() as f64;
        step += 1;
        debug!(
            "step {}: loss={:.4} ({}/{})",
            step, loss_value, seen, options.samples_per_epoch
        );
    }

    Ok((model, loss_sum / seen as f64, counts))
}

/// Trains `model` and returns it with the per-epoch history
///
/// After each epoch the callbacks run in order; any of them may change the
/// learning rate or stop training.
pub fn fit<B: AutodiffBackend>(
    mut model: MammoResNet<B>,
    train: &mut dyn BatchSource,
    validation: &mut ValidationSet,
    callbacks: &mut [Box<dyn Callback<MammoResNet<B>>>],
    options: &FitOptions,
    parallel: DataParallel,
    device: &B::Device,
) -> Result<(MammoResNet<B>, TrainingHistory)> {
    let mut optim = SgdConfig::new()
        .with_momentum(Some(MomentumConfig {
            momentum: SGD_MOMENTUM,
            dampening: 0.,
            nesterov: true,
        }))
        .init::<B, MammoResNet<B>>();
    let mut control = TrainingControl::new(options.init_lr);
    let mut history = TrainingHistory::new();

    for callback in callbacks.iter_mut() {
        callback.on_train_begin(&mut control)?;
    }

    for epoch in 1..=options.nb_epoch {
        let started = Instant::now();
        let lr = control.lr;

        let (trained, loss, counts) =
            train_epoch(model, &mut optim, train, options, lr, parallel, device)?;
        model = trained;

        let eval = evaluate(&model.valid(), validation, options, parallel, device)?;

        let logs = EpochLogs {
            epoch,
            loss,
            sensitivity: counts.sensitivity(),
            specificity: counts.specificity(),
            val_loss: eval.loss,
            val_sensitivity: eval.counts.sensitivity(),
            val_specificity: eval.counts.specificity(),
            val_auc: roc_auc(&eval.scores, &eval.labels),
            lr,
        };
        info!(
            "Epoch {}/{} ({:.1}s): loss={:.4} sensitivity={:.4} specificity={:.4} \
             val_loss={:.4} val_sensitivity={:.4} val_specificity={:.4}",
            epoch,
            options.nb_epoch,
            started.elapsed().as_secs_f64(),
            logs.loss,
            logs.sensitivity,
            logs.specificity,
            logs.val_loss,
            logs.val_sensitivity,
            logs.val_specificity
        );

        let ctx = EpochContext {
            logs: &logs,
            val_scores: &eval.scores,
            val_labels: &eval.labels,
        };
        for callback in callbacks.iter_mut() {
            callback.on_epoch_end(&ctx, &model, &mut control)?;
        }
        history.push(logs);

        if control.stop {
            history.set_stopped_early(true);
            break;
        }
    }

    for callback in callbacks.iter_mut() {
        callback.on_train_end(&model)?;
    }
    Ok((model, history))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{make_parallel, Architecture, ResNetBuilder};
    use crate::training::{EarlyStopping, ReduceLrOnPlateau};
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray<f32>>;

    /// Fixed synthetic batches: positives are bright, negatives dark
    struct SyntheticSource {
        batch_size: usize,
        cursor: usize,
        total: usize,
        resets: usize,
    }

    impl SyntheticSource {
        fn new(batch_size: usize, total: usize) -> Self {
            Self {
                batch_size,
                cursor: 0,
                total,
                resets: 0,
            }
        }
    }

    impl BatchSource for SyntheticSource {
        fn next_batch(&mut self) -> Result<ImageBatch> {
            let n = self.batch_size.min(self.total - self.cursor).max(1);
            let labels: Vec<f32> = (0..n)
                .map(|i| ((self.cursor + i) % 2) as f32)
                .collect();
            self.cursor = (self.cursor + n) % self.total;
            let view = labels
                .iter()
                .flat_map(|&y| vec![y * 2.0 - 1.0; 16 * 16])
                .collect();
            Ok(ImageBatch {
                views: vec![view],
                labels,
                height: 16,
                width: 16,
            })
        }

        fn reset(&mut self) {
            self.cursor = 0;
            self.resets += 1;
        }

        fn nb_samples(&self) -> usize {
            self.total
        }

        fn steps_per_pass(&self) -> usize {
            self.total.div_ceil(self.batch_size)
        }

        fn nb_views(&self) -> usize {
            1
        }
    }

    fn tiny_model() -> MammoResNet<TestBackend> {
        ResNetBuilder {
            nb_init_filter: 2,
            init_filter_size: 3,
            ..ResNetBuilder::new(Architecture::DmResNet14)
        }
        .build::<TestBackend>(&Default::default())
    }

    fn fit_options(nb_epoch: usize) -> FitOptions {
        FitOptions {
            nb_epoch,
            samples_per_epoch: 6,
            batch_size: 4,
            init_lr: 0.01,
            class_weights: ClassWeights::new(1.0, 2.0),
            regularization: Regularization::default(),
        }
    }

    #[test]
    fn test_fit_records_every_epoch() {
        let device = Default::default();
        let mut train = SyntheticSource::new(4, 8);
        let mut validation = ValidationSet::Flow(Box::new(SyntheticSource::new(3, 6)));
        let mut callbacks: Vec<Box<dyn Callback<MammoResNet<TestBackend>>>> = vec![];

        let (_, history) = fit(
            tiny_model(),
            &mut train,
            &mut validation,
            &mut callbacks,
            &fit_options(2),
            make_parallel(1),
            &device,
        )
        .unwrap();

        assert_eq!(history.epochs().len(), 2);
        for (i, logs) in history.epochs().iter().enumerate() {
            assert_eq!(logs.epoch, i + 1);
            assert!(logs.loss.is_finite());
            assert!(logs.val_loss.is_finite());
            assert!((0.0..=1.0).contains(&logs.val_sensitivity));
            assert!(logs.val_auc.is_some());
            assert_eq!(logs.lr, 0.01);
        }
        assert!(!history.stopped_early());
    }

    /// Halves the rate after every epoch and stops after `stop_at`
    struct Scripted {
        stop_at: usize,
        seen_lrs: Vec<f64>,
    }

    impl<M> Callback<M> for Scripted {
        fn on_epoch_end(
            &mut self,
            ctx: &EpochContext<'_>,
            _model: &M,
            control: &mut TrainingControl,
        ) -> Result<()> {
            self.seen_lrs.push(control.lr);
            control.lr /= 2.0;
            control.stop = ctx.logs.epoch >= self.stop_at;
            Ok(())
        }
    }

    #[test]
    fn test_fit_follows_callback_control() {
        let device = Default::default();
        let mut train = SyntheticSource::new(4, 8);
        let batch = SyntheticSource::new(6, 6).next_batch().unwrap();
        let mut validation = ValidationSet::Preloaded(batch);
        assert_eq!(validation.nb_samples(), 6);

        let mut callbacks: Vec<Box<dyn Callback<MammoResNet<TestBackend>>>> = vec![
            Box::new(Scripted {
                stop_at: 2,
                seen_lrs: vec![],
            }),
            Box::new(ReduceLrOnPlateau::new(5)),
            Box::new(EarlyStopping::new(5)),
        ];

        let (_, history) = fit(
            tiny_model(),
            &mut train,
            &mut validation,
            &mut callbacks,
            &fit_options(6),
            make_parallel(2),
            &device,
        )
        .unwrap();

        assert!(history.stopped_early());
        let lrs: Vec<f64> = history.epochs().iter().map(|e| e.lr).collect();
        assert_eq!(lrs, vec![0.01, 0.005]);
    }

    #[test]
    fn test_evaluate_resets_flow() {
        let device = Default::default();
        let model = tiny_model().valid();
        let mut validation = ValidationSet::Flow(Box::new(SyntheticSource::new(4, 6)));
        let options = fit_options(1);

        let parallel = make_parallel(1);
        let first = evaluate(&model, &mut validation, &options, parallel, &device).unwrap();
        let second = evaluate(&model, &mut validation, &options, parallel, &device).unwrap();
        assert_eq!(first.labels.len(), 6);
        assert_eq!(first.labels, second.labels);
        assert!((first.loss - second.loss).abs() < 1e-9);
    }
}
