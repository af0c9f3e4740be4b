use super::history::EpochLogs;
use crate::error::Result;
use crate::model::{save_model, MammoResNet, MammoResNetConfig};
use burn::tensor::backend::Backend;
use log::{info, warn};
use std::path::PathBuf;

/// Mutable training state callbacks may adjust
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingControl {
    /// Learning rate used by the next epoch
    pub lr: f64,
    /// Set to end training after the current epoch
    pub stop: bool,
}

impl TrainingControl {
    pub fn new(lr: f64) -> Self {
        Self { lr, stop: false }
    }
}

/// What the trainer knows at the end of an epoch
#[derive(Debug, Clone)]
pub struct EpochContext<'a> {
    pub logs: &'a EpochLogs,
    /// Validation probabilities in sample order
    pub val_scores: &'a [f32],
    pub val_labels: &'a [f32],
}

/// Hook into the training loop
///
/// `M` is the model type handed to the hooks.
pub trait Callback<M> {
    fn on_train_begin(&mut self, _control: &mut TrainingControl) -> Result<()> {
        Ok(())
    }

    fn on_epoch_end(
        &mut self,
        ctx: &EpochContext<'_>,
        model: &M,
        control: &mut TrainingControl,
    ) -> Result<()>;

    fn on_train_end(&mut self, _model: &M) -> Result<()> {
        Ok(())
    }
}

/// Multiplies the learning rate by `factor` when the validation loss stalls
///
/// The loss improves when it drops more than `epsilon` below the best seen.
/// After `patience` epochs without improvement the rate is reduced (never
/// below `min_lr`) and the wait restarts.
#[derive(Debug, Clone, PartialEq)]
pub struct ReduceLrOnPlateau {
    pub factor: f64,
    pub patience: usize,
    pub epsilon: f64,
    pub min_lr: f64,
    best: f64,
    wait: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(patience: usize) -> Self {
        Self {
            factor: 0.1,
            patience,
            epsilon: 1e-4,
            min_lr: 0.0,
            best: f64::INFINITY,
            wait: 0,
        }
    }

    /// Feeds one epoch's validation loss; returns the new rate if it changed
    pub fn step(&mut self, val_loss: f64, lr: f64) -> Option<f64> {
        if val_loss < self.best - self.epsilon {
            self.best = val_loss;
            self.wait = 0;
            return None;
        }

        let mut reduced = None;
        if self.wait >= self.patience {
            let new_lr = (lr * self.factor).max(self.min_lr);
            if new_lr < lr {
                reduced = Some(new_lr);
            }
            self.wait = 0;
        }
        self.wait += 1;
        reduced
    }
}

impl<M> Callback<M> for ReduceLrOnPlateau {
    fn on_train_begin(&mut self, _control: &mut TrainingControl) -> Result<()> {
        self.best = f64::INFINITY;
        self.wait = 0;
        Ok(())
    }

    fn on_epoch_end(
        &mut self,
        ctx: &EpochContext<'_>,
        _model: &M,
        control: &mut TrainingControl,
    ) -> Result<()> {
        if let Some(lr) = self.step(ctx.logs.val_loss, control.lr) {
            info!(
                "Epoch {}: reducing learning rate from {:.3e} to {:.3e}",
                ctx.logs.epoch, control.lr, lr
            );
            control.lr = lr;
        }
        Ok(())
    }
}

/// Stops training when the validation loss has not improved for `patience`
/// epochs
#[derive(Debug, Clone, PartialEq)]
pub struct EarlyStopping {
    pub patience: usize,
    best: f64,
    wait: usize,
    stopped_epoch: Option<usize>,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: f64::INFINITY,
            wait: 0,
            stopped_epoch: None,
        }
    }

    /// Feeds one epoch's validation loss; returns true when training should end
    pub fn step(&mut self, val_loss: f64) -> bool {
        if val_loss < self.best {
            self.best = val_loss;
            self.wait = 0;
            return false;
        }
        if self.wait >= self.patience {
            return true;
        }
        self.wait += 1;
        false
    }

    /// Epoch at which training was stopped
    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }
}

impl<M> Callback<M> for EarlyStopping {
    fn on_train_begin(&mut self, _control: &mut TrainingControl) -> Result<()> {
        self.best = f64::INFINITY;
        self.wait = 0;
        self.stopped_epoch = None;
        Ok(())
    }

    fn on_epoch_end(
        &mut self,
        ctx: &EpochContext<'_>,
        _model: &M,
        control: &mut TrainingControl,
    ) -> Result<()> {
        if self.step(ctx.logs.val_loss) {
            self.stopped_epoch = Some(ctx.logs.epoch);
            control.stop = true;
        }
        Ok(())
    }

    fn on_train_end(&mut self, _model: &M) -> Result<()> {
        if let Some(epoch) = self.stopped_epoch {
            info!("Epoch {}: early stopping", epoch);
        }
        Ok(())
    }
}

/// Saves the model whenever the validation ROC-AUC beats its best value
pub struct AucCheckpoint {
    path: PathBuf,
    config: MammoResNetConfig,
    best_auc: f64,
    best_epoch: Option<usize>,
}

impl AucCheckpoint {
    pub fn new(path: PathBuf, config: MammoResNetConfig) -> Self {
        Self {
            path,
            config,
            best_auc: 0.0,
            best_epoch: None,
        }
    }

    /// Best (AUC, epoch) seen so far
    pub fn best(&self) -> Option<(f64, usize)> {
        self.best_epoch.map(|epoch| (self.best_auc, epoch))
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl<B: Backend> Callback<MammoResNet<B>> for AucCheckpoint {
    fn on_train_begin(&mut self, _control: &mut TrainingControl) -> Result<()> {
        self.best_auc = 0.0;
        self.best_epoch = None;
        Ok(())
    }

    fn on_epoch_end(
        &mut self,
        ctx: &EpochContext<'_>,
        model: &MammoResNet<B>,
        _control: &mut TrainingControl,
    ) -> Result<()> {
        let auc = match ctx.logs.val_auc {
            Some(auc) => auc,
            None => {
                warn!(
                    "Epoch {}: validation set holds a single class, AUROC skipped",
                    ctx.logs.epoch
                );
                return Ok(());
            }
        };
        info!("Epoch {}: AUROC = {:.4}", ctx.logs.epoch, auc);

        if auc > self.best_auc {
            self.best_auc = auc;
            self.best_epoch = Some(ctx.logs.epoch);
            save_model(model, &self.config, &self.path)?;
            info!("Saved best model to {}", self.path.display());
        }
        Ok(())
    }

    fn on_train_end(&mut self, _model: &MammoResNet<B>) -> Result<()> {
        match self.best() {
            Some((auc, epoch)) => info!(
                ">>> Found best AUROC: {:.4} at epoch: {}, saved to: {} <<<",
                auc,
                epoch,
                self.path.display()
            ),
            None => warn!("No AUROC was computed; no best model saved"),
        }
        Ok(())
    }
}
