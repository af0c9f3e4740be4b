use crate::error::Result;
use std::fs;
use std::path::Path;

const CSV_HEADER: [&str; 9] = [
    "epoch",
    "loss",
    "sensitivity",
    "specificity",
    "val_loss",
    "val_sensitivity",
    "val_specificity",
    "val_auc",
    "lr",
];

/// Metrics of one epoch
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "json", derive(serde::Serialize))]
pub struct EpochLogs {
    /// 1-based epoch number
    pub epoch: usize,
    pub loss: f64,
    pub sensitivity: f64,
    pub specificity: f64,
    pub val_loss: f64,
    pub val_sensitivity: f64,
    pub val_specificity: f64,
    /// `None` when the validation set holds a single class
    pub val_auc: Option<f64>,
    /// Learning rate used during the epoch
    pub lr: f64,
}

/// Validation metrics at the epoch with the lowest validation loss
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "json", derive(serde::Serialize))]
pub struct TrainingSummary {
    pub best_epoch: usize,
    pub best_val_loss: f64,
    pub best_val_sensitivity: f64,
    pub best_val_specificity: f64,
    /// Best validation AUROC and its epoch
    pub best_auc: Option<(f64, usize)>,
    pub stopped_early: bool,
}

/// Per-epoch record of a training run
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "json", derive(serde::Serialize))]
pub struct TrainingHistory {
    epochs: Vec<EpochLogs>,
    stopped_early: bool,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, logs: EpochLogs) {
        self.epochs.push(logs);
    }

    pub fn epochs(&self) -> &[EpochLogs] {
        &self.epochs
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn set_stopped_early(&mut self, stopped_early: bool) {
        self.stopped_early = stopped_early;
    }

    /// First epoch reaching the minimum validation loss
    pub fn best_epoch(&self) -> Option<&EpochLogs> {
        self.epochs.iter().fold(None, |best: Option<&EpochLogs>, e| match best {
            Some(b) if b.val_loss <= e.val_loss => Some(b),
            _ if e.val_loss.is_nan() => best,
            _ => Some(e),
        })
    }

    /// Highest validation AUROC and the first epoch reaching it
    pub fn best_auc(&self) -> Option<(f64, usize)> {
        self.epochs
            .iter()
            .filter_map(|e| e.val_auc.map(|auc| (auc, e.epoch)))
            .fold(None, |best, (auc, epoch)| match best {
                Some((b, _)) if b >= auc => best,
                _ => Some((auc, epoch)),
            })
    }

    pub fn stopped_early(&self) -> bool {
        self.stopped_early
    }

    pub fn summary(&self) -> Option<TrainingSummary> {
        self.best_epoch().map(|best| TrainingSummary {
            best_epoch: best.epoch,
            best_val_loss: best.val_loss,
            best_val_sensitivity: best.val_sensitivity,
            best_val_specificity: best.val_specificity,
            best_auc: self.best_auc(),
            stopped_early: self.stopped_early,
        })
    }

    /// Writes one CSV row per epoch
    ///
    /// A missing `val_auc` is written as an empty field.
    pub fn save_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut w = csv::Writer::from_path(path)?;
        w.write_record(CSV_HEADER)?;
        for e in &self.epochs {
            w.write_record([
                e.epoch.to_string(),
                e.loss.to_string(),
                e.sensitivity.to_string(),
                e.specificity.to_string(),
                e.val_loss.to_string(),
                e.val_sensitivity.to_string(),
                e.val_specificity.to_string(),
                e.val_auc.map(|v| v.to_string()).unwrap_or_default(),
                e.lr.to_string(),
            ])?;
        }
        w.flush()?;
        Ok(())
    }

    /// Writes the history as pretty-printed JSON
    #[cfg(feature = "json")]
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| crate::error::TrainError::InvalidValue(e.to_string()))?;
        fs::write(path, json)?;
        Ok(())
    }
}
