//! Training loop, loss, metrics and epoch callbacks

mod callbacks;
mod history;
mod metrics;
mod trainer;

pub use callbacks::{
    AucCheckpoint, Callback, EarlyStopping, EpochContext, ReduceLrOnPlateau, TrainingControl,
};
pub use history::{EpochLogs, TrainingHistory, TrainingSummary};
pub use metrics::{roc_auc, weighted_bce, ClassWeights, ConfusionCounts, THRESHOLD};
pub use trainer::{fit, FitOptions, ValidationSet};
