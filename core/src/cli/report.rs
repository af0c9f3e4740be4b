use crate::config::{RuntimeSettings, TrainOptions};
use crate::training::TrainingSummary;
use std::fmt;

fn or_none<T: fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "None".to_string(), |v| v.to_string())
}

/// Text report of the options a run was started with
pub struct OptionsReport<'a> {
    options: &'a TrainOptions,
    settings: &'a RuntimeSettings,
}

impl<'a> OptionsReport<'a> {
    pub fn new(options: &'a TrainOptions, settings: &'a RuntimeSettings) -> Self {
        Self { options, settings }
    }
}

impl<'a> fmt::Display for OptionsReport<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.options;
        writeln!(f, ">>> Model training options: <<<")?;
        writeln!(f, "img_extension:     {}", o.img_extension)?;
        writeln!(f, "img_size:          {} x {}", o.img_size.0, o.img_size.1)?;
        writeln!(f, "img_scale:         {}", or_none(o.img_scale))?;
        writeln!(f, "multi_view:        {}", o.multi_view)?;
        writeln!(f, "normalization:     {:?}", o.normalization())?;
        writeln!(f, "batch_size:        {}", o.batch_size)?;
        writeln!(f, "samples_per_epoch: {}", o.samples_per_epoch)?;
        writeln!(f, "nb_epoch:          {}", o.nb_epoch)?;
        writeln!(f, "balance_classes:   {}", o.balance_classes)?;
        writeln!(f, "all_neg_skip:      {}", o.all_neg_skip)?;
        writeln!(f, "pos_cls_weight:    {}", o.pos_cls_weight)?;
        writeln!(f, "net:               {}", o.net)?;
        writeln!(
            f,
            "init conv/pool:    {} filters {}x{} stride {}, pool {} stride {}",
            o.nb_init_filter,
            o.init_filter_size,
            o.init_filter_size,
            o.init_conv_stride,
            o.pool_size,
            o.pool_stride
        )?;
        writeln!(
            f,
            "regularization:    weight_decay={} alpha={} l1_ratio={}",
            o.weight_decay, o.alpha, o.l1_ratio
        )?;
        writeln!(
            f,
            "dropout:           input={} hidden={}",
            o.inp_dropout, o.hidden_dropout
        )?;
        writeln!(f, "init_lr:           {}", o.init_lr)?;
        writeln!(f, "val_size:          {:?}", o.val_size)?;
        writeln!(
            f,
            "patience:          lr={} early_stop={}",
            o.lr_patience, o.es_patience
        )?;
        writeln!(
            f,
            "resume_from:       {}",
            or_none(o.resume_from.as_ref().map(|p| p.display()))
        )?;
        writeln!(f, "load_val_ram:      {}", o.load_val_ram)?;
        writeln!(
            f,
            "exam_tsv:          {}",
            or_none(o.exam_tsv.as_ref().map(|p| p.display()))
        )?;
        writeln!(f, "img_tsv:           {}", o.img_tsv.display())?;
        writeln!(f, "best_model:        {}", o.best_model.display())?;
        writeln!(
            f,
            "final_model:       {}",
            or_none(o.final_model.as_ref().map(|p| p.display()))
        )?;
        writeln!(
            f,
            "runtime:           seed={} workers={} devices={}",
            self.settings.random_seed, self.settings.nb_worker, self.settings.gpu_count
        )?;
        Ok(())
    }
}

/// Text report of the epoch with the lowest validation loss
pub struct SummaryReport<'a> {
    summary: &'a TrainingSummary,
}

impl<'a> SummaryReport<'a> {
    pub fn new(summary: &'a TrainingSummary) -> Self {
        Self { summary }
    }
}

impl<'a> fmt::Display for SummaryReport<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "==== Training summary ====")?;
        writeln!(
            f,
            "Minimum val loss achieved at epoch: {}",
            self.summary.best_epoch
        )?;
        writeln!(f, "Best val loss: {}", self.summary.best_val_loss)?;
        writeln!(
            f,
            "Best val sensitivity: {}",
            self.summary.best_val_sensitivity
        )?;
        writeln!(
            f,
            "Best val specificity: {}",
            self.summary.best_val_specificity
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_report_format() {
        let summary = TrainingSummary {
            best_epoch: 3,
            best_val_loss: 0.25,
            best_val_sensitivity: 0.5,
            best_val_specificity: 0.75,
            best_auc: Some((0.8, 4)),
            stopped_early: false,
        };
        let output = format!("{}", SummaryReport::new(&summary));
        assert_eq!(
            output,
            "==== Training summary ====\n\
             Minimum val loss achieved at epoch: 3\n\
             Best val loss: 0.25\n\
             Best val sensitivity: 0.5\n\
             Best val specificity: 0.75\n"
        );
    }

    #[test]
    fn test_options_report() {
        let options = TrainOptions::default();
        let settings = RuntimeSettings::default();
        let output = format!("{}", OptionsReport::new(&options, &settings));
        assert!(output.starts_with(">>> Model training options: <<<"));
        assert!(output.contains("net:               resnet50"));
        assert!(output.contains("img_size:          288 x 224"));
        assert!(output.contains("final_model:       None"));
        assert!(output.contains("seed=12345 workers=4 devices=1"));
    }
}
