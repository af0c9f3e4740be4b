use crate::config::{RuntimeSettings, TrainOptions};
use crate::error::{Result, TrainError};
use crate::generator::{BatchSource, FlowOptions, ImageBatch, ImageDataGenerator};
use crate::metadata::MetaManager;
use crate::model::{load_model, make_parallel, save_model, MammoResNet, ResNetBuilder};
use crate::split::stratified_split;
use crate::training::{
    fit, AucCheckpoint, Callback, EarlyStopping, FitOptions, ReduceLrOnPlateau,
    TrainingHistory, ValidationSet,
};
use burn::tensor::backend::AutodiffBackend;
use log::info;
use std::path::Path;

/// Training and validation inputs ready for [`fit`]
pub struct Datasets {
    pub train: Box<dyn BatchSource>,
    pub validation: ValidationSet,
    /// Validation samples; twice the exam count in multi-view mode
    pub val_size: usize,
}

fn pick<T: Clone>(items: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().map(|&i| items[i].clone()).collect()
}

/// Draws the whole validation set as one batch
///
/// Every view buffer must hold exactly `expected` samples.
pub fn preload_validation(flow: &mut dyn BatchSource, expected: usize) -> Result<ImageBatch> {
    let batch = flow.next_batch()?;
    for actual in batch.view_sizes() {
        if actual != expected {
            return Err(TrainError::ValidationSizeMismatch { expected, actual });
        }
    }
    info!("Loaded {} validation samples into memory", expected);
    Ok(batch)
}

/// Reads the manifests, splits them and builds the batch flows
pub fn prepare_datasets(
    img_folder: &Path,
    options: &TrainOptions,
    settings: &RuntimeSettings,
) -> Result<Datasets> {
    let meta = MetaManager::new(
        options.exam_tsv.as_deref(),
        &options.img_tsv,
        img_folder,
        options.img_extension,
    )?;
    let generator = ImageDataGenerator::new(
        true,
        true,
        options.normalization(),
        settings.nb_worker,
    )?;

    let train_flow = FlowOptions {
        target_size: options.img_size,
        target_scale: options.img_scale,
        batch_size: options.batch_size,
        balance_classes: options.balance_classes,
        all_neg_skip: options.all_neg_skip,
        shuffle: true,
        seed: settings.random_seed,
        validation_mode: false,
    };
    let val_flow = |batch_size: usize| FlowOptions {
        batch_size,
        balance_classes: 0.0,
        all_neg_skip: 0.0,
        shuffle: false,
        validation_mode: true,
        ..train_flow.clone()
    };

    let (train, mut val, val_size, val_units) = if options.multi_view {
        let exams = meta.get_flatten_exam_list();
        let labels = MetaManager::exam_labs(&exams);
        let (train_idx, val_idx) =
            stratified_split(&labels, options.val_size, settings.random_seed)?;
        let (exam_train, exam_val) = (pick(&exams, &train_idx), pick(&exams, &val_idx));
        info!(
            "Split {} exams into {} train and {} validation",
            exams.len(),
            exam_train.len(),
            exam_val.len()
        );

        let val_size = exam_val.len() * 2;
        let val_units = exam_val.len();
        let batch_size = if options.load_val_ram {
            val_units
        } else {
            options.batch_size
        };
        (
            Box::new(generator.flow_from_exam_list(exam_train, train_flow.clone())?)
                as Box<dyn BatchSource>,
            Box::new(generator.flow_from_exam_list(exam_val, val_flow(batch_size))?)
                as Box<dyn BatchSource>,
            val_size,
            val_units,
        )
    } else {
        let (paths, labels) = meta.get_flatten_img_list();
        let (train_idx, val_idx) =
            stratified_split(&labels, options.val_size, settings.random_seed)?;
        info!(
            "Split {} images into {} train and {} validation",
            paths.len(),
            train_idx.len(),
            val_idx.len()
        );

        let val_size = val_idx.len();
        let batch_size = if options.load_val_ram {
            val_size
        } else {
            options.batch_size
        };
        (
            Box::new(generator.flow_from_img_list(
                pick(&paths, &train_idx),
                pick(&labels, &train_idx),
                train_flow.clone(),
            )?) as Box<dyn BatchSource>,
            Box::new(generator.flow_from_img_list(
                pick(&paths, &val_idx),
                pick(&labels, &val_idx),
                val_flow(batch_size),
            )?) as Box<dyn BatchSource>,
            val_size,
            val_size,
        )
    };
    info!(
        "Validation holds {} samples from {} {}",
        val_size,
        val_units,
        if options.multi_view { "exams" } else { "images" }
    );

    let validation = if options.load_val_ram {
        ValidationSet::Preloaded(preload_validation(val.as_mut(), val_size)?)
    } else {
        ValidationSet::Flow(val)
    };

    Ok(Datasets {
        train,
        validation,
        val_size,
    })
}

/// Runs a complete training session
///
/// Splits the data, builds (or resumes) the network, trains it with the
/// learning rate, early stopping and AUROC checkpoint callbacks, and saves
/// the final model unless `final_model` is `None`.
///
/// # Arguments
///
/// * `img_folder` - Directory holding the images named in the crosswalk
/// * `options` - Hyperparameters and file locations
/// * `settings` - Seed, worker and device counts
/// * `device` - Backend device the network lives on
///
/// # Returns
///
/// The per-epoch history of the run
pub fn run<B: AutodiffBackend>(
    img_folder: &Path,
    options: &TrainOptions,
    settings: &RuntimeSettings,
    device: &B::Device,
) -> Result<TrainingHistory> {
    options.validate()?;
    settings.validate()?;

    let Datasets {
        mut train,
        mut validation,
        ..
    } = prepare_datasets(img_folder, options, settings)?;

    let builder = ResNetBuilder::from_options(options);
    let config = builder.config();
    let mut model = config.init::<B>(device);
    if let Some(path) = &options.resume_from {
        model = load_model(model, &config, path, device)?;
    }
    info!(
        "Built {} with {} view(s) and {} initial filters",
        builder.arch, builder.nb_views, builder.nb_init_filter
    );

    let mut callbacks: Vec<Box<dyn Callback<MammoResNet<B>>>> = vec![
        Box::new(ReduceLrOnPlateau::new(options.lr_patience)),
        Box::new(EarlyStopping::new(options.es_patience)),
        Box::new(AucCheckpoint::new(options.best_model.clone(), config.clone())),
    ];

    let (model, history) = fit::<B>(
        model,
        train.as_mut(),
        &mut validation,
        &mut callbacks,
        &FitOptions::from_options(options),
        make_parallel(settings.gpu_count),
        device,
    )?;

    if let Some(path) = &options.final_model {
        save_model(&model, &config, path)?;
        info!("Saved final model to {}", path.display());
    }
    Ok(history)
}
