pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod generator;
pub mod imaging;
pub mod metadata;
pub mod model;
pub mod split;
pub mod training;
pub mod types;

pub use api::{prepare_datasets, run, Datasets};
pub use cli::report::{OptionsReport, SummaryReport};
pub use config::{RuntimeSettings, TrainOptions, ValSize};
pub use error::{Result, TrainError};
pub use model::{Architecture, MammoResNet, ResNetBuilder};
pub use training::{TrainingHistory, TrainingSummary};
pub use types::*;
