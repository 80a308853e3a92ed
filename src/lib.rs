pub mod error;
pub mod math;
pub mod activation;
pub mod volume;
pub mod dataset;
pub mod model;
pub mod loss;
pub mod optim;
pub mod train;
pub mod config;
pub mod inference;
pub mod monitor;

// Convenience re-exports
pub use error::{NeutorchError, Result};
pub use math::matrix::Matrix;
pub use activation::activation::ActivationFunction;
pub use volume::Chunk;
pub use dataset::{GroundTruthVolume, Patch, SegmentationDataset, TargetKind};
pub use model::{ViT, ViTConfig};
pub use loss::LossType;
pub use optim::{Adam, Optimizer, OptimizerKind, Sgd};
pub use train::{Checkpoint, IterationStats, TrainConfig, train_loop};
pub use config::ExperimentConfig;
pub use inference::predict_volume;
pub use monitor::Monitor;
