pub mod iteration_stats;
pub mod train_config;
pub mod checkpoint;
pub mod loop_fn;

pub use iteration_stats::IterationStats;
pub use train_config::TrainConfig;
pub use checkpoint::{Checkpoint, checkpoint_path, latest_checkpoint, save_checkpoint};
pub use loop_fn::train_loop;
