use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, atomic::AtomicBool};

use crate::config::TrainingSettings;
use crate::dataset::TargetKind;
use crate::loss::LossType;
use crate::train::iteration_stats::IterationStats;

/// Configuration for a `train_loop` run.
///
/// # Fields
/// - `iterations`          — the loop runs until this iteration number
/// - `batch_size`          — patches per optimizer step
/// - `loss`                — which loss function to use
/// - `log_interval`        — iterations between progress reports
/// - `validation_interval` — iterations between validation passes
/// - `checkpoint_interval` — iterations between checkpoints
/// - `progress_tx` — optional channel sender; one `IterationStats` is sent
///                   per report.  If the receiver is dropped the loop
///                   terminates early (clean shutdown).
/// - `stop_flag`   — optional atomic flag; when set to `true` from another
///                   thread the loop terminates after the current iteration.
/// - `start_iteration` — iterations already done by a resumed checkpoint
pub struct TrainConfig {
    pub iterations: usize,
    pub batch_size: usize,
    pub loss: LossType,
    pub target: TargetKind,
    pub log_interval: usize,
    pub validation_interval: usize,
    pub validation_patches: usize,
    pub checkpoint_interval: usize,
    pub output_dir: PathBuf,
    pub start_iteration: usize,
    pub progress_tx: Option<mpsc::Sender<IterationStats>>,
    pub stop_flag: Option<Arc<AtomicBool>>,
}

impl TrainConfig {
    pub fn from_settings(settings: &TrainingSettings, target: TargetKind) -> Self {
        TrainConfig {
            iterations: settings.iterations,
            batch_size: settings.batch_size,
            loss: settings.loss,
            target,
            log_interval: settings.log_interval,
            validation_interval: settings.validation_interval,
            validation_patches: settings.validation_patches,
            checkpoint_interval: settings.checkpoint_interval,
            output_dir: settings.output_dir.clone(),
            start_iteration: 0,
            progress_tx: None,
            stop_flag: None,
        }
    }
}
