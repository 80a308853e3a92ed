use serde::{Serialize, Deserialize};

/// Training progress emitted by `train_loop`.
///
/// When a `progress_tx` channel is configured in `TrainConfig`, the training
/// loop sends one `IterationStats` every `log_interval` iterations, and on
/// every validation pass. The monitor server relays these to its clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationStats {
    /// 1-based iteration number.
    pub iteration: usize,
    /// Iteration the run stops at.
    pub total_iterations: usize,
    /// Mean training loss over the patches seen since the previous report.
    pub train_loss: f64,
    /// Mean loss over `validation_patches` validation patches, on validation iterations.
    pub val_loss: Option<f64>,
    pub learning_rate: f64,
    /// Wall-clock time since the previous report in milliseconds.
    pub elapsed_ms: u64,
}
