use std::sync::atomic::Ordering;
use std::time::Instant;

use rand::RngCore;
use tracing::{debug, info};

use crate::dataset::SegmentationDataset;
use crate::error::{NeutorchError, Result};
use crate::model::{Context, ViT};
use crate::optim::Optimizer;
use crate::train::checkpoint::save_checkpoint;
use crate::train::iteration_stats::IterationStats;
use crate::train::train_config::TrainConfig;

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Trains `model` on patches drawn from `dataset` until `config.iterations`
/// and returns the mean training loss of the **last report**.
///
/// # Arguments
/// - `model`     — modified in place
/// - `dataset`   — source of augmented training and validation patches
/// - `optimizer` — applied once per iteration to the batch-averaged gradients
/// - `config`    — schedule, optional progress channel, optional stop flag
/// - `rng`       — drives patch sampling, augmentation and dropout
///
/// # Early termination
/// The loop breaks early if:
/// - the `progress_tx` receiver has been dropped, **or**
/// - `config.stop_flag` is set to `true`.
///
/// A checkpoint for the last completed iteration is written either way.
pub fn train_loop(
    model: &mut ViT,
    dataset: &SegmentationDataset,
    optimizer: &mut dyn Optimizer,
    config: &TrainConfig,
    rng: &mut dyn RngCore,
) -> Result<f64> {
    validate(config)?;

    let mut last_train_loss = 0.0;
    let mut window_loss = 0.0;
    let mut window_patches = 0usize;
    let mut window_start = Instant::now();
    let mut last_completed = config.start_iteration;
    let mut last_saved = None;

    info!(
        from = config.start_iteration + 1,
        to = config.iterations,
        batch_size = config.batch_size,
        "training started"
    );

    for iteration in (config.start_iteration + 1)..=config.iterations {
        if stop_requested(config) {
            info!(iteration, "stop requested");
            break;
        }

        // ── One optimizer step over a batch of patches ─────────────────────
        window_loss += run_one_iteration(model, dataset, optimizer, config, rng)?;
        window_patches += config.batch_size;
        last_completed = iteration;

        let log_now = iteration % config.log_interval == 0;
        let validate_now = iteration % config.validation_interval == 0;

        // ── Validation ────────────────────────────────────────────────────
        let val_loss = if validate_now {
            let v = compute_validation_loss(model, dataset, config, rng)?;
            info!(iteration, val_loss = v, "validation");
            Some(v)
        } else {
            None
        };

        // ── Emit progress ─────────────────────────────────────────────────
        if log_now || validate_now {
            let train_loss = window_loss / window_patches as f64;
            last_train_loss = train_loss;
            if log_now {
                info!(iteration, train_loss, "training");
            }
            let stats = IterationStats {
                iteration,
                total_iterations: config.iterations,
                train_loss,
                val_loss,
                learning_rate: optimizer.learning_rate(),
                elapsed_ms: window_start.elapsed().as_millis() as u64,
            };
            window_loss = 0.0;
            window_patches = 0;
            window_start = Instant::now();

            if let Some(ref tx) = config.progress_tx {
                // If the receiver has been dropped, stop training.
                if tx.send(stats).is_err() {
                    info!(iteration, "progress receiver closed");
                    break;
                }
            }
        }

        // ── Checkpoint ────────────────────────────────────────────────────
        if iteration % config.checkpoint_interval == 0 {
            let path = save_checkpoint(
                model,
                iteration,
                config.target,
                Some(dataset.patch_size()),
                &config.output_dir,
            )?;
            info!(path = %path.display(), "checkpoint saved");
            last_saved = Some(iteration);
        }
    }

    if last_completed > config.start_iteration && last_saved != Some(last_completed) {
        let path = save_checkpoint(
            model,
            last_completed,
            config.target,
            Some(dataset.patch_size()),
            &config.output_dir,
        )?;
        info!(path = %path.display(), "final checkpoint saved");
    }

    Ok(last_train_loss)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn validate(config: &TrainConfig) -> Result<()> {
    for (field, value) in [
        ("training.batch_size", config.batch_size),
        ("training.log_interval", config.log_interval),
        ("training.validation_interval", config.validation_interval),
        ("training.validation_patches", config.validation_patches),
        ("training.checkpoint_interval", config.checkpoint_interval),
    ] {
        if value == 0 {
            return Err(NeutorchError::config(field, "must be at least 1"));
        }
    }
    Ok(())
}

fn stop_requested(config: &TrainConfig) -> bool {
    config.stop_flag.as_ref().map_or(false, |flag| flag.load(Ordering::Relaxed))
}

/// Accumulates gradients over one batch, averages them and steps the optimizer.
/// Returns the summed loss of the batch.
fn run_one_iteration(
    model: &mut ViT,
    dataset: &SegmentationDataset,
    optimizer: &mut dyn Optimizer,
    config: &TrainConfig,
    rng: &mut dyn RngCore,
) -> Result<f64> {
    model.zero_grad();
    let mut total_loss = 0.0;

    for _ in 0..config.batch_size {
        let t_start = Instant::now();
        let patch = dataset.random_training_patch(rng)?;
        debug!(elapsed_us = t_start.elapsed().as_micros() as u64, "sampled patch");

        let target = patch.target(config.target);
        let output = model.forward(&patch.input(), &mut Context::train(rng))?;
        let (loss, grad) = config.loss.evaluate(&output, &target)?;
        model.backward(&grad)?;
        total_loss += loss;
    }

    model.scale_grad(1.0 / config.batch_size as f64);
    optimizer.step(&mut model.params_mut())?;
    model.zero_grad();
    Ok(total_loss)
}

/// Mean loss over fresh validation patches, in eval mode.
fn compute_validation_loss(
    model: &mut ViT,
    dataset: &SegmentationDataset,
    config: &TrainConfig,
    rng: &mut dyn RngCore,
) -> Result<f64> {
    let mut total = 0.0;
    for _ in 0..config.validation_patches {
        let patch = dataset.random_validation_patch(rng)?;
        let target = patch.target(config.target);
        let output = model.forward(&patch.input(), &mut Context::eval(rng))?;
        total += config.loss.evaluate(&output, &target)?.0;
    }
    Ok(total / config.validation_patches as f64)
}
