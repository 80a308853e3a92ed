//! Drives the `neutrain` binary: train, resume, sample and predict on a scratch experiment.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use neutorch::train::{latest_checkpoint, Checkpoint};
use neutorch::volume::{read_image_stack, read_label_stack, write_image_stack, write_label_stack};
use neutorch::Chunk;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn experiment(iterations: usize) -> String {
    format!(
        r#"
[dataset]
training_split_ratio = 0.6
patch_size = [2, 8, 8]

[[dataset.volumes]]
image = "vol_a/image"
label = "vol_a/label"

[[dataset.volumes]]
image = "vol_b/image"
label = "vol_b/label"

[model]
patch_size = [1, 4, 4]
patch_emb_dim = 8
depth = 1
heads = 1
dim_head = 8
mlp_dim = 8

[training]
iterations = {}
log_interval = 2
validation_interval = 2
validation_patches = 1
checkpoint_interval = 2
output_dir = "ckpt"
seed = 3
"#,
        iterations
    )
}

fn write_volume(dir: &Path, seed: u64) {
    let shape = [4, 16, 16];
    let mut rng = StdRng::seed_from_u64(seed);
    let n: usize = shape.iter().product();
    let image = Chunk::from_vec(shape, (0..n).map(|_| rng.gen::<f64>()).collect()).unwrap();
    let label = Chunk::from_vec(shape, (0..n).map(|i| 1 + (i % 16 / 4) as u32).collect()).unwrap();
    write_image_stack(&image, dir.join("image")).unwrap();
    write_label_stack(&label, dir.join("label")).unwrap();
}

fn neutrain(args: &[&str]) -> Output {
    let output = Command::new(env!("CARGO_BIN_EXE_neutrain"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "neutrain {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

fn arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn help_lists_subcommands() {
    let out = neutrain(&["--help"]);
    let text = String::from_utf8_lossy(&out.stdout);
    for sub in ["train", "sample", "predict"] {
        assert!(text.contains(sub), "{}", text);
    }
}

#[test]
fn train_resume_and_predict() {
    let dir = tempfile::tempdir().unwrap();
    write_volume(&dir.path().join("vol_a"), 1);
    write_volume(&dir.path().join("vol_b"), 2);
    let config = dir.path().join("experiment.toml");
    let ckpt_dir = dir.path().join("ckpt");

    fs::write(&config, experiment(4)).unwrap();
    neutrain(&["train", "--config", arg(&config)]);
    assert!(ckpt_dir.join("model_00000002.json").exists());
    assert!(ckpt_dir.join("model_00000004.json").exists());

    // A resumed run starts after iteration 4 and never rewrites earlier checkpoints.
    fs::remove_file(ckpt_dir.join("model_00000002.json")).unwrap();
    fs::write(&config, experiment(6)).unwrap();
    neutrain(&["train", "--config", arg(&config), "--resume"]);
    assert!(!ckpt_dir.join("model_00000002.json").exists());
    let latest = latest_checkpoint(&ckpt_dir).unwrap().unwrap();
    assert!(latest.ends_with("model_00000006.json"));
    let ckpt = Checkpoint::load_json(&latest).unwrap();
    assert_eq!(ckpt.iteration, 6);
    assert_eq!(ckpt.patch_size, Some([2, 8, 8]));

    // Block size comes from the checkpoint.
    let pred = dir.path().join("pred");
    neutrain(&[
        "predict",
        "--checkpoint",
        arg(&latest),
        "--image",
        arg(&dir.path().join("vol_a/image")),
        "--output",
        arg(&pred),
    ]);
    for channel in ["affinity_z", "affinity_y", "affinity_x"] {
        let stack = read_image_stack(pred.join(channel)).unwrap();
        assert_eq!(stack.shape(), [4, 16, 16]);
    }
    assert!(!pred.join("foreground").exists());
}

#[test]
fn predict_rejects_bad_block_size() {
    let dir = tempfile::tempdir().unwrap();
    write_volume(&dir.path().join("vol_a"), 1);
    write_volume(&dir.path().join("vol_b"), 2);
    let config = dir.path().join("experiment.toml");
    fs::write(&config, experiment(2)).unwrap();
    neutrain(&["train", "--config", arg(&config)]);

    let out = Command::new(env!("CARGO_BIN_EXE_neutrain"))
        .args([
            "predict",
            "--checkpoint",
            arg(&dir.path().join("ckpt/model_00000002.json")),
            "--image",
            arg(&dir.path().join("vol_a/image")),
            "--output",
            arg(&dir.path().join("pred")),
            "--patch-size",
            "2,8",
        ])
        .output()
        .unwrap();
    assert!(!out.status.success());
}

#[test]
fn sample_writes_patch_stacks() {
    let dir = tempfile::tempdir().unwrap();
    write_volume(&dir.path().join("vol_a"), 1);
    write_volume(&dir.path().join("vol_b"), 2);
    let config = dir.path().join("experiment.toml");
    fs::write(&config, experiment(4)).unwrap();

    let out_dir = dir.path().join("patches");
    neutrain(&["sample", "--config", arg(&config), "-n", "2", "--output", arg(&out_dir)]);
    for i in 0..2 {
        let patch = out_dir.join(format!("patch_{:04}", i));
        assert_eq!(read_image_stack(patch.join("image")).unwrap().shape(), [2, 8, 8]);
        assert_eq!(read_label_stack(patch.join("label")).unwrap().shape(), [2, 8, 8]);
    }
    assert!(!out_dir.join("patch_0002").exists());
}
