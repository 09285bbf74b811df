//! Training CLI Tool
//!
//! Trains a binary image classifier from image-folder datasets described by a
//! TOML run configuration, with checkpointing, resumption and test runs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::backend::{ndarray::NdArrayDevice, Autodiff, NdArray};
use burn::tensor::backend::AutodiffBackend;
use clap::{Parser, ValueEnum};
use classif_core::{
    load_toml_config, save_toml_config, select_device, setup_cli_logging, ComputeDevice,
    DashboardConfig, DebugLevel, DevicePreference, Hyperparameters, DEBUG_LEVEL_ENV,
};
use classif_data::{DatasetLoader, ImageFolderDataset};
use classif_training::{build_dashboard, latest_checkpoint_epoch, Classifier};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Run configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub hyperparameters: Hyperparameters,
    pub data: DataConfig,
    pub output: OutputConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Training image folder (one sub-directory per class)
    pub train_dir: PathBuf,
    /// Validation image folder
    pub val_dir: PathBuf,
    /// Test image folder, evaluated after training when set
    pub test_dir: Option<PathBuf>,
    pub batch_size: usize,
    /// Images are resized to `image_size` x `image_size`
    pub image_size: u32,
    /// Seed of the per-epoch training shuffle
    pub seed: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            train_dir: PathBuf::from("data/train"),
            val_dir: PathBuf::from("data/val"),
            test_dir: None,
            batch_size: 32,
            image_size: 64,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Checkpoints and the effective configuration are written here
    pub output_dir: PathBuf,
    /// Total number of epochs, counting epochs of a resumed run
    pub epochs: usize,
    /// Checkpoint frequency (epochs)
    pub save_every: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("runs/classifier"),
            epochs: 10,
            save_every: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendType {
    /// CPU backend
    Cpu,
    /// WebGPU backend
    Wgpu,
    /// Auto-detect best backend
    Auto,
}

impl From<BackendType> for DevicePreference {
    fn from(backend: BackendType) -> Self {
        match backend {
            BackendType::Cpu => DevicePreference::Cpu,
            BackendType::Wgpu => DevicePreference::Gpu,
            BackendType::Auto => DevicePreference::Auto,
        }
    }
}

/// Binary image classifier training tool
#[derive(Parser, Debug)]
#[command(
    name = "classif-train",
    about = "Train binary image classifiers",
    long_about = "Train a binary (or multi-label) image classifier with gradient accumulation, \
                  gradient clipping, periodic validation and dashboard logging. \
                  Set DEBUG_LVL=2 to log the learning rate at every iteration."
)]
struct Args {
    /// Path to run configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Override number of epochs
    #[arg(short, long, value_name = "N")]
    epochs: Option<usize>,

    /// Override learning rate
    #[arg(short, long, value_name = "LR")]
    lr: Option<f64>,

    /// Override output directory
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Compute backend
    #[arg(short, long, value_enum, default_value = "auto")]
    backend: BackendType,

    /// Resume from the checkpoint of this epoch in the output directory
    #[arg(long, value_name = "EPOCH", conflicts_with = "resume_latest")]
    resume_epoch: Option<usize>,

    /// Resume from the newest checkpoint in the output directory
    #[arg(long)]
    resume_latest: bool,

    /// Evaluate the test set only (requires a resume option)
    #[arg(long)]
    test_only: bool,

    /// Dry run (validate config without training)
    #[arg(long)]
    dry_run: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let debug_level = DebugLevel::from_env();
    setup_cli_logging(args.verbose, debug_level)?;

    info!("Binary Image Classifier - Training Tool");
    info!("=======================================");

    execute(&args)
}

fn execute(args: &Args) -> Result<()> {
    let mut config: RunConfig =
        load_toml_config(&args.config).context("Failed to load configuration file")?;

    if std::env::var_os(DEBUG_LEVEL_ENV).is_some() {
        config.hyperparameters.debug_level = DebugLevel::from_env();
    }
    apply_overrides(&mut config, args);
    validate_config(&config)?;

    if args.dry_run {
        info!("Configuration validated successfully (dry run)");
        print_config_summary(&config);
        return Ok(());
    }

    std::fs::create_dir_all(&config.output.output_dir)
        .context("Failed to create output directory")?;
    let config_path = config.output.output_dir.join("config.toml");
    save_toml_config(&config, &config_path).context("Failed to save configuration")?;
    info!("Configuration saved to: {}", config_path.display());

    print_config_summary(&config);

    let device = select_device(args.backend.into());
    config.hyperparameters.cuda = device.is_accelerator();

    match device {
        ComputeDevice::Cpu => run::<Autodiff<NdArray>>(&config, args, NdArrayDevice::Cpu),
        ComputeDevice::Gpu(index) => run_accelerated(config, args, index),
    }
}

#[cfg(feature = "wgpu")]
fn run_accelerated(config: RunConfig, args: &Args, index: usize) -> Result<()> {
    use burn::backend::wgpu::{Wgpu, WgpuDevice};

    let device = WgpuDevice::DiscreteGpu(index);
    if config.hyperparameters.fp16 {
        run::<Autodiff<Wgpu<half::f16, i32>>>(&config, args, device)
    } else {
        run::<Autodiff<Wgpu>>(&config, args, device)
    }
}

#[cfg(not(feature = "wgpu"))]
fn run_accelerated(mut config: RunConfig, args: &Args, index: usize) -> Result<()> {
    warn!(
        "GPU:{} detected but this build has no wgpu support, training on CPU",
        index
    );
    config.hyperparameters.cuda = false;
    run::<Autodiff<NdArray>>(&config, args, NdArrayDevice::Cpu)
}

fn apply_overrides(config: &mut RunConfig, args: &Args) {
    if let Some(epochs) = args.epochs {
        config.output.epochs = epochs;
    }
    if let Some(lr) = args.lr {
        config.hyperparameters.lr = lr;
    }
    if let Some(ref output) = args.output {
        config.output.output_dir = output.clone();
    }
}

fn validate_config(config: &RunConfig) -> Result<()> {
    config
        .hyperparameters
        .validate()
        .context("Invalid hyperparameters")?;
    config
        .dashboard
        .validate()
        .context("Invalid dashboard configuration")?;

    if !config.data.train_dir.exists() {
        anyhow::bail!(
            "Training directory does not exist: {}",
            config.data.train_dir.display()
        );
    }
    if !config.data.val_dir.exists() {
        anyhow::bail!(
            "Validation directory does not exist: {}",
            config.data.val_dir.display()
        );
    }
    if let Some(test_dir) = &config.data.test_dir {
        if !test_dir.exists() {
            anyhow::bail!("Test directory does not exist: {}", test_dir.display());
        }
    }

    if config.output.epochs == 0 {
        anyhow::bail!("Number of epochs must be greater than 0");
    }
    if config.output.save_every == 0 {
        anyhow::bail!("save_every must be greater than 0");
    }
    if config.data.batch_size == 0 {
        anyhow::bail!("Batch size must be greater than 0");
    }
    if config.data.image_size == 0 {
        anyhow::bail!("Image size must be greater than 0");
    }

    Ok(())
}

fn print_config_summary(config: &RunConfig) {
    let hps = &config.hyperparameters;
    info!("");
    info!("Configuration Summary:");
    info!("  Backbone: {} (pretrained: {})", hps.backbone, hps.pretrained);
    info!("  Outputs: {}", hps.num_classes);
    info!("  Input channels: {}", hps.in_channels);
    info!("  Epochs: {}", config.output.epochs);
    info!("  Batch size: {}", config.data.batch_size);
    info!("  Learning rate: {}", hps.lr);
    info!("  Gradient accumulation: {} steps", hps.acc_grad_steps);
    info!("  Clip norm: {}", hps.clip_norm);
    info!("  Validate every: {} iterations", hps.eval_every);
    info!("  fp16: {}", hps.fp16);
    info!("  Debug level: {}", hps.debug_level.value());
    info!("  Train dir: {}", config.data.train_dir.display());
    info!("  Val dir: {}", config.data.val_dir.display());
    info!("  Output dir: {}", config.output.output_dir.display());
    info!("");
}

fn image_folder(dir: &Path, config: &RunConfig) -> Result<ImageFolderDataset> {
    ImageFolderDataset::new(
        dir,
        config.hyperparameters.num_classes,
        config.data.image_size,
        config.hyperparameters.in_channels,
    )
    .with_context(|| format!("Failed to load image folder {}", dir.display()))
}

/// Epoch of the checkpoint to resume from, if any
fn resume_epoch(args: &Args, output_dir: &Path) -> Result<Option<usize>> {
    if let Some(epoch) = args.resume_epoch {
        return Ok(Some(epoch));
    }
    if args.resume_latest {
        let latest = latest_checkpoint_epoch(output_dir)?;
        if latest.is_none() {
            warn!(
                "No checkpoint found in {}, starting from scratch",
                output_dir.display()
            );
        }
        return Ok(latest);
    }
    Ok(None)
}

fn run<B: AutodiffBackend>(config: &RunConfig, args: &Args, device: B::Device) -> Result<()> {
    let output_dir = &config.output.output_dir;
    let dashboard = build_dashboard(&config.dashboard).context("Failed to create dashboard")?;
    let mut classifier =
        Classifier::<B>::new(device.clone(), config.hyperparameters.clone(), dashboard)?;

    let start_epoch = match resume_epoch(args, output_dir)? {
        Some(epoch) => {
            classifier
                .load(output_dir, epoch)
                .with_context(|| format!("Failed to resume from epoch {}", epoch))?;
            classifier.set_epochs_so_far(epoch);
            info!("Resumed from epoch {}", epoch);
            epoch
        }
        None => 0,
    };

    let test_loader = match &config.data.test_dir {
        Some(dir) => Some(DatasetLoader::<B, _>::new(
            image_folder(dir, config)?,
            config.data.batch_size,
            device.clone(),
        )?),
        None => None,
    };

    if args.test_only {
        if start_epoch == 0 {
            warn!("Testing an untrained model; pass --resume-epoch or --resume-latest");
        }
        let loader = test_loader.context("--test-only requires data.test_dir")?;
        info!("Evaluating {} test samples", loader.num_items());
        classifier.test(&loader)?;
        return Ok(());
    }

    let train_loader = DatasetLoader::<B, _>::new(
        image_folder(&config.data.train_dir, config)?,
        config.data.batch_size,
        device.clone(),
    )?
    .with_shuffle(config.data.seed);
    let val_loader = DatasetLoader::<B, _>::new(
        image_folder(&config.data.val_dir, config)?,
        config.data.batch_size,
        device,
    )?;
    info!(
        "Loaded {} training and {} validation samples",
        train_loader.num_items(),
        val_loader.num_items()
    );

    let total_epochs = config.output.epochs;
    if start_epoch >= total_epochs {
        warn!(
            "Checkpoint epoch {} already reaches the configured {} epochs",
            start_epoch, total_epochs
        );
    }

    for _ in start_epoch..total_epochs {
        let report = classifier.train(&train_loader, &val_loader)?;
        let epoch = classifier.epochs_so_far();

        info!(
            "Epoch {}/{}: mean train loss {:.4}, {} optimizer steps",
            epoch,
            total_epochs,
            report.mean_train_loss,
            report.optimizer_steps.len()
        );

        if epoch % config.output.save_every == 0 || epoch == total_epochs {
            classifier.save(output_dir, epoch)?;
        }
    }

    if let Some(loader) = &test_loader {
        info!("Running test set evaluation");
        classifier.test(loader)?;
    }

    info!("Training completed successfully!");
    info!("  Checkpoints saved to: {}", output_dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use classif_core::{BackboneKind, DashboardKind};
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn write_split(root: &Path) {
        for (class, color) in [("cat", [10u8, 10, 10]), ("dog", [240u8, 240, 240])] {
            let dir = root.join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..2 {
                RgbImage::from_pixel(8, 8, Rgb(color))
                    .save(dir.join(format!("{}.png", i)))
                    .unwrap();
            }
        }
    }

    fn write_run(temp_dir: &TempDir) -> PathBuf {
        let data = temp_dir.path().join("data");
        for split in ["train", "val", "test"] {
            write_split(&data.join(split));
        }

        let config = RunConfig {
            hyperparameters: Hyperparameters {
                backbone: BackboneKind::SmallCnn,
                in_channels: 3,
                eval_every: 1,
                show_progress: false,
                ..Default::default()
            },
            data: DataConfig {
                train_dir: data.join("train"),
                val_dir: data.join("val"),
                test_dir: Some(data.join("test")),
                batch_size: 2,
                image_size: 8,
                seed: 7,
            },
            output: OutputConfig {
                output_dir: temp_dir.path().join("run"),
                epochs: 2,
                save_every: 1,
            },
            dashboard: DashboardConfig {
                kind: DashboardKind::Jsonl,
                path: Some(temp_dir.path().join("run").join("metrics.jsonl")),
                ..Default::default()
            },
        };

        let path = temp_dir.path().join("run.toml");
        save_toml_config(&config, &path).unwrap();
        path
    }

    fn args(config: &Path, extra: &[&str]) -> Args {
        let mut argv = vec![
            "classif-train",
            "--config",
            config.to_str().unwrap(),
            "--backend",
            "cpu",
        ];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_config_validation() {
        let mut config = RunConfig::default();
        config.data.train_dir = PathBuf::from("/nonexistent/train");

        // Valid values, missing directories
        assert!(validate_config(&config).is_err());

        let temp_dir = TempDir::new().unwrap();
        config.data.train_dir = temp_dir.path().to_path_buf();
        config.data.val_dir = temp_dir.path().to_path_buf();
        assert!(validate_config(&config).is_ok());

        config.output.save_every = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let config: RunConfig = toml::from_str(
            r#"
            [hyperparameters]
            lr = 0.0001
            clip_norm = -1.0
            backbone = "efficientnet_b0"

            [data]
            train_dir = "a"
            val_dir = "b"
            batch_size = 8

            [dashboard]
            kind = "http"
            endpoint = "http://localhost:9000/log"
            "#,
        )
        .unwrap();

        assert_eq!(config.hyperparameters.backbone, BackboneKind::EfficientNetB0);
        assert!(!config.hyperparameters.clipping_enabled());
        assert_eq!(config.data.batch_size, 8);
        assert_eq!(config.data.image_size, 64);
        assert_eq!(config.output.epochs, 10);
        assert_eq!(config.dashboard.kind, DashboardKind::Http);
    }

    #[test]
    fn test_overrides() {
        let mut config = RunConfig::default();
        let args = args(
            Path::new("run.toml"),
            &["--epochs", "3", "--lr", "0.01", "--output", "elsewhere"],
        );
        apply_overrides(&mut config, &args);

        assert_eq!(config.output.epochs, 3);
        assert_eq!(config.hyperparameters.lr, 0.01);
        assert_eq!(config.output.output_dir, PathBuf::from("elsewhere"));
    }

    #[test]
    fn test_resume_flags_conflict() {
        let result = Args::try_parse_from([
            "classif-train",
            "--config",
            "run.toml",
            "--resume-epoch",
            "2",
            "--resume-latest",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let config = write_run(&temp_dir);
        execute(&args(&config, &["--dry-run"])).unwrap();
        assert!(!temp_dir.path().join("run").exists());
    }

    #[test]
    fn test_train_resume_and_test() {
        let temp_dir = TempDir::new().unwrap();
        let config = write_run(&temp_dir);
        let run_dir = temp_dir.path().join("run");

        execute(&args(&config, &[])).unwrap();
        assert!(run_dir.join("config.toml").exists());
        assert!(run_dir.join("model_1.tar").exists());
        assert!(run_dir.join("model_2.tar").exists());

        let metrics = std::fs::read_to_string(run_dir.join("metrics.jsonl")).unwrap();
        assert!(metrics.lines().any(|line| line.contains("train/loss")));
        assert!(metrics.lines().any(|line| line.contains("val/accuracy")));
        assert!(metrics.lines().any(|line| line.contains("test/f1")));

        execute(&args(&config, &["--resume-latest", "--epochs", "3"])).unwrap();
        assert!(run_dir.join("model_3.tar").exists());

        execute(&args(&config, &["--resume-epoch", "1", "--test-only"])).unwrap();
    }
}
