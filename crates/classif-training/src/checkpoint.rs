//! Parameter checkpoints.
//!
//! A checkpoint is `<dir>/model_<epoch>.tar` holding the model parameters as
//! a full-precision binary record. Optimizer and loss-scaler state are not
//! part of it.

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::Backend;
use classif_core::{Error, Result};
use tracing::info;

const PREFIX: &str = "model_";
const EXTENSION: &str = ".tar";

pub fn checkpoint_path(dir: &Path, epoch: usize) -> PathBuf {
    dir.join(format!("{}{}{}", PREFIX, epoch, EXTENSION))
}

/// Parses the epoch out of a `model_<epoch>.tar` file name
pub fn epoch_from_checkpoint_name(filename: &str) -> Option<usize> {
    filename
        .strip_prefix(PREFIX)
        .and_then(|s| s.strip_suffix(EXTENSION))
        .and_then(|s| s.parse().ok())
}

/// Epochs with a checkpoint in `dir`, ascending
pub fn list_checkpoint_epochs(dir: &Path) -> Result<Vec<usize>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut epochs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(epoch) = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(epoch_from_checkpoint_name)
        {
            epochs.push(epoch);
        }
    }
    epochs.sort_unstable();
    Ok(epochs)
}

pub fn latest_checkpoint_epoch(dir: &Path) -> Result<Option<usize>> {
    Ok(list_checkpoint_epochs(dir)?.last().copied())
}

/// Writes the parameters of `model` to `dir/model_<epoch>.tar`
pub fn save_parameters<B, M>(model: &M, dir: &Path, epoch: usize) -> Result<PathBuf>
where
    B: Backend,
    M: Module<B>,
{
    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let bytes = Recorder::<B>::record(&recorder, model.clone().into_record(), ())
        .map_err(|e| Error::Checkpoint(format!("Failed to serialize model: {:?}", e)))?;

    fs::create_dir_all(dir)?;
    let path = checkpoint_path(dir, epoch);
    fs::write(&path, bytes)?;
    info!("Saved model parameters to {}", path.display());
    Ok(path)
}

/// Loads `dir/model_<epoch>.tar` into `model`
pub fn load_parameters<B, M>(model: M, dir: &Path, epoch: usize, device: &B::Device) -> Result<M>
where
    B: Backend,
    M: Module<B>,
{
    let path = checkpoint_path(dir, epoch);
    let bytes = fs::read(&path).map_err(|e| {
        Error::Checkpoint(format!("Failed to read checkpoint {}: {}", path.display(), e))
    })?;

    let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
    let record: M::Record = Recorder::<B>::load(&recorder, bytes, device).map_err(|e| {
        Error::Checkpoint(format!(
            "Checkpoint {} does not match the model: {:?}",
            path.display(),
            e
        ))
    })?;

    info!("Loaded model parameters from {}", path.display());
    Ok(model.load_record(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::nn::{Linear, LinearConfig};
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    #[test]
    fn test_checkpoint_path() {
        let path = checkpoint_path(Path::new("runs/a"), 7);
        assert_eq!(path, PathBuf::from("runs/a/model_7.tar"));
    }

    #[test]
    fn test_epoch_from_checkpoint_name() {
        assert_eq!(epoch_from_checkpoint_name("model_5.tar"), Some(5));
        assert_eq!(epoch_from_checkpoint_name("model_123.tar"), Some(123));
        assert_eq!(epoch_from_checkpoint_name("model_.tar"), None);
        assert_eq!(epoch_from_checkpoint_name("model_5.bin"), None);
        assert_eq!(epoch_from_checkpoint_name("run.toml"), None);
    }

    #[test]
    fn test_list_and_latest() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        for name in ["model_10.tar", "model_2.tar", "model_x.tar", "notes.txt"] {
            fs::write(temp_dir.path().join(name), b"")?;
        }

        assert_eq!(list_checkpoint_epochs(temp_dir.path())?, vec![2, 10]);
        assert_eq!(latest_checkpoint_epoch(temp_dir.path())?, Some(10));
        Ok(())
    }

    #[test]
    fn test_missing_dir_has_no_checkpoints() -> Result<()> {
        assert_eq!(latest_checkpoint_epoch(Path::new("/nonexistent/run"))?, None);
        Ok(())
    }

    #[test]
    fn test_parameters_round_trip() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let device = Default::default();
        let model: Linear<TestBackend> = LinearConfig::new(3, 2).init(&device);

        let path = save_parameters(&model, temp_dir.path(), 4)?;
        assert_eq!(path.file_name().unwrap(), "model_4.tar");

        let fresh: Linear<TestBackend> = LinearConfig::new(3, 2).init(&device);
        let loaded = load_parameters(fresh, temp_dir.path(), 4, &device)?;

        let x = Tensor::<TestBackend, 2>::ones([1, 3], &device);
        model
            .forward(x.clone())
            .into_data()
            .assert_eq(&loaded.forward(x).into_data(), true);
        Ok(())
    }

    #[test]
    fn test_missing_checkpoint_is_checkpoint_error() {
        let temp_dir = TempDir::new().unwrap();
        let device = Default::default();
        let model: Linear<TestBackend> = LinearConfig::new(3, 2).init(&device);
        let result = load_parameters(model, temp_dir.path(), 1, &device);
        assert!(matches!(result, Err(Error::Checkpoint(_))));
    }
}
