//! Image-folder dataset: one sub-directory per class.
//!
//! With a single-output head the folder must hold exactly two class
//! directories; the first in sorted order is the negative class and the
//! second the positive one. With `n > 1` outputs there must be `n` class
//! directories and every sample carries a one-hot target.

use std::path::{Path, PathBuf};

use burn::data::dataset::Dataset;
use classif_core::{Error, Result};
use image::imageops::FilterType;
use tracing::{error, info};
use walkdir::WalkDir;

use crate::batch::ClassifierItem;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Debug, Clone)]
pub struct ImageFolderDataset {
    samples: Vec<(PathBuf, Vec<i64>)>,
    class_names: Vec<String>,
    image_size: u32,
    channels: usize,
}

impl ImageFolderDataset {
    /// Scans `root` for class directories and their images.
    ///
    /// `channels` selects luma (1) or RGB (3) decoding.
    pub fn new(root: &Path, num_classes: usize, image_size: u32, channels: usize) -> Result<Self> {
        if channels != 1 && channels != 3 {
            return Err(Error::Config(format!(
                "Image folders decode to 1 or 3 channels, got {}",
                channels
            )));
        }
        if image_size == 0 {
            return Err(Error::Config("image_size must be greater than 0".to_string()));
        }
        if !root.is_dir() {
            return Err(Error::Dataset(format!(
                "Directory not found: {}",
                root.display()
            )));
        }

        let mut class_dirs: Vec<PathBuf> = WalkDir::new(root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|entry| entry.file_type().is_dir())
            .map(|entry| entry.into_path())
            .collect();
        class_dirs.sort();

        let expected_dirs = if num_classes == 1 { 2 } else { num_classes };
        if class_dirs.len() != expected_dirs {
            return Err(Error::Dataset(format!(
                "{} has {} class directories, a {}-output head needs {}",
                root.display(),
                class_dirs.len(),
                num_classes,
                expected_dirs
            )));
        }

        let mut samples = Vec::new();
        let mut class_names = Vec::with_capacity(class_dirs.len());
        for (class_index, dir) in class_dirs.iter().enumerate() {
            class_names.push(
                dir.file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_default(),
            );

            let labels = if num_classes == 1 {
                vec![class_index as i64]
            } else {
                let mut one_hot = vec![0i64; num_classes];
                one_hot[class_index] = 1;
                one_hot
            };

            let mut images = scan_images(dir);
            images.sort();
            samples.extend(images.into_iter().map(|path| (path, labels.clone())));
        }

        info!(
            "Found {} images in {} classes under {}",
            samples.len(),
            class_names.len(),
            root.display()
        );

        Ok(Self {
            samples,
            class_names,
            image_size,
            channels,
        })
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    /// Decodes, resizes and normalises one sample to `[0, 1]`
    pub fn load_item(&self, index: usize) -> Result<ClassifierItem> {
        let (path, labels) = self
            .samples
            .get(index)
            .ok_or_else(|| Error::Dataset(format!("Sample index {} out of range", index)))?;

        let size = self.image_size as usize;
        let resized = image::open(path)
            .map_err(|e| Error::Image(format!("Failed to load image {}: {}", path.display(), e)))?
            .resize_exact(self.image_size, self.image_size, FilterType::Triangle);

        let pixels = if self.channels == 1 {
            resized
                .to_luma8()
                .into_raw()
                .into_iter()
                .map(|value| value as f32 / 255.0)
                .collect()
        } else {
            let rgb = resized.to_rgb8();
            let mut pixels = vec![0.0f32; 3 * size * size];
            // HWC -> CHW
            for (x, y, pixel) in rgb.enumerate_pixels() {
                let offset = y as usize * size + x as usize;
                for channel in 0..3 {
                    pixels[channel * size * size + offset] = pixel[channel] as f32 / 255.0;
                }
            }
            pixels
        };

        ClassifierItem::new(pixels, [self.channels, size, size], labels.clone())
    }
}

impl Dataset<ClassifierItem> for ImageFolderDataset {
    fn get(&self, index: usize) -> Option<ClassifierItem> {
        match self.load_item(index) {
            Ok(item) => Some(item),
            Err(e) => {
                let path = self
                    .samples
                    .get(index)
                    .map(|(path, _)| path.display().to_string())
                    .unwrap_or_default();
                error!("Failed to load sample {} ({}): {}", index, path, e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

fn scan_images(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .map(|ext| {
                    let ext = ext.to_string_lossy().to_lowercase();
                    IMAGE_EXTENSIONS.contains(&ext.as_str())
                })
                .unwrap_or(false)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn write_image(path: &Path, color: [u8; 3]) {
        RgbImage::from_pixel(4, 4, Rgb(color)).save(path).unwrap();
    }

    fn binary_tree() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let neg = temp_dir.path().join("0_negative");
        let pos = temp_dir.path().join("1_positive");
        std::fs::create_dir_all(&neg).unwrap();
        std::fs::create_dir_all(&pos).unwrap();
        write_image(&neg.join("a.png"), [0, 0, 0]);
        write_image(&neg.join("b.png"), [0, 0, 0]);
        write_image(&pos.join("c.png"), [255, 0, 0]);
        std::fs::write(pos.join("notes.txt"), "ignored").unwrap();
        temp_dir
    }

    #[test]
    fn test_binary_folder_labels() {
        let temp_dir = binary_tree();
        let dataset = ImageFolderDataset::new(temp_dir.path(), 1, 2, 3).unwrap();

        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.class_names(), &["0_negative", "1_positive"]);
        assert_eq!(dataset.get(0).unwrap().labels, vec![0]);
        assert_eq!(dataset.get(2).unwrap().labels, vec![1]);
    }

    #[test]
    fn test_rgb_item_is_chw_normalised() {
        let temp_dir = binary_tree();
        let dataset = ImageFolderDataset::new(temp_dir.path(), 1, 2, 3).unwrap();
        let item = dataset.load_item(2).unwrap();

        assert_eq!([item.channels, item.height, item.width], [3, 2, 2]);
        assert_eq!(&item.pixels[0..4], &[1.0; 4]);
        assert_eq!(&item.pixels[4..12], &[0.0; 8]);
    }

    #[test]
    fn test_luma_decoding() {
        let temp_dir = binary_tree();
        let dataset = ImageFolderDataset::new(temp_dir.path(), 1, 3, 1).unwrap();
        let item = dataset.load_item(0).unwrap();
        assert_eq!(item.pixels.len(), 9);
    }

    #[test]
    fn test_one_hot_labels() {
        let temp_dir = binary_tree();
        let dataset = ImageFolderDataset::new(temp_dir.path(), 2, 2, 3).unwrap();
        assert_eq!(dataset.get(0).unwrap().labels, vec![1, 0]);
        assert_eq!(dataset.get(2).unwrap().labels, vec![0, 1]);
    }

    #[test]
    fn test_class_count_mismatch() {
        let temp_dir = binary_tree();
        assert!(ImageFolderDataset::new(temp_dir.path(), 3, 2, 3).is_err());
    }

    #[test]
    fn test_unsupported_channels() {
        let temp_dir = binary_tree();
        assert!(ImageFolderDataset::new(temp_dir.path(), 1, 2, 10).is_err());
    }

    #[test]
    fn test_corrupt_image_fails_its_batch() {
        use crate::loader::{BatchLoader, DatasetLoader};
        use burn_ndarray::NdArray;

        let temp_dir = binary_tree();
        std::fs::write(temp_dir.path().join("1_positive").join("d.png"), b"not a png").unwrap();
        let dataset = ImageFolderDataset::new(temp_dir.path(), 1, 2, 3).unwrap();
        assert_eq!(dataset.len(), 4);
        assert!(dataset.load_item(3).is_err());
        assert!(dataset.get(3).is_none());

        let loader = DatasetLoader::<NdArray, _>::new(dataset, 2, Default::default()).unwrap();
        let results: Vec<_> = loader.iter().collect();
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(Error::Dataset(_))));
    }

    #[test]
    fn test_out_of_range_index() {
        let temp_dir = binary_tree();
        let dataset = ImageFolderDataset::new(temp_dir.path(), 1, 2, 3).unwrap();
        assert!(dataset.get(10).is_none());
    }
}
