//! Data plumbing for classifier training.
//!
//! This crate provides:
//! - Items and tensor batches (`ClassifierItem`, `ClassifierBatch`)
//! - The `BatchLoader` abstraction consumed by the training loop
//! - In-memory and dataset-backed loaders
//! - An image-folder dataset implementing Burn's `Dataset` trait

pub mod batch;
pub mod image_folder;
pub mod loader;

pub use batch::{ClassifierBatch, ClassifierBatcher, ClassifierItem};
pub use image_folder::ImageFolderDataset;
pub use loader::{BatchLoader, BatchStream, DatasetLoader, InMemoryLoader};
