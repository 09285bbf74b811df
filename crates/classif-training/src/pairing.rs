//! Endless iteration over a loader, for pairing with a finite one.

use burn::prelude::*;
use classif_core::Result;
use classif_data::{BatchLoader, BatchStream, ClassifierBatch};

/// Restarts `loader` every time a pass is exhausted.
///
/// Zipping a finite iterator with a `CycleLoader` stops with the finite one.
/// An empty loader (or one whose pass yields nothing) ends the cycle instead
/// of spinning.
pub struct CycleLoader<'a, B: Backend, L: ?Sized> {
    loader: &'a L,
    current: Option<BatchStream<'a, B>>,
    yielded_in_pass: bool,
    passes: usize,
}

impl<'a, B, L> CycleLoader<'a, B, L>
where
    B: Backend,
    L: BatchLoader<B> + ?Sized,
{
    pub fn new(loader: &'a L) -> Self {
        Self {
            loader,
            current: None,
            yielded_in_pass: false,
            passes: 0,
        }
    }

    /// Number of passes started so far
    pub fn passes(&self) -> usize {
        self.passes
    }
}

impl<'a, B, L> Iterator for CycleLoader<'a, B, L>
where
    B: Backend,
    L: BatchLoader<B> + ?Sized,
{
    type Item = Result<ClassifierBatch<B>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current.is_none() {
                if self.loader.is_empty() {
                    return None;
                }
                self.passes += 1;
                self.yielded_in_pass = false;
                self.current = Some(self.loader.iter());
            }

            let next = self.current.as_mut()?.next();
            match next {
                Some(batch) => {
                    self.yielded_in_pass = true;
                    return Some(batch);
                }
                None if !self.yielded_in_pass => return None,
                None => self.current = None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use classif_data::InMemoryLoader;

    type TestBackend = NdArray;

    fn loader(values: &[f32]) -> InMemoryLoader<TestBackend> {
        let device = Default::default();
        let batches = values
            .iter()
            .map(|&v| {
                ClassifierBatch::new(
                    Tensor::full([1, 1, 1, 1], v, &device),
                    Tensor::zeros([1, 1], &device),
                )
            })
            .collect();
        InMemoryLoader::new(batches)
    }

    fn value(batch: ClassifierBatch<TestBackend>) -> f32 {
        batch.images.into_scalar()
    }

    #[test]
    fn test_cycles_through_passes() {
        let val = loader(&[1.0, 2.0]);
        let mut cycle = CycleLoader::new(&val);
        let values: Vec<f32> = (&mut cycle).take(5).map(|b| value(b.unwrap())).collect();

        assert_eq!(values, vec![1.0, 2.0, 1.0, 2.0, 1.0]);
        assert_eq!(cycle.passes(), 3);
    }

    #[test]
    fn test_zip_stops_with_finite_side() {
        let val = loader(&[1.0, 2.0]);
        let pairs: Vec<(usize, f32)> = (0..7)
            .zip(CycleLoader::new(&val))
            .map(|(i, b)| (i, value(b.unwrap())))
            .collect();

        assert_eq!(pairs.len(), 7);
        assert_eq!(pairs[6], (6, 1.0));
    }

    #[test]
    fn test_empty_loader_ends_cycle() {
        let empty = InMemoryLoader::<TestBackend>::new(Vec::new());
        assert!(CycleLoader::new(&empty).next().is_none());
    }

    #[test]
    fn test_accepts_trait_objects() {
        let val = loader(&[3.0]);
        let dynamic: &dyn BatchLoader<TestBackend> = &val;
        assert_eq!(CycleLoader::new(dynamic).take(3).count(), 3);
    }
}
