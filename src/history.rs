//! Append-only measurement history backing one chart/table pair.

use crate::sample::ImpedanceSample;

/// Ordered, append-only collection of impedance samples (oldest first).
///
/// Two independent instances exist in the panel: one for single-shot
/// measurements and one for sweep results. The only way to remove data is
/// [`HistoryStore::clear`], which empties the store atomically; individual
/// samples are never removed, reordered or edited in place.
#[derive(Debug, Default)]
pub struct HistoryStore {
    samples: Vec<ImpedanceSample>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample at the end. Never fails; validation is the caller's job.
    pub fn append(&mut self, sample: ImpedanceSample) {
        self.samples.push(sample);
    }

    /// Empty the store. Idempotent: clearing an empty store is a no-op.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// The current ordered sequence as a read-only view.
    pub fn all(&self) -> &[ImpedanceSample] {
        &self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Most recently appended sample, if any.
    pub fn last(&self) -> Option<&ImpedanceSample> {
        self.samples.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::DatasetColor;

    fn sample(real: f64, imag: f64) -> ImpedanceSample {
        ImpedanceSample::new([1, 2, 3, 4], 13.56, real, imag, DatasetColor::Red)
    }

    #[test]
    fn append_grows_by_one_and_preserves_order() {
        let mut store = HistoryStore::new();
        assert!(store.is_empty());

        store.append(sample(50.0, 0.0));
        assert_eq!(store.len(), 1);

        store.append(sample(25.0, 25.0));
        assert_eq!(store.len(), 2);
        assert_eq!(store.all()[0].real_impedance, 50.0);
        assert_eq!(store.last().unwrap().real_impedance, 25.0);
    }

    #[test]
    fn clear_empties_and_is_idempotent() {
        let mut store = HistoryStore::new();
        store.append(sample(10.0, -5.0));
        store.append(sample(75.0, 12.0));

        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.all().len(), 0);

        // Clearing again has the same observable result.
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn stores_are_independent() {
        let mut single = HistoryStore::new();
        let mut sweep = HistoryStore::new();

        single.append(sample(50.0, 0.0));
        assert_eq!(single.len(), 1);
        assert_eq!(sweep.len(), 0);

        sweep.append(sample(30.0, 10.0));
        sweep.append(sample(31.0, 11.0));
        single.clear();
        assert!(single.is_empty());
        assert_eq!(sweep.len(), 2);
    }
}
