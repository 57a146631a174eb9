// src/smoothing.rs
use std::collections::HashMap;
use std::hash::Hash;

/// Per-signal exponential moving average.
///
/// Keeps the last emitted (already smoothed) value for every key. A key seen
/// for the first time passes through unchanged.
#[derive(Debug, Clone)]
pub struct Smoother<K> {
    alpha: f64,
    history: HashMap<K, f64>,
}

impl<K: Eq + Hash> Smoother<K> {
    /// `alpha` is the weight of the new sample: 1.0 disables smoothing,
    /// 0.0 freezes the signal at its first value.
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            history: HashMap::new(),
        }
    }

    pub fn apply(&mut self, key: K, raw: f64) -> f64 {
        let smoothed = match self.history.get(&key) {
            Some(prior) => self.alpha * raw + (1.0 - self.alpha) * prior,
            None => raw,
        };
        self.history.insert(key, smoothed);
        smoothed
    }

    pub fn last(&self, key: &K) -> Option<f64> {
        self.history.get(key).copied()
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}
