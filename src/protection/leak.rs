use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Linear growth estimate over the sample window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryTrend {
    pub slope_mb_per_minute: f64,
    pub samples: usize,
    pub is_leak_suspected: bool,
}

/// Bounded window of `(instant, memory_mb)` samples
#[derive(Debug, Clone)]
pub struct MemoryWindow {
    samples: VecDeque<(Instant, f64)>,
    capacity: usize,
    horizon: Duration,
}

impl MemoryWindow {
    pub fn new(capacity: usize, horizon: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            horizon,
        }
    }

    /// Append a sample. Non-finite or non-positive readings are dropped.
    pub fn push(&mut self, at: Instant, memory_mb: f64) -> bool {
        if !memory_mb.is_finite() || memory_mb <= 0.0 {
            return false;
        }

        self.samples.push_back((at, memory_mb));

        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }

        while let Some(&(oldest, _)) = self.samples.front() {
            if at.saturating_duration_since(oldest) > self.horizon {
                self.samples.pop_front();
            } else {
                break;
            }
        }

        true
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Least-squares slope in MB per minute; 0 when undefined
    pub fn slope_mb_per_minute(&self) -> f64 {
        let n = self.samples.len();
        if n < 2 {
            return 0.0;
        }

        let origin = match self.samples.front() {
            Some(&(first, _)) => first,
            None => return 0.0,
        };

        let points: Vec<(f64, f64)> = self
            .samples
            .iter()
            .map(|&(at, mb)| (at.saturating_duration_since(origin).as_secs_f64() / 60.0, mb))
            .collect();

        let count = n as f64;
        let mean_x = points.iter().map(|p| p.0).sum::<f64>() / count;
        let mean_y = points.iter().map(|p| p.1).sum::<f64>() / count;

        let mut numerator = 0.0;
        let mut denominator = 0.0;
        for &(x, y) in &points {
            numerator += (x - mean_x) * (y - mean_y);
            denominator += (x - mean_x) * (x - mean_x);
        }

        if denominator <= f64::EPSILON {
            return 0.0;
        }

        let slope = numerator / denominator;
        if slope.is_finite() {
            slope
        } else {
            0.0
        }
    }

    /// Trend with the leak verdict: both enough samples and a steep enough slope
    pub fn trend(&self, min_samples: usize, growth_threshold_mb_per_minute: f64) -> MemoryTrend {
        let samples = self.samples.len();
        let slope = self.slope_mb_per_minute();

        MemoryTrend {
            slope_mb_per_minute: slope,
            samples,
            is_leak_suspected: samples >= min_samples.max(2)
                && slope > growth_threshold_mb_per_minute,
        }
    }
}
