// ========================================================================================
//                        Streaming mean and variance over dosages
// ========================================================================================

/// Welford accumulator. Two statistics built over disjoint sample sets merge into the
/// statistic of their union, so the order in which samples arrive does not matter.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningStatistic {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningStatistic {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// Chan et al. pairwise combination.
    pub fn merge(&mut self, other: &RunningStatistic) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = *other;
            return;
        }
        let total = self.count + other.count;
        let delta = other.mean - self.mean;
        self.mean += delta * other.count as f64 / total as f64;
        self.m2 += other.m2 + delta * delta * (self.count as f64 * other.count as f64) / total as f64;
        self.count = total;
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// `None` until at least one value has been pushed.
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean)
    }

    /// Unbiased sample variance; zero for fewer than two values.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }
}
