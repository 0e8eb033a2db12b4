use std::collections::VecDeque;

/// A sliding window that smooths noisy integer readings.
///
/// Keeps the most recent `window_size` samples and reports their mean using
/// truncating integer division, so the smoothed value sits at most one unit
/// below the true mean. Downstream hysteresis bands are wide enough to absorb
/// that bias.
#[derive(Debug, Clone)]
pub struct MovingAverage {
    window: VecDeque<i32>,
    window_size: usize,
}

impl MovingAverage {
    /// Creates an empty filter. A `window_size` of zero is treated as one.
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size,
        }
    }

    /// Adds a reading, evicting the oldest once the window is full, and
    /// returns the new average.
    pub fn update(&mut self, sample: i32) -> i32 {
        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(sample);

        let sum: i64 = self.window.iter().map(|&s| i64::from(s)).sum();
        (sum / self.window.len() as i64) as i32
    }

    /// Average of the current window, `None` before the first sample.
    pub fn average(&self) -> Option<i32> {
        if self.window.is_empty() {
            return None;
        }
        let sum: i64 = self.window.iter().map(|&s| i64::from(s)).sum();
        Some((sum / self.window.len() as i64) as i32)
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_return_sample_when_window_is_empty() {
        let mut filter = MovingAverage::new(5);

        assert_eq!(filter.update(45), 45);
        assert_eq!(filter.len(), 1);
    }

    #[test]
    fn should_average_full_window() {
        let mut filter = MovingAverage::new(5);

        let mut avg = 0;
        for t in [70, 72, 74, 76, 78] {
            avg = filter.update(t);
        }

        assert_eq!(avg, 74);
    }

    #[test]
    fn should_evict_oldest_sample_on_overflow() {
        let mut filter = MovingAverage::new(5);
        for t in [70, 72, 74, 76, 78] {
            filter.update(t);
        }

        let avg = filter.update(80);

        assert_eq!(avg, 76);
        assert_eq!(filter.len(), 5);
        assert_eq!(filter.window, VecDeque::from([72, 74, 76, 78, 80]));
    }

    #[test]
    fn should_truncate_fractional_average() {
        let mut filter = MovingAverage::new(5);

        filter.update(70);
        let avg = filter.update(71);

        assert_eq!(avg, 70);
    }

    #[test]
    fn should_average_partial_window() {
        let mut filter = MovingAverage::new(5);

        filter.update(60);
        filter.update(63);
        let avg = filter.update(66);

        assert_eq!(avg, 63);
        assert_eq!(filter.average(), Some(63));
    }

    #[test]
    fn should_restart_empty_after_reset() {
        let mut filter = MovingAverage::new(3);
        filter.update(90);
        filter.update(91);

        filter.reset();

        assert!(filter.is_empty());
        assert_eq!(filter.average(), None);
        assert_eq!(filter.update(40), 40);
    }

    #[test]
    fn should_treat_zero_window_as_one() {
        let mut filter = MovingAverage::new(0);

        filter.update(10);
        let avg = filter.update(20);

        assert_eq!(avg, 20);
        assert_eq!(filter.len(), 1);
    }
}
