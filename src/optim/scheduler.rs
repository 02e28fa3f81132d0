//! Learning rate schedules.

/// A trait for learning rate schedules over epochs.
pub trait LRScheduler {
    /// Calculates the learning rate for a given epoch from a base rate.
    fn rate(&self, base_lr: f32, epoch: usize) -> f32;
}

/// Step decay: multiplies the base rate by `gamma` once every `period`
/// epochs, i.e. `base * gamma^(epoch / period)`.
///
/// The default matches the classic ImageNet recipe - decay by 10x every 30
/// epochs.
pub struct StepDecay {
    pub gamma: f32,
    pub period: usize,
}

impl StepDecay {
    pub fn new(gamma: f32, period: usize) -> Self {
        Self { gamma, period }
    }
}

impl Default for StepDecay {
    fn default() -> Self {
        Self {
            gamma: 0.1,
            period: 30,
        }
    }
}

impl LRScheduler for StepDecay {
    fn rate(&self, base_lr: f32, epoch: usize) -> f32 {
        base_lr * self.gamma.powi((epoch / self.period) as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_decay() {
        let schedule = StepDecay::default();

        // Flat within a period.
        assert_eq!(schedule.rate(0.1, 0), 0.1);
        assert_eq!(schedule.rate(0.1, 29), 0.1);

        // One step down at the boundary.
        assert!((schedule.rate(0.1, 30) - 0.01).abs() < 1e-9);
        assert!((schedule.rate(0.1, 59) - 0.01).abs() < 1e-9);

        // Three periods in: 0.1 * 0.1^3.
        assert!((schedule.rate(0.1, 90) - 0.0001).abs() < 1e-9);
    }

    #[test]
    fn test_custom_period() {
        let schedule = StepDecay::new(0.5, 10);
        assert_eq!(schedule.rate(1.0, 9), 1.0);
        assert!((schedule.rate(1.0, 10) - 0.5).abs() < 1e-9);
        assert!((schedule.rate(1.0, 25) - 0.25).abs() < 1e-9);
    }
}
