// SPDX-License-Identifier: GPL-3.0-only

//! Temporal filters for tracked eye positions

pub mod kalman;

pub use kalman::{KalmanConfig, KalmanFilter};

use glam::Vec2;

/// Left/right Kalman pair for iris placement
///
/// Filters come into existence on the first observation. A reset request
/// is consumed by the next [`GazeSmoother::smooth`] call, which restarts
/// both filters at that observation.
#[derive(Debug, Clone)]
pub struct GazeSmoother {
    config: KalmanConfig,
    filters: Option<[KalmanFilter; 2]>,
    reset_pending: bool,
}

impl GazeSmoother {
    pub fn new(config: KalmanConfig) -> Self {
        Self {
            config,
            filters: None,
            reset_pending: false,
        }
    }

    /// Restart both filters on the next observation
    pub fn request_reset(&mut self) {
        self.reset_pending = true;
    }

    pub fn reset_pending(&self) -> bool {
        self.reset_pending
    }

    /// Whether at least one observation has been seen
    pub fn is_initialized(&self) -> bool {
        self.filters.is_some()
    }

    /// Filter one pair of eye positions
    pub fn smooth(&mut self, left: Vec2, right: Vec2) -> (Vec2, Vec2) {
        match self.filters.as_mut() {
            None => {
                // Seeding is itself a reset
                self.reset_pending = false;
                self.filters = Some([
                    KalmanFilter::new(left, &self.config),
                    KalmanFilter::new(right, &self.config),
                ]);
                (left, right)
            }
            Some([left_filter, right_filter]) if self.reset_pending => {
                left_filter.reset(left);
                right_filter.reset(right);
                self.reset_pending = false;
                (left, right)
            }
            Some([left_filter, right_filter]) => (
                left_filter.process_state(left),
                right_filter.process_state(right),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_observation_initializes() {
        let mut smoother = GazeSmoother::new(KalmanConfig::default());
        assert!(!smoother.is_initialized());

        let left = Vec2::new(-0.2, 0.1);
        let right = Vec2::new(0.2, 0.1);
        assert_eq!(smoother.smooth(left, right), (left, right));
        assert!(smoother.is_initialized());
    }

    #[test]
    fn test_reset_is_consumed_once() {
        let mut smoother = GazeSmoother::new(KalmanConfig::default());
        smoother.smooth(Vec2::ZERO, Vec2::ZERO);

        smoother.request_reset();
        let jump = Vec2::new(0.8, -0.8);
        assert_eq!(smoother.smooth(jump, jump), (jump, jump));
        assert!(!smoother.reset_pending());

        // Next step filters again instead of snapping
        let (left, _) = smoother.smooth(Vec2::ZERO, Vec2::ZERO);
        assert!(left.x > 0.0);
    }

    #[test]
    fn test_reset_before_first_observation_is_consumed_by_seeding() {
        let mut smoother = GazeSmoother::new(KalmanConfig::default());
        smoother.request_reset();
        smoother.smooth(Vec2::ZERO, Vec2::ZERO);
        assert!(!smoother.reset_pending());

        let target = Vec2::new(1.0, 1.0);
        let (left, right) = smoother.smooth(target, target);
        assert!(left.x > 0.0 && left.x < 1.0);
        assert!(right.y > 0.0 && right.y < 1.0);
    }
}
