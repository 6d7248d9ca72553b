// SPDX-License-Identifier: GPL-3.0-only

//! Linear Kalman filter over a 2-D position
//!
//! The state is the position itself; velocity is left implicit in the
//! process noise. Transition and observation are both identity, so each
//! step blends the prediction toward the measurement by the Kalman gain.

use glam::Vec2;
use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Noise parameters shared by every gaze filter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KalmanConfig {
    /// Process noise variance added per step
    pub process_noise: f32,
    /// Measurement noise variance
    pub measurement_noise: f32,
    /// Prior variance after init/reset
    pub initial_covariance: f32,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        Self {
            process_noise: 0.01,
            measurement_noise: 0.1,
            initial_covariance: 1.0,
        }
    }
}

impl KalmanConfig {
    pub fn validate(&self) -> Result<(), String> {
        let values = [
            ("process_noise", self.process_noise),
            ("measurement_noise", self.measurement_noise),
            ("initial_covariance", self.initial_covariance),
        ];
        for (name, value) in values {
            if !(value.is_finite() && value >= 0.0) {
                return Err(format!("kalman.{} must be finite and >= 0, got {}", name, value));
            }
        }
        Ok(())
    }
}

/// Kalman filter for one eye's screen position
#[derive(Debug, Clone)]
pub struct KalmanFilter {
    state: Vector2<f32>,
    covariance: Matrix2<f32>,
    transition: Matrix2<f32>,
    observation: Matrix2<f32>,
    process_noise: Matrix2<f32>,
    measurement_noise: Matrix2<f32>,
    prior: Matrix2<f32>,
}

impl KalmanFilter {
    /// Initialize at `initial_location` with the prior covariance
    pub fn new(initial_location: Vec2, config: &KalmanConfig) -> Self {
        let prior = Matrix2::identity() * config.initial_covariance;
        Self {
            state: Vector2::new(initial_location.x, initial_location.y),
            covariance: prior,
            transition: Matrix2::identity(),
            observation: Matrix2::identity(),
            process_noise: Matrix2::identity() * config.process_noise,
            measurement_noise: Matrix2::identity() * config.measurement_noise,
            prior,
        }
    }

    /// Discard history and restart at `new_location`
    pub fn reset(&mut self, new_location: Vec2) {
        self.state = Vector2::new(new_location.x, new_location.y);
        self.covariance = self.prior;
    }

    /// Current estimate
    pub fn location(&self) -> Vec2 {
        Vec2::new(self.state.x, self.state.y)
    }

    /// Run one predict/update step and return the filtered position
    pub fn process_state(&mut self, measurement: Vec2) -> Vec2 {
        self.predict();
        self.update(Vector2::new(measurement.x, measurement.y));
        self.location()
    }

    fn predict(&mut self) {
        self.state = self.transition * self.state;
        self.covariance =
            self.transition * self.covariance * self.transition.transpose() + self.process_noise;
    }

    fn update(&mut self, measurement: Vector2<f32>) {
        let innovation = measurement - self.observation * self.state;
        let innovation_cov = self.observation * self.covariance * self.observation.transpose()
            + self.measurement_noise;

        // Keep the prediction if the innovation covariance cannot be inverted
        let Some(inverse) = innovation_cov.lu().try_inverse() else {
            warn!(
                covariance = ?innovation_cov,
                "Singular innovation covariance, skipping gaze update"
            );
            return;
        };

        let gain = self.covariance * self.observation.transpose() * inverse;
        self.state += gain * innovation;
        self.covariance = (Matrix2::identity() - gain * self.observation) * self.covariance;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_then_process_returns_location() {
        let config = KalmanConfig::default();
        let mut filter = KalmanFilter::new(Vec2::new(-0.4, 0.2), &config);
        filter.process_state(Vec2::new(0.3, 0.9));

        let location = Vec2::new(0.125, -0.75);
        filter.reset(location);
        let out = filter.process_state(location);
        assert!((out - location).length() < 1e-6);
    }

    #[test]
    fn test_measurements_are_smoothed() {
        let config = KalmanConfig::default();
        let mut filter = KalmanFilter::new(Vec2::ZERO, &config);

        let out = filter.process_state(Vec2::new(1.0, 1.0));
        assert!(out.x > 0.0 && out.x < 1.0);
        assert!(out.y > 0.0 && out.y < 1.0);

        // Repeated identical measurements converge
        let mut last = out;
        for _ in 0..200 {
            last = filter.process_state(Vec2::new(1.0, 1.0));
        }
        assert!((last - Vec2::ONE).length() < 1e-3);
    }

    #[test]
    fn test_singular_covariance_keeps_prediction() {
        let config = KalmanConfig {
            process_noise: 0.0,
            measurement_noise: 0.0,
            initial_covariance: 0.0,
        };
        let mut filter = KalmanFilter::new(Vec2::new(0.5, 0.5), &config);
        let out = filter.process_state(Vec2::new(3.0, 3.0));
        assert_eq!(out, Vec2::new(0.5, 0.5));
    }

    #[test]
    fn test_config_validation() {
        assert!(KalmanConfig::default().validate().is_ok());
        let bad = KalmanConfig {
            measurement_noise: f32::NAN,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
