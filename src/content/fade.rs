// SPDX-License-Identifier: GPL-3.0-only

//! Linear opacity transitions

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fade {
    from: f32,
    to: f32,
    start: Option<Instant>,
    duration: Duration,
}

impl Fade {
    /// A fade that has already reached `value`
    pub fn settled(value: f32) -> Self {
        Self {
            from: value,
            to: value,
            start: None,
            duration: Duration::ZERO,
        }
    }

    /// Target opacity
    pub fn target(&self) -> f32 {
        self.to
    }

    /// Start a new transition from the current value towards `target`
    pub fn retarget(&mut self, target: f32, duration: Duration, now: Instant) {
        if target == self.to {
            return;
        }
        self.from = self.value(now);
        self.to = target;
        self.start = Some(now);
        self.duration = duration;
    }

    pub fn value(&self, now: Instant) -> f32 {
        let Some(start) = self.start else {
            return self.to;
        };
        if self.duration.is_zero() {
            return self.to;
        }
        let t = now.saturating_duration_since(start).as_secs_f32() / self.duration.as_secs_f32();
        self.from + (self.to - self.from) * t.clamp(0.0, 1.0)
    }

    pub fn is_settled(&self, now: Instant) -> bool {
        self.start
            .is_none_or(|start| now.saturating_duration_since(start) >= self.duration)
    }
}
