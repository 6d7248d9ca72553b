// SPDX-License-Identifier: GPL-3.0-only

//! Recording output: pooled pixel buffers and the consumer interface

pub mod pixel_buffer;
pub mod pool;

pub use pixel_buffer::{OUTPUT_FORMAT, PixelBuffer};
pub use pool::{BufferPool, Pooled};

use crate::constants::output::TIMESCALE;
use std::time::Duration;

/// Receives rendered frames
///
/// `rendered_output` is always invoked on the runtime behind
/// `callback_handle`, never on the render thread, after the frame's GPU
/// work has completed.
pub trait OutputConsumer: Send + Sync {
    fn callback_handle(&self) -> tokio::runtime::Handle;

    fn rendered_output(&self, buffer: Pooled<PixelBuffer>, timestamp: Duration);
}

/// Convert a tracking timestamp in seconds to a presentation time
///
/// The value is quantized to the output timescale; negative or non-finite
/// input maps to zero.
pub fn presentation_time(seconds: f64) -> Duration {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    let ticks = (seconds * TIMESCALE as f64).round() as u64;
    Duration::from_secs(ticks / TIMESCALE as u64)
        + Duration::from_nanos((ticks % TIMESCALE as u64) * (1_000_000_000 / TIMESCALE as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presentation_time() {
        assert_eq!(presentation_time(1.5), Duration::from_millis(1500));
        assert_eq!(presentation_time(0.0000004), Duration::ZERO);
        assert_eq!(presentation_time(0.0000006), Duration::from_micros(1));
        assert_eq!(presentation_time(-3.0), Duration::ZERO);
        assert_eq!(presentation_time(f64::NAN), Duration::ZERO);
    }
}
