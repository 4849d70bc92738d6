//! Distortion
//!
//! Waveshaping distortion. The transfer curve
//! `f(x) = (1 + k) x / (1 + k |x|)` with `k = amount * strength` is
//! tabulated once per amount change and read with linear interpolation.

use crate::dsp::effect::Effect;
use crate::engine::AudioBuffer;

// ============================================================================
// Constants
// ============================================================================

/// Points in the tabulated curve over [-1, 1]
pub const CURVE_SIZE: usize = 4096;

/// Default strength constant
pub const DEFAULT_STRENGTH: f32 = 50.0;

// ============================================================================
// Waveshaping
// ============================================================================

/// Soft-clipping transfer function
#[inline]
fn waveshape(x: f32, k: f32) -> f32 {
    (1.0 + k) * x / (1.0 + k * x.abs())
}

/// Build the lookup table for a given `k`
pub fn make_curve(k: f32) -> Vec<f32> {
    (0..CURVE_SIZE)
        .map(|i| {
            let x = i as f32 * 2.0 / (CURVE_SIZE - 1) as f32 - 1.0;
            waveshape(x, k)
        })
        .collect()
}

// ============================================================================
// Distortion Node
// ============================================================================

#[derive(Debug, Clone)]
pub struct Distortion {
    strength: f32,
    /// Drive amount (0-1)
    amount: f32,
    curve: Vec<f32>,
    /// Bumped every time the curve is rebuilt
    curve_version: u64,
}

impl Distortion {
    pub fn new(strength: f32) -> Self {
        Self {
            strength,
            amount: 0.0,
            curve: make_curve(0.0),
            curve_version: 0,
        }
    }

    pub fn amount(&self) -> f32 {
        self.amount
    }

    pub fn curve_version(&self) -> u64 {
        self.curve_version
    }

    /// Set the drive amount
    ///
    /// # Arguments
    /// * `amount` - Drive (clamped to 0-1). The curve is only rebuilt when
    ///   the value actually changes.
    pub fn set_amount(&mut self, amount: f32) {
        let amount = if amount.is_finite() {
            amount.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if amount == self.amount {
            return;
        }
        self.amount = amount;
        self.curve = make_curve(amount * self.strength);
        self.curve_version += 1;
        tracing::trace!(amount, version = self.curve_version, "distortion curve rebuilt");
    }

    /// Map one sample through the curve
    #[inline]
    pub fn shape(&self, x: f32) -> f32 {
        if x.is_nan() {
            return 0.0;
        }
        let last = CURVE_SIZE - 1;
        let pos = (x.clamp(-1.0, 1.0) + 1.0) * 0.5 * last as f32;
        let index = pos.floor() as usize;
        if index >= last {
            return self.curve[last];
        }
        let frac = pos - index as f32;
        self.curve[index] + (self.curve[index + 1] - self.curve[index]) * frac
    }
}

impl Default for Distortion {
    fn default() -> Self {
        Self::new(DEFAULT_STRENGTH)
    }
}

impl Effect for Distortion {
    fn process(&mut self, buffer: &mut AudioBuffer) {
        for channel in &mut buffer.samples {
            for sample in channel.iter_mut() {
                *sample = self.shape(*sample);
            }
        }
    }

    fn prepare(&mut self, _sample_rate: u32, _channels: usize) {}

    fn reset(&mut self) {}

    fn effect_type(&self) -> &'static str {
        "distortion"
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_zero_amount_is_identity() {
        let distortion = Distortion::default();
        for &x in &[-1.0, -0.5, -0.1234, 0.0, 0.3, 0.77, 1.0] {
            assert_relative_eq!(distortion.shape(x), x, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_curve_is_odd_and_bounded() {
        let mut distortion = Distortion::default();
        distortion.set_amount(0.8);
        for &x in &[0.05, 0.2, 0.5, 0.9] {
            assert_relative_eq!(distortion.shape(-x), -distortion.shape(x), epsilon = 1e-4);
            assert!(distortion.shape(x) > x);
        }
        assert_relative_eq!(distortion.shape(1.0), 1.0, epsilon = 1e-5);
        assert_relative_eq!(distortion.shape(4.0), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_curve_rebuilt_only_on_change() {
        let mut distortion = Distortion::default();
        distortion.set_amount(0.5);
        distortion.set_amount(0.5);
        distortion.set_amount(0.5);
        assert_eq!(distortion.curve_version(), 1);

        distortion.set_amount(0.6);
        assert_eq!(distortion.curve_version(), 2);
    }

    #[test]
    fn test_process_shapes_every_channel() {
        let mut distortion = Distortion::default();
        distortion.set_amount(1.0);
        let mut buffer =
            AudioBuffer::from_channels(vec![vec![0.1; 8], vec![-0.1; 8]], 48000).unwrap();
        distortion.process(&mut buffer);

        // k = 50: f(0.1) = 51 * 0.1 / 6 = 0.85
        assert_relative_eq!(buffer.channel(0)[0], 0.85, epsilon = 1e-2);
        assert_relative_eq!(buffer.channel(1)[7], -0.85, epsilon = 1e-2);
    }

    #[test]
    fn test_nan_input_is_silenced() {
        assert_eq!(Distortion::default().shape(f32::NAN), 0.0);
    }
}
