//! Effect trait definition
//!
//! Shared surface of the graph's processing nodes. The graph topology is
//! fixed, so nodes are held concretely; the trait keeps their lifecycle
//! (prepare / process / reset) uniform.

use crate::engine::AudioBuffer;

/// A processing node of the effects graph
///
/// Nodes process audio buffers in-place and keep whatever history they need
/// (delay lines, convolution state) between calls.
pub trait Effect: Send {
    /// Process audio buffer in-place
    fn process(&mut self, buffer: &mut AudioBuffer);

    /// Prepare the node for a sample rate and channel count
    ///
    /// Reallocates internal state; history is lost.
    fn prepare(&mut self, sample_rate: u32, channels: usize);

    /// Clear internal history without changing parameters
    fn reset(&mut self);

    /// Short identifier used in logs
    fn effect_type(&self) -> &'static str;
}
