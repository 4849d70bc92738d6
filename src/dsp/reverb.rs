//! Convolution reverb
//!
//! Convolves the input with a synthetic impulse response: independent
//! exponentially decaying noise per channel. Convolution is uniformly
//! partitioned overlap-save:
//! - the impulse response is split into `B`-sample partitions, each
//!   zero-padded to `2B` and transformed once
//! - every `B` input samples, the last `2B` inputs are transformed and pushed
//!   onto a frequency-domain delay line
//! - the delay line is multiplied against the partitions, summed and
//!   inverse-transformed; the second half is the next output block
//!
//! Output lags input by `B` samples. Until a kernel is installed the node
//! renders silence.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use rand::Rng;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::dsp::effect::Effect;
use crate::engine::AudioBuffer;

// ============================================================================
// Constants
// ============================================================================

/// Partition size in samples
pub const DEFAULT_BLOCK_SIZE: usize = 1024;

// ============================================================================
// Impulse Response
// ============================================================================

/// Generate a decaying-noise impulse response
///
/// # Arguments
/// * `channels` - One independent noise sequence per channel
/// * `seconds` - Length of the response
/// * `decay` - Envelope is `exp(-decay * t)`
///
/// Each channel is normalised to unit energy.
pub fn generate_impulse_response<R: Rng + ?Sized>(
    channels: usize,
    sample_rate: u32,
    seconds: f32,
    decay: f32,
    rng: &mut R,
) -> AudioBuffer {
    let frames = ((seconds.max(0.0) * sample_rate as f32) as usize).max(1);
    let samples = (0..channels)
        .map(|_| {
            let mut channel: Vec<f32> = (0..frames)
                .map(|i| {
                    let t = i as f32 / sample_rate as f32;
                    rng.gen_range(-1.0f32..1.0) * (-decay * t).exp()
                })
                .collect();

            let energy: f32 = channel.iter().map(|s| s * s).sum();
            if energy > 0.0 {
                let scale = energy.sqrt().recip();
                channel.iter_mut().for_each(|s| *s *= scale);
            }
            channel
        })
        .collect();

    AudioBuffer {
        samples,
        sample_rate,
    }
}

/// Generate the impulse response and its kernel on a background thread
///
/// The receiver yields exactly one kernel, or disconnects if the thread
/// could not be started.
pub fn spawn_impulse_response(
    channels: usize,
    sample_rate: u32,
    seconds: f32,
    decay: f32,
    block_size: usize,
) -> mpsc::Receiver<ReverbKernel> {
    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("reverb-ir".to_string())
        .spawn(move || {
            let ir = generate_impulse_response(
                channels,
                sample_rate,
                seconds,
                decay,
                &mut rand::thread_rng(),
            );
            let kernel = ReverbKernel::from_impulse(&ir, block_size);
            tracing::debug!(
                frames = ir.len(),
                partitions = kernel.num_partitions(),
                "impulse response ready"
            );
            let _ = tx.send(kernel);
        });

    if let Err(err) = spawned {
        tracing::warn!(error = %err, "could not start impulse response generation, reverb stays silent");
    }
    rx
}

// ============================================================================
// Kernel
// ============================================================================

/// Frequency-domain partitions of an impulse response
#[derive(Clone)]
pub struct ReverbKernel {
    block_size: usize,
    /// `[channel][partition][bin]`
    partitions: Vec<Vec<Vec<Complex<f32>>>>,
}

impl ReverbKernel {
    pub fn from_impulse(ir: &AudioBuffer, block_size: usize) -> Self {
        let block_size = block_size.max(1);
        let fft_size = block_size * 2;
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);

        let partitions = ir
            .samples
            .iter()
            .map(|channel| {
                channel
                    .chunks(block_size)
                    .map(|segment| {
                        let mut spectrum = vec![Complex::new(0.0, 0.0); fft_size];
                        for (bin, &s) in spectrum.iter_mut().zip(segment) {
                            bin.re = s;
                        }
                        fft.process(&mut spectrum);
                        spectrum
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        Self {
            block_size,
            partitions,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.first().map_or(0, Vec::len)
    }

    pub fn channels(&self) -> usize {
        self.partitions.len()
    }
}

// ============================================================================
// Convolver
// ============================================================================

struct ChannelState {
    /// Previous block followed by the block being filled
    input: Vec<f32>,
    /// Block currently being played out
    output: Vec<f32>,
    /// Frequency-domain delay line, ring indexed by `ConvolutionReverb::head`
    history: Vec<Vec<Complex<f32>>>,
}

pub struct ConvolutionReverb {
    block_size: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    kernel: Option<ReverbKernel>,
    channels: Vec<ChannelState>,
    /// Position inside the current block
    pos: usize,
    /// Slot of the newest spectrum in every channel's history
    head: usize,
    scratch: Vec<Complex<f32>>,
    accum: Vec<Complex<f32>>,
}

impl ConvolutionReverb {
    pub fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        let fft_size = block_size * 2;
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());

        Self {
            block_size,
            forward,
            inverse,
            kernel: None,
            channels: Vec::new(),
            pos: 0,
            head: 0,
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            accum: vec![Complex::new(0.0, 0.0); fft_size],
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Latency in samples
    pub fn latency(&self) -> usize {
        self.block_size
    }

    pub fn has_kernel(&self) -> bool {
        self.kernel.is_some()
    }

    /// Install a kernel; partitions built for another block size are ignored
    pub fn set_kernel(&mut self, kernel: ReverbKernel) -> bool {
        if kernel.block_size() != self.block_size || kernel.channels() == 0 {
            tracing::warn!(
                expected = self.block_size,
                found = kernel.block_size(),
                "ignoring reverb kernel with mismatched block size"
            );
            return false;
        }
        self.kernel = Some(kernel);
        let channels = self.channels.len();
        self.allocate(channels);
        true
    }

    fn allocate(&mut self, channels: usize) {
        let fft_size = self.block_size * 2;
        let partitions = self.kernel.as_ref().map_or(0, ReverbKernel::num_partitions);
        self.channels = (0..channels)
            .map(|_| ChannelState {
                input: vec![0.0; fft_size],
                output: vec![0.0; self.block_size],
                history: vec![vec![Complex::new(0.0, 0.0); fft_size]; partitions],
            })
            .collect();
        self.pos = 0;
        self.head = 0;
    }

    fn compute_block(&mut self) {
        let Some(kernel) = self.kernel.as_ref() else {
            return;
        };
        let partitions = kernel.num_partitions();
        if partitions == 0 {
            return;
        }
        let block = self.block_size;
        let norm = 1.0 / (2 * block) as f32;
        self.head = (self.head + 1) % partitions;

        for (ch, state) in self.channels.iter_mut().enumerate() {
            let filter = &kernel.partitions[ch % kernel.channels()];

            let newest = &mut state.history[self.head];
            for (bin, &s) in newest.iter_mut().zip(&state.input) {
                *bin = Complex::new(s, 0.0);
            }
            self.forward
                .process_with_scratch(newest, &mut self.scratch);

            self.accum.fill(Complex::new(0.0, 0.0));
            for (p, partition) in filter.iter().enumerate() {
                let spectrum = &state.history[(self.head + partitions - p) % partitions];
                for ((acc, x), h) in self.accum.iter_mut().zip(spectrum).zip(partition) {
                    *acc += x * h;
                }
            }
            self.inverse
                .process_with_scratch(&mut self.accum, &mut self.scratch);

            for (out, y) in state.output.iter_mut().zip(&self.accum[block..]) {
                *out = y.re * norm;
            }
            state.input.copy_within(block.., 0);
        }
    }
}

impl Effect for ConvolutionReverb {
    fn process(&mut self, buffer: &mut AudioBuffer) {
        if self.kernel.is_none() {
            for channel in &mut buffer.samples {
                channel.fill(0.0);
            }
            return;
        }
        if self.channels.len() != buffer.num_channels() {
            self.prepare(buffer.sample_rate, buffer.num_channels());
        }

        let block = self.block_size;
        for i in 0..buffer.len() {
            for (state, channel) in self.channels.iter_mut().zip(buffer.samples.iter_mut()) {
                state.input[block + self.pos] = channel[i];
                channel[i] = state.output[self.pos];
            }
            self.pos += 1;
            if self.pos == block {
                self.compute_block();
                self.pos = 0;
            }
        }
    }

    fn prepare(&mut self, _sample_rate: u32, channels: usize) {
        self.allocate(channels);
    }

    fn reset(&mut self) {
        let channels = self.channels.len();
        self.allocate(channels);
    }

    fn effect_type(&self) -> &'static str {
        "reverb"
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn delta_at(position: usize, frames: usize) -> AudioBuffer {
        let mut ir = AudioBuffer::silent(1, frames, 48000);
        ir.channel_mut(0)[position] = 1.0;
        ir
    }

    fn ramp_input(frames: usize) -> AudioBuffer {
        let samples: Vec<f32> = (0..frames).map(|i| (i + 1) as f32 * 0.01).collect();
        AudioBuffer::from_channels(vec![samples.clone(), samples], 48000).unwrap()
    }

    #[test]
    fn test_without_kernel_renders_silence() {
        let mut reverb = ConvolutionReverb::new(8);
        let mut buffer = ramp_input(32);
        reverb.process(&mut buffer);
        assert!(buffer.channel(0).iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_unit_impulse_delays_by_one_block() {
        let block = 4;
        let mut reverb = ConvolutionReverb::new(block);
        assert!(reverb.set_kernel(ReverbKernel::from_impulse(&delta_at(0, 4), block)));

        let input = ramp_input(20);
        let mut buffer = input.clone();
        reverb.process(&mut buffer);

        for i in 0..block {
            assert_relative_eq!(buffer.channel(0)[i], 0.0, epsilon = 1e-5);
        }
        for i in block..20 {
            assert_relative_eq!(buffer.channel(0)[i], input.channel(0)[i - block], epsilon = 1e-5);
            assert_relative_eq!(buffer.channel(1)[i], input.channel(1)[i - block], epsilon = 1e-5);
        }
    }

    #[test]
    fn test_impulse_in_later_partition() {
        let block = 4;
        let mut reverb = ConvolutionReverb::new(block);
        reverb.set_kernel(ReverbKernel::from_impulse(&delta_at(6, 12), block));

        let input = ramp_input(40);
        let mut buffer = input.clone();
        reverb.process(&mut buffer);

        let lag = block + 6;
        for i in lag..40 {
            assert_relative_eq!(buffer.channel(0)[i], input.channel(0)[i - lag], epsilon = 1e-4);
        }
    }

    #[test]
    fn test_processing_split_across_calls_matches_single_call() {
        let block = 8;
        let mut rng = StdRng::seed_from_u64(7);
        let ir = generate_impulse_response(2, 48000, 0.001, 3.5, &mut rng);
        let kernel = ReverbKernel::from_impulse(&ir, block);

        let input = ramp_input(64);

        let mut whole = ConvolutionReverb::new(block);
        whole.set_kernel(kernel.clone());
        let mut once = input.clone();
        whole.process(&mut once);

        let mut split = ConvolutionReverb::new(block);
        split.set_kernel(kernel);
        let mut first = AudioBuffer::from_channels(
            input.samples.iter().map(|ch| ch[..21].to_vec()).collect(),
            48000,
        )
        .unwrap();
        let mut second = AudioBuffer::from_channels(
            input.samples.iter().map(|ch| ch[21..].to_vec()).collect(),
            48000,
        )
        .unwrap();
        split.process(&mut first);
        split.process(&mut second);
        first.append(&second).unwrap();

        for (a, b) in once.channel(1).iter().zip(first.channel(1)) {
            assert_relative_eq!(a, b, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_impulse_response_shape() {
        let mut rng = StdRng::seed_from_u64(42);
        let ir = generate_impulse_response(2, 48000, 2.0, 3.5, &mut rng);

        assert_eq!(ir.num_channels(), 2);
        assert_eq!(ir.len(), 96000);
        // Channels are independent noise
        assert_ne!(ir.channel(0)[..100], ir.channel(1)[..100]);
        for channel in &ir.samples {
            let energy: f32 = channel.iter().map(|s| s * s).sum();
            assert_relative_eq!(energy, 1.0, epsilon = 1e-2);

            let head: f32 = channel[..4800].iter().map(|s| s * s).sum();
            let tail: f32 = channel[91200..].iter().map(|s| s * s).sum();
            assert!(head > tail * 100.0);
        }
    }

    #[test]
    fn test_spawned_kernel_arrives() {
        let rx = spawn_impulse_response(2, 8000, 0.1, 3.5, 64);
        let kernel = rx.recv().unwrap();
        assert_eq!(kernel.channels(), 2);
        assert_eq!(kernel.num_partitions(), 13);
    }

    #[test]
    fn test_mismatched_kernel_is_rejected() {
        let mut reverb = ConvolutionReverb::new(16);
        assert!(!reverb.set_kernel(ReverbKernel::from_impulse(&delta_at(0, 4), 8)));
        assert!(!reverb.has_kernel());
    }
}
