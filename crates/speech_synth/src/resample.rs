//! Band-limited resampling and 16-bit requantization
//!
//! One resampler implementation serves both decode paths: the container path
//! feeds the whole payload at once, the streaming path feeds one decoded
//! frame at a time. Output is delay-compensated so that the total sample
//! count is `round(input × target / source)` once [`StreamResampler::finish`]
//! has run.

use rubato::{FftFixedIn, Resampler};
use tracing::trace;

use crate::error::SynthesisError;

/// Input chunk used when the caller has no natural frame size
pub const DEFAULT_CHUNK: usize = 1024;

/// FFT sub-chunks per input chunk
const SUB_CHUNKS: usize = 2;

const I16_SCALE: f32 = 32768.0;

/// Convert a 16-bit sample to the unit range
#[must_use]
pub fn to_unit(sample: i16) -> f32 {
    f32::from(sample) / I16_SCALE
}

/// Quantize a unit-range value to 16 bits
///
/// Rounds to nearest and saturates at the representable range instead of
/// wrapping.
#[must_use]
pub fn quantize(value: f32) -> i16 {
    let scaled = (value * I16_SCALE).round();
    if scaled.is_nan() {
        return 0;
    }
    #[allow(clippy::cast_possible_truncation)]
    let sample = scaled.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16;
    sample
}

/// Quantize a buffer of unit-range values
#[must_use]
pub fn quantize_all(values: &[f32]) -> Vec<i16> {
    values.iter().copied().map(quantize).collect()
}

/// Average interleaved channels down to mono
#[must_use]
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    #[allow(clippy::cast_precision_loss)]
    let weight = 1.0 / channels as f32;
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() * weight)
        .collect()
}

/// Number of output samples for `input_len` samples, rounded half up
#[must_use]
pub fn output_len(input_len: usize, source_rate: u32, target_rate: u32) -> usize {
    if source_rate == 0 {
        return 0;
    }
    let numerator = input_len as u128 * u128::from(target_rate) + u128::from(source_rate) / 2;
    #[allow(clippy::cast_possible_truncation)]
    let len = (numerator / u128::from(source_rate)) as usize;
    len
}

/// Stateful mono resampler fed in arbitrary-sized pieces
pub struct StreamResampler {
    inner: FftFixedIn<f32>,
    pending: Vec<f32>,
    delay_remaining: usize,
    consumed: usize,
    produced: usize,
    source_rate: u32,
    target_rate: u32,
}

impl std::fmt::Debug for StreamResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamResampler")
            .field("source_rate", &self.source_rate)
            .field("target_rate", &self.target_rate)
            .field("pending", &self.pending.len())
            .field("consumed", &self.consumed)
            .field("produced", &self.produced)
            .finish_non_exhaustive()
    }
}

impl StreamResampler {
    /// Create a resampler converting `source_rate` to `target_rate`
    ///
    /// # Errors
    ///
    /// Returns `SynthesisError::Resample` if rubato rejects the parameters.
    pub fn new(source_rate: u32, target_rate: u32, chunk: usize) -> Result<Self, SynthesisError> {
        if source_rate == 0 || target_rate == 0 {
            return Err(SynthesisError::Resample(format!(
                "cannot resample {source_rate}Hz to {target_rate}Hz"
            )));
        }

        let inner = FftFixedIn::<f32>::new(
            source_rate as usize,
            target_rate as usize,
            chunk.max(SUB_CHUNKS),
            SUB_CHUNKS,
            1,
        )?;
        let delay_remaining = inner.output_delay();

        Ok(Self {
            inner,
            pending: Vec::with_capacity(chunk),
            delay_remaining,
            consumed: 0,
            produced: 0,
            source_rate,
            target_rate,
        })
    }

    /// Source sample rate
    #[must_use]
    pub const fn source_rate(&self) -> u32 {
        self.source_rate
    }

    /// Feed samples, returning whatever output is ready
    ///
    /// # Errors
    ///
    /// Returns `SynthesisError::Resample` if rubato fails.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>, SynthesisError> {
        self.pending.extend_from_slice(input);
        self.consumed += input.len();

        let mut out = Vec::new();
        loop {
            let needed = self.inner.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let block = vec![self.pending.drain(..needed).collect::<Vec<f32>>()];
            let frames = self.inner.process(block.as_slice(), None)?;
            self.take_output(&frames[0], &mut out);
        }

        trace!(input = input.len(), output = out.len(), "Resampled chunk");
        Ok(out)
    }

    /// Flush buffered input and pad the tail to the exact output length
    ///
    /// # Errors
    ///
    /// Returns `SynthesisError::Resample` if rubato fails.
    pub fn finish(mut self) -> Result<Vec<f32>, SynthesisError> {
        let expected = output_len(self.consumed, self.source_rate, self.target_rate);
        let mut out = Vec::new();

        if !self.pending.is_empty() {
            let block = vec![std::mem::take(&mut self.pending)];
            let frames = self.inner.process_partial(Some(block.as_slice()), None)?;
            self.take_output(&frames[0], &mut out);
        }

        while self.produced < expected {
            let frames = self.inner.process_partial(None::<&[Vec<f32>]>, None)?;
            if frames[0].is_empty() {
                break;
            }
            self.take_output(&frames[0], &mut out);
        }

        if self.produced > expected {
            let excess = self.produced - expected;
            out.truncate(out.len().saturating_sub(excess));
        } else if self.produced < expected {
            out.resize(out.len() + (expected - self.produced), 0.0);
        }

        Ok(out)
    }

    fn take_output(&mut self, block: &[f32], out: &mut Vec<f32>) {
        let skip = self.delay_remaining.min(block.len());
        self.delay_remaining -= skip;
        out.extend_from_slice(&block[skip..]);
        self.produced += block.len() - skip;
    }
}

/// Resample a whole mono buffer
///
/// Equal rates return the input unchanged.
///
/// # Errors
///
/// Returns `SynthesisError::Resample` if rubato fails.
pub fn resample_mono(
    input: &[f32],
    source_rate: u32,
    target_rate: u32,
) -> Result<Vec<f32>, SynthesisError> {
    resample_mono_cancellable(input, source_rate, target_rate, || false)
}

/// Resample a whole mono buffer, polling `cancelled` before every
/// [`DEFAULT_CHUNK`] of input
///
/// # Errors
///
/// Returns `SynthesisError::Cancelled` once `cancelled` reports true and
/// `SynthesisError::Resample` if rubato fails.
pub fn resample_mono_cancellable(
    input: &[f32],
    source_rate: u32,
    target_rate: u32,
    cancelled: impl Fn() -> bool,
) -> Result<Vec<f32>, SynthesisError> {
    if source_rate == target_rate {
        return Ok(input.to_vec());
    }
    if input.is_empty() {
        return Ok(Vec::new());
    }

    let mut resampler = StreamResampler::new(source_rate, target_rate, DEFAULT_CHUNK)?;
    let mut out = Vec::with_capacity(output_len(input.len(), source_rate, target_rate));
    for piece in input.chunks(DEFAULT_CHUNK) {
        if cancelled() {
            return Err(SynthesisError::Cancelled);
        }
        out.extend(resampler.process(piece)?);
    }
    out.extend(resampler.finish()?);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_rounds_to_nearest() {
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(0.5 / I16_SCALE), 1);
        assert_eq!(quantize(-1.4 / I16_SCALE), -1);
        assert_eq!(quantize(100.6 / I16_SCALE), 101);
    }

    #[test]
    fn quantize_saturates_instead_of_wrapping() {
        assert_eq!(quantize(1.0), i16::MAX);
        assert_eq!(quantize(1.7), i16::MAX);
        assert_eq!(quantize(-1.0), i16::MIN);
        assert_eq!(quantize(-3.0), i16::MIN);
        assert_eq!(quantize(f32::INFINITY), i16::MAX);
        assert_eq!(quantize(f32::NAN), 0);
    }

    #[test]
    fn unit_conversion_round_trips() {
        for sample in [i16::MIN, -12345, -1, 0, 1, 12345, i16::MAX] {
            assert_eq!(quantize(to_unit(sample)), sample);
        }
    }

    #[test]
    fn downmix_averages_channels() {
        let mono = downmix_to_mono(&[1.0, 0.0, -0.5, -0.5], 2);
        assert_eq!(mono, vec![0.5, -0.5]);
        assert_eq!(downmix_to_mono(&[0.25], 1), vec![0.25]);
    }

    #[test]
    fn output_len_rounds_half_up() {
        assert_eq!(output_len(2050, 20_500, 48_000), 4800);
        assert_eq!(output_len(1, 20_500, 48_000), 2);
        assert_eq!(output_len(3, 48_000, 16_000), 1);
        assert_eq!(output_len(100, 44_100, 44_100), 100);
        assert_eq!(output_len(0, 22_050, 48_000), 0);
    }

    #[test]
    fn same_rate_is_identity() {
        let input = vec![0.1, -0.2, 0.3];
        assert_eq!(resample_mono(&input, 24_000, 24_000).unwrap(), input);
    }

    #[test]
    fn upsampling_produces_exact_length() {
        let input = vec![0.0f32; 2050];
        let out = resample_mono(&input, 20_500, 48_000).unwrap();
        assert_eq!(out.len(), 4800);
    }

    #[test]
    fn downsampling_produces_exact_length() {
        let input: Vec<f32> = (0..4410).map(|i| ((i % 50) as f32 / 50.0) - 0.5).collect();
        let out = resample_mono(&input, 44_100, 16_000).unwrap();
        assert_eq!(out.len(), output_len(4410, 44_100, 16_000));
    }

    #[test]
    fn streamed_pieces_match_expected_length() {
        let mut resampler = StreamResampler::new(24_000, 48_000, 576).unwrap();
        let mut total = 0;
        for _ in 0..7 {
            total += resampler.process(&[0.25f32; 576]).unwrap().len();
        }
        total += resampler.finish().unwrap().len();
        assert_eq!(total, 576 * 7 * 2);
    }

    #[test]
    fn cancellation_stops_between_chunks() {
        let input = vec![0.1f32; DEFAULT_CHUNK * 10];
        let polls = std::cell::Cell::new(0);

        let result = resample_mono_cancellable(&input, 22_051, 48_000, || {
            polls.set(polls.get() + 1);
            polls.get() > 3
        });

        assert!(matches!(result, Err(SynthesisError::Cancelled)));
        assert_eq!(polls.get(), 4);
    }

    #[test]
    fn chunked_feed_matches_plain_resample() {
        let input: Vec<f32> = (0..5000).map(|i| ((i % 37) as f32 / 37.0) - 0.5).collect();

        let plain = resample_mono(&input, 22_050, 48_000).unwrap();
        let polled = resample_mono_cancellable(&input, 22_050, 48_000, || false).unwrap();

        assert_eq!(plain, polled);
        assert_eq!(plain.len(), output_len(5000, 22_050, 48_000));
    }

    #[test]
    fn rejects_zero_rate() {
        assert!(StreamResampler::new(0, 48_000, DEFAULT_CHUNK).is_err());
    }

    #[test]
    fn sine_survives_resampling() {
        let input: Vec<f32> = (0..8000)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16_000.0).sin() * 0.5)
            .collect();
        let out = resample_mono(&input, 16_000, 48_000).unwrap();

        let mid = &out[out.len() / 4..3 * out.len() / 4];
        let peak = mid.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
        assert!((peak - 0.5).abs() < 0.05, "peak {peak}");
    }
}
