//! Types for synthesized audio
//!
//! Contains the PCM frame record handed to the playback pipeline and the
//! identities that tag every frame of a segment.

use std::fmt;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SynthesisError;

/// Bytes per 16-bit PCM sample
pub const BYTES_PER_SAMPLE: usize = 2;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh unique identity
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4().simple().to_string())
            }

            /// Borrow the identity as a string
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

opaque_id!(
    /// Identity of one synthesis request
    RequestId
);

opaque_id!(
    /// Identity of the frame sequence produced by one synthesis call
    SegmentId
);

/// One block of 16-bit little-endian PCM
///
/// `data.len() == samples_per_channel * num_channels * 2` always holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    data: Bytes,
    sample_rate: u32,
    num_channels: u32,
    samples_per_channel: u32,
}

impl AudioFrame {
    /// Create a frame from raw PCM bytes
    ///
    /// # Errors
    ///
    /// Returns `SynthesisError::Decode` if the byte length does not match
    /// the declared sample count.
    pub fn new(
        data: Bytes,
        sample_rate: u32,
        num_channels: u32,
        samples_per_channel: u32,
    ) -> Result<Self, SynthesisError> {
        let expected =
            samples_per_channel as usize * num_channels as usize * BYTES_PER_SAMPLE;
        if data.len() != expected {
            return Err(SynthesisError::Decode(format!(
                "frame holds {} bytes, expected {expected} for {samples_per_channel} samples x {num_channels} channels",
                data.len()
            )));
        }
        if num_channels == 0 || sample_rate == 0 {
            return Err(SynthesisError::Decode(
                "frame must have a sample rate and at least one channel".to_string(),
            ));
        }

        Ok(Self {
            data,
            sample_rate,
            num_channels,
            samples_per_channel,
        })
    }

    /// Create a mono frame from signed 16-bit samples
    #[must_use]
    pub fn from_samples(samples: &[i16], sample_rate: u32) -> Self {
        let mut data = BytesMut::with_capacity(samples.len() * BYTES_PER_SAMPLE);
        for sample in samples {
            data.put_i16_le(*sample);
        }

        #[allow(clippy::cast_possible_truncation)]
        let samples_per_channel = samples.len() as u32;

        Self {
            data: data.freeze(),
            sample_rate,
            num_channels: 1,
            samples_per_channel,
        }
    }

    /// PCM payload bytes
    #[must_use]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Channel count (always 1 for frames produced by this crate)
    #[must_use]
    pub const fn num_channels(&self) -> u32 {
        self.num_channels
    }

    /// Samples in each channel
    #[must_use]
    pub const fn samples_per_channel(&self) -> u32 {
        self.samples_per_channel
    }

    /// Decode the payload back into samples
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.data
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
    }

    /// Playback duration of the frame
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(f64::from(self.samples_per_channel) / f64::from(self.sample_rate))
    }

    /// Concatenate frames sharing one format into a single frame
    ///
    /// Returns `None` for an empty input.
    ///
    /// # Errors
    ///
    /// Returns `SynthesisError::Decode` if the frames disagree on sample
    /// rate or channel count.
    pub fn concat(frames: &[Self]) -> Result<Option<Self>, SynthesisError> {
        let Some(first) = frames.first() else {
            return Ok(None);
        };

        let mut data = BytesMut::with_capacity(frames.iter().map(|f| f.data.len()).sum());
        let mut samples_per_channel = 0u32;
        for frame in frames {
            if frame.sample_rate != first.sample_rate || frame.num_channels != first.num_channels
            {
                return Err(SynthesisError::Decode(format!(
                    "cannot merge {}Hz/{}ch frame into {}Hz/{}ch stream",
                    frame.sample_rate, frame.num_channels, first.sample_rate, first.num_channels
                )));
            }
            data.extend_from_slice(&frame.data);
            samples_per_channel += frame.samples_per_channel;
        }

        Self::new(
            data.freeze(),
            first.sample_rate,
            first.num_channels,
            samples_per_channel,
        )
        .map(Some)
    }
}

/// A frame published on the output channel, tagged with its segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAudio {
    /// Identity of the originating request
    pub request_id: RequestId,
    /// Identity of the segment this frame belongs to
    pub segment_id: SegmentId,
    /// The PCM frame
    pub frame: AudioFrame,
}

/// What a synthesis adapter can do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtsCapabilities {
    /// Whether text can be pushed incrementally into one segment
    pub streaming: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_samples_encodes_little_endian() {
        let frame = AudioFrame::from_samples(&[1, -1, i16::MAX, i16::MIN], 48_000);

        assert_eq!(frame.samples_per_channel(), 4);
        assert_eq!(frame.num_channels(), 1);
        assert_eq!(frame.data().len(), 8);
        assert_eq!(&frame.data()[..4], &[0x01, 0x00, 0xFF, 0xFF]);
        assert_eq!(
            frame.samples().collect::<Vec<_>>(),
            vec![1, -1, i16::MAX, i16::MIN]
        );
    }

    #[test]
    fn new_rejects_length_mismatch() {
        let result = AudioFrame::new(Bytes::from_static(&[0, 0, 0]), 48_000, 1, 2);
        assert!(matches!(result, Err(SynthesisError::Decode(_))));
    }

    #[test]
    fn new_rejects_zero_channels() {
        let result = AudioFrame::new(Bytes::new(), 48_000, 0, 0);
        assert!(result.is_err());
    }

    #[test]
    fn duration_matches_sample_count() {
        let frame = AudioFrame::from_samples(&[0; 480], 48_000);
        assert_eq!(frame.duration(), Duration::from_millis(10));
    }

    #[test]
    fn concat_joins_payloads() {
        let a = AudioFrame::from_samples(&[1, 2], 16_000);
        let b = AudioFrame::from_samples(&[3], 16_000);

        let merged = AudioFrame::concat(&[a, b]).unwrap().unwrap();

        assert_eq!(merged.samples_per_channel(), 3);
        assert_eq!(merged.samples().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn concat_of_nothing_is_none() {
        assert!(AudioFrame::concat(&[]).unwrap().is_none());
    }

    #[test]
    fn concat_rejects_mixed_rates() {
        let a = AudioFrame::from_samples(&[1], 16_000);
        let b = AudioFrame::from_samples(&[1], 48_000);
        assert!(AudioFrame::concat(&[a, b]).is_err());
    }

    #[test]
    fn identities_are_unique() {
        let a = SegmentId::generate();
        let b = SegmentId::generate();

        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert_eq!(a.to_string(), a.as_str());
    }
}
