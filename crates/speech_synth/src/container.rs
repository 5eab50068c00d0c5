//! RIFF/WAVE container path
//!
//! The backend's uncompressed answer is a canonical wave file recorded at
//! whatever rate the model runs at. It is parsed, downmixed, resampled to
//! the target rate and requantized; only PCM samples leave this module,
//! never header bytes.

use std::io::{self, Cursor};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing::{debug, instrument, warn};

use crate::error::SynthesisError;
use crate::resample;
use crate::types::AudioFrame;

/// Length of the canonical minimal wave header
pub const CANONICAL_HEADER_LEN: usize = 44;

/// Most channels accepted in a container before downmixing
const MAX_CHANNELS: u16 = 8;

/// Format fields declared by a container header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Declared source sample rate in Hz
    pub sample_rate: u32,
    /// Declared channel count
    pub channels: u16,
    /// Declared bits per sample
    pub bits_per_sample: u16,
}

/// Parsed container: format plus interleaved 16-bit samples
#[derive(Debug, Clone)]
pub struct ContainerAudio {
    spec: ContainerSpec,
    samples: Vec<i16>,
}

impl ContainerAudio {
    /// Parse a wave container
    ///
    /// A data chunk shorter than declared is accepted up to the last
    /// complete sample.
    ///
    /// # Errors
    ///
    /// Returns `SynthesisError::ContainerParse` if the payload is shorter
    /// than the canonical header, the header is malformed, or the declared
    /// format is not 16-bit integer PCM.
    pub fn parse(bytes: &[u8]) -> Result<Self, SynthesisError> {
        if bytes.len() < CANONICAL_HEADER_LEN {
            return Err(SynthesisError::ContainerParse(format!(
                "container is {} bytes, shorter than the {CANONICAL_HEADER_LEN}-byte header",
                bytes.len()
            )));
        }

        let mut reader = WavReader::new(Cursor::new(bytes))
            .map_err(|e| SynthesisError::ContainerParse(format!("invalid wave header: {e}")))?;
        let spec = validate_spec(reader.spec())?;

        let declared = reader.len() as usize;
        let mut samples = Vec::with_capacity(declared.min(bytes.len() / 2));
        for sample in reader.samples::<i16>() {
            match sample {
                Ok(value) => samples.push(value),
                Err(hound::Error::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!(
                        declared,
                        available = samples.len(),
                        "Container data chunk shorter than declared"
                    );
                    break;
                },
                Err(e) => {
                    return Err(SynthesisError::ContainerParse(format!(
                        "invalid sample data: {e}"
                    )));
                },
            }
        }

        // Drop a trailing partial multi-channel frame
        let channels = usize::from(spec.channels);
        samples.truncate(samples.len() - samples.len() % channels);

        Ok(Self { spec, samples })
    }

    /// Declared format
    #[must_use]
    pub const fn spec(&self) -> ContainerSpec {
        self.spec
    }

    /// Samples per channel
    #[must_use]
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.spec.channels)
    }

    /// Samples downmixed to mono in the unit range
    #[must_use]
    pub fn to_mono(&self) -> Vec<f32> {
        let unit: Vec<f32> = self.samples.iter().copied().map(resample::to_unit).collect();
        resample::downmix_to_mono(&unit, usize::from(self.spec.channels))
    }

    /// Mono 16-bit PCM at `target_rate`
    ///
    /// # Errors
    ///
    /// Returns `SynthesisError::Resample` if resampling fails.
    pub fn resample_to(&self, target_rate: u32) -> Result<Vec<i16>, SynthesisError> {
        self.resample_cancellable(target_rate, || false)
    }

    /// Like [`resample_to`](Self::resample_to), giving up once `cancelled`
    /// reports true
    ///
    /// # Errors
    ///
    /// Returns `SynthesisError::Cancelled` when interrupted and
    /// `SynthesisError::Resample` if resampling fails.
    pub fn resample_cancellable(
        &self,
        target_rate: u32,
        cancelled: impl Fn() -> bool,
    ) -> Result<Vec<i16>, SynthesisError> {
        if self.spec.channels == 1 && self.spec.sample_rate == target_rate {
            return Ok(self.samples.clone());
        }
        let mono = self.to_mono();
        let resampled = resample::resample_mono_cancellable(
            &mono,
            self.spec.sample_rate,
            target_rate,
            cancelled,
        )?;
        Ok(resample::quantize_all(&resampled))
    }
}

fn validate_spec(spec: WavSpec) -> Result<ContainerSpec, SynthesisError> {
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(SynthesisError::ContainerParse(format!(
            "expected 16-bit integer PCM, found {}-bit {:?}",
            spec.bits_per_sample, spec.sample_format
        )));
    }
    if spec.channels == 0 || spec.channels > MAX_CHANNELS {
        return Err(SynthesisError::ContainerParse(format!(
            "unsupported channel count {}",
            spec.channels
        )));
    }
    if spec.sample_rate == 0 {
        return Err(SynthesisError::ContainerParse(
            "declared sample rate is zero".to_string(),
        ));
    }

    Ok(ContainerSpec {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        bits_per_sample: spec.bits_per_sample,
    })
}

/// Decode a whole container into one frame at `target_rate`
///
/// Returns `None` when the container holds no samples.
///
/// # Errors
///
/// Returns `SynthesisError::ContainerParse` for malformed containers and
/// `SynthesisError::Resample` if resampling fails.
pub fn decode_container(
    bytes: &[u8],
    target_rate: u32,
) -> Result<Option<AudioFrame>, SynthesisError> {
    decode_container_cancellable(bytes, target_rate, || false)
}

/// Decode a whole container, checking `cancelled` after parsing and
/// between resampler chunks
///
/// # Errors
///
/// As [`decode_container`], plus `SynthesisError::Cancelled` when
/// interrupted.
#[instrument(skip(bytes, cancelled), fields(len = bytes.len()))]
pub fn decode_container_cancellable(
    bytes: &[u8],
    target_rate: u32,
    cancelled: impl Fn() -> bool,
) -> Result<Option<AudioFrame>, SynthesisError> {
    let audio = ContainerAudio::parse(bytes)?;
    let spec = audio.spec();

    debug!(
        source_rate = spec.sample_rate,
        channels = spec.channels,
        frames = audio.frames(),
        target_rate,
        "Parsed container"
    );

    if cancelled() {
        return Err(SynthesisError::Cancelled);
    }
    if audio.frames() == 0 {
        return Ok(None);
    }

    let pcm = audio.resample_cancellable(target_rate, cancelled)?;
    if pcm.is_empty() {
        return Ok(None);
    }
    Ok(Some(AudioFrame::from_samples(&pcm, target_rate)))
}

/// Encode mono 16-bit samples as a wave file
///
/// # Errors
///
/// Returns `SynthesisError::ContainerParse` if hound fails to write.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>, SynthesisError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(CANONICAL_HEADER_LEN + samples.len() * 2));
    let to_error = |e: hound::Error| SynthesisError::ContainerParse(format!("wave encode: {e}"));
    {
        let mut writer = WavWriter::new(&mut cursor, spec).map_err(to_error)?;
        for sample in samples {
            writer.write_sample(*sample).map_err(to_error)?;
        }
        writer.finalize().map_err(to_error)?;
    }

    Ok(cursor.into_inner())
}
