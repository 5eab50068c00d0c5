//! Response format dispatch
//!
//! Maps the backend's content-type tag onto the decode path that handles it.

use std::fmt;

use crate::error::SynthesisError;

/// Media types carrying a compressed MPEG audio stream
const COMPRESSED_STREAM_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/mp3",
    "audio/mpeg3",
    "audio/x-mpeg",
    "audio/x-mpeg-3",
    "audio/mpa",
];

/// Media types carrying a header-prefixed PCM container
const RAW_CONTAINER_TYPES: &[&str] = &[
    "audio/wav",
    "audio/x-wav",
    "audio/wave",
    "audio/vnd.wave",
    "audio/x-pn-wav",
    "application/octet-stream",
];

/// Encoding of a synthesis response body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioEncoding {
    /// Frame-by-frame compressed stream, decoded incrementally
    CompressedStream,
    /// RIFF/WAVE container at an arbitrary source rate, resampled whole
    RawContainer,
}

impl fmt::Display for AudioEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CompressedStream => write!(f, "compressed-stream"),
            Self::RawContainer => write!(f, "raw-container"),
        }
    }
}

/// Classify a response format tag
///
/// Parameters such as `; charset=binary` are ignored and the comparison is
/// case-insensitive.
///
/// # Errors
///
/// Returns `SynthesisError::UnsupportedFormat` for any tag outside the
/// known media types.
pub fn classify(format_tag: &str) -> Result<AudioEncoding, SynthesisError> {
    let media_type = format_tag
        .split(';')
        .next()
        .unwrap_or(format_tag)
        .trim()
        .to_ascii_lowercase();

    if COMPRESSED_STREAM_TYPES.contains(&media_type.as_str()) {
        Ok(AudioEncoding::CompressedStream)
    } else if RAW_CONTAINER_TYPES.contains(&media_type.as_str()) {
        Ok(AudioEncoding::RawContainer)
    } else {
        Err(SynthesisError::UnsupportedFormat(format_tag.to_string()))
    }
}
