//! Incremental MPEG audio stream decoder
//!
//! Bytes are pushed as they arrive from the backend. Frame boundaries are
//! found by walking MPEG frame headers; each complete frame is handed to
//! symphonia's layer III decoder (which owns the inter-frame bit
//! reservoir) and comes back out as one mono PCM frame at the target rate.

use bytes::{Buf, BytesMut};
use symphonia::core::audio::{Channels, SampleBuffer};
use symphonia::core::codecs::{CODEC_TYPE_MP3, CodecParameters, Decoder, DecoderOptions};
use symphonia::core::formats::Packet;
use tracing::{debug, trace};

use crate::error::SynthesisError;
use crate::resample::{self, StreamResampler};
use crate::types::AudioFrame;

const HEADER_LEN: usize = 4;
const ID3V2_HEADER_LEN: usize = 10;
const ID3V1_TAG_LEN: usize = 128;

/// Bitrates in kbit/s for MPEG-1 layer III, indexed by the header field
const MPEG1_LAYER3_KBPS: [u32; 16] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0,
];

/// Bitrates in kbit/s for MPEG-2/2.5 layer III
const MPEG2_LAYER3_KBPS: [u32; 16] = [
    0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160, 0,
];

/// MPEG audio version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    /// MPEG-1
    Mpeg1,
    /// MPEG-2 low sampling frequency extension
    Mpeg2,
    /// Unofficial MPEG-2.5 extension
    Mpeg25,
}

/// Fields of one MPEG layer III frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// MPEG version
    pub version: MpegVersion,
    /// Bitrate in kbit/s
    pub bitrate_kbps: u32,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Whether the frame carries one padding byte
    pub padding: bool,
    /// Number of channels (1 or 2)
    pub channels: u8,
    /// Whole frame length in bytes, header included
    pub frame_len: usize,
    /// PCM samples per channel carried by the frame
    pub samples_per_frame: usize,
}

impl FrameHeader {
    /// Parse a 4-byte frame header
    ///
    /// # Errors
    ///
    /// Returns `SynthesisError::Decode` if the sync word is missing or any
    /// field holds a reserved or unsupported value.
    pub fn parse(bytes: [u8; HEADER_LEN]) -> Result<Self, SynthesisError> {
        if bytes[0] != 0xFF || bytes[1] & 0xE0 != 0xE0 {
            return Err(SynthesisError::Decode(format!(
                "invalid sync pattern {:02X} {:02X}",
                bytes[0], bytes[1]
            )));
        }

        let version = match (bytes[1] >> 3) & 0b11 {
            0b00 => MpegVersion::Mpeg25,
            0b10 => MpegVersion::Mpeg2,
            0b11 => MpegVersion::Mpeg1,
            _ => return Err(SynthesisError::Decode("reserved MPEG version".to_string())),
        };

        match (bytes[1] >> 1) & 0b11 {
            0b01 => {},
            0b00 => return Err(SynthesisError::Decode("reserved MPEG layer".to_string())),
            layer => {
                let name = if layer == 0b10 { "II" } else { "I" };
                return Err(SynthesisError::Decode(format!(
                    "unsupported MPEG layer {name}, only layer III streams are decoded"
                )));
            },
        }

        let bitrate_index = usize::from(bytes[2] >> 4);
        let bitrate_kbps = match version {
            MpegVersion::Mpeg1 => MPEG1_LAYER3_KBPS[bitrate_index],
            MpegVersion::Mpeg2 | MpegVersion::Mpeg25 => MPEG2_LAYER3_KBPS[bitrate_index],
        };
        if bitrate_kbps == 0 {
            return Err(SynthesisError::Decode(format!(
                "unsupported bitrate index {bitrate_index}"
            )));
        }

        let base_rate = match (bytes[2] >> 2) & 0b11 {
            0b00 => 44_100,
            0b01 => 48_000,
            0b10 => 32_000,
            _ => return Err(SynthesisError::Decode("reserved sample rate".to_string())),
        };
        let sample_rate = match version {
            MpegVersion::Mpeg1 => base_rate,
            MpegVersion::Mpeg2 => base_rate / 2,
            MpegVersion::Mpeg25 => base_rate / 4,
        };

        let padding = (bytes[2] >> 1) & 1 == 1;
        let channels = if bytes[3] >> 6 == 0b11 { 1 } else { 2 };

        let (samples_per_frame, coefficient) = match version {
            MpegVersion::Mpeg1 => (1152, 144),
            MpegVersion::Mpeg2 | MpegVersion::Mpeg25 => (576, 72),
        };
        let frame_len =
            (coefficient * bitrate_kbps * 1000 / sample_rate) as usize + usize::from(padding);

        Ok(Self {
            version,
            bitrate_kbps,
            sample_rate,
            padding,
            channels,
            frame_len,
            samples_per_frame,
        })
    }
}

/// Length of an ID3v2 tag from its 10-byte header, footer included
fn id3v2_len(header: &[u8]) -> Result<usize, SynthesisError> {
    let size_bytes = &header[6..ID3V2_HEADER_LEN];
    if size_bytes.iter().any(|b| b & 0x80 != 0) {
        return Err(SynthesisError::Decode("invalid ID3v2 tag size".to_string()));
    }
    let size = size_bytes
        .iter()
        .fold(0usize, |acc, b| (acc << 7) | usize::from(*b));
    let footer = if header[5] & 0x10 != 0 {
        ID3V2_HEADER_LEN
    } else {
        0
    };
    Ok(ID3V2_HEADER_LEN + size + footer)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    /// Nothing consumed yet; a leading ID3v2 tag may follow
    Start,
    /// Skipping the remaining bytes of a tag
    SkipTag(usize),
    /// Expecting a frame header at the start of the buffer
    Frames,
}

/// Per-stream symphonia decoder plus optional rate converter
struct FrameCodec {
    decoder: Box<dyn Decoder>,
    sample_rate: u32,
    resampler: Option<StreamResampler>,
}

impl FrameCodec {
    fn new(header: &FrameHeader, target_rate: u32) -> Result<Self, SynthesisError> {
        let channels = if header.channels == 1 {
            Channels::FRONT_LEFT
        } else {
            Channels::FRONT_LEFT | Channels::FRONT_RIGHT
        };

        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_MP3)
            .with_sample_rate(header.sample_rate)
            .with_channels(channels);

        let decoder = symphonia::default::get_codecs()
            .make(&params, &DecoderOptions::default())
            .map_err(|e| SynthesisError::Decode(format!("MPEG decoder unavailable: {e}")))?;

        let resampler = if header.sample_rate == target_rate {
            None
        } else {
            Some(StreamResampler::new(
                header.sample_rate,
                target_rate,
                header.samples_per_frame,
            )?)
        };

        debug!(
            version = ?header.version,
            source_rate = header.sample_rate,
            channels = header.channels,
            bitrate_kbps = header.bitrate_kbps,
            resampling = resampler.is_some(),
            "Initialised MPEG stream decoder"
        );

        Ok(Self {
            decoder,
            sample_rate: header.sample_rate,
            resampler,
        })
    }
}

/// Incremental MPEG layer III decoder producing mono frames
///
/// State is private to one stream: create one per segment.
pub struct Mp3StreamDecoder {
    buffer: BytesMut,
    sync: SyncState,
    codec: Option<FrameCodec>,
    target_rate: u32,
    offset: u64,
    timestamp: u64,
    frames_decoded: u64,
}

impl std::fmt::Debug for Mp3StreamDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mp3StreamDecoder")
            .field("buffered", &self.buffer.len())
            .field("sync", &self.sync)
            .field("target_rate", &self.target_rate)
            .field("offset", &self.offset)
            .field("frames_decoded", &self.frames_decoded)
            .finish_non_exhaustive()
    }
}

impl Mp3StreamDecoder {
    /// Create a decoder emitting frames at `target_rate`
    #[must_use]
    pub fn new(target_rate: u32) -> Self {
        Self {
            buffer: BytesMut::new(),
            sync: SyncState::Start,
            codec: None,
            target_rate,
            offset: 0,
            timestamp: 0,
            frames_decoded: 0,
        }
    }

    /// Number of MPEG frames decoded so far
    #[must_use]
    pub const fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Append bytes received from the backend
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Decode the next complete frame, if one is buffered
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    ///
    /// # Errors
    ///
    /// Returns `SynthesisError::Decode` on a lost sync word, a corrupt
    /// header, or a frame symphonia rejects.
    pub fn next_frame(&mut self) -> Result<Option<AudioFrame>, SynthesisError> {
        loop {
            match self.sync {
                SyncState::Start => {
                    if self.buffer.len() < 3 {
                        return Ok(None);
                    }
                    if &self.buffer[..3] == b"ID3" {
                        if self.buffer.len() < ID3V2_HEADER_LEN {
                            return Ok(None);
                        }
                        let len = id3v2_len(&self.buffer[..ID3V2_HEADER_LEN])?;
                        trace!(len, "Skipping ID3v2 tag");
                        self.sync = SyncState::SkipTag(len);
                    } else {
                        self.sync = SyncState::Frames;
                    }
                },
                SyncState::SkipTag(remaining) => {
                    let n = remaining.min(self.buffer.len());
                    self.consume(n);
                    if n < remaining {
                        self.sync = SyncState::SkipTag(remaining - n);
                        return Ok(None);
                    }
                    self.sync = SyncState::Frames;
                },
                SyncState::Frames => {
                    if self.buffer.len() < HEADER_LEN {
                        return Ok(None);
                    }
                    if &self.buffer[..3] == b"TAG" {
                        if self.buffer.len() < ID3V1_TAG_LEN {
                            return Ok(None);
                        }
                        self.consume(ID3V1_TAG_LEN);
                        continue;
                    }

                    let header = FrameHeader::parse([
                        self.buffer[0],
                        self.buffer[1],
                        self.buffer[2],
                        self.buffer[3],
                    ])
                    .map_err(|e| self.at_offset(e))?;
                    if self.buffer.len() < header.frame_len {
                        return Ok(None);
                    }

                    let frame = self.buffer.split_to(header.frame_len);
                    self.offset += header.frame_len as u64;
                    if let Some(audio) = self.decode_frame(&header, &frame)? {
                        return Ok(Some(audio));
                    }
                },
            }
        }
    }

    /// End of stream: validate leftovers and flush the resampler tail
    ///
    /// Call after [`next_frame`](Self::next_frame) has returned `None`.
    ///
    /// # Errors
    ///
    /// Returns `SynthesisError::Decode` if the stream ends inside a tag or
    /// a frame.
    pub fn finish(&mut self) -> Result<Option<AudioFrame>, SynthesisError> {
        if let SyncState::SkipTag(remaining) = self.sync {
            return Err(SynthesisError::Decode(format!(
                "stream ended inside an ID3v2 tag ({remaining} bytes missing)"
            )));
        }
        if !self.buffer.is_empty() {
            return Err(SynthesisError::Decode(format!(
                "truncated frame: {} trailing bytes at offset {}",
                self.buffer.len(),
                self.offset
            )));
        }

        debug!(frames = self.frames_decoded, "MPEG stream finished");

        let Some(resampler) = self.codec.as_mut().and_then(|c| c.resampler.take()) else {
            return Ok(None);
        };
        let tail = resample::quantize_all(&resampler.finish()?);
        if tail.is_empty() {
            return Ok(None);
        }
        Ok(Some(AudioFrame::from_samples(&tail, self.target_rate)))
    }

    fn consume(&mut self, n: usize) {
        self.buffer.advance(n);
        self.offset += n as u64;
    }

    fn at_offset(&self, err: SynthesisError) -> SynthesisError {
        match err {
            SynthesisError::Decode(msg) => {
                SynthesisError::Decode(format!("{msg} at byte offset {}", self.offset))
            },
            other => other,
        }
    }

    fn decode_frame(
        &mut self,
        header: &FrameHeader,
        frame: &[u8],
    ) -> Result<Option<AudioFrame>, SynthesisError> {
        if let Some(codec) = &self.codec {
            if codec.sample_rate != header.sample_rate {
                return Err(SynthesisError::Decode(format!(
                    "sample rate changed mid-stream from {} to {}",
                    codec.sample_rate, header.sample_rate
                )));
            }
        } else {
            self.codec = Some(FrameCodec::new(header, self.target_rate)?);
        }
        let codec = self
            .codec
            .as_mut()
            .ok_or_else(|| SynthesisError::Decode("decoder not initialised".to_string()))?;

        let duration = header.samples_per_frame as u64;
        let packet = Packet::new_from_slice(0, self.timestamp, duration, frame);
        self.timestamp += duration;

        let decoded = codec.decoder.decode(&packet)?;
        let spec = *decoded.spec();
        let mut samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        samples.copy_interleaved_ref(decoded);
        let mono = resample::downmix_to_mono(samples.samples(), spec.channels.count());

        self.frames_decoded += 1;
        trace!(
            frame = self.frames_decoded,
            samples = mono.len(),
            "Decoded MPEG frame"
        );

        let pcm = match codec.resampler.as_mut() {
            Some(resampler) => resample::quantize_all(&resampler.process(&mono)?),
            None => resample::quantize_all(&mono),
        };
        if pcm.is_empty() {
            return Ok(None);
        }
        Ok(Some(AudioFrame::from_samples(&pcm, self.target_rate)))
    }
}

/// Decode a whole buffered stream (reference, non-incremental)
///
/// # Errors
///
/// Returns `SynthesisError::Decode` for corrupt or truncated input.
pub fn decode_all(payload: &[u8], target_rate: u32) -> Result<Vec<AudioFrame>, SynthesisError> {
    let mut decoder = Mp3StreamDecoder::new(target_rate);
    decoder.push(payload);

    let mut frames = Vec::new();
    while let Some(frame) = decoder.next_frame()? {
        frames.push(frame);
    }
    frames.extend(decoder.finish()?);
    Ok(frames)
}
