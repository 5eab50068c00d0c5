//! Port definitions for speech synthesis
//!
//! Defines the traits (ports) between the adapter core and its
//! collaborators: the remote backend it calls and the playback layer that
//! calls it.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use futures::stream::{self, StreamExt, TryStreamExt};

use crate::error::SynthesisError;
use crate::request::SynthesisRequest;
use crate::segment::ChunkedStream;
use crate::types::TtsCapabilities;

#[cfg(test)]
use mockall::automock;

/// Response body delivered as ordered byte chunks
pub type AudioByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, SynthesisError>> + Send>>;

/// Raw backend answer: a format tag plus the audio body
pub struct SynthesisResponse {
    format_tag: String,
    body: AudioByteStream,
}

impl SynthesisResponse {
    /// Create a response whose body arrives incrementally
    #[must_use]
    pub fn from_stream(format_tag: impl Into<String>, body: AudioByteStream) -> Self {
        Self {
            format_tag: format_tag.into(),
            body,
        }
    }

    /// Create a response from a fully buffered body
    #[must_use]
    pub fn from_bytes(format_tag: impl Into<String>, body: impl Into<Bytes>) -> Self {
        let body: Bytes = body.into();
        Self::from_stream(format_tag, Box::pin(stream::once(async move { Ok(body) })))
    }

    /// Opaque tag naming the body encoding (a content type)
    #[must_use]
    pub fn format_tag(&self) -> &str {
        &self.format_tag
    }

    /// Take the body stream
    #[must_use]
    pub fn into_body(self) -> AudioByteStream {
        self.body
    }

    /// Read the whole body into one buffer
    pub async fn into_bytes(self) -> Result<Bytes, SynthesisError> {
        let chunks: Vec<Bytes> = self.body.try_collect().await?;
        Ok(chunks.concat().into())
    }

    /// Split a buffered body into fixed-size chunks (for tests and replays)
    #[must_use]
    pub fn chunked(format_tag: impl Into<String>, body: &[u8], chunk_size: usize) -> Self {
        let chunks: Vec<Result<Bytes, SynthesisError>> = body
            .chunks(chunk_size.max(1))
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Self::from_stream(format_tag, stream::iter(chunks).boxed())
    }
}

impl fmt::Debug for SynthesisResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesisResponse")
            .field("format_tag", &self.format_tag)
            .finish_non_exhaustive()
    }
}

/// Port for the remote synthesis backend
///
/// Performs one request → one response exchange. Implementations must not
/// retry; failures surface to the segment's caller.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SynthesisClient: Send + Sync {
    /// Send a synthesis request
    ///
    /// # Errors
    ///
    /// Returns `SynthesisError::Network`, `HttpStatus` or `Timeout` on
    /// transport failure.
    async fn send(&self, request: &SynthesisRequest) -> Result<SynthesisResponse, SynthesisError>;
}

/// Port exposed to the playback pipeline
///
/// # Example
///
/// ```ignore
/// use speech_synth::TextToSpeech;
///
/// async fn speak(tts: &impl TextToSpeech, text: &str) -> Result<(), SynthesisError> {
///     let mut stream = tts.synthesize(text)?;
///     while let Some(audio) = stream.next_frame().await? {
///         playback.push(audio.frame);
///     }
///     Ok(())
/// }
/// ```
pub trait TextToSpeech: Send + Sync {
    /// What this adapter supports
    fn capabilities(&self) -> TtsCapabilities;

    /// Sample rate of every emitted frame
    fn sample_rate(&self) -> u32;

    /// Channel count of every emitted frame
    fn num_channels(&self) -> u32;

    /// Start one synthesis segment
    ///
    /// Returns immediately; frames arrive on the returned stream.
    ///
    /// # Errors
    ///
    /// Returns `SynthesisError::Configuration` if the request cannot be
    /// built. All later failures are reported through the stream.
    fn synthesize(&self, text: &str) -> Result<ChunkedStream, SynthesisError>;
}
