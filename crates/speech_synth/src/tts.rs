//! Text-to-speech adapter for the instruct synthesis backend
//!
//! Each [`TextToSpeech::synthesize`] call spawns one segment task which
//! requests audio, dispatches on the response format, decodes, resamples
//! and publishes mono frames at the configured rate. The task owns all
//! decoder state; nothing is shared between segments.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use crate::config::SynthesisConfig;
use crate::container;
use crate::decoder::Mp3StreamDecoder;
use crate::emitter::FrameEmitter;
use crate::error::SynthesisError;
use crate::format::{self, AudioEncoding};
use crate::inspect::{AudioInspector, DirectoryInspector, InspectStage, NoopInspector};
use crate::ports::{AudioByteStream, SynthesisClient, TextToSpeech};
use crate::providers::HttpSynthesisClient;
use crate::request::SynthesisRequest;
use crate::segment::{CancelSignal, ChunkedStream, SegmentEnd, SegmentState, StateTracker};
use crate::types::{AudioFrame, RequestId, SegmentId, TtsCapabilities};

/// Adapter turning text into PCM frames via the instruct backend
#[derive(Debug)]
pub struct InstructTts<C = HttpSynthesisClient> {
    client: Arc<C>,
    config: SynthesisConfig,
    inspector: Arc<dyn AudioInspector>,
}

impl<C> Clone for InstructTts<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            config: self.config.clone(),
            inspector: Arc::clone(&self.inspector),
        }
    }
}

impl InstructTts<HttpSynthesisClient> {
    /// Create an adapter talking HTTP to `config.base_url`
    ///
    /// Audio dumps are enabled when `config.debug_dump_dir` is set.
    ///
    /// # Errors
    ///
    /// Returns `SynthesisError::Configuration` if the configuration is
    /// invalid.
    pub fn from_config(config: SynthesisConfig) -> Result<Self, SynthesisError> {
        let client = HttpSynthesisClient::new(&config)?;
        let inspector: Arc<dyn AudioInspector> = match &config.debug_dump_dir {
            Some(dir) => Arc::new(DirectoryInspector::new(dir)),
            None => Arc::new(NoopInspector),
        };
        Ok(Self::new(client, config)?.with_inspector(inspector))
    }
}

impl<C: SynthesisClient + 'static> InstructTts<C> {
    /// Create an adapter over any synthesis client
    ///
    /// # Errors
    ///
    /// Returns `SynthesisError::Configuration` if the configuration is
    /// invalid.
    pub fn new(client: C, config: SynthesisConfig) -> Result<Self, SynthesisError> {
        config.validate().map_err(SynthesisError::Configuration)?;
        Ok(Self {
            client: Arc::new(client),
            config,
            inspector: Arc::new(NoopInspector),
        })
    }

    /// Replace the audio inspector
    #[must_use]
    pub fn with_inspector(mut self, inspector: Arc<dyn AudioInspector>) -> Self {
        self.inspector = inspector;
        self
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &SynthesisConfig {
        &self.config
    }
}

impl<C: SynthesisClient + 'static> TextToSpeech for InstructTts<C> {
    fn capabilities(&self) -> TtsCapabilities {
        TtsCapabilities { streaming: false }
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn num_channels(&self) -> u32 {
        1
    }

    /// Start a segment on the current tokio runtime
    #[instrument(skip(self, text), fields(text_len = text.len()))]
    fn synthesize(&self, text: &str) -> Result<ChunkedStream, SynthesisError> {
        let request = SynthesisRequest::build(text, &self.config)?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            SynthesisError::Configuration(format!("synthesize needs a tokio runtime: {e}"))
        })?;

        let request_id = RequestId::generate();
        let segment_id = SegmentId::generate();
        let (events_tx, events_rx) = mpsc::channel(self.config.channel_capacity);
        let (state_tx, state_rx) = watch::channel(SegmentState::Pending);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let task = SegmentTask {
            client: Arc::clone(&self.client),
            request,
            target_rate: self.config.sample_rate,
            inspector: Arc::clone(&self.inspector),
            request_id: request_id.clone(),
            tracker: StateTracker::new(state_tx, segment_id.clone()),
            emitter: FrameEmitter::new(
                request_id.clone(),
                segment_id.clone(),
                events_tx,
                CancelSignal::new(cancel_rx),
            ),
            response_dump: Vec::new(),
            pcm_dump: Vec::new(),
        };

        let span = info_span!("segment", request_id = %request_id, segment_id = %segment_id);
        let handle = runtime.spawn(task.run().instrument(span));
        debug!(%request_id, %segment_id, "Segment started");

        Ok(ChunkedStream::new(
            request_id, segment_id, events_rx, state_rx, cancel_tx, handle,
        ))
    }
}

/// Everything one segment owns while it runs
struct SegmentTask<C> {
    client: Arc<C>,
    request: SynthesisRequest,
    target_rate: u32,
    inspector: Arc<dyn AudioInspector>,
    request_id: RequestId,
    tracker: StateTracker,
    emitter: FrameEmitter,
    response_dump: Vec<u8>,
    pcm_dump: Vec<u8>,
}

impl<C: SynthesisClient + 'static> SegmentTask<C> {
    async fn run(mut self) {
        let end = match self.execute().await {
            Ok(()) => SegmentEnd::Completed,
            Err(SynthesisError::Cancelled) => SegmentEnd::Cancelled,
            Err(e) => SegmentEnd::Failed(e),
        };

        self.dump().await;
        self.tracker.advance(end.state());

        let frames = self.emitter.emitted();
        match &end {
            SegmentEnd::Completed => info!(frames, "Segment completed"),
            SegmentEnd::Cancelled => debug!(frames, "Segment cancelled"),
            SegmentEnd::Failed(e) => warn!(frames, error = %e, "Segment failed"),
        }

        self.emitter.finish(end).await;
    }

    async fn execute(&mut self) -> Result<(), SynthesisError> {
        let cancel = self.emitter.cancel_signal().clone();
        self.tracker.advance(SegmentState::Requesting);

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SynthesisError::Cancelled),
            response = self.client.send(&self.request) => response?,
        };

        self.tracker.advance(SegmentState::Decoding);
        let encoding = format::classify(response.format_tag())?;
        debug!(format_tag = response.format_tag(), %encoding, "Dispatching response");

        let body = response.into_body();
        match encoding {
            AudioEncoding::CompressedStream => self.decode_stream(body, &cancel).await,
            AudioEncoding::RawContainer => self.decode_container(body, &cancel).await,
        }
    }

    async fn next_chunk(
        body: &mut AudioByteStream,
        cancel: &CancelSignal,
    ) -> Result<Option<bytes::Bytes>, SynthesisError> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(SynthesisError::Cancelled),
            chunk = body.next() => chunk.transpose(),
        }
    }

    async fn decode_stream(
        &mut self,
        mut body: AudioByteStream,
        cancel: &CancelSignal,
    ) -> Result<(), SynthesisError> {
        let mut decoder = Mp3StreamDecoder::new(self.target_rate);

        while let Some(chunk) = Self::next_chunk(&mut body, cancel).await? {
            self.record_response(&chunk);
            decoder.push(&chunk);
            loop {
                if cancel.is_cancelled() {
                    return Err(SynthesisError::Cancelled);
                }
                let Some(frame) = decoder.next_frame()? else {
                    break;
                };
                self.publish(frame).await?;
            }
        }

        if let Some(tail) = decoder.finish()? {
            self.publish(tail).await?;
        }
        Ok(())
    }

    async fn decode_container(
        &mut self,
        mut body: AudioByteStream,
        cancel: &CancelSignal,
    ) -> Result<(), SynthesisError> {
        let mut payload = Vec::new();
        while let Some(chunk) = Self::next_chunk(&mut body, cancel).await? {
            payload.extend_from_slice(&chunk);
        }
        self.record_response(&payload);

        let target_rate = self.target_rate;
        let signal = cancel.clone();
        let frame = tokio::task::spawn_blocking(move || {
            container::decode_container_cancellable(&payload, target_rate, || {
                signal.is_cancelled()
            })
        })
        .await
        .map_err(|e| SynthesisError::Resample(format!("Task join error: {e}")))??;

        if cancel.is_cancelled() {
            return Err(SynthesisError::Cancelled);
        }
        if let Some(frame) = frame {
            self.publish(frame).await?;
        }
        Ok(())
    }

    async fn publish(&mut self, frame: AudioFrame) -> Result<(), SynthesisError> {
        if self.tracker.current() == SegmentState::Decoding {
            self.tracker.advance(SegmentState::Emitting);
        }
        if self.inspector.enabled() {
            self.pcm_dump.extend_from_slice(frame.data());
        }
        self.emitter.emit(frame).await
    }

    fn record_response(&mut self, bytes: &[u8]) {
        if self.inspector.enabled() {
            self.response_dump.extend_from_slice(bytes);
        }
    }

    /// Hand the recorded audio to the inspector off the async workers
    async fn dump(&mut self) {
        if !self.inspector.enabled() {
            return;
        }
        let inspector = Arc::clone(&self.inspector);
        let request_id = self.request_id.clone();
        let response = std::mem::take(&mut self.response_dump);
        let pcm = std::mem::take(&mut self.pcm_dump);
        let sample_rate = self.target_rate;

        let written = tokio::task::spawn_blocking(move || {
            if !response.is_empty() {
                inspector.inspect(InspectStage::Response, &request_id, &response, sample_rate);
            }
            if !pcm.is_empty() {
                inspector.inspect(InspectStage::Resampled, &request_id, &pcm, sample_rate);
            }
        })
        .await;
        if let Err(e) = written {
            warn!(error = %e, "Audio inspection task failed");
        }
    }
}
