//! Frame publication onto the segment's output channel

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::SynthesisError;
use crate::segment::{CancelSignal, SegmentEnd, SegmentEvent};
use crate::types::{AudioFrame, RequestId, SegmentId, SynthesizedAudio};

/// Tags frames with their segment identity and publishes them in order
///
/// Publishing waits for channel capacity; frames are never dropped. The
/// wait is abandoned as soon as cancellation is requested.
#[derive(Debug)]
pub struct FrameEmitter {
    request_id: RequestId,
    segment_id: SegmentId,
    sender: mpsc::Sender<SegmentEvent>,
    cancel: CancelSignal,
    emitted: u64,
}

impl FrameEmitter {
    /// Create an emitter for one segment
    #[must_use]
    pub const fn new(
        request_id: RequestId,
        segment_id: SegmentId,
        sender: mpsc::Sender<SegmentEvent>,
        cancel: CancelSignal,
    ) -> Self {
        Self {
            request_id,
            segment_id,
            sender,
            cancel,
            emitted: 0,
        }
    }

    /// Segment cancellation flag
    #[must_use]
    pub const fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    /// Frames published so far
    #[must_use]
    pub const fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Publish one frame
    ///
    /// # Errors
    ///
    /// Returns `SynthesisError::Cancelled` if cancellation is requested
    /// before the frame is accepted or the consumer is gone.
    pub async fn emit(&mut self, frame: AudioFrame) -> Result<(), SynthesisError> {
        if self.cancel.is_cancelled() {
            return Err(SynthesisError::Cancelled);
        }

        let samples = frame.samples_per_channel();
        let event = SegmentEvent::Audio(SynthesizedAudio {
            request_id: self.request_id.clone(),
            segment_id: self.segment_id.clone(),
            frame,
        });

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(SynthesisError::Cancelled),
            sent = self.sender.send(event) => {
                if sent.is_err() {
                    debug!(segment_id = %self.segment_id, "Consumer dropped the segment");
                    return Err(SynthesisError::Cancelled);
                }
            },
        }

        self.emitted += 1;
        trace!(
            segment_id = %self.segment_id,
            index = self.emitted,
            samples,
            "Published frame"
        );
        Ok(())
    }

    /// Publish the terminal event
    pub async fn finish(self, end: SegmentEnd) {
        if self.sender.send(SegmentEvent::End(end)).await.is_err() {
            debug!(segment_id = %self.segment_id, "Consumer gone before segment end");
        }
    }
}
