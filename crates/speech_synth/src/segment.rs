//! Segment lifecycle and the consumer-side handle
//!
//! A segment is one synthesis call. Its task publishes ordered
//! [`SegmentEvent`]s on a bounded channel; the consumer reads them through
//! a [`ChunkedStream`], observes the [`SegmentState`] and may cancel.

use std::fmt;

use futures::Stream;
use futures::stream;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::SynthesisError;
use crate::types::{AudioFrame, RequestId, SegmentId, SynthesizedAudio};

/// Lifecycle state of one segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentState {
    /// Created, request not yet sent
    Pending,
    /// Waiting for the backend to answer
    Requesting,
    /// Response received, audio being decoded
    Decoding,
    /// At least one frame published
    Emitting,
    /// Every frame published
    Completed,
    /// Aborted by an error
    Failed,
    /// Aborted by the consumer
    Cancelled,
}

impl SegmentState {
    /// Check if the state is final
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check if moving to `next` is allowed
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Requesting | Self::Failed | Self::Cancelled),
            Self::Requesting => matches!(next, Self::Decoding | Self::Failed | Self::Cancelled),
            Self::Decoding => matches!(
                next,
                Self::Emitting | Self::Completed | Self::Failed | Self::Cancelled
            ),
            Self::Emitting => matches!(next, Self::Completed | Self::Failed | Self::Cancelled),
            Self::Completed | Self::Failed | Self::Cancelled => false,
        }
    }
}

impl fmt::Display for SegmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Requesting => write!(f, "requesting"),
            Self::Decoding => write!(f, "decoding"),
            Self::Emitting => write!(f, "emitting"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// How a segment ended
#[derive(Debug, Clone)]
pub enum SegmentEnd {
    /// All audio was published
    Completed,
    /// Aborted by an error; frames published before it stand
    Failed(SynthesisError),
    /// Aborted by cancellation
    Cancelled,
}

impl SegmentEnd {
    /// Terminal state matching this outcome
    #[must_use]
    pub const fn state(&self) -> SegmentState {
        match self {
            Self::Completed => SegmentState::Completed,
            Self::Failed(_) => SegmentState::Failed,
            Self::Cancelled => SegmentState::Cancelled,
        }
    }
}

/// One item on a segment's output channel
#[derive(Debug, Clone)]
pub enum SegmentEvent {
    /// A decoded frame, in decode order
    Audio(SynthesizedAudio),
    /// Terminal marker, always last
    End(SegmentEnd),
}

/// Read side of a segment's cancellation flag
///
/// Dropping the write side counts as cancellation.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Wrap a watch receiver
    #[must_use]
    pub const fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx }
    }

    /// Check the flag without waiting
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolve once cancellation is requested
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // Err means the handle was dropped
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// Write side of the segment state, owned by the segment task
#[derive(Debug)]
pub(crate) struct StateTracker {
    tx: watch::Sender<SegmentState>,
    segment_id: SegmentId,
}

impl StateTracker {
    pub(crate) const fn new(tx: watch::Sender<SegmentState>, segment_id: SegmentId) -> Self {
        Self { tx, segment_id }
    }

    pub(crate) fn current(&self) -> SegmentState {
        *self.tx.borrow()
    }

    /// Move to `next`; invalid transitions are logged and ignored
    pub(crate) fn advance(&self, next: SegmentState) -> bool {
        let current = self.current();
        if current == next {
            return true;
        }
        if !current.can_transition_to(next) {
            warn!(
                segment_id = %self.segment_id,
                from = %current,
                to = %next,
                "Ignoring invalid segment state transition"
            );
            return false;
        }

        debug!(
            segment_id = %self.segment_id,
            from = %current,
            to = %next,
            "Segment state transition"
        );
        self.tx.send_replace(next);
        true
    }
}

/// Consumer handle for one segment
///
/// Dropping the handle cancels the segment.
pub struct ChunkedStream {
    request_id: RequestId,
    segment_id: SegmentId,
    events: mpsc::Receiver<SegmentEvent>,
    state: watch::Receiver<SegmentState>,
    cancel: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    finished: bool,
    aborted: bool,
}

impl fmt::Debug for ChunkedStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedStream")
            .field("request_id", &self.request_id)
            .field("segment_id", &self.segment_id)
            .field("state", &*self.state.borrow())
            .field("finished", &self.finished)
            .field("aborted", &self.aborted)
            .finish_non_exhaustive()
    }
}

impl ChunkedStream {
    pub(crate) const fn new(
        request_id: RequestId,
        segment_id: SegmentId,
        events: mpsc::Receiver<SegmentEvent>,
        state: watch::Receiver<SegmentState>,
        cancel: watch::Sender<bool>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            request_id,
            segment_id,
            events,
            state,
            cancel,
            task: Some(task),
            finished: false,
            aborted: false,
        }
    }

    /// Identity of the request behind this segment
    #[must_use]
    pub const fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Identity of this segment
    #[must_use]
    pub const fn segment_id(&self) -> &SegmentId {
        &self.segment_id
    }

    /// Current lifecycle state
    ///
    /// A segment whose task died without reporting an outcome is `Failed`.
    #[must_use]
    pub fn state(&self) -> SegmentState {
        let state = *self.state.borrow();
        if self.aborted && !state.is_terminal() {
            SegmentState::Failed
        } else {
            state
        }
    }

    /// Subscribe to state changes
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SegmentState> {
        self.state.clone()
    }

    /// Request cancellation
    ///
    /// The segment stops at its next suspension point and ends with
    /// [`SegmentEnd::Cancelled`].
    pub fn cancel(&self) {
        debug!(segment_id = %self.segment_id, "Cancellation requested");
        self.cancel.send_replace(true);
    }

    /// Next event; `None` after the terminal event was delivered
    ///
    /// If the task stops without sending its terminal event (a panic or an
    /// abort), a `Failed` end carrying `SynthesisError::Aborted` is
    /// delivered in its place.
    pub async fn next_event(&mut self) -> Option<SegmentEvent> {
        if self.finished {
            return None;
        }
        let event = match self.events.recv().await {
            Some(event) => event,
            None => SegmentEvent::End(SegmentEnd::Failed(self.abort().await)),
        };
        if matches!(event, SegmentEvent::End(_)) {
            self.finished = true;
        }
        Some(event)
    }

    /// Channel closed early: join the task to find out why
    async fn abort(&mut self) -> SynthesisError {
        self.aborted = true;
        let reason = match self.task.take() {
            Some(task) => match task.await {
                Err(e) => format!("segment task failed: {e}"),
                Ok(()) => "segment task ended without a terminal event".to_string(),
            },
            None => "segment task ended without a terminal event".to_string(),
        };
        warn!(segment_id = %self.segment_id, %reason, "Segment ended abnormally");
        SynthesisError::Aborted(reason)
    }

    /// Next frame; `Ok(None)` once the segment completed
    ///
    /// # Errors
    ///
    /// Returns the segment's error if it failed, or
    /// `SynthesisError::Cancelled` if it was cancelled.
    pub async fn next_frame(&mut self) -> Result<Option<SynthesizedAudio>, SynthesisError> {
        match self.next_event().await {
            Some(SegmentEvent::Audio(audio)) => Ok(Some(audio)),
            Some(SegmentEvent::End(SegmentEnd::Completed)) | None => Ok(None),
            Some(SegmentEvent::End(SegmentEnd::Failed(err))) => Err(err),
            Some(SegmentEvent::End(SegmentEnd::Cancelled)) => Err(SynthesisError::Cancelled),
        }
    }

    /// Read every frame and join them into one
    ///
    /// Returns `None` if the segment produced no audio.
    ///
    /// # Errors
    ///
    /// Returns the segment's error if it failed or was cancelled.
    pub async fn collect(mut self) -> Result<Option<AudioFrame>, SynthesisError> {
        let mut frames = Vec::new();
        while let Some(audio) = self.next_frame().await? {
            frames.push(audio.frame);
        }
        AudioFrame::concat(&frames)
    }

    /// Drain remaining events and return the terminal state
    pub async fn wait(mut self) -> SegmentState {
        while self.next_event().await.is_some() {}
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(segment_id = %self.segment_id, error = %e, "Segment task did not finish cleanly");
                self.aborted = true;
            }
        }
        self.state()
    }

    /// Adapt into a stream of frames
    pub fn into_frames(self) -> impl Stream<Item = Result<SynthesizedAudio, SynthesisError>> {
        stream::unfold(Some(self), |state| async move {
            let mut chunked = state?;
            match chunked.next_frame().await {
                Ok(Some(audio)) => Some((Ok(audio), Some(chunked))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    struct Harness {
        events: mpsc::Sender<SegmentEvent>,
        state: StateTracker,
        cancel: CancelSignal,
        stream: ChunkedStream,
    }

    fn harness(capacity: usize) -> Harness {
        let request_id = RequestId::generate();
        let segment_id = SegmentId::generate();
        let (events_tx, events_rx) = mpsc::channel(capacity);
        let (state_tx, state_rx) = watch::channel(SegmentState::Pending);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let stream = ChunkedStream::new(
            request_id,
            segment_id.clone(),
            events_rx,
            state_rx,
            cancel_tx,
            tokio::spawn(async {}),
        );

        Harness {
            events: events_tx,
            state: StateTracker::new(state_tx, segment_id),
            cancel: CancelSignal::new(cancel_rx),
            stream,
        }
    }

    fn audio(stream: &ChunkedStream, samples: &[i16]) -> SegmentEvent {
        SegmentEvent::Audio(SynthesizedAudio {
            request_id: stream.request_id().clone(),
            segment_id: stream.segment_id().clone(),
            frame: AudioFrame::from_samples(samples, 48_000),
        })
    }

    #[test]
    fn happy_path_transitions_are_allowed() {
        use SegmentState::*;
        assert!(Pending.can_transition_to(Requesting));
        assert!(Requesting.can_transition_to(Decoding));
        assert!(Decoding.can_transition_to(Emitting));
        assert!(Emitting.can_transition_to(Completed));
        assert!(Decoding.can_transition_to(Completed));
    }

    #[test]
    fn every_live_state_can_fail_or_cancel() {
        use SegmentState::*;
        for state in [Pending, Requesting, Decoding, Emitting] {
            assert!(state.can_transition_to(Failed), "{state}");
            assert!(state.can_transition_to(Cancelled), "{state}");
            assert!(!state.is_terminal());
        }
    }

    #[test]
    fn terminal_states_are_final() {
        use SegmentState::*;
        for state in [Completed, Failed, Cancelled] {
            assert!(state.is_terminal());
            for next in [Pending, Requesting, Decoding, Emitting, Completed, Failed, Cancelled] {
                assert!(!state.can_transition_to(next), "{state} -> {next}");
            }
        }
    }

    #[test]
    fn skipping_stages_is_rejected() {
        use SegmentState::*;
        assert!(!Pending.can_transition_to(Emitting));
        assert!(!Requesting.can_transition_to(Completed));
        assert!(!Emitting.can_transition_to(Decoding));
    }

    #[test]
    fn end_maps_to_terminal_state() {
        assert_eq!(SegmentEnd::Completed.state(), SegmentState::Completed);
        assert_eq!(
            SegmentEnd::Failed(SynthesisError::Decode("x".to_string())).state(),
            SegmentState::Failed
        );
        assert_eq!(SegmentEnd::Cancelled.state(), SegmentState::Cancelled);
    }

    #[test]
    fn state_serializes_snake_case() {
        let json = serde_json::to_string(&SegmentState::Emitting).unwrap();
        assert_eq!(json, "\"emitting\"");
    }

    #[tokio::test]
    async fn tracker_publishes_valid_transitions_only() {
        let h = harness(4);

        assert!(h.state.advance(SegmentState::Requesting));
        assert_eq!(h.stream.state(), SegmentState::Requesting);

        assert!(!h.state.advance(SegmentState::Completed));
        assert_eq!(h.stream.state(), SegmentState::Requesting);
    }

    #[tokio::test]
    async fn frames_then_completion() {
        let mut h = harness(4);
        h.events.send(audio(&h.stream, &[1, 2])).await.unwrap();
        h.events.send(audio(&h.stream, &[3])).await.unwrap();
        h.events
            .send(SegmentEvent::End(SegmentEnd::Completed))
            .await
            .unwrap();

        let first = h.stream.next_frame().await.unwrap().unwrap();
        assert_eq!(first.segment_id, *h.stream.segment_id());
        assert!(h.stream.next_frame().await.unwrap().is_some());
        assert!(h.stream.next_frame().await.unwrap().is_none());
        assert!(h.stream.next_event().await.is_none());
    }

    #[tokio::test]
    async fn failure_surfaces_after_partial_frames() {
        let h = harness(4);
        h.events.send(audio(&h.stream, &[5])).await.unwrap();
        h.events
            .send(SegmentEvent::End(SegmentEnd::Failed(SynthesisError::Decode(
                "invalid sync pattern".to_string(),
            ))))
            .await
            .unwrap();

        let frames: Vec<_> = h.stream.into_frames().collect().await;
        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_ok());
        assert!(matches!(frames[1], Err(SynthesisError::Decode(_))));
    }

    #[tokio::test]
    async fn collect_joins_frames() {
        let h = harness(4);
        h.events.send(audio(&h.stream, &[1, 2])).await.unwrap();
        h.events.send(audio(&h.stream, &[3])).await.unwrap();
        h.events
            .send(SegmentEvent::End(SegmentEnd::Completed))
            .await
            .unwrap();

        let frame = h.stream.collect().await.unwrap().unwrap();
        assert_eq!(frame.samples().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn collect_reports_cancellation() {
        let h = harness(4);
        h.events
            .send(SegmentEvent::End(SegmentEnd::Cancelled))
            .await
            .unwrap();

        assert!(matches!(
            h.stream.collect().await,
            Err(SynthesisError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn cancel_and_drop_both_signal() {
        let h = harness(1);
        assert!(!h.cancel.is_cancelled());

        h.stream.cancel();
        assert!(h.cancel.is_cancelled());
        h.cancel.cancelled().await;

        let h = harness(1);
        let signal = h.cancel.clone();
        drop(h);
        assert!(signal.is_cancelled());
        signal.cancelled().await;
    }

    #[tokio::test]
    async fn closed_channel_without_end_is_a_failure() {
        let mut h = harness(4);
        h.state.advance(SegmentState::Requesting);
        h.events.send(audio(&h.stream, &[7])).await.unwrap();
        drop(h.events);

        assert!(h.stream.next_frame().await.unwrap().is_some());
        let err = h.stream.next_frame().await.unwrap_err();
        assert!(matches!(err, SynthesisError::Aborted(ref msg) if msg.contains("terminal event")));
        assert_eq!(h.stream.state(), SegmentState::Failed);
        assert!(h.stream.next_event().await.is_none());
    }

    #[tokio::test]
    async fn panicked_task_is_reported_by_collect_and_wait() {
        let (events_tx, events_rx) = mpsc::channel::<SegmentEvent>(1);
        let (_state_tx, state_rx) = watch::channel(SegmentState::Requesting);
        let (cancel_tx, _cancel_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let _events = events_tx;
            panic!("decoder blew up");
        });
        let stream = ChunkedStream::new(
            RequestId::generate(),
            SegmentId::generate(),
            events_rx,
            state_rx,
            cancel_tx,
            task,
        );

        let err = stream.collect().await.unwrap_err();
        assert!(matches!(err, SynthesisError::Aborted(ref msg) if msg.contains("panicked")));
    }

    #[tokio::test]
    async fn wait_reports_failed_when_task_dies() {
        let mut h = harness(4);
        h.state.advance(SegmentState::Requesting);
        drop(h.events);
        h.stream.task = Some(tokio::spawn(async {
            panic!("gone");
        }));

        assert_eq!(h.stream.wait().await, SegmentState::Failed);
    }

    #[tokio::test]
    async fn wait_returns_terminal_state() {
        let h = harness(4);
        h.state.advance(SegmentState::Requesting);
        h.state.advance(SegmentState::Decoding);
        h.state.advance(SegmentState::Completed);
        h.events
            .send(SegmentEvent::End(SegmentEnd::Completed))
            .await
            .unwrap();

        assert_eq!(h.stream.wait().await, SegmentState::Completed);
    }
}
