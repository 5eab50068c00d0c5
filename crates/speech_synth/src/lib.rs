//! Speech Synth - text-to-speech adapter for an instruct synthesis backend
//!
//! Turns text into uniform mono 16-bit PCM frames at a fixed target rate,
//! ready for a real-time playback pipeline:
//! - `request` assembles the backend's form-encoded request
//! - `providers` sends it over HTTP (`SynthesisClient` port)
//! - `format` dispatches on the response's content type
//! - `decoder` decodes MPEG audio frame by frame while the body streams in
//! - `container` parses wave containers and `resample` converts their rate
//! - `emitter` publishes frames on a bounded, ordered channel
//!
//! # Architecture
//!
//! This crate follows the ports & adapters pattern:
//! - `ports` module defines the traits (ports)
//! - `providers` module contains concrete implementations (adapters)
//! - `tts` wires them into the `TextToSpeech` adapter
//!
//! # Example
//!
//! ```ignore
//! use speech_synth::{InstructTts, SynthesisConfig, TextToSpeech};
//!
//! let tts = InstructTts::from_config(SynthesisConfig::default())?;
//! let mut stream = tts.synthesize("你好")?;
//! while let Some(audio) = stream.next_frame().await? {
//!     playback.push(audio.frame);
//! }
//! ```

pub mod config;
pub mod container;
pub mod decoder;
pub mod emitter;
pub mod error;
pub mod format;
pub mod inspect;
pub mod ports;
pub mod providers;
pub mod request;
pub mod resample;
pub mod segment;
pub mod tts;
pub mod types;

pub use config::SynthesisConfig;
pub use container::{
    ContainerAudio, ContainerSpec, decode_container, decode_container_cancellable, encode_wav,
};
pub use decoder::{FrameHeader, Mp3StreamDecoder, decode_all};
pub use emitter::FrameEmitter;
pub use error::SynthesisError;
pub use format::{AudioEncoding, classify};
pub use inspect::{AudioInspector, DirectoryInspector, InspectStage, NoopInspector};
pub use ports::{AudioByteStream, SynthesisClient, SynthesisResponse, TextToSpeech};
pub use providers::HttpSynthesisClient;
pub use request::SynthesisRequest;
pub use segment::{CancelSignal, ChunkedStream, SegmentEnd, SegmentEvent, SegmentState};
pub use tts::InstructTts;
pub use types::{AudioFrame, RequestId, SegmentId, SynthesizedAudio, TtsCapabilities};
