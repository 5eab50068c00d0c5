//! Synthesis backend implementations
//!
//! Contains concrete implementations of the `SynthesisClient` port.

pub mod http;

pub use http::HttpSynthesisClient;
