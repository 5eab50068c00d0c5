//! Synthesis request assembly

use serde::Serialize;

use crate::config::SynthesisConfig;
use crate::error::SynthesisError;

/// One request to the synthesis backend
///
/// Serializes to the backend's form-encoded wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SynthesisRequest {
    text: String,
    seed: i64,
    style_type: String,
    prompt: String,
    format: u32,
}

impl SynthesisRequest {
    /// Build a request from text and the fixed voice configuration
    ///
    /// # Errors
    ///
    /// Returns `SynthesisError::Configuration` if the text is blank or the
    /// configuration is out of range.
    pub fn build(text: &str, config: &SynthesisConfig) -> Result<Self, SynthesisError> {
        if text.trim().is_empty() {
            return Err(SynthesisError::Configuration(
                "Text cannot be empty".to_string(),
            ));
        }

        config.validate().map_err(SynthesisError::Configuration)?;

        Ok(Self {
            text: text.to_string(),
            seed: config.seed,
            style_type: config.style_type.clone(),
            prompt: config.prompt.clone(),
            format: config.sample_rate,
        })
    }

    /// Text to synthesize
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Voice seed
    #[must_use]
    pub const fn seed(&self) -> i64 {
        self.seed
    }

    /// Speaker style tag
    #[must_use]
    pub fn style_type(&self) -> &str {
        &self.style_type
    }

    /// Speaker instruction prompt
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Target sample-rate marker sent as `format`
    #[must_use]
    pub const fn format(&self) -> u32 {
        self.format
    }

    /// Wire form as ordered name/value pairs
    #[must_use]
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("text", self.text.clone()),
            ("seed", self.seed.to_string()),
            ("style_type", self.style_type.clone()),
            ("prompt", self.prompt.clone()),
            ("format", self.format.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_copies_text_and_voice_settings() {
        let config = SynthesisConfig {
            seed: 7,
            style_type: "英文男".to_string(),
            prompt: "A calm narrator.".to_string(),
            sample_rate: 24_000,
            ..Default::default()
        };

        let request = SynthesisRequest::build("Hello there", &config).unwrap();

        assert_eq!(request.text(), "Hello there");
        assert_eq!(request.seed(), 7);
        assert_eq!(request.style_type(), "英文男");
        assert_eq!(request.prompt(), "A calm narrator.");
        assert_eq!(request.format(), 24_000);
    }

    #[test]
    fn build_rejects_empty_text() {
        let result = SynthesisRequest::build("", &SynthesisConfig::default());
        assert!(matches!(result, Err(SynthesisError::Configuration(_))));
    }

    #[test]
    fn build_rejects_whitespace_text() {
        let result = SynthesisRequest::build("  \n\t", &SynthesisConfig::default());
        assert!(matches!(result, Err(SynthesisError::Configuration(_))));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let config = SynthesisConfig {
            sample_rate: 0,
            ..Default::default()
        };
        let result = SynthesisRequest::build("Hello", &config);
        assert!(matches!(result, Err(SynthesisError::Configuration(_))));
    }

    #[test]
    fn build_is_deterministic() {
        let config = SynthesisConfig::default();
        let a = SynthesisRequest::build("same text", &config).unwrap();
        let b = SynthesisRequest::build("same text", &config).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn serializes_wire_field_names() {
        let request = SynthesisRequest::build("hi", &SynthesisConfig::default()).unwrap();
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["text"], "hi");
        assert_eq!(json["seed"], 42);
        assert_eq!(json["style_type"], "中文女");
        assert_eq!(json["format"], 48_000);
        assert!(json["prompt"].is_string());
    }

    #[test]
    fn form_fields_follow_wire_order() {
        let request = SynthesisRequest::build("hi", &SynthesisConfig::default()).unwrap();
        let fields = request.form_fields();

        let names: Vec<_> = fields.iter().map(|(name, _)| *name).collect();
        assert_eq!(names, ["text", "seed", "style_type", "prompt", "format"]);
        assert_eq!(fields[1].1, "42");
        assert_eq!(fields[4].1, "48000");
    }
}
