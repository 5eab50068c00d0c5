//! Configuration for the synthesis adapter

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Lowest target sample rate accepted
pub const MIN_SAMPLE_RATE: u32 = 8_000;

/// Highest target sample rate accepted
pub const MAX_SAMPLE_RATE: u32 = 192_000;

/// Voice and transport configuration for the synthesis backend
///
/// Injected by the surrounding application; every field has a default so a
/// partial TOML table or environment overlay is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Synthesis endpoint (receives the form-encoded request)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Voice seed forwarded to the backend
    #[serde(default = "default_seed")]
    pub seed: i64,

    /// Speaker style tag
    #[serde(default = "default_style_type")]
    pub style_type: String,

    /// Instruction prompt describing the speaker
    #[serde(default = "default_prompt")]
    pub prompt: String,

    /// Target sample rate of emitted frames in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Capacity of the per-segment output channel (frames)
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Directory receiving intermediate audio dumps (disabled when unset)
    #[serde(default)]
    pub debug_dump_dir: Option<PathBuf>,
}

fn default_base_url() -> String {
    "http://localhost:3000/instruct/synthesize".to_string()
}

const fn default_seed() -> i64 {
    42
}

fn default_style_type() -> String {
    "中文女".to_string()
}

fn default_prompt() -> String {
    "A girl speaker with a brisk pitch, an enthusiastic speaking pace, and a upbeat emotional demeanor."
        .to_string()
}

const fn default_sample_rate() -> u32 {
    48_000
}

const fn default_timeout_ms() -> u64 {
    30000 // 30 seconds
}

const fn default_channel_capacity() -> usize {
    32
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            seed: default_seed(),
            style_type: default_style_type(),
            prompt: default_prompt(),
            sample_rate: default_sample_rate(),
            timeout_ms: default_timeout_ms(),
            channel_capacity: default_channel_capacity(),
            debug_dump_dir: None,
        }
    }
}

impl SynthesisConfig {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), String> {
        let url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| format!("Invalid base URL {:?}: {e}", self.base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(format!(
                "Base URL must use http or https, got {}",
                url.scheme()
            ));
        }

        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(format!(
                "Sample rate must be between {MIN_SAMPLE_RATE} and {MAX_SAMPLE_RATE} Hz, got {}",
                self.sample_rate
            ));
        }

        if self.timeout_ms == 0 {
            return Err("Timeout must be greater than 0".to_string());
        }

        if self.channel_capacity == 0 {
            return Err("Channel capacity must be greater than 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = SynthesisConfig::default();

        assert_eq!(
            config.base_url,
            "http://localhost:3000/instruct/synthesize"
        );
        assert_eq!(config.seed, 42);
        assert_eq!(config.style_type, "中文女");
        assert!(config.prompt.starts_with("A girl speaker"));
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.timeout_ms, 30000);
        assert_eq!(config.channel_capacity, 32);
        assert!(config.debug_dump_dir.is_none());
    }

    #[test]
    fn default_config_is_valid() {
        assert!(SynthesisConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_fails_with_zero_sample_rate() {
        let config = SynthesisConfig {
            sample_rate: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_fails_with_out_of_range_sample_rate() {
        let mut config = SynthesisConfig {
            sample_rate: 4_000,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.sample_rate = 384_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_fails_with_zero_timeout() {
        let config = SynthesisConfig {
            timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_fails_with_zero_channel_capacity() {
        let config = SynthesisConfig {
            channel_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_fails_with_bad_url() {
        let mut config = SynthesisConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.base_url = "ftp://example.com/synth".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.contains("http or https"));
    }

    #[test]
    fn config_deserializes_from_toml() {
        let toml = r#"
            base_url = "http://10.0.0.5:3000/instruct/synthesize"
            seed = 7
            style_type = "英文男"
            prompt = "A calm narrator."
            sample_rate = 24000
            timeout_ms = 60000
            channel_capacity = 4
            debug_dump_dir = "/tmp/tts-dumps"
        "#;

        let config: SynthesisConfig = toml::from_str(toml).unwrap();

        assert_eq!(config.base_url, "http://10.0.0.5:3000/instruct/synthesize");
        assert_eq!(config.seed, 7);
        assert_eq!(config.style_type, "英文男");
        assert_eq!(config.prompt, "A calm narrator.");
        assert_eq!(config.sample_rate, 24000);
        assert_eq!(config.timeout_ms, 60000);
        assert_eq!(config.channel_capacity, 4);
        assert_eq!(
            config.debug_dump_dir,
            Some(PathBuf::from("/tmp/tts-dumps"))
        );
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config: SynthesisConfig = toml::from_str("seed = 1").unwrap();

        assert_eq!(config.seed, 1);
        assert_eq!(config.sample_rate, 48_000);
        assert_eq!(config.style_type, "中文女");
    }
}
