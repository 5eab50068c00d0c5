//! Layered configuration for the CLI
//!
//! Defaults come from `SynthesisConfig`; an optional `speech_synth.toml`
//! and `SPEECH_SYNTH_*` environment variables override them, and command
//! line flags override everything.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clap::Args;
use config::{Config, ConfigError, Environment, File};
use speech_synth::SynthesisConfig;

/// Default configuration file name (extension optional)
pub const DEFAULT_CONFIG_FILE: &str = "speech_synth";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "SPEECH_SYNTH";

/// Load configuration from file and process environment
///
/// An explicitly named file must exist; the default one is optional.
pub fn load(path: Option<&Path>) -> Result<SynthesisConfig, ConfigError> {
    load_from(path, None)
}

/// Load configuration with an injectable environment (for tests)
pub fn load_from(
    path: Option<&Path>,
    env: Option<HashMap<String, String>>,
) -> Result<SynthesisConfig, ConfigError> {
    let file = match path {
        Some(path) => File::from(path).required(true),
        None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
    };

    // SPEECH_SYNTH_BASE_URL -> base_url
    let environment = Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .source(env);

    Config::builder()
        .add_source(file)
        .add_source(environment)
        .build()?
        .try_deserialize()
}

/// Command line overrides for individual settings
#[derive(Debug, Default, Clone, Args)]
pub struct Overrides {
    /// Synthesis endpoint URL
    #[arg(long, global = true)]
    pub url: Option<String>,

    /// Voice seed
    #[arg(long, global = true)]
    pub seed: Option<i64>,

    /// Speaker style tag
    #[arg(long, global = true)]
    pub style_type: Option<String>,

    /// Speaker instruction prompt
    #[arg(long, global = true)]
    pub prompt: Option<String>,

    /// Target sample rate in Hz
    #[arg(long, global = true)]
    pub sample_rate: Option<u32>,

    /// Request timeout in milliseconds
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Directory for intermediate audio dumps
    #[arg(long, global = true)]
    pub dump_dir: Option<PathBuf>,
}

impl Overrides {
    /// Apply every flag that was given
    pub fn apply(&self, config: &mut SynthesisConfig) {
        if let Some(url) = &self.url {
            config.base_url.clone_from(url);
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(style_type) = &self.style_type {
            config.style_type.clone_from(style_type);
        }
        if let Some(prompt) = &self.prompt {
            config.prompt.clone_from(prompt);
        }
        if let Some(sample_rate) = self.sample_rate {
            config.sample_rate = sample_rate;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.timeout_ms = timeout_ms;
        }
        if let Some(dir) = &self.dump_dir {
            config.debug_dump_dir = Some(dir.clone());
        }
    }
}
