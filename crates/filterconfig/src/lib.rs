//! Shared data model for the color-adjustment engine: the five filter
//! parameters with their declared ranges, plus the TOML engine configuration
//! and named presets.

mod params;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

pub use params::{Field, FilterParameters, ParameterDescriptor, DESCRIPTORS};

/// Named parameter sets, ordered by name.
pub type Presets = BTreeMap<String, FilterParameters>;

/// Neutral mid-gray shown until real pixel data arrives.
pub const DEFAULT_PLACEHOLDER: [u8; 4] = [128, 128, 128, 255];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerPreference {
    #[default]
    Low,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureFilter {
    #[default]
    Linear,
    Nearest,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EngineConfig {
    pub version: u32,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub presets: Presets,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EngineSettings {
    #[serde(default)]
    pub power: PowerPreference,
    /// Minimum spacing between presented frames; zero renders on every
    /// parameter batch.
    #[serde(
        default,
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub frame_interval: Duration,
    #[serde(default = "default_max_texture_size")]
    pub max_texture_size: u32,
    #[serde(default = "default_placeholder")]
    pub placeholder: [u8; 4],
    #[serde(default)]
    pub filter: TextureFilter,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            power: PowerPreference::default(),
            frame_interval: Duration::ZERO,
            max_texture_size: default_max_texture_size(),
            placeholder: default_placeholder(),
            filter: TextureFilter::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: 1,
            engine: EngineSettings::default(),
            presets: Presets::new(),
        }
    }
}

fn default_max_texture_size() -> u32 {
    8192
}

fn default_placeholder() -> [u8; 4] {
    DEFAULT_PLACEHOLDER
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of milliseconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_millis(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_millis(v as u64))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Duration::from_secs_f64(v / 1000.0))
        }
    }

    deserializer.deserialize_any(Visitor)
}

fn serialize_duration<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*value).to_string())
}

impl EngineConfig {
    /// Parses and validates a TOML document. Preset values are clamped into
    /// their declared ranges.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let mut raw: EngineConfig = toml::from_str(input)?;
        raw.validate()?;
        for params in raw.presets.values_mut() {
            *params = params.clamped();
        }
        Ok(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn preset(&self, name: &str) -> Option<FilterParameters> {
        self.presets.get(name).copied()
    }

    pub fn preset_names(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        if self.engine.max_texture_size == 0 {
            return Err(ConfigError::Invalid(
                "engine.max_texture_size must be greater than zero".into(),
            ));
        }

        if self.engine.frame_interval > Duration::from_secs(1) {
            return Err(ConfigError::Invalid(format!(
                "engine.frame_interval of {} is not interactive; expected at most 1s",
                humantime::format_duration(self.engine.frame_interval)
            )));
        }

        for name in self.presets.keys() {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid("preset names may not be empty".into()));
            }
        }

        Ok(())
    }
}
